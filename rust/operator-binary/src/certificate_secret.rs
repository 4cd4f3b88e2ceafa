//! One reconciliation pass over the Secret that stores the webhook certificates.

use std::collections::BTreeMap;

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::Secret,
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        ByteString,
    },
    kube::{self, api::ObjectMeta},
};
use time::OffsetDateTime;
use tracing::info;
use webhook_cert_utils::SecretReference;

use crate::{
    certs::{self, Certs},
    client::ClusterClient,
    webhook_config::{crd_conversion_client_config, WebhookConfiguration},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read certificate secret {secret}"))]
    GetSecret {
        source: kube::Error,
        secret: SecretReference,
    },

    #[snafu(display("failed to create certificate secret {secret}"))]
    CreateSecret {
        source: kube::Error,
        secret: SecretReference,
    },

    #[snafu(display("failed to update certificate secret {secret}"))]
    UpdateSecret {
        source: kube::Error,
        secret: SecretReference,
    },

    #[snafu(display("failed to generate certificates for {domain:?}"))]
    GenerateCertificates { source: certs::Error, domain: String },

    #[snafu(display("certificate secret has not been read yet"))]
    SecretNotLoaded,

    #[snafu(display("certificates have not been validated yet"))]
    CertificatesNotValidated,

    #[snafu(display("certificates do not contain a root certificate"))]
    MissingRootCertificate,
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// The certificate Secret as read from the cluster, together with the certificates that it
/// should contain.
#[derive(Debug, Default)]
pub struct CertificateSecret {
    pub secret: Option<Secret>,
    pub certificates: Option<Certs>,
    /// Whether `secret` was read from the cluster rather than built locally.
    pub exists_in_cluster: bool,
}

impl CertificateSecret {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the Secret, or prepares an empty one to be created if it does not exist yet.
    pub async fn set_secret_from_reader(
        &mut self,
        client: &impl ClusterClient,
        secret_ref: &SecretReference,
    ) -> Result<()> {
        match client
            .get_secret(secret_ref)
            .await
            .with_context(|_| GetSecretSnafu {
                secret: secret_ref.clone(),
            })? {
            Some(secret) => {
                self.secret = Some(secret);
                self.exists_in_cluster = true;
            }
            None => {
                self.secret = Some(Secret {
                    metadata: ObjectMeta {
                        name: Some(secret_ref.name.clone()),
                        namespace: Some(secret_ref.namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    data: Some(BTreeMap::new()),
                    ..Secret::default()
                });
                self.exists_in_cluster = false;
            }
        }
        Ok(())
    }

    /// Validates the certificates stored in the Secret, regenerating them where necessary.
    pub fn set_certificates(&mut self, domain: &str, now: OffsetDateTime) -> Result<()> {
        let secret = self.secret.as_ref().context(SecretNotLoadedSnafu)?;
        let mut certificates = Certs::new(domain, now, secret.data.clone());
        certificates
            .validate_certs()
            .context(GenerateCertificatesSnafu { domain })?;
        self.certificates = Some(certificates);
        Ok(())
    }

    /// Whether the Secret already holds exactly the validated certificates.
    pub fn is_recent(&self) -> bool {
        match (&self.secret, &self.certificates) {
            (None, None) => true,
            (Some(secret), Some(certificates)) => {
                secret.data.clone().unwrap_or_default() == certificates.data
            }
            _ => false,
        }
    }

    /// The bundle that webhook callers should trust.
    pub fn ca_bundle(&self) -> Result<&[u8]> {
        self.certificates
            .as_ref()
            .context(CertificatesNotValidatedSnafu)?
            .root_cert()
            .filter(|root_cert| !root_cert.is_empty())
            .context(MissingRootCertificateSnafu)
    }

    pub fn is_bundle_valid(&self, bundle: Option<&ByteString>) -> bool {
        match (bundle, self.ca_bundle()) {
            (Some(bundle), Ok(ca_bundle)) => !bundle.0.is_empty() && bundle.0 == ca_bundle,
            _ => false,
        }
    }

    pub fn are_webhook_configs_valid<W: WebhookConfiguration>(&self, configs: &[W]) -> bool {
        configs
            .iter()
            .flat_map(|config| config.client_configs())
            .all(|client_config| self.is_bundle_valid(client_config.ca_bundle.as_ref()))
    }

    /// CRDs without a conversion webhook are always valid.
    pub fn are_crd_conversions_valid(&self, crds: &[CustomResourceDefinition]) -> bool {
        crds.iter()
            .filter_map(crd_conversion_client_config)
            .all(|client_config| self.is_bundle_valid(client_config.ca_bundle.as_ref()))
    }

    /// Writes the validated certificates to the cluster, unless it already has them.
    ///
    /// Returns whether anything was written.
    pub async fn create_or_update_if_necessary(&mut self, client: &impl ClusterClient) -> Result<bool> {
        if self.is_recent() && self.exists_in_cluster {
            return Ok(false);
        }
        let data = self
            .certificates
            .as_ref()
            .context(CertificatesNotValidatedSnafu)?
            .data
            .clone();
        let secret = self.secret.as_mut().context(SecretNotLoadedSnafu)?;
        secret.data = Some(data);
        let secret_ref = SecretReference::new(
            secret.metadata.name.clone().unwrap_or_default(),
            secret.metadata.namespace.clone().unwrap_or_default(),
        );

        let written = if self.exists_in_cluster {
            info!(secret = %secret_ref, "updating certificate secret");
            client
                .update_secret(secret)
                .await
                .context(UpdateSecretSnafu { secret: secret_ref })?
        } else {
            info!(secret = %secret_ref, "creating certificate secret");
            client
                .create_secret(secret)
                .await
                .context(CreateSecretSnafu { secret: secret_ref })?
        };
        self.secret = Some(written);
        self.exists_in_cluster = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stackable_operator::k8s_openapi::{
        api::{admissionregistration::v1::MutatingWebhookConfiguration, core::v1::Secret},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        ByteString,
    };
    use time::OffsetDateTime;
    use webhook_cert_utils::{SecretReference, ROOT_CERT};

    use super::CertificateSecret;
    use crate::{client::in_memory::InMemoryClusterClient, webhook_config::inject_ca_bundle};

    const DOMAIN: &str = "webhook.tools.svc";

    fn secret_ref() -> SecretReference {
        SecretReference::new("webhook-certs", "tools")
    }

    async fn loaded(client: &InMemoryClusterClient) -> CertificateSecret {
        let mut cert_secret = CertificateSecret::new();
        cert_secret
            .set_secret_from_reader(client, &secret_ref())
            .await
            .unwrap();
        cert_secret
            .set_certificates(DOMAIN, OffsetDateTime::now_utc())
            .unwrap();
        cert_secret
    }

    fn mutating_webhooks() -> MutatingWebhookConfiguration {
        serde_yaml::from_str(
            r#"
apiVersion: admissionregistration.k8s.io/v1
kind: MutatingWebhookConfiguration
metadata:
  name: webhook
webhooks:
  - name: first.webhook.dev
    admissionReviewVersions: ["v1"]
    sideEffects: None
    clientConfig:
      service:
        name: webhook
        namespace: tools
"#,
        )
        .unwrap()
    }

    fn conversion_crd() -> CustomResourceDefinition {
        serde_yaml::from_str(
            r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.webhook.dev
spec:
  group: webhook.dev
  names:
    kind: Widget
    plural: widgets
  scope: Namespaced
  versions: []
  conversion:
    strategy: Webhook
    webhook:
      conversionReviewVersions: ["v1"]
      clientConfig:
        url: https://webhook.tools.svc/convert
"#,
        )
        .unwrap()
    }

    #[test]
    fn empty_is_recent() {
        assert!(CertificateSecret::new().is_recent());
    }

    #[tokio::test]
    async fn missing_secret_is_prepared_for_creation() {
        let client = InMemoryClusterClient::default();
        let cert_secret = loaded(&client).await;
        assert!(!cert_secret.exists_in_cluster);
        assert!(!cert_secret.is_recent());
        let secret = cert_secret.secret.as_ref().unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("webhook-certs"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("tools"));
    }

    #[tokio::test]
    async fn create_then_nothing_to_do() {
        let client = InMemoryClusterClient::default();
        let mut cert_secret = loaded(&client).await;
        assert!(cert_secret
            .create_or_update_if_necessary(&client)
            .await
            .unwrap());
        assert!(cert_secret.exists_in_cluster);
        assert!(cert_secret.is_recent());
        assert_eq!(client.writes(), ["create secret/webhook-certs"]);

        let mut cert_secret = loaded(&client).await;
        assert!(cert_secret.exists_in_cluster);
        assert!(cert_secret.is_recent());
        assert!(!cert_secret
            .create_or_update_if_necessary(&client)
            .await
            .unwrap());
        assert_eq!(client.writes(), ["create secret/webhook-certs"]);
    }

    #[tokio::test]
    async fn stale_secret_is_updated() {
        let client = InMemoryClusterClient::default().with_secret(Secret {
            metadata: stackable_operator::kube::api::ObjectMeta {
                name: Some("webhook-certs".to_string()),
                namespace: Some("tools".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                ROOT_CERT.to_string(),
                ByteString(b"abcd".to_vec()),
            )])),
            ..Secret::default()
        });
        let mut cert_secret = loaded(&client).await;
        assert!(cert_secret.exists_in_cluster);
        assert!(!cert_secret.is_recent());
        assert!(cert_secret
            .create_or_update_if_necessary(&client)
            .await
            .unwrap());
        assert_eq!(client.writes(), ["update secret/webhook-certs"]);
        assert_eq!(
            client.secret(&secret_ref()).unwrap().data.as_ref(),
            Some(&cert_secret.certificates.as_ref().unwrap().data)
        );
    }

    #[tokio::test]
    async fn bundle_validity() {
        let client = InMemoryClusterClient::default();
        let cert_secret = loaded(&client).await;
        let ca_bundle = cert_secret.ca_bundle().unwrap().to_vec();

        assert!(cert_secret.is_bundle_valid(Some(&ByteString(ca_bundle.clone()))));
        assert!(!cert_secret.is_bundle_valid(Some(&ByteString(Vec::new()))));
        assert!(!cert_secret.is_bundle_valid(Some(&ByteString(b"other".to_vec()))));
        assert!(!cert_secret.is_bundle_valid(None));
        assert!(!CertificateSecret::new().is_bundle_valid(Some(&ByteString(ca_bundle))));
    }

    #[tokio::test]
    async fn webhook_configs_validity() {
        let client = InMemoryClusterClient::default();
        let cert_secret = loaded(&client).await;
        let mut config = mutating_webhooks();
        assert!(!cert_secret.are_webhook_configs_valid(&[config.clone()]));

        inject_ca_bundle(&mut config, cert_secret.ca_bundle().unwrap());
        assert!(cert_secret.are_webhook_configs_valid(&[config]));
        assert!(cert_secret.are_webhook_configs_valid::<MutatingWebhookConfiguration>(&[]));
    }

    #[tokio::test]
    async fn crd_conversions_validity() {
        let client = InMemoryClusterClient::default();
        let cert_secret = loaded(&client).await;
        let mut crd = conversion_crd();
        assert!(!cert_secret.are_crd_conversions_valid(&[crd.clone()]));

        crd.spec.conversion.as_mut().unwrap().strategy = "None".to_string();
        assert!(cert_secret.are_crd_conversions_valid(&[crd]));
    }
}
