//! Reconciles the webhook certificates whenever the webhook Deployment or the certificate
//! Secret changes, and periodically after that.

use std::{sync::Arc, time::Duration};

use const_format::concatcp;
use futures::StreamExt;
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::{apps::v1::Deployment, core::v1::Secret},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    },
    kube::{
        self,
        runtime::{
            controller::{self, Action},
            reflector::ObjectRef,
            watcher, Controller,
        },
        Api, ResourceExt,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webhook_cert_utils::SecretReference;

use crate::{
    certificate_secret::{self, CertificateSecret},
    client::{label_selector, ClusterClient, KubeClusterClient},
    config::CertificateReconcilerConfig,
    event_filter::EventFilter,
    resource_retriever::ResourceRetriever,
    webhook_config::{inject_ca_bundle, inject_crd_ca_bundle, BundleInjection, WebhookConfiguration},
    OPERATOR_NAME,
};

const CONTROLLER_NAME: &str = "webhook-certificate";
pub const FULL_CONTROLLER_NAME: &str = concatcp!(CONTROLLER_NAME, ".", OPERATOR_NAME);

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to read the certificate secret"))]
    ReadSecret { source: certificate_secret::Error },

    #[snafu(display("failed to validate the certificates"))]
    ValidateCertificates { source: certificate_secret::Error },

    #[snafu(display("failed to store the certificates"))]
    PersistSecret { source: certificate_secret::Error },

    #[snafu(display("failed to load the CA bundle"))]
    LoadCaBundle { source: certificate_secret::Error },

    #[snafu(display("failed to inject the CA bundle into MutatingWebhookConfiguration {name:?}"))]
    UpdateMutatingWebhook { source: kube::Error, name: String },

    #[snafu(display(
        "failed to inject the CA bundle into ValidatingWebhookConfiguration {name:?}"
    ))]
    UpdateValidatingWebhook { source: kube::Error, name: String },

    #[snafu(display("failed to inject the CA bundle into CustomResourceDefinitions {crds:?}"))]
    UpdateCrds { crds: Vec<String> },
}
type Result<T, E = Error> = std::result::Result<T, E>;

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Secret and CA bundles already matched, nothing was written.
    UpToDate,
    /// The Secret or at least one CA bundle was written.
    Updated,
}

/// Keeps the certificate Secret and the CA bundles of the selected webhook registrations in sync.
///
/// Every call starts from scratch, so reconciling an already correct state writes nothing.
pub struct CertificateReconciler<C> {
    client: C,
    retriever: ResourceRetriever,
    secret_ref: SecretReference,
    domain: String,
}

impl<C: ClusterClient> CertificateReconciler<C> {
    pub fn new(client: C, config: &CertificateReconcilerConfig) -> Self {
        Self {
            client,
            retriever: ResourceRetriever::new(config),
            secret_ref: config.secret_ref(),
            domain: config.domain(),
        }
    }

    pub async fn reconcile_certificates(&self, now: OffsetDateTime) -> Result<ReconcileOutcome> {
        // A failing lookup must not block the certificate rotation itself.
        let mutating_webhooks = self
            .retriever
            .get_mutating_webhooks(&self.client)
            .await
            .unwrap_or_else(|err| {
                error!(
                    error = &err as &dyn std::error::Error,
                    "could not find MutatingWebhookConfigurations"
                );
                Vec::new()
            });
        let validating_webhooks = self
            .retriever
            .get_validating_webhooks(&self.client)
            .await
            .unwrap_or_else(|err| {
                error!(
                    error = &err as &dyn std::error::Error,
                    "could not find ValidatingWebhookConfigurations"
                );
                Vec::new()
            });
        let crds = self
            .retriever
            .get_crds(&self.client)
            .await
            .unwrap_or_else(|err| {
                error!(
                    error = &err as &dyn std::error::Error,
                    "could not find CustomResourceDefinitions"
                );
                Vec::new()
            });

        let mut cert_secret = CertificateSecret::new();
        cert_secret
            .set_secret_from_reader(&self.client, &self.secret_ref)
            .await
            .context(ReadSecretSnafu)?;
        cert_secret
            .set_certificates(&self.domain, now)
            .context(ValidateCertificatesSnafu)?;

        if cert_secret.exists_in_cluster
            && cert_secret.is_recent()
            && cert_secret.are_webhook_configs_valid(&mutating_webhooks)
            && cert_secret.are_webhook_configs_valid(&validating_webhooks)
            && cert_secret.are_crd_conversions_valid(&crds)
        {
            info!(secret = %self.secret_ref, "certificates are up to date, skipping update");
            return Ok(ReconcileOutcome::UpToDate);
        }

        cert_secret
            .create_or_update_if_necessary(&self.client)
            .await
            .context(PersistSecretSnafu)?;
        let bundle = cert_secret.ca_bundle().context(LoadCaBundleSnafu)?;

        for config in mutating_webhooks
            .into_iter()
            .filter_map(|config| with_injected_ca_bundle(config, bundle))
        {
            self.client
                .update_mutating_webhook(&config)
                .await
                .with_context(|_| UpdateMutatingWebhookSnafu {
                    name: config.name_any(),
                })?;
        }
        for config in validating_webhooks
            .into_iter()
            .filter_map(|config| with_injected_ca_bundle(config, bundle))
        {
            self.client
                .update_validating_webhook(&config)
                .await
                .with_context(|_| UpdateValidatingWebhookSnafu {
                    name: config.name_any(),
                })?;
        }
        self.update_crds(crds, bundle).await?;

        Ok(ReconcileOutcome::Updated)
    }

    /// Tries every CRD before reporting the ones that could not be updated.
    async fn update_crds(&self, crds: Vec<CustomResourceDefinition>, bundle: &[u8]) -> Result<()> {
        let mut failed = Vec::new();
        for mut crd in crds {
            let name = crd.name_any();
            match inject_crd_ca_bundle(&mut crd, bundle) {
                BundleInjection::NoWebhooks => {
                    info!(crd = %name, "no conversion webhook configured, skipping");
                }
                BundleInjection::Unchanged => {}
                BundleInjection::Updated => {
                    info!(crd = %name, "injecting CA bundle into CRD conversion webhook");
                    if let Err(err) = self.client.update_crd(&crd).await {
                        error!(
                            crd = %name,
                            error = &err as &dyn std::error::Error,
                            "failed to update CRD conversion webhook"
                        );
                        failed.push(name);
                    }
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            UpdateCrdsSnafu { crds: failed }.fail()
        }
    }
}

/// Injects `bundle` into `config`, returning it only if it has to be written back.
fn with_injected_ca_bundle<W: WebhookConfiguration>(mut config: W, bundle: &[u8]) -> Option<W> {
    let kind = W::kind(&());
    let name = config.name_any();
    match inject_ca_bundle(&mut config, bundle) {
        BundleInjection::NoWebhooks => {
            warn!(
                k8s.kind = %kind,
                k8s.name = %name,
                "webhook configuration has no webhooks, cannot inject CA bundle"
            );
            None
        }
        BundleInjection::Unchanged => {
            debug!(k8s.kind = %kind, k8s.name = %name, "CA bundle is already up to date");
            None
        }
        BundleInjection::Updated => {
            info!(k8s.kind = %kind, k8s.name = %name, "injecting CA bundle");
            Some(config)
        }
    }
}

struct Ctx {
    reconciler: CertificateReconciler<KubeClusterClient>,
    event_filter: EventFilter,
    success_requeue: Duration,
    stop_after_first_reconcile: bool,
    shutdown: CancellationToken,
}

pub async fn start(client: &stackable_operator::client::Client, config: CertificateReconcilerConfig) {
    let kube_client = client.as_kube_client();
    let event_filter = EventFilter::new(&config);
    let secret_ref = config.secret_ref();
    let shutdown = CancellationToken::new();

    let deployments_config = match &event_filter {
        EventFilter::LabelsAndNamespace { match_labels, .. } if !match_labels.is_empty() => {
            watcher::Config::default().labels(&label_selector(match_labels))
        }
        _ => watcher::Config::default(),
    };
    let controller = Controller::new(
        Api::<Deployment>::namespaced(kube_client.clone(), &config.namespace),
        deployments_config,
    );
    let deployments = controller.store();

    controller
        .watches(
            Api::<Secret>::namespaced(kube_client.clone(), &secret_ref.namespace),
            watcher::Config::default().fields(&format!("metadata.name={}", secret_ref.name)),
            {
                let event_filter = event_filter.clone();
                move |_secret| {
                    deployments
                        .state()
                        .into_iter()
                        .filter(|deployment| event_filter.matches(&deployment.metadata))
                        .map(|deployment| ObjectRef::from_obj(&*deployment))
                        .collect::<Vec<_>>()
                }
            },
        )
        .shutdown_on_signal()
        .run(
            reconcile,
            error_policy,
            Arc::new(Ctx {
                reconciler: CertificateReconciler::new(KubeClusterClient::new(kube_client), &config),
                event_filter,
                success_requeue: *config.success_requeue,
                stop_after_first_reconcile: config.stop_after_first_reconcile,
                shutdown: shutdown.clone(),
            }),
        )
        .take_until(shutdown.cancelled_owned())
        .for_each(|res| async move {
            match res {
                Ok((deployment, action)) => {
                    debug!(deployment = %deployment, ?action, "reconciled webhook certificates")
                }
                Err(controller::Error::ReconcilerFailed(err, deployment)) => error!(
                    deployment = %deployment,
                    category = err.category(),
                    error = &err as &dyn std::error::Error,
                    "failed to reconcile webhook certificates"
                ),
                Err(err) => error!(
                    error = &err as &dyn std::error::Error,
                    "webhook certificate controller failed"
                ),
            }
        })
        .await;
}

async fn reconcile(deployment: Arc<Deployment>, ctx: Arc<Ctx>) -> Result<Action> {
    if !ctx.event_filter.matches(&deployment.metadata) {
        debug!(
            deployment = %ObjectRef::from_obj(&*deployment),
            "deployment does not match, ignoring"
        );
        return Ok(Action::await_change());
    }
    info!(
        deployment = %ObjectRef::from_obj(&*deployment),
        "reconciling webhook certificates"
    );
    ctx.reconciler
        .reconcile_certificates(OffsetDateTime::now_utc())
        .await?;
    if ctx.stop_after_first_reconcile {
        info!("stopping controller after the certificates have been provisioned");
        ctx.shutdown.cancel();
    }
    Ok(Action::requeue(ctx.success_requeue))
}

fn error_policy(_obj: Arc<Deployment>, _error: &Error, _ctx: Arc<Ctx>) -> Action {
    Action::requeue(Duration::from_secs(5))
}
