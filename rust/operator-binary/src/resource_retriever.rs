//! Finds the webhook registrations and CRDs whose CABundle follows the managed root CA.

use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        api::admissionregistration::v1::{
            MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
        },
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    },
    kube,
};
use tracing::{error, warn};

use crate::{
    client::ClusterClient,
    config::{CertificateReconcilerConfig, ObservedObjects},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to list MutatingWebhookConfigurations"))]
    ListMutatingWebhooks { source: kube::Error },

    #[snafu(display("failed to list ValidatingWebhookConfigurations"))]
    ListValidatingWebhooks { source: kube::Error },

    #[snafu(display("failed to list CustomResourceDefinitions"))]
    ListCrds { source: kube::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Selects every object carrying all of `match_labels`.
#[derive(Clone, Debug)]
pub struct LabelSelectorRetriever {
    pub match_labels: BTreeMap<String, String>,
}

/// Fetches an explicit list of objects by name.
///
/// Objects that cannot be fetched are logged and skipped.
#[derive(Clone, Debug)]
pub struct ResourceNameRetriever {
    pub watch_resources: ObservedObjects,
}

#[derive(Clone, Debug)]
pub enum ResourceRetriever {
    LabelSelector(LabelSelectorRetriever),
    ResourceName(ResourceNameRetriever),
}

impl ResourceRetriever {
    pub fn new(config: &CertificateReconcilerConfig) -> Self {
        match &config.watch_resources {
            Some(watch_resources) => Self::ResourceName(ResourceNameRetriever {
                watch_resources: watch_resources.clone(),
            }),
            None => Self::LabelSelector(LabelSelectorRetriever {
                match_labels: config.match_labels.clone(),
            }),
        }
    }

    pub async fn get_mutating_webhooks(
        &self,
        client: &impl ClusterClient,
    ) -> Result<Vec<MutatingWebhookConfiguration>> {
        match self {
            Self::LabelSelector(retriever) => client
                .list_mutating_webhooks(&retriever.match_labels)
                .await
                .context(ListMutatingWebhooksSnafu),
            Self::ResourceName(retriever) => {
                let mut configs = Vec::new();
                for name in &retriever.watch_resources.mutating_webhooks {
                    match client.get_mutating_webhook(name).await {
                        Ok(Some(config)) => configs.push(config),
                        Ok(None) => log_not_found("MutatingWebhookConfiguration", name),
                        Err(err) => log_failed_get("MutatingWebhookConfiguration", name, &err),
                    }
                }
                Ok(configs)
            }
        }
    }

    pub async fn get_validating_webhooks(
        &self,
        client: &impl ClusterClient,
    ) -> Result<Vec<ValidatingWebhookConfiguration>> {
        match self {
            Self::LabelSelector(retriever) => client
                .list_validating_webhooks(&retriever.match_labels)
                .await
                .context(ListValidatingWebhooksSnafu),
            Self::ResourceName(retriever) => {
                let mut configs = Vec::new();
                for name in &retriever.watch_resources.validating_webhooks {
                    match client.get_validating_webhook(name).await {
                        Ok(Some(config)) => configs.push(config),
                        Ok(None) => log_not_found("ValidatingWebhookConfiguration", name),
                        Err(err) => log_failed_get("ValidatingWebhookConfiguration", name, &err),
                    }
                }
                Ok(configs)
            }
        }
    }

    pub async fn get_crds(&self, client: &impl ClusterClient) -> Result<Vec<CustomResourceDefinition>> {
        match self {
            Self::LabelSelector(retriever) => client
                .list_crds(&retriever.match_labels)
                .await
                .context(ListCrdsSnafu),
            Self::ResourceName(retriever) => {
                let mut crds = Vec::new();
                for name in &retriever.watch_resources.custom_resource_definitions {
                    match client.get_crd(name).await {
                        Ok(Some(crd)) => crds.push(crd),
                        Ok(None) => log_not_found("CustomResourceDefinition", name),
                        Err(err) => log_failed_get("CustomResourceDefinition", name, &err),
                    }
                }
                Ok(crds)
            }
        }
    }
}

fn log_not_found(kind: &str, name: &str) {
    warn!(k8s.kind = kind, k8s.name = name, "configured object does not exist, skipping");
}

fn log_failed_get(kind: &str, name: &str, err: &kube::Error) {
    error!(
        k8s.kind = kind,
        k8s.name = name,
        error = err as &dyn std::error::Error,
        "failed to retrieve configured object, skipping"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stackable_operator::{
        k8s_openapi::{
            api::admissionregistration::v1::{
                MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
            },
            apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        },
        kube::{api::ObjectMeta, ResourceExt},
    };

    use super::*;
    use crate::client::in_memory::InMemoryClusterClient;

    fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        }
    }

    fn crd(name: &str, labels: &[(&str, &str)]) -> CustomResourceDefinition {
        CustomResourceDefinition {
            metadata: meta(name, labels),
            ..CustomResourceDefinition::default()
        }
    }

    fn cluster() -> InMemoryClusterClient {
        InMemoryClusterClient::default()
            .with_crd(crd("crd1", &[("inject", "true")]))
            .with_crd(crd("crd2", &[]))
            .with_mutating_webhook(MutatingWebhookConfiguration {
                metadata: meta("mwc1", &[("inject", "true")]),
                ..MutatingWebhookConfiguration::default()
            })
            .with_mutating_webhook(MutatingWebhookConfiguration {
                metadata: meta("mwc2", &[("inject", "false")]),
                ..MutatingWebhookConfiguration::default()
            })
            .with_validating_webhook(ValidatingWebhookConfiguration {
                metadata: meta("vwc1", &[("inject", "true")]),
                ..ValidatingWebhookConfiguration::default()
            })
    }

    fn names<K: ResourceExt>(objs: &[K]) -> Vec<String> {
        objs.iter().map(|obj| obj.name_any()).collect()
    }

    fn label_retriever() -> ResourceRetriever {
        ResourceRetriever::LabelSelector(LabelSelectorRetriever {
            match_labels: BTreeMap::from([("inject".to_string(), "true".to_string())]),
        })
    }

    fn name_retriever(watch_resources: ObservedObjects) -> ResourceRetriever {
        ResourceRetriever::ResourceName(ResourceNameRetriever { watch_resources })
    }

    #[tokio::test]
    async fn label_selector_returns_matching_objects() {
        let client = cluster();
        let retriever = label_retriever();
        assert_eq!(names(&retriever.get_crds(&client).await.unwrap()), ["crd1"]);
        assert_eq!(
            names(&retriever.get_mutating_webhooks(&client).await.unwrap()),
            ["mwc1"]
        );
        assert_eq!(
            names(&retriever.get_validating_webhooks(&client).await.unwrap()),
            ["vwc1"]
        );
    }

    #[tokio::test]
    async fn label_selector_without_matches_is_empty() {
        let client = InMemoryClusterClient::default();
        let retriever = label_retriever();
        assert!(retriever.get_crds(&client).await.unwrap().is_empty());
        assert!(retriever.get_mutating_webhooks(&client).await.unwrap().is_empty());
        assert!(retriever.get_validating_webhooks(&client).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn label_selector_propagates_list_failures() {
        let client = cluster().with_failing_lists();
        let retriever = label_retriever();
        assert!(matches!(
            retriever.get_crds(&client).await,
            Err(Error::ListCrds { .. })
        ));
        assert!(matches!(
            retriever.get_mutating_webhooks(&client).await,
            Err(Error::ListMutatingWebhooks { .. })
        ));
        assert!(matches!(
            retriever.get_validating_webhooks(&client).await,
            Err(Error::ListValidatingWebhooks { .. })
        ));
    }

    #[tokio::test]
    async fn resource_name_skips_missing_objects() {
        let client = cluster();
        let retriever = name_retriever(ObservedObjects {
            custom_resource_definitions: vec!["crdX".to_string(), "crd2".to_string()],
            mutating_webhooks: vec!["mwc2".to_string(), "mwcX".to_string()],
            validating_webhooks: vec!["vwcX".to_string()],
            deployments: Vec::new(),
        });
        assert_eq!(names(&retriever.get_crds(&client).await.unwrap()), ["crd2"]);
        assert_eq!(
            names(&retriever.get_mutating_webhooks(&client).await.unwrap()),
            ["mwc2"]
        );
        assert!(retriever
            .get_validating_webhooks(&client)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn variant_follows_config() {
        let config = CertificateReconcilerConfig::new("tools", "webhook");
        assert!(matches!(
            ResourceRetriever::new(&config),
            ResourceRetriever::LabelSelector(_)
        ));

        let config = config.with_watch_resources(ObservedObjects {
            custom_resource_definitions: vec!["crd2".to_string()],
            ..ObservedObjects::default()
        });
        assert!(matches!(
            ResourceRetriever::new(&config),
            ResourceRetriever::ResourceName(_)
        ));
    }
}
