//! Narrow view of the Kubernetes API that the certificate reconciler needs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use stackable_operator::{
    k8s_openapi::{
        api::{
            admissionregistration::v1::{
                MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
            },
            core::v1::Secret,
        },
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    },
    kube::{
        self,
        api::{ListParams, PostParams},
        Api, Resource,
    },
};
use webhook_cert_utils::SecretReference;

#[cfg(test)]
pub mod in_memory;

/// Cluster operations used by the certificate reconciler.
///
/// Reads of single objects return `Ok(None)` if the object does not exist.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>, kube::Error>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error>;
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, kube::Error>;

    async fn list_mutating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<MutatingWebhookConfiguration>, kube::Error>;
    async fn get_mutating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, kube::Error>;
    async fn update_mutating_webhook(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error>;

    async fn list_validating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ValidatingWebhookConfiguration>, kube::Error>;
    async fn get_validating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, kube::Error>;
    async fn update_validating_webhook(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, kube::Error>;

    async fn list_crds(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<CustomResourceDefinition>, kube::Error>;
    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>, kube::Error>;
    async fn update_crd(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error>;
}

/// [`ClusterClient`] backed by a real [`kube::Client`].
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn cluster_scoped<K>(&self) -> Api<K>
    where
        K: Resource,
        K::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

/// Renders `match_labels` as an equality-based label selector (`a=b,c=d`).
pub fn label_selector(match_labels: &BTreeMap<String, String>) -> String {
    match_labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn list_params(match_labels: &BTreeMap<String, String>) -> ListParams {
    ListParams::default().labels(&label_selector(match_labels))
}

fn namespace_of<K: Resource>(obj: &K) -> &str {
    obj.meta().namespace.as_deref().unwrap_or_default()
}

fn name_of<K: Resource>(obj: &K) -> &str {
    obj.meta().name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>, kube::Error> {
        self.secrets(&secret_ref.namespace)
            .get_opt(&secret_ref.name)
            .await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        self.secrets(namespace_of(secret))
            .create(&PostParams::default(), secret)
            .await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        self.secrets(namespace_of(secret))
            .replace(name_of(secret), &PostParams::default(), secret)
            .await
    }

    async fn list_mutating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<MutatingWebhookConfiguration>, kube::Error> {
        let list = self
            .cluster_scoped::<MutatingWebhookConfiguration>()
            .list(&list_params(match_labels))
            .await?;
        Ok(list.items)
    }

    async fn get_mutating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, kube::Error> {
        self.cluster_scoped().get_opt(name).await
    }

    async fn update_mutating_webhook(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error> {
        self.cluster_scoped()
            .replace(name_of(config), &PostParams::default(), config)
            .await
    }

    async fn list_validating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ValidatingWebhookConfiguration>, kube::Error> {
        let list = self
            .cluster_scoped::<ValidatingWebhookConfiguration>()
            .list(&list_params(match_labels))
            .await?;
        Ok(list.items)
    }

    async fn get_validating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, kube::Error> {
        self.cluster_scoped().get_opt(name).await
    }

    async fn update_validating_webhook(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, kube::Error> {
        self.cluster_scoped()
            .replace(name_of(config), &PostParams::default(), config)
            .await
    }

    async fn list_crds(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<CustomResourceDefinition>, kube::Error> {
        let list = self
            .cluster_scoped::<CustomResourceDefinition>()
            .list(&list_params(match_labels))
            .await?;
        Ok(list.items)
    }

    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>, kube::Error> {
        self.cluster_scoped().get_opt(name).await
    }

    async fn update_crd(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error> {
        self.cluster_scoped()
            .replace(name_of(crd), &PostParams::default(), crd)
            .await
    }
}
