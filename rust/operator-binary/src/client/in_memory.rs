//! In-memory [`ClusterClient`] used by the reconciler tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

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
    kube::{self, core::ErrorResponse, Resource},
};
use webhook_cert_utils::SecretReference;

use super::ClusterClient;

#[derive(Default)]
struct State {
    secrets: BTreeMap<(String, String), Secret>,
    mutating_webhooks: BTreeMap<String, MutatingWebhookConfiguration>,
    validating_webhooks: BTreeMap<String, ValidatingWebhookConfiguration>,
    crds: BTreeMap<String, CustomResourceDefinition>,
    writes: Vec<String>,
    failing_lists: bool,
    failing_updates: BTreeSet<String>,
}

#[derive(Default)]
pub struct InMemoryClusterClient {
    state: Mutex<State>,
}

fn error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn not_found(name: &str) -> kube::Error {
    error(404, "NotFound", format!("{name} not found"))
}

fn name_of<K: Resource>(obj: &K) -> String {
    obj.meta().name.clone().unwrap_or_default()
}

fn has_labels<K: Resource>(obj: &K, match_labels: &BTreeMap<String, String>) -> bool {
    let labels = obj.meta().labels.clone().unwrap_or_default();
    match_labels
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

impl InMemoryClusterClient {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        let key = (
            secret.metadata.namespace.clone().unwrap_or_default(),
            name_of(&secret),
        );
        self.state().secrets.insert(key, secret);
        self
    }

    pub fn with_mutating_webhook(self, config: MutatingWebhookConfiguration) -> Self {
        self.state()
            .mutating_webhooks
            .insert(name_of(&config), config);
        self
    }

    pub fn with_validating_webhook(self, config: ValidatingWebhookConfiguration) -> Self {
        self.state()
            .validating_webhooks
            .insert(name_of(&config), config);
        self
    }

    pub fn with_crd(self, crd: CustomResourceDefinition) -> Self {
        self.state().crds.insert(name_of(&crd), crd);
        self
    }

    /// Makes every list call fail with an internal server error.
    pub fn with_failing_lists(self) -> Self {
        self.state().failing_lists = true;
        self
    }

    /// Makes updates of the object called `name` fail with an internal server error.
    pub fn with_failing_update(self, name: &str) -> Self {
        self.state().failing_updates.insert(name.to_string());
        self
    }

    pub fn secret(&self, secret_ref: &SecretReference) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(secret_ref.namespace.clone(), secret_ref.name.clone()))
            .cloned()
    }

    pub fn mutating_webhook(&self, name: &str) -> Option<MutatingWebhookConfiguration> {
        self.state().mutating_webhooks.get(name).cloned()
    }

    pub fn validating_webhook(&self, name: &str) -> Option<ValidatingWebhookConfiguration> {
        self.state().validating_webhooks.get(name).cloned()
    }

    pub fn crd(&self, name: &str) -> Option<CustomResourceDefinition> {
        self.state().crds.get(name).cloned()
    }

    /// Every successful write so far, as `<verb> <kind>/<name>`.
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    fn check_list(&self) -> Result<(), kube::Error> {
        if self.state().failing_lists {
            return Err(error(500, "InternalError", "list failed".to_string()));
        }
        Ok(())
    }

    fn record_update(&self, kind: &str, name: &str) -> Result<(), kube::Error> {
        let mut state = self.state();
        if state.failing_updates.contains(name) {
            return Err(error(500, "InternalError", format!("update of {name} failed")));
        }
        state.writes.push(format!("update {kind}/{name}"));
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for InMemoryClusterClient {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>, kube::Error> {
        Ok(self.secret(secret_ref))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        let name = name_of(secret);
        let key = (secret.metadata.namespace.clone().unwrap_or_default(), name.clone());
        let mut state = self.state();
        if state.secrets.contains_key(&key) {
            return Err(error(409, "AlreadyExists", format!("{name} already exists")));
        }
        state.secrets.insert(key, secret.clone());
        state.writes.push(format!("create secret/{name}"));
        Ok(secret.clone())
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        let name = name_of(secret);
        let key = (secret.metadata.namespace.clone().unwrap_or_default(), name.clone());
        if !self.state().secrets.contains_key(&key) {
            return Err(not_found(&name));
        }
        self.record_update("secret", &name)?;
        self.state().secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn list_mutating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<MutatingWebhookConfiguration>, kube::Error> {
        self.check_list()?;
        Ok(self
            .state()
            .mutating_webhooks
            .values()
            .filter(|config| has_labels(*config, match_labels))
            .cloned()
            .collect())
    }

    async fn get_mutating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, kube::Error> {
        Ok(self.mutating_webhook(name))
    }

    async fn update_mutating_webhook(
        &self,
        config: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error> {
        let name = name_of(config);
        if self.mutating_webhook(&name).is_none() {
            return Err(not_found(&name));
        }
        self.record_update("mutatingwebhookconfiguration", &name)?;
        self.state()
            .mutating_webhooks
            .insert(name, config.clone());
        Ok(config.clone())
    }

    async fn list_validating_webhooks(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ValidatingWebhookConfiguration>, kube::Error> {
        self.check_list()?;
        Ok(self
            .state()
            .validating_webhooks
            .values()
            .filter(|config| has_labels(*config, match_labels))
            .cloned()
            .collect())
    }

    async fn get_validating_webhook(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, kube::Error> {
        Ok(self.validating_webhook(name))
    }

    async fn update_validating_webhook(
        &self,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<ValidatingWebhookConfiguration, kube::Error> {
        let name = name_of(config);
        if self.validating_webhook(&name).is_none() {
            return Err(not_found(&name));
        }
        self.record_update("validatingwebhookconfiguration", &name)?;
        self.state()
            .validating_webhooks
            .insert(name, config.clone());
        Ok(config.clone())
    }

    async fn list_crds(
        &self,
        match_labels: &BTreeMap<String, String>,
    ) -> Result<Vec<CustomResourceDefinition>, kube::Error> {
        self.check_list()?;
        Ok(self
            .state()
            .crds
            .values()
            .filter(|crd| has_labels(*crd, match_labels))
            .cloned()
            .collect())
    }

    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>, kube::Error> {
        Ok(self.crd(name))
    }

    async fn update_crd(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error> {
        let name = name_of(crd);
        if self.crd(&name).is_none() {
            return Err(not_found(&name));
        }
        self.record_update("customresourcedefinition", &name)?;
        self.state().crds.insert(name, crd.clone());
        Ok(crd.clone())
    }
}
