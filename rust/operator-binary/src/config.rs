use std::collections::BTreeMap;

use snafu::{OptionExt, Snafu};
use stackable_operator::time::Duration;
use webhook_cert_utils::{SecretReference, DEFAULT_SECRET_SUFFIX};

/// Label that marks the webhook Deployment and the registrations whose CABundle is managed.
pub const DEFAULT_MATCH_LABEL_KEY: &str = "webhook-cert-manager.dev/inject-ca-bundle";
pub const DEFAULT_MATCH_LABEL_VALUE: &str = "true";

/// Time until the next reconciliation after a successful one.
pub const DEFAULT_SUCCESS_REQUEUE: Duration = Duration::from_hours_unchecked(3);

/// Explicitly named objects that the reconciler watches and updates, instead of
/// selecting them by label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedObjects {
    pub mutating_webhooks: Vec<String>,
    pub validating_webhooks: Vec<String>,
    pub custom_resource_definitions: Vec<String>,
    pub deployments: Vec<String>,
}

impl ObservedObjects {
    pub fn is_empty(&self) -> bool {
        self.mutating_webhooks.is_empty()
            && self.validating_webhooks.is_empty()
            && self.custom_resource_definitions.is_empty()
            && self.deployments.is_empty()
    }
}

/// Everything the certificate reconciler needs to know about the webhook it manages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateReconcilerConfig {
    /// Namespace of the webhook Deployment, its Service and the certificate Secret.
    pub namespace: String,
    /// Name of the webhook Deployment, which is also the name of its Service.
    pub deployment_name: String,
    pub secret_suffix: String,
    /// When set, the listed objects are used instead of `match_labels`.
    pub watch_resources: Option<ObservedObjects>,
    pub match_labels: BTreeMap<String, String>,
    pub success_requeue: Duration,
    pub stop_after_first_reconcile: bool,
}

impl CertificateReconcilerConfig {
    pub fn new(namespace: impl Into<String>, deployment_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment_name: deployment_name.into(),
            secret_suffix: DEFAULT_SECRET_SUFFIX.to_string(),
            watch_resources: None,
            match_labels: BTreeMap::from([(
                DEFAULT_MATCH_LABEL_KEY.to_string(),
                DEFAULT_MATCH_LABEL_VALUE.to_string(),
            )]),
            success_requeue: DEFAULT_SUCCESS_REQUEUE,
            stop_after_first_reconcile: false,
        }
    }

    pub fn with_secret_suffix(mut self, secret_suffix: impl Into<String>) -> Self {
        self.secret_suffix = secret_suffix.into();
        self
    }

    /// Switches to name-based selection, unless `watch_resources` lists nothing.
    pub fn with_watch_resources(mut self, watch_resources: ObservedObjects) -> Self {
        self.watch_resources = (!watch_resources.is_empty()).then_some(watch_resources);
        self
    }

    pub fn with_match_labels(mut self, match_labels: BTreeMap<String, String>) -> Self {
        self.match_labels = match_labels;
        self
    }

    pub fn with_success_requeue(mut self, success_requeue: Duration) -> Self {
        self.success_requeue = success_requeue;
        self
    }

    pub fn with_stop_after_first_reconcile(mut self, stop_after_first_reconcile: bool) -> Self {
        self.stop_after_first_reconcile = stop_after_first_reconcile;
        self
    }

    /// The Secret that stores the certificates, `<deployment><suffix>`.
    pub fn secret_ref(&self) -> SecretReference {
        SecretReference::for_deployment(&self.deployment_name, &self.secret_suffix, &self.namespace)
    }

    /// The in-cluster DNS name of the webhook Service, `<deployment>.<namespace>.svc`.
    pub fn domain(&self) -> String {
        format!("{}.{}.svc", self.deployment_name, self.namespace)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("label {input:?} must have the form key=value"))]
pub struct InvalidLabelError {
    input: String,
}

/// Parses a single `key=value` label, as accepted by `--match-label`.
pub fn parse_label(input: &str) -> Result<(String, String), InvalidLabelError> {
    let (key, value) = input
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .context(InvalidLabelSnafu { input })?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}
