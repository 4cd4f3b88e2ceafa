//! Access to the CABundles embedded in webhook registrations and CRD conversion webhooks.

use stackable_operator::{
    k8s_openapi::{
        api::admissionregistration::v1::{
            MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
        },
        apiextensions_apiserver::pkg::apis::apiextensions::v1::{
            CustomResourceDefinition, WebhookClientConfig as ConversionClientConfig,
        },
        ByteString,
    },
    kube::Resource,
};

/// CRD conversion strategy that calls out to a webhook.
const WEBHOOK_CONVERSION_STRATEGY: &str = "Webhook";

/// Outcome of [`inject_ca_bundle`] and [`inject_crd_ca_bundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleInjection {
    /// There is no client config that could take the bundle.
    NoWebhooks,
    /// Every client config already carried the bundle.
    Unchanged,
    /// At least one client config was changed and the object must be written back.
    Updated,
}

/// Admission webhook registration whose entries each carry a [`WebhookClientConfig`].
pub trait WebhookConfiguration: Resource<DynamicType = ()> + Clone + Send + Sync {
    fn client_configs(&self) -> Vec<&WebhookClientConfig>;
    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig>;
}

impl WebhookConfiguration for MutatingWebhookConfiguration {
    fn client_configs(&self) -> Vec<&WebhookClientConfig> {
        self.webhooks
            .iter()
            .flatten()
            .map(|webhook| &webhook.client_config)
            .collect()
    }

    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig> {
        self.webhooks
            .iter_mut()
            .flatten()
            .map(|webhook| &mut webhook.client_config)
            .collect()
    }
}

impl WebhookConfiguration for ValidatingWebhookConfiguration {
    fn client_configs(&self) -> Vec<&WebhookClientConfig> {
        self.webhooks
            .iter()
            .flatten()
            .map(|webhook| &webhook.client_config)
            .collect()
    }

    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig> {
        self.webhooks
            .iter_mut()
            .flatten()
            .map(|webhook| &mut webhook.client_config)
            .collect()
    }
}

fn bundle_matches(ca_bundle: &Option<ByteString>, bundle: &[u8]) -> bool {
    ca_bundle.as_ref().map(|ca_bundle| ca_bundle.0.as_slice()) == Some(bundle)
}

/// Sets the CABundle of every webhook of `config` to `bundle`.
pub fn inject_ca_bundle(config: &mut impl WebhookConfiguration, bundle: &[u8]) -> BundleInjection {
    let client_configs = config.client_configs_mut();
    if client_configs.is_empty() {
        return BundleInjection::NoWebhooks;
    }
    let mut injection = BundleInjection::Unchanged;
    for client_config in client_configs {
        if !bundle_matches(&client_config.ca_bundle, bundle) {
            client_config.ca_bundle = Some(ByteString(bundle.to_vec()));
            injection = BundleInjection::Updated;
        }
    }
    injection
}

/// The client config of the conversion webhook of `crd`, if it converts through a webhook.
pub fn crd_conversion_client_config(
    crd: &CustomResourceDefinition,
) -> Option<&ConversionClientConfig> {
    let conversion = crd.spec.conversion.as_ref()?;
    if conversion.strategy != WEBHOOK_CONVERSION_STRATEGY {
        return None;
    }
    conversion.webhook.as_ref()?.client_config.as_ref()
}

fn conversion_client_config_mut(
    crd: &mut CustomResourceDefinition,
) -> Option<&mut ConversionClientConfig> {
    let conversion = crd.spec.conversion.as_mut()?;
    if conversion.strategy != WEBHOOK_CONVERSION_STRATEGY {
        return None;
    }
    conversion.webhook.as_mut()?.client_config.as_mut()
}

/// Sets the CABundle of the conversion webhook of `crd` to `bundle`.
pub fn inject_crd_ca_bundle(crd: &mut CustomResourceDefinition, bundle: &[u8]) -> BundleInjection {
    match conversion_client_config_mut(crd) {
        None => BundleInjection::NoWebhooks,
        Some(client_config) if bundle_matches(&client_config.ca_bundle, bundle) => {
            BundleInjection::Unchanged
        }
        Some(client_config) => {
            client_config.ca_bundle = Some(ByteString(bundle.to_vec()));
            BundleInjection::Updated
        }
    }
}
