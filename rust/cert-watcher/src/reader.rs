use async_trait::async_trait;
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{self, Api},
};
use webhook_cert_utils::SecretReference;

/// Read-only access to the certificate Secret.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Returns `Ok(None)` if the Secret does not exist.
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>, kube::Error>;
}

#[derive(Clone)]
pub struct KubeSecretReader {
    client: kube::Client,
}

impl KubeSecretReader {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for KubeSecretReader {
    async fn get_secret(&self, secret_ref: &SecretReference) -> Result<Option<Secret>, kube::Error> {
        Api::<Secret>::namespaced(self.client.clone(), &secret_ref.namespace)
            .get_opt(&secret_ref.name)
            .await
    }
}
