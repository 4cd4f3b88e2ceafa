use std::fmt::Display;

use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{api::ObjectMeta, runtime::reflector::ObjectRef},
};

/// Fully qualified reference to the Secret holding the webhook certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretReference {
    /// Namespace of the Secret being referred to.
    pub namespace: String,
    /// Name of the Secret being referred to.
    pub name: String,
}

impl SecretReference {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Builds the reference to `<deployment_name><suffix>` in `namespace`.
    pub fn for_deployment(deployment_name: &str, suffix: &str, namespace: &str) -> Self {
        Self::new(format!("{deployment_name}{suffix}"), namespace)
    }

    pub fn matches(&self, secret_meta: &ObjectMeta) -> bool {
        secret_meta.name.as_deref() == Some(&self.name)
            && secret_meta.namespace.as_deref() == Some(&self.namespace)
    }
}

// Use ObjectRef for logging/errors
impl Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        ObjectRef::<Secret>::from(self).fmt(f)
    }
}
impl From<SecretReference> for ObjectRef<Secret> {
    fn from(val: SecretReference) -> Self {
        ObjectRef::<Secret>::from(&val)
    }
}
impl From<&SecretReference> for ObjectRef<Secret> {
    fn from(val: &SecretReference) -> Self {
        ObjectRef::<Secret>::new(&val.name).within(&val.namespace)
    }
}
impl PartialEq<Secret> for SecretReference {
    fn eq(&self, secret: &Secret) -> bool {
        self.matches(&secret.metadata)
    }
}
