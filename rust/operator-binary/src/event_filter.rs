//! Decides which Deployment events trigger a certificate reconciliation.

use std::collections::BTreeMap;

use stackable_operator::kube::api::ObjectMeta;

use crate::config::CertificateReconcilerConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    /// Deployments in `namespace` carrying all of `match_labels`.
    LabelsAndNamespace {
        match_labels: BTreeMap<String, String>,
        namespace: String,
    },
    /// Deployments in `namespace` called one of `names`.
    NamesAndNamespace {
        names: Vec<String>,
        namespace: String,
    },
}

impl EventFilter {
    /// Uses the explicit Deployment names if any are configured, labels otherwise.
    pub fn new(config: &CertificateReconcilerConfig) -> Self {
        match &config.watch_resources {
            Some(watch_resources) if !watch_resources.deployments.is_empty() => {
                Self::NamesAndNamespace {
                    names: watch_resources.deployments.clone(),
                    namespace: config.namespace.clone(),
                }
            }
            _ => Self::LabelsAndNamespace {
                match_labels: config.match_labels.clone(),
                namespace: config.namespace.clone(),
            },
        }
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        match self {
            Self::LabelsAndNamespace {
                match_labels,
                namespace,
            } => is_in_namespace(meta, namespace) && matches_labels(meta, match_labels),
            Self::NamesAndNamespace { names, namespace } => {
                is_in_namespace(meta, namespace) && matches_name(meta, names)
            }
        }
    }
}

fn is_in_namespace(meta: &ObjectMeta, namespace: &str) -> bool {
    meta.namespace.as_deref() == Some(namespace)
}

fn matches_name(meta: &ObjectMeta, names: &[String]) -> bool {
    meta.name
        .as_ref()
        .is_some_and(|name| names.contains(name))
}

fn matches_labels(meta: &ObjectMeta, match_labels: &BTreeMap<String, String>) -> bool {
    match_labels.iter().all(|(key, value)| {
        meta.labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            == Some(value)
    })
}
