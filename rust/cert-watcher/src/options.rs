use std::{path::PathBuf, sync::Arc};

use snafu::{OptionExt as _, Snafu};
use stackable_operator::{kube, time::Duration};
use webhook_cert_utils::SecretReference;

use crate::{
    reader::KubeSecretReader,
    watcher::{
        CertificateWatcher, NoOpCertificateWatcher, WaitForCertificates,
        DEFAULT_CERTIFICATE_THRESHOLD, DEFAULT_POLL_INTERVAL, DEFAULT_RETRY_INTERVAL,
    },
};

pub const DEFAULT_CERTIFICATE_DIR: &str = "/tmp/webhook/certs";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "--certificate-secret-name is required unless certificates are managed externally"
    ))]
    MissingSecretName,

    #[snafu(display(
        "--certificate-namespace is required unless certificates are managed externally"
    ))]
    MissingNamespace,
}

/// Command line options of the certificate watcher, meant to be flattened into the CLI of a
/// webhook server.
#[derive(clap::Args, Clone, Debug, PartialEq, Eq)]
pub struct CertificateWatcherOpts {
    /// Directory that the webhook server loads tls.crt and tls.key from
    #[arg(long, env, default_value = DEFAULT_CERTIFICATE_DIR)]
    pub certificate_dir: PathBuf,

    /// Secret maintained by the webhook certificate operator
    #[arg(long, env)]
    pub certificate_secret_name: Option<String>,

    /// Namespace of the certificate Secret
    #[arg(long, env)]
    pub certificate_namespace: Option<String>,

    /// Certificates expiring within this window are not written to disk
    #[arg(long, env, default_value_t = DEFAULT_CERTIFICATE_THRESHOLD)]
    pub certificate_threshold: Duration,

    /// Interval between checks of the certificate Secret
    #[arg(long, env, default_value_t = DEFAULT_POLL_INTERVAL)]
    pub certificate_poll_interval: Duration,

    /// Interval between attempts while waiting for the first certificate
    #[arg(long, env, default_value_t = DEFAULT_RETRY_INTERVAL)]
    pub certificate_retry_interval: Duration,

    /// Certificates are provided by something else, such as a service mesh
    #[arg(long, env)]
    pub external_certificate_management: bool,
}

impl CertificateWatcherOpts {
    pub fn secret_ref(&self) -> Result<SecretReference, Error> {
        let name = self
            .certificate_secret_name
            .clone()
            .context(MissingSecretNameSnafu)?;
        let namespace = self
            .certificate_namespace
            .clone()
            .context(MissingNamespaceSnafu)?;
        Ok(SecretReference::new(name, namespace))
    }

    /// Builds the watcher selected by these options.
    pub fn watcher(&self, client: kube::Client) -> Result<Arc<dyn WaitForCertificates>, Error> {
        if self.external_certificate_management {
            return Ok(Arc::new(NoOpCertificateWatcher));
        }
        let watcher = CertificateWatcher::new(
            KubeSecretReader::new(client),
            self.secret_ref()?,
            &self.certificate_dir,
        )
        .with_certificate_threshold(self.certificate_threshold)
        .with_poll_interval(self.certificate_poll_interval)
        .with_retry_interval(self.certificate_retry_interval);
        Ok(Arc::new(watcher))
    }
}
