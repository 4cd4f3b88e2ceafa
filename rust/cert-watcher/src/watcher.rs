use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    os::unix::fs::OpenOptionsExt as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube,
    time::Duration,
};
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use webhook_cert_utils::{
    expiry::{is_certificate_valid, Asn1TimeParseError},
    SecretReference, SERVER_CERT, SERVER_KEY,
};

use crate::{
    handler::{CertificateHandler, OpenSslCertificateHandler},
    reader::SecretReader,
};

/// Certificates that expire within this window are not written to disk.
pub const DEFAULT_CERTIFICATE_THRESHOLD: Duration = Duration::from_minutes_unchecked(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Delay between attempts while waiting for the first usable certificate.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

const CERTIFICATE_FILE_MODE: u32 = 0o640;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read certificate secret {secret}"))]
    ReadSecret {
        source: kube::Error,
        secret: SecretReference,
    },

    #[snafu(display("certificate secret {secret} does not exist"))]
    SecretNotFound { secret: SecretReference },

    #[snafu(display("failed to parse certificate"))]
    ParseCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("failed to read certificate expiry"))]
    CertificateExpiry { source: Asn1TimeParseError },

    #[snafu(display("certificate in {secret} is outdated"))]
    CertificateOutdated { secret: SecretReference },

    #[snafu(display("certificate secret {secret} has no {key:?} entry"))]
    MissingSecretKey {
        secret: SecretReference,
        key: String,
    },

    #[snafu(display("failed to create certificate directory {path:?}"))]
    CreateCertificateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to write certificate file {path:?}"))]
    WriteCertificateFile {
        source: std::io::Error,
        path: PathBuf,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Blocks webhook server startup until its certificates are available.
#[async_trait]
pub trait WaitForCertificates: Send + Sync {
    /// Returns once valid certificates have been written at least once, or when `shutdown`
    /// is cancelled first. Keeps the certificates updated in the background until `shutdown`.
    async fn wait_for_certificates(self: Arc<Self>, shutdown: CancellationToken);
}

/// Used when certificates are provided by something else, such as a service mesh.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpCertificateWatcher;

#[async_trait]
impl WaitForCertificates for NoOpCertificateWatcher {
    async fn wait_for_certificates(self: Arc<Self>, _shutdown: CancellationToken) {}
}

/// Polls the certificate Secret and writes its server certificate and key to
/// `certificate_directory`.
pub struct CertificateWatcher<R, H = OpenSslCertificateHandler> {
    reader: R,
    handler: H,
    secret_ref: SecretReference,
    certificate_directory: PathBuf,
    certificate_threshold: Duration,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl<R: SecretReader> CertificateWatcher<R> {
    pub fn new(
        reader: R,
        secret_ref: SecretReference,
        certificate_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reader,
            handler: OpenSslCertificateHandler,
            secret_ref,
            certificate_directory: certificate_directory.into(),
            certificate_threshold: DEFAULT_CERTIFICATE_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl<R: SecretReader, H: CertificateHandler> CertificateWatcher<R, H> {
    pub fn with_handler<H2: CertificateHandler>(self, handler: H2) -> CertificateWatcher<R, H2> {
        CertificateWatcher {
            reader: self.reader,
            handler,
            secret_ref: self.secret_ref,
            certificate_directory: self.certificate_directory,
            certificate_threshold: self.certificate_threshold,
            poll_interval: self.poll_interval,
            retry_interval: self.retry_interval,
        }
    }

    pub fn with_certificate_threshold(mut self, certificate_threshold: Duration) -> Self {
        self.certificate_threshold = certificate_threshold;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn certificate_directory(&self) -> &Path {
        &self.certificate_directory
    }

    /// Checks whether the PEM certificate in `cert_data` is still valid for `renewal_threshold`.
    ///
    /// Data that does not contain a PEM certificate counts as outdated, a PEM block that is not
    /// a certificate is an error.
    pub fn validate_certificate_expiration(
        &self,
        cert_data: &[u8],
        renewal_threshold: Duration,
        now: OffsetDateTime,
    ) -> Result<bool> {
        let Some(block) = self.handler.decode(cert_data) else {
            warn!(secret = %self.secret_ref, "could not decode PEM certificate");
            return Ok(false);
        };
        let cert = self.handler.parse(&block).context(ParseCertificateSnafu)?;
        let valid =
            is_certificate_valid(&cert, renewal_threshold, now).context(CertificateExpirySnafu)?;
        if !valid {
            warn!(
                secret = %self.secret_ref,
                valid_until = %cert.not_after(),
                "certificate is outdated, waiting for a new one"
            );
        }
        Ok(valid)
    }

    /// Writes the server certificate and key from the Secret, if the certificate is still valid.
    pub async fn update_certificates_from_secret(&self, now: OffsetDateTime) -> Result<()> {
        let secret = self
            .reader
            .get_secret(&self.secret_ref)
            .await
            .with_context(|_| ReadSecretSnafu {
                secret: self.secret_ref.clone(),
            })?
            .with_context(|| SecretNotFoundSnafu {
                secret: self.secret_ref.clone(),
            })?;

        let cert_data = secret_value(&secret, SERVER_CERT).unwrap_or_default();
        if !self.validate_certificate_expiration(cert_data, self.certificate_threshold, now)? {
            return CertificateOutdatedSnafu {
                secret: self.secret_ref.clone(),
            }
            .fail();
        }

        if !self.certificate_directory.is_dir() {
            debug!(path = ?self.certificate_directory, "creating certificate directory");
            fs::create_dir_all(&self.certificate_directory).with_context(|_| {
                CreateCertificateDirectorySnafu {
                    path: self.certificate_directory.clone(),
                }
            })?;
        }
        for filename in [SERVER_CERT, SERVER_KEY] {
            self.ensure_certificate_file(&secret, filename)?;
        }
        Ok(())
    }

    /// Replaces the contents of `filename` in the certificate directory with the Secret entry
    /// of the same name.
    pub fn ensure_certificate_file(&self, secret: &Secret, filename: &str) -> Result<()> {
        let data = secret_value(secret, filename).with_context(|| MissingSecretKeySnafu {
            secret: self.secret_ref.clone(),
            key: filename,
        })?;
        let path = self.certificate_directory.join(filename);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(CERTIFICATE_FILE_MODE)
            .open(&path)
            .and_then(|mut file| file.write_all(data))
            .context(WriteCertificateFileSnafu { path })
    }

    /// Polls the Secret every `poll_interval` until `shutdown` is cancelled.
    ///
    /// Failures are logged and retried on the next tick.
    pub async fn watch_for_certificates_secret(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(*self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(secret = %self.secret_ref, "stopping certificate watcher");
                    return;
                }
                _ = interval.tick() => {}
            }
            debug!(secret = %self.secret_ref, "checking for new certificates");
            match self
                .update_certificates_from_secret(OffsetDateTime::now_utc())
                .await
            {
                Ok(()) => debug!(secret = %self.secret_ref, "certificates are up to date"),
                Err(err) => error!(
                    secret = %self.secret_ref,
                    error = &err as &dyn std::error::Error,
                    "failed to update certificates"
                ),
            }
        }
    }
}

#[async_trait]
impl<R, H> WaitForCertificates for CertificateWatcher<R, H>
where
    R: SecretReader + 'static,
    H: CertificateHandler + 'static,
{
    async fn wait_for_certificates(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            match self
                .update_certificates_from_secret(OffsetDateTime::now_utc())
                .await
            {
                Ok(()) => {
                    info!(
                        secret = %self.secret_ref,
                        path = ?self.certificate_directory,
                        "certificates are available"
                    );
                    break;
                }
                Err(Error::SecretNotFound { .. }) => {
                    info!(secret = %self.secret_ref, "waiting for certificate secret to be available");
                }
                Err(err) => error!(
                    secret = %self.secret_ref,
                    error = &err as &dyn std::error::Error,
                    "failed to update certificates"
                ),
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(*self.retry_interval) => {}
            }
        }
        tokio::spawn(async move { self.watch_for_certificates_secret(shutdown).await });
    }
}

fn secret_value<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|value| value.0.as_slice())
}
