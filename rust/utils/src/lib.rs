//! Helpers that are shared between the webhook certificate operator and the
//! certificate watcher embedded in webhook servers, but aren't clearly owned by one of them.

pub mod expiry;
pub mod pem;
pub mod secret_ref;

pub use secret_ref::SecretReference;

/// Secret key holding the PEM-encoded private key of the root CA.
pub const ROOT_KEY: &str = "ca.key";
/// Secret key holding the PEM-encoded root CA certificate, distributed as the CABundle.
pub const ROOT_CERT: &str = "ca.crt";
/// Secret key holding the root CA certificate that was replaced by the last rotation.
pub const ROOT_CERT_OLD: &str = "ca.crt.old";
/// Secret key (and file name on disk) of the webhook server's private key.
pub const SERVER_KEY: &str = "tls.key";
/// Secret key (and file name on disk) of the webhook server's certificate.
pub const SERVER_CERT: &str = "tls.crt";

/// Suffix appended to the webhook Deployment name to build the certificate Secret name.
pub const DEFAULT_SECRET_SUFFIX: &str = "-certs";
