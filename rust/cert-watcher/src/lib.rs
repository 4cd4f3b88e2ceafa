//! Keeps the certificate of an admission webhook server on disk in sync with the Secret that
//! the webhook certificate operator maintains.
//!
//! The webhook server calls [`WaitForCertificates::wait_for_certificates`] before it starts
//! serving TLS, and must reload the files whenever they change afterwards.

pub mod handler;
pub mod options;
pub mod reader;
pub mod watcher;

pub use handler::{CertificateHandler, OpenSslCertificateHandler};
pub use options::CertificateWatcherOpts;
pub use reader::{KubeSecretReader, SecretReader};
pub use watcher::{CertificateWatcher, NoOpCertificateWatcher, WaitForCertificates};
