use openssl::{error::ErrorStack, x509::X509};
use webhook_cert_utils::pem::first_pem_certificate;

#[cfg(test)]
use mockall::automock;

/// Decoding and parsing of the certificate stored in the Secret.
#[cfg_attr(test, automock)]
pub trait CertificateHandler: Send + Sync {
    /// Extracts the first PEM certificate block from `data`, if there is one.
    fn decode(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// Parses a single PEM certificate block.
    fn parse(&self, block: &[u8]) -> Result<X509, ErrorStack>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OpenSslCertificateHandler;

impl CertificateHandler for OpenSslCertificateHandler {
    fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
        first_pem_certificate(data).map(<[u8]>::to_vec)
    }

    fn parse(&self, block: &[u8]) -> Result<X509, ErrorStack> {
        X509::from_pem(block)
    }
}
