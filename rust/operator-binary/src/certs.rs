//! Generation and validation of the self-signed root CA and the webhook server certificate.

use std::collections::BTreeMap;

use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    conf::{Conf, ConfMethod},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    x509::{
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        X509Builder, X509NameBuilder, X509Ref, X509,
    },
};
use snafu::{ResultExt, Snafu};
use stackable_operator::{k8s_openapi::ByteString, time::Duration};
use time::OffsetDateTime;
use tracing::{debug, info};
use webhook_cert_utils::{
    expiry::is_certificate_valid, ROOT_CERT, ROOT_CERT_OLD, ROOT_KEY, SERVER_CERT, SERVER_KEY,
};

/// How long a freshly generated root CA is valid for.
pub const ROOT_CERT_LIFETIME: Duration = Duration::from_days_unchecked(365);

/// How long a freshly generated server certificate is valid for.
pub const SERVER_CERT_LIFETIME: Duration = Duration::from_days_unchecked(7);

/// Certificates are renewed when they expire within this window.
pub const RENEWAL_THRESHOLD: Duration = Duration::from_hours_unchecked(12);

/// Tolerance for clock skew between the operator and the webhook callers.
const NOT_BEFORE_SKEW: Duration = Duration::from_minutes_unchecked(5);

const SERIAL_BITS: i32 = 128;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to generate {tpe} key"))]
    GenerateKey {
        source: openssl::error::ErrorStack,
        tpe: CertType,
    },

    #[snafu(display("failed to build {tpe} certificate"))]
    BuildCertificate {
        source: openssl::error::ErrorStack,
        tpe: CertType,
    },

    #[snafu(display("failed to serialize {tpe} certificate"))]
    SerializeCertificate {
        source: openssl::error::ErrorStack,
        tpe: CertType,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CertType {
    Root,
    Server,
}

/// A root CA key pair that has been parsed from (or freshly written into) the certificate data.
struct RootCa {
    key: PKey<Private>,
    cert: X509,
}

/// Certificate bundle of a single webhook server.
///
/// `src_data` is the bundle as it was found in the cluster, `data` is the bundle that should be
/// stored after [`Certs::validate_certs`] has run.
#[derive(Debug, Clone)]
pub struct Certs {
    pub domain: String,
    pub now: OffsetDateTime,
    pub src_data: Option<BTreeMap<String, ByteString>>,
    pub data: BTreeMap<String, ByteString>,
}

impl Certs {
    pub fn new(
        domain: impl Into<String>,
        now: OffsetDateTime,
        src_data: Option<BTreeMap<String, ByteString>>,
    ) -> Self {
        Self {
            domain: domain.into(),
            now,
            src_data,
            data: BTreeMap::new(),
        }
    }

    /// Makes sure that `data` contains a valid root CA and server certificate for `domain`.
    ///
    /// Missing, unparseable or expiring certificates are regenerated. Only failures to create new
    /// key material are reported as errors.
    pub fn validate_certs(&mut self) -> Result<()> {
        if let Some(src_data) = &self.src_data {
            self.data = src_data.clone();
        }

        let (root, root_renewed) = match self.valid_root_ca(self.now) {
            Some(root) => (root, false),
            None => {
                info!(domain = %self.domain, "generating new root CA");
                (self.generate_root_certs()?, true)
            }
        };

        if root_renewed || !self.is_server_cert_valid(&root, self.now) {
            info!(domain = %self.domain, "generating new server certificate");
            self.generate_server_certs(&root)?;
        }
        Ok(())
    }

    /// Returns `true` if the root CA has to be regenerated at `now`.
    pub fn validate_root_certs(&self, now: OffsetDateTime) -> bool {
        self.valid_root_ca(now).is_none()
    }

    /// Returns `true` if the server certificate has to be regenerated at `now`.
    pub fn validate_server_certs(&self, now: OffsetDateTime) -> bool {
        match self.valid_root_ca(now) {
            Some(root) => !self.is_server_cert_valid(&root, now),
            None => true,
        }
    }

    /// The PEM-encoded root CA certificate, which is distributed as the CABundle.
    pub fn root_cert(&self) -> Option<&[u8]> {
        self.data.get(ROOT_CERT).map(|cert| cert.0.as_slice())
    }

    fn valid_root_ca(&self, now: OffsetDateTime) -> Option<RootCa> {
        let cert = self.parse_cert(ROOT_CERT)?;
        let key = self.parse_key(ROOT_KEY)?;
        if !is_fresh(&cert, now) {
            debug!(domain = %self.domain, "root CA is expired or about to expire");
            return None;
        }
        let cert_key = cert.public_key().ok()?;
        if !key.public_eq(&cert_key) {
            debug!(domain = %self.domain, "root CA key does not belong to the root certificate");
            return None;
        }
        Some(RootCa { key, cert })
    }

    fn is_server_cert_valid(&self, root: &RootCa, now: OffsetDateTime) -> bool {
        let (Some(cert), Some(key)) = (self.parse_cert(SERVER_CERT), self.parse_key(SERVER_KEY))
        else {
            return false;
        };
        if !is_fresh(&cert, now) {
            debug!(domain = %self.domain, "server certificate is expired or about to expire");
            return false;
        }
        if !cert.verify(&root.key).unwrap_or(false) {
            debug!(domain = %self.domain, "server certificate is not signed by the root CA");
            return false;
        }
        if !matches!(cert.public_key(), Ok(cert_key) if key.public_eq(&cert_key)) {
            debug!(domain = %self.domain, "server key does not belong to the server certificate");
            return false;
        }
        let dns_names = dns_names(&cert);
        if dns_names != [self.domain.as_str()] {
            debug!(
                domain = %self.domain,
                ?dns_names,
                "server certificate is issued for another domain"
            );
            return false;
        }
        true
    }

    fn parse_cert(&self, key: &str) -> Option<X509> {
        X509::from_pem(&self.data.get(key)?.0).ok()
    }

    fn parse_key(&self, key: &str) -> Option<PKey<Private>> {
        PKey::private_key_from_pem(&self.data.get(key)?.0).ok()
    }

    fn generate_root_certs(&mut self) -> Result<RootCa> {
        let tpe = CertType::Root;
        let key = generate_key(tpe)?;
        let conf = Conf::new(ConfMethod::default()).context(BuildCertificateSnafu { tpe })?;
        let not_before = self.now - NOT_BEFORE_SKEW;
        let not_after = self.now + ROOT_CERT_LIFETIME;
        let cert = X509Builder::new()
            .and_then(|mut x509| {
                let subject_name = X509NameBuilder::new()
                    .and_then(|mut name| {
                        name.append_entry_by_nid(Nid::COMMONNAME, "webhook-cert-manager root CA")?;
                        Ok(name)
                    })?
                    .build();
                x509.set_subject_name(&subject_name)?;
                x509.set_issuer_name(&subject_name)?;
                x509.set_not_before(Asn1Time::from_unix(not_before.unix_timestamp())?.as_ref())?;
                x509.set_not_after(Asn1Time::from_unix(not_after.unix_timestamp())?.as_ref())?;
                x509.set_pubkey(&key)?;
                x509.set_serial_number(random_serial()?.as_ref())?;
                x509.set_version(
                    3 - 1, // zero-indexed
                )?;
                let ctx = x509.x509v3_context(None, Some(&conf));
                let exts = [
                    BasicConstraints::new().critical().ca().build()?,
                    SubjectKeyIdentifier::new().build(&ctx)?,
                    AuthorityKeyIdentifier::new()
                        .issuer(false)
                        .keyid(false)
                        .build(&ctx)?,
                    KeyUsage::new()
                        .critical()
                        .digital_signature()
                        .key_cert_sign()
                        .crl_sign()
                        .build()?,
                ];
                for ext in exts {
                    x509.append_extension(ext)?;
                }
                x509.sign(&key, MessageDigest::sha256())?;
                Ok(x509)
            })
            .context(BuildCertificateSnafu { tpe })?
            .build();

        let cert_pem = cert.to_pem().context(SerializeCertificateSnafu { tpe })?;
        let key_pem = key
            .private_key_to_pem_pkcs8()
            .context(SerializeCertificateSnafu { tpe })?;

        // The replaced root stays around so that bundles distributed before the rotation still
        // verify. On the very first generation the new root fills the slot.
        let old_root = match self.data.remove(ROOT_CERT) {
            Some(old_root) if !old_root.0.is_empty() => old_root,
            _ => ByteString(cert_pem.clone()),
        };
        self.data.insert(ROOT_CERT_OLD.to_string(), old_root);
        self.data.insert(ROOT_CERT.to_string(), ByteString(cert_pem));
        self.data.insert(ROOT_KEY.to_string(), ByteString(key_pem));
        Ok(RootCa { key, cert })
    }

    fn generate_server_certs(&mut self, root: &RootCa) -> Result<()> {
        let tpe = CertType::Server;
        let key = generate_key(tpe)?;
        let conf = Conf::new(ConfMethod::default()).context(BuildCertificateSnafu { tpe })?;
        let not_before = self.now - NOT_BEFORE_SKEW;
        let not_after = self.now + SERVER_CERT_LIFETIME;
        let cert = X509Builder::new()
            .and_then(|mut x509| {
                let subject_name = X509NameBuilder::new()
                    .and_then(|mut name| {
                        name.append_entry_by_nid(
                            Nid::COMMONNAME,
                            "webhook-cert-manager server certificate",
                        )?;
                        Ok(name)
                    })?
                    .build();
                x509.set_subject_name(&subject_name)?;
                x509.set_issuer_name(root.cert.subject_name())?;
                x509.set_not_before(Asn1Time::from_unix(not_before.unix_timestamp())?.as_ref())?;
                x509.set_not_after(Asn1Time::from_unix(not_after.unix_timestamp())?.as_ref())?;
                x509.set_pubkey(&key)?;
                x509.set_version(
                    3 - 1, // zero-indexed
                )?;
                x509.set_serial_number(random_serial()?.as_ref())?;
                let ctx = x509.x509v3_context(Some(&root.cert), Some(&conf));
                let exts = [
                    BasicConstraints::new().critical().build()?,
                    KeyUsage::new()
                        .key_encipherment()
                        .digital_signature()
                        .build()?,
                    ExtendedKeyUsage::new().server_auth().build()?,
                    SubjectKeyIdentifier::new().build(&ctx)?,
                    AuthorityKeyIdentifier::new()
                        .issuer(true)
                        .keyid(true)
                        .build(&ctx)?,
                    SubjectAlternativeName::new()
                        .critical()
                        .dns(&self.domain)
                        .build(&ctx)?,
                ];
                for ext in exts {
                    x509.append_extension(ext)?;
                }
                x509.sign(&root.key, MessageDigest::sha256())?;
                Ok(x509)
            })
            .context(BuildCertificateSnafu { tpe })?
            .build();

        self.data.insert(
            SERVER_CERT.to_string(),
            ByteString(cert.to_pem().context(SerializeCertificateSnafu { tpe })?),
        );
        self.data.insert(
            SERVER_KEY.to_string(),
            ByteString(
                key.private_key_to_pem_pkcs8()
                    .context(SerializeCertificateSnafu { tpe })?,
            ),
        );
        Ok(())
    }
}

fn generate_key(tpe: CertType) -> Result<PKey<Private>> {
    EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)
        .and_then(|group| EcKey::generate(&group))
        .and_then(PKey::from_ec_key)
        .context(GenerateKeySnafu { tpe })
}

fn random_serial() -> Result<Asn1Integer, openssl::error::ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
    Asn1Integer::from_bn(&serial)
}

fn is_fresh(cert: &X509Ref, now: OffsetDateTime) -> bool {
    is_certificate_valid(cert, RENEWAL_THRESHOLD, now).unwrap_or(false)
}

fn dns_names(cert: &X509Ref) -> Vec<String> {
    cert.subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
