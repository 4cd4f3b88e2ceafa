//! Minimal PEM framing helpers.
//!
//! Only the framing is handled here, decoding the base64 body is left to OpenSSL.

const CERTIFICATE_HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";
const CERTIFICATE_FOOTER: &[u8] = b"-----END CERTIFICATE-----";

/// Returns the first complete PEM certificate block contained in `pem`, if any.
///
/// The block includes both the `BEGIN` and `END CERTIFICATE` markers.
pub fn first_pem_certificate(pem: &[u8]) -> Option<&[u8]> {
    let start = find(pem, CERTIFICATE_HEADER, 0)?;
    let footer = find(pem, CERTIFICATE_FOOTER, start + CERTIFICATE_HEADER.len())?;
    Some(&pem[start..footer + CERTIFICATE_FOOTER.len()])
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}
