use openssl::{
    asn1::{Asn1Time, Asn1TimeRef, TimeDiff},
    x509::X509Ref,
};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use stackable_operator::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum Asn1TimeParseError {
    #[snafu(display("unix epoch is not a valid Asn1Time"))]
    Epoch { source: openssl::error::ErrorStack },

    #[snafu(display("unable to diff Asn1Time"))]
    Diff { source: openssl::error::ErrorStack },

    #[snafu(display("unable to parse as OffsetDateTime"))]
    Parse { source: time::error::ComponentRange },

    #[snafu(display("time overflowed"))]
    Overflow,
}

/// Converts an OpenSSL [`Asn1TimeRef`] into a Rustier [`OffsetDateTime`].
pub fn asn1time_to_offsetdatetime(asn: &Asn1TimeRef) -> Result<OffsetDateTime, Asn1TimeParseError> {
    use asn1_time_parse_error::*;
    const SECS_PER_DAY: i64 = 60 * 60 * 24;
    let epoch = Asn1Time::from_unix(0).context(EpochSnafu)?;
    let TimeDiff { days, secs } = epoch.diff(asn).context(DiffSnafu)?;
    OffsetDateTime::from_unix_timestamp(
        i64::from(days)
            .checked_mul(SECS_PER_DAY)
            .and_then(|day_secs| day_secs.checked_add(i64::from(secs)))
            .context(OverflowSnafu)?,
    )
    .context(ParseSnafu)
}

/// Checks whether `cert` is still usable at `now`.
///
/// A certificate is considered outdated `renewal_threshold` before its `notAfter`, to leave
/// some lead time for the rotation.
pub fn is_certificate_valid(
    cert: &X509Ref,
    renewal_threshold: Duration,
    now: OffsetDateTime,
) -> Result<bool, Asn1TimeParseError> {
    let not_after = asn1time_to_offsetdatetime(cert.not_after())?;
    Ok(now <= not_after - renewal_threshold)
}
