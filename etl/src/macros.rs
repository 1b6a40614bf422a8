//! Macros for creating and returning [`crate::error::EtlError`] values.

/// Creates an [`crate::error::EtlError`] from a kind, a static description, an optional
/// detail rendered through [`std::fmt::Display`], and an optional source error.
///
/// The detail names the offending input (a source table, an attribute, a column) so that a
/// skipped or failed record can be traced from the logs.
///
/// ```ignore
/// etl_error!(ErrorKind::EmptyRow, "Nothing to upsert");
/// etl_error!(ErrorKind::MissingTableMapping, "No mapping for source table", table_name);
/// etl_error!(ErrorKind::IoError, "Failed to read payload", source: err);
/// etl_error!(ErrorKind::AttributeDecodeFailed, "Bad number", raw, source: err);
/// ```
#[macro_export]
macro_rules! etl_error {
    ($kind:expr, $desc:expr $(, source: $source:expr)? $(,)?) => {{
        let error = $crate::error::EtlError::from(($kind, $desc));
        $(let error = error.with_source($source);)?
        error
    }};
    ($kind:expr, $desc:expr, $detail:expr $(, source: $source:expr)? $(,)?) => {{
        let error = $crate::error::EtlError::from(($kind, $desc, ::std::string::ToString::to_string(&$detail)));
        $(let error = error.with_source($source);)?
        error
    }};
}

/// Returns early with the [`crate::error::EtlError`] that [`etl_error!`] builds from the
/// same arguments.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return ::core::result::Result::Err($crate::etl_error!($($args)+))
    };
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use crate::error::{ErrorKind, EtlResult};

    fn parse_age(raw: &str) -> EtlResult<u8> {
        match raw.parse::<u8>() {
            Ok(age) => Ok(age),
            Err(err) => bail!(
                ErrorKind::AttributeDecodeFailed,
                "Age is not a number",
                raw,
                source: err,
            ),
        }
    }

    #[test]
    fn builds_errors_with_optional_detail_and_source() {
        let plain = etl_error!(ErrorKind::EmptyRow, "Nothing to upsert");
        assert_eq!(plain.detail(), None);
        assert!(plain.source().is_none());

        let detailed = etl_error!(ErrorKind::MissingTableMapping, "No mapping", "Users",);
        assert_eq!(detailed.detail(), Some("Users"));

        let err = parse_age("old").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AttributeDecodeFailed);
        assert_eq!(err.detail(), Some("old"));
        assert!(err.source().is_some());
        assert_eq!(err.location().file(), file!());
    }
}
