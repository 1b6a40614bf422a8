//! Error types and result definitions for the bridge.
//!
//! [`EtlError`] carries an [`ErrorKind`] for classification, a static description, optional
//! dynamic detail, an optional source error, and the callsite location and backtrace where it
//! was raised. Kinds are grouped by how the batch processor treats them: recoverable kinds
//! skip a single record, every other kind aborts the batch.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for bridge operations.
pub type EtlResult<T> = Result<T, EtlError>;

/// Error raised by bridge operations.
#[derive(Debug, Clone)]
pub struct EtlError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Categories of errors raised while bridging change records into the warehouse.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Change record errors
    AttributeDecodeFailed,
    MalformedSourceId,
    InvalidPayload,

    // Mapping errors, recovered by skipping the record
    MissingTableMapping,
    EmptyRow,
    MissingPrimaryKeyValue,

    // Warehouse errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationConstraintViolation,
    DestinationSchemaError,
    DestinationTransactionFailed,
    DestinationOperationCanceled,
    DestinationIoError,
    AuthenticationError,
    ConversionError,

    // Configuration and credential errors
    ConfigError,
    EncryptionError,
    CredentialsUnavailable,

    // IO and serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // Invocation errors
    TimedOut,
    InvalidState,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` for kinds that only skip the offending record.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::MissingTableMapping
                | ErrorKind::EmptyRow
                | ErrorKind::MissingPrimaryKeyValue
        )
    }
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dynamic detail attached to this error, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns `true` when the batch can continue past the record that raised this error.
    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }

    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }

    /// Returns the callsite where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        EtlError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Wraps a foreign error, keeping its message as detail.
    #[track_caller]
    fn wrap<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        EtlError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Errors are equal when their kinds are equal.
impl PartialEq for EtlError {
    fn eq(&self, other: &EtlError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = &self.detail {
            write!(f, "\n  Detail:")?;
            for line in detail.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for EtlError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for EtlError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for EtlError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> EtlError {
        EtlError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

impl From<std::io::Error> for EtlError {
    #[track_caller]
    fn from(err: std::io::Error) -> EtlError {
        EtlError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

/// Maps JSON failures to serialization or deserialization kinds by error category.
impl From<serde_json::Error> for EtlError {
    #[track_caller]
    fn from(err: serde_json::Error) -> EtlError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        EtlError::wrap(kind, description, err)
    }
}

impl From<rustls::Error> for EtlError {
    #[track_caller]
    fn from(err: rustls::Error) -> EtlError {
        EtlError::wrap(ErrorKind::EncryptionError, "TLS configuration failed", err)
    }
}

/// Classifies warehouse driver errors by SQLSTATE class.
///
/// Errors without a SQLSTATE come from the client side of the connection (closed socket,
/// TLS failure, parameter binding) and are classified from the error itself.
impl From<tokio_postgres::Error> for EtlError {
    #[track_caller]
    fn from(err: tokio_postgres::Error) -> EtlError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => classify_sqlstate(sqlstate.code()),
            None if err.is_closed() => (
                ErrorKind::DestinationConnectionFailed,
                "Warehouse connection closed",
            ),
            None if error::Error::source(&err)
                .is_some_and(|source| source.is::<crate::conversions::BindError>()) =>
            {
                (ErrorKind::ConversionError, "Warehouse parameter binding failed")
            }
            None => (
                ErrorKind::DestinationConnectionFailed,
                "Warehouse connection failed",
            ),
        };

        EtlError::wrap(kind, description, err)
    }
}

fn classify_sqlstate(code: &str) -> (ErrorKind, &'static str) {
    match code {
        "42P01" | "42703" | "3F000" => (
            ErrorKind::DestinationSchemaError,
            "Warehouse schema object not found",
        ),
        _ => match code.get(..2).unwrap_or_default() {
            "08" => (
                ErrorKind::DestinationConnectionFailed,
                "Warehouse connection failed",
            ),
            "28" => (
                ErrorKind::AuthenticationError,
                "Warehouse authentication failed",
            ),
            "23" => (
                ErrorKind::DestinationConstraintViolation,
                "Warehouse constraint violation",
            ),
            "22" => (
                ErrorKind::ConversionError,
                "Warehouse data conversion failed",
            ),
            "25" | "40" => (
                ErrorKind::DestinationTransactionFailed,
                "Warehouse transaction failed",
            ),
            "57" => (
                ErrorKind::DestinationOperationCanceled,
                "Warehouse operation canceled",
            ),
            "53" | "58" | "XX" => (ErrorKind::DestinationIoError, "Warehouse system error"),
            _ => (ErrorKind::DestinationQueryFailed, "Warehouse query failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl_error;

    #[test]
    fn display_includes_kind_description_and_detail() {
        let err = etl_error!(
            ErrorKind::MalformedSourceId,
            "Source identifier does not name a table",
            "arn:aws:dynamodb:us-east-1:123:stream/2021"
        );

        let rendered = err.to_string();
        assert!(rendered.starts_with("[MalformedSourceId] Source identifier does not name a table @"));
        assert!(rendered.contains("arn:aws:dynamodb:us-east-1:123:stream/2021"));
        assert_eq!(err.detail(), Some("arn:aws:dynamodb:us-east-1:123:stream/2021"));
    }

    #[test]
    fn only_mapping_kinds_are_recoverable() {
        assert!(ErrorKind::MissingTableMapping.is_recoverable());
        assert!(ErrorKind::EmptyRow.is_recoverable());
        assert!(ErrorKind::MissingPrimaryKeyValue.is_recoverable());
        assert!(!ErrorKind::AttributeDecodeFailed.is_recoverable());
        assert!(!ErrorKind::MalformedSourceId.is_recoverable());
        assert!(!ErrorKind::DestinationQueryFailed.is_recoverable());
    }

    #[test]
    fn sqlstates_are_classified_by_class() {
        assert_eq!(
            classify_sqlstate("23505").0,
            ErrorKind::DestinationConstraintViolation
        );
        assert_eq!(classify_sqlstate("42P01").0, ErrorKind::DestinationSchemaError);
        assert_eq!(classify_sqlstate("42601").0, ErrorKind::DestinationQueryFailed);
        assert_eq!(classify_sqlstate("28P01").0, ErrorKind::AuthenticationError);
        assert_eq!(
            classify_sqlstate("08006").0,
            ErrorKind::DestinationConnectionFailed
        );
        assert_eq!(classify_sqlstate("22P02").0, ErrorKind::ConversionError);
    }

    #[test]
    fn json_errors_become_deserialization_errors() {
        let err: EtlError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(error::Error::source(&err).is_some());
    }
}
