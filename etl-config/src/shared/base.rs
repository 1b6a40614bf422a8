use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// Neither a static password nor a credentials command is configured.
    #[error("Invalid warehouse config: one of `password` or `credentials_command` must be set")]
    MissingCredentials,
    /// Both a static password and a credentials command are configured.
    #[error("Invalid warehouse config: `password` and `credentials_command` are mutually exclusive")]
    ConflictingCredentials,
    #[error("Invalid warehouse config: `credentials_command` must name a program")]
    EmptyCredentialsCommand,
    /// The mapping document could not be parsed.
    #[error("Invalid mapping document: {0}")]
    InvalidMappingDocument(String),
    #[error("Invalid mapping for `{source_table}`: destination table is empty")]
    EmptyDestinationTable { source_table: String },
    #[error("Invalid mapping for `{source_table}`: no columns are declared")]
    NoColumns { source_table: String },
    /// The primary key column is not one of the declared columns.
    #[error(
        "Invalid mapping for `{source_table}`: primary key `{primary_key}` is not a declared column"
    )]
    PrimaryKeyNotMapped {
        source_table: String,
        primary_key: String,
    },
    /// A field path is neither empty nor starts with `/`.
    #[error(
        "Invalid mapping for `{source_table}`: path `{path}` of column `{column}` must be empty or start with `/`"
    )]
    InvalidFieldPath {
        source_table: String,
        column: String,
        path: String,
    },
    #[error("Invalid mapping for `{source_table}`: column name is empty")]
    EmptyColumnName { source_table: String },
}
