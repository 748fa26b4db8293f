use std::path::PathBuf;
use std::{fmt, io};

use crate::error::mongo::format_server_error;

/// Crate-wide `Result` type using [`QuerierError`] as the error.
pub type Result<T> = std::result::Result<T, QuerierError>;

/// Top-level error type for querier operations.
///
/// Construction-time kinds (`Credentials`, `Filter`, `Aggregation`, `Config`)
/// are raised before any network I/O. Runtime kinds (`Authentication`,
/// `Connection`, `Server`) come only from operations that need the live store.
#[derive(Debug)]
pub enum QuerierError {
    /// Credentials file missing, malformed or not describing the database.
    Credentials(CredentialsError),

    /// Valid credentials rejected by the store.
    Authentication(AuthenticationError),

    /// Transport failure, timeout, or use of a closed connection.
    Connection(ConnectionError),

    /// Invalid filter condition.
    Filter(FilterError),

    /// Invalid or conflicting aggregation.
    Aggregation(AggregationError),

    /// Misuse of a query result.
    Result(ResultError),

    /// Configuration errors.
    Config(ConfigError),

    /// I/O errors.
    Io(io::Error),

    /// Store-side command failure that is neither transport nor auth related.
    Server(mongodb::error::Error),
}

/// Credentials resolution errors.
#[derive(Debug)]
pub enum CredentialsError {
    /// Credentials file not found.
    FileNotFound(PathBuf),

    /// Credentials file could not be read.
    Read { path: PathBuf, source: io::Error },

    /// Credentials file is not valid.
    Parse(String),

    /// No database entry matches the requested name.
    DatabaseNotFound(String),

    /// A database entry matched by base name, but the suffix is not declared.
    UndeclaredSuffix { database: String, suffix: String },

    /// The `type` of a database entry names no credential source.
    UnknownSourceType { database: String, source_type: String },

    /// A required field is missing from a section.
    MissingField { section: String, field: String },

    /// A field holds a value of the wrong shape.
    InvalidValue { section: String, field: String, value: String },
}

/// Authentication errors reported by the store.
#[derive(Debug)]
pub enum AuthenticationError {
    /// Credentials are wrong or the user lacks permissions on the database.
    Rejected { database: String, message: String },

    /// Authentication failure reported while an operation was running.
    Denied(String),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Connection was not established within the configured bound.
    Timeout { database: String, secs: u64 },

    /// No server is reachable at the configured hosts.
    ServerUnavailable(String),

    /// Transport failure while talking to the server.
    Transport(String),

    /// Operation on a closed connection, or on a result it invalidated.
    Closed,

    /// Target cannot be turned into client options.
    InvalidTarget(String),
}

/// Filter construction errors.
#[derive(Debug)]
pub enum FilterError {
    /// Field path is empty, has an empty segment, or starts with `$`.
    InvalidFieldPath(String),

    /// Geometry operand has the wrong shape or out-of-range coordinates.
    InvalidGeometry(String),

    /// One side of a disjunction has no conditions.
    EmptyDisjunction,
}

/// Aggregation builder errors.
#[derive(Debug)]
pub enum AggregationError {
    /// Group key is not a valid field path.
    InvalidGroupKey(String),

    /// Output field name cannot be used.
    InvalidOutputName(String),

    /// Output field name already used.
    DuplicateOutput(String),

    /// Unknown aggregation function name.
    UnknownFunction(String),

    /// Source field of a named aggregation is not a valid field path.
    InvalidSourceField(String),
}

/// Query result errors.
#[derive(Debug)]
pub enum ResultError {
    /// A modifier was applied after iteration started.
    ModifiersFrozen(&'static str),

    /// Sort field is not a valid field path.
    InvalidSortField(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Logging could not be initialized.
    Logging(String),
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for QuerierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuerierError::Credentials(e) => write!(f, "Credentials error: {e}"),
            QuerierError::Authentication(e) => write!(f, "Authentication error: {e}"),
            QuerierError::Connection(e) => write!(f, "Connection error: {e}"),
            QuerierError::Filter(e) => write!(f, "Filter error: {e}"),
            QuerierError::Aggregation(e) => write!(f, "Aggregation error: {e}"),
            QuerierError::Result(e) => write!(f, "Result error: {e}"),
            QuerierError::Config(e) => write!(f, "Configuration error: {e}"),
            QuerierError::Io(e) => write!(f, "I/O error: {e}"),
            QuerierError::Server(e) => format_server_error(f, e),
        }
    }
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialsError::FileNotFound(path) => {
                write!(f, "File '{}' not found", path.display())
            }
            CredentialsError::Read { path, source } => {
                write!(f, "Error reading file '{}': {source}", path.display())
            }
            CredentialsError::Parse(msg) => write!(f, "Error parsing credentials: {msg}"),
            CredentialsError::DatabaseNotFound(name) => {
                write!(f, "Database name '{name}' not found in the credentials file")
            }
            CredentialsError::UndeclaredSuffix { database, suffix } => {
                write!(f, "Suffix '{suffix}' is not declared for database '{database}'")
            }
            CredentialsError::UnknownSourceType {
                database,
                source_type,
            } => write!(
                f,
                "Section '{source_type}' is missing (required for database '{database}')"
            ),
            CredentialsError::MissingField { section, field } => {
                write!(f, "Option '{field}' in section '{section}' is missing")
            }
            CredentialsError::InvalidValue {
                section,
                field,
                value,
            } => write!(
                f,
                "Invalid value '{value}' for option '{field}' in section '{section}'"
            ),
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationError::Rejected { database, message } => write!(
                f,
                "Error accessing the database '{database}'. Credentials are wrong or the user \
                 does not have sufficient permissions: {message}"
            ),
            AuthenticationError::Denied(message) => write!(f, "Authentication failed: {message}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Timeout { database, secs } => {
                write!(f, "Connection to '{database}' timed out after {secs}s")
            }
            ConnectionError::ServerUnavailable(msg) => {
                write!(f, "No server available at the configured hosts: {msg}")
            }
            ConnectionError::Transport(msg) => write!(f, "Transport failure: {msg}"),
            ConnectionError::Closed => write!(f, "Operation on closed connection"),
            ConnectionError::InvalidTarget(msg) => write!(f, "Invalid target: {msg}"),
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidFieldPath(path) => write!(f, "Invalid field path: '{path}'"),
            FilterError::InvalidGeometry(msg) => write!(f, "Invalid geometry: {msg}"),
            FilterError::EmptyDisjunction => write!(f, "One of the filters is empty"),
        }
    }
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::InvalidGroupKey(key) => write!(f, "Invalid group key: '{key}'"),
            AggregationError::InvalidOutputName(name) => {
                write!(f, "Invalid output field name: '{name}'")
            }
            AggregationError::DuplicateOutput(name) => {
                write!(f, "Output field '{name}' is already defined")
            }
            AggregationError::UnknownFunction(name) => {
                write!(f, "Unknown aggregation function: '{name}'")
            }
            AggregationError::InvalidSourceField(field) => {
                write!(f, "Invalid source field: '{field}'")
            }
        }
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultError::ModifiersFrozen(modifier) => {
                write!(f, "Cannot apply '{modifier}': modifiers frozen after iteration start")
            }
            ResultError::InvalidSortField(field) => write!(f, "Invalid sort field: '{field}'"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::Logging(msg) => write!(f, "Failed to initialize logging: {msg}"),
        }
    }
}

impl std::error::Error for QuerierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QuerierError::Io(e) => Some(e),
            QuerierError::Server(e) => Some(e),
            QuerierError::Credentials(CredentialsError::Read { source, .. }) => Some(source),
            _ => None,
        }
    }
}
impl std::error::Error for CredentialsError {}
impl std::error::Error for AuthenticationError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for FilterError {}
impl std::error::Error for AggregationError {}
impl std::error::Error for ResultError {}
impl std::error::Error for ConfigError {}

/* ========================= Conversions to QuerierError ========================= */

impl From<io::Error> for QuerierError {
    fn from(err: io::Error) -> Self {
        QuerierError::Io(err)
    }
}

impl From<mongodb::error::Error> for QuerierError {
    fn from(err: mongodb::error::Error) -> Self {
        crate::error::mongo::classify(err)
    }
}

impl From<CredentialsError> for QuerierError {
    fn from(err: CredentialsError) -> Self {
        QuerierError::Credentials(err)
    }
}

impl From<AuthenticationError> for QuerierError {
    fn from(err: AuthenticationError) -> Self {
        QuerierError::Authentication(err)
    }
}

impl From<ConnectionError> for QuerierError {
    fn from(err: ConnectionError) -> Self {
        QuerierError::Connection(err)
    }
}

impl From<FilterError> for QuerierError {
    fn from(err: FilterError) -> Self {
        QuerierError::Filter(err)
    }
}

impl From<AggregationError> for QuerierError {
    fn from(err: AggregationError) -> Self {
        QuerierError::Aggregation(err)
    }
}

impl From<ResultError> for QuerierError {
    fn from(err: ResultError) -> Self {
        QuerierError::Result(err)
    }
}

impl From<ConfigError> for QuerierError {
    fn from(err: ConfigError) -> Self {
        QuerierError::Config(err)
    }
}

impl From<toml::de::Error> for QuerierError {
    fn from(err: toml::de::Error) -> Self {
        QuerierError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = QuerierError::from(ConnectionError::Closed);
        assert_eq!(err.to_string(), "Connection error: Operation on closed connection");

        let err = QuerierError::from(ResultError::ModifiersFrozen("limit"));
        assert!(err.to_string().contains("modifiers frozen after iteration start"));

        let err = QuerierError::from(CredentialsError::UndeclaredSuffix {
            database: "logs".to_string(),
            suffix: "_2022".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Credentials error: Suffix '_2022' is not declared for database 'logs'"
        );
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let err: QuerierError = toml::from_str::<toml::Table>("= broken").unwrap_err().into();
        assert!(matches!(err, QuerierError::Config(ConfigError::InvalidFormat(_))));
    }

    #[test]
    fn test_read_error_exposes_source() {
        use std::error::Error;

        let err = QuerierError::from(CredentialsError::Read {
            path: PathBuf::from("/tmp/creds"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        });
        assert!(err.source().is_some());
    }
}
