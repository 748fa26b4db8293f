use std::fmt;

use mongodb::error::ErrorKind;
use serde::{Deserialize, Serialize};

use crate::error::{AuthenticationError, ConnectionError, QuerierError};

/// Server code for a command the user is not allowed to run.
pub const UNAUTHORIZED: i32 = 13;

/// Server code for rejected credentials.
pub const AUTHENTICATION_FAILED: i32 = 18;

/// Structured error information extracted from MongoDB errors.
///
/// This is intended to be serialized to JSON and consumed by logging.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

/// Map a driver error onto the querier taxonomy.
///
/// Authentication failures become [`QuerierError::Authentication`], transport
/// and server-selection failures become [`QuerierError::Connection`], and
/// everything else is kept as a [`QuerierError::Server`] failure.
pub fn classify(error: mongodb::error::Error) -> QuerierError {
    match error.kind.as_ref() {
        ErrorKind::Authentication { message, .. } => {
            QuerierError::Authentication(AuthenticationError::Denied(message.clone()))
        }
        ErrorKind::Command(command_error) if command_error.code == AUTHENTICATION_FAILED => {
            QuerierError::Authentication(AuthenticationError::Denied(
                command_error.message.clone(),
            ))
        }
        ErrorKind::ServerSelection { message, .. } => {
            QuerierError::Connection(ConnectionError::ServerUnavailable(message.clone()))
        }
        ErrorKind::Io(io_error) => {
            QuerierError::Connection(ConnectionError::Transport(io_error.to_string()))
        }
        ErrorKind::ConnectionPoolCleared { message, .. } => {
            QuerierError::Connection(ConnectionError::Transport(message.clone()))
        }
        ErrorKind::Shutdown => QuerierError::Connection(ConnectionError::Closed),
        _ => QuerierError::Server(error),
    }
}

/// Whether the server refused the command because the user lacks privileges.
///
/// Some collections (e.g. `system.profile`) deny querying to read-only users;
/// these are skipped rather than failing the whole operation.
pub fn is_unauthorized(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Command(command_error) if command_error.code == UNAUTHORIZED
    )
}

/// Format store-side failures as pretty JSON wrapped in an `error` field.
pub(crate) fn format_server_error(
    f: &mut fmt::Formatter<'_>,
    error: &mongodb::error::Error,
) -> fmt::Result {
    let info = extract_error_info(error);
    let wrapper = serde_json::json!({ "error": info });
    let json_output = serde_json::to_string_pretty(&wrapper).map_err(|_| fmt::Error)?;
    write!(f, "Server error:\n{json_output}")
}

/// Extract structured information from a MongoDB error using the driver API.
pub fn extract_error_info(error: &mongodb::error::Error) -> ErrorInfo {
    let mut info = ErrorInfo::default();

    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => {
            info.error_type = Some("mongo.command_error".to_string());
            info.code = Some(command_error.code);
            info.message = Some(command_error.message.clone());
            info.name = get_error_name(command_error.code);
        }
        ErrorKind::InvalidArgument { message, .. } => {
            info.error_type = Some("mongo.invalid_argument".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::InvalidResponse { message, .. } => {
            info.error_type = Some("mongo.invalid_response".to_string());
            info.message = Some(message.clone());
        }
        _ => {
            info.message = Some(error.to_string());
        }
    }

    info
}

/// Get a human-readable error name from a MongoDB error code.
fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        UNAUTHORIZED => "Unauthorized",
        AUTHENTICATION_FAILED => "AuthenticationFailed",
        2 => "BadValue",
        26 => "NamespaceNotFound",
        50 => "MaxTimeMSExpired",
        292 => "QueryExceededMemoryLimitNoDiskUseAllowed",
        _ => return None,
    };

    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(get_error_name(13).as_deref(), Some("Unauthorized"));
        assert_eq!(
            get_error_name(292).as_deref(),
            Some("QueryExceededMemoryLimitNoDiskUseAllowed")
        );
        assert_eq!(get_error_name(99999), None);
    }

    #[test]
    fn test_error_info_skips_empty_fields() {
        let info = ErrorInfo {
            code: Some(2),
            message: Some("bad $in".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"code":2,"message":"bad $in"}"#);
    }
}
