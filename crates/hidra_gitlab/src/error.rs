//! Error types for the GitLab client and reconciler.

use thiserror::Error;

/// Result type alias for remote API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors returned by a [`crate::RemoteClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("GitLab API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Classify an HTTP error response.
    ///
    /// GitLab reports some uniqueness violations as 400 with a validation
    /// message instead of 409; those are treated as conflicts too.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = body.trim().to_string();
        match status {
            401 => Self::Unauthorized(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            400 if is_conflict_message(&message) => Self::Conflict(message),
            _ => Self::Api { status, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::Unauthorized(_))
    }
}

fn is_conflict_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("has already been taken") || lower.contains("already exists")
}

/// Errors that abort a reconciliation run.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid resource path '{0}'")]
    InvalidPath(String),

    #[error("Could not create group '{path}': {source}")]
    GroupCreation {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("Group '{0}' already exists but could not be resolved")]
    GroupUnresolvable(String),

    #[error("Project '{path}' not found: {hint}")]
    ProjectNotFound { path: String, hint: String },

    #[error("Could not create project '{path}': {source}")]
    ProjectCreation {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("Could not write file '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: ApiError,
    },

    #[error("Could not write variable '{key}' (scope {scope}): {source}")]
    Variable {
        key: String,
        scope: String,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ReconcileError {
    /// Remediation hint shown next to the error.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::ProjectNotFound { hint, .. } => Some(hint.as_str()),
            Self::GroupCreation { source, .. }
            | Self::ProjectCreation { source, .. }
            | Self::File { source, .. }
            | Self::Variable { source, .. }
            | Self::Api(source)
                if source.is_permission_denied() =>
            {
                Some("check that the token has the api scope and maintainer access")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(ApiError::from_status(404, "404 Project Not Found").is_not_found());
        assert!(ApiError::from_status(409, "").is_conflict());
        assert!(ApiError::from_status(403, "").is_permission_denied());
        assert!(ApiError::from_status(401, "").is_permission_denied());
        assert_eq!(
            ApiError::from_status(500, " boom "),
            ApiError::Api {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_validation_conflicts() {
        let taken = r#"{"message":{"path":["has already been taken"]}}"#;
        assert!(ApiError::from_status(400, taken).is_conflict());

        let exists = r#"{"message":{"key":["(DB_URL) has already been taken"]}}"#;
        assert!(ApiError::from_status(400, exists).is_conflict());

        assert!(ApiError::from_status(400, "A file with this name already exists").is_conflict());
        assert!(!ApiError::from_status(400, "branch is missing").is_conflict());
    }

    #[test]
    fn test_hint() {
        let err = ReconcileError::ProjectNotFound {
            path: "a/b".to_string(),
            hint: "use --create-project".to_string(),
        };
        assert_eq!(err.hint(), Some("use --create-project"));

        let err = ReconcileError::Api(ApiError::Forbidden("nope".to_string()));
        assert!(err.hint().is_some());

        let err = ReconcileError::GroupUnresolvable("a".to_string());
        assert!(err.hint().is_none());
    }
}
