use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// A hosted or cloned repository has no commit reachable from the requested branch.
///
/// This is an expected state for a freshly created bare repository, so callers
/// usually treat it as "no files" rather than as a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("repository is empty on branch: {branch_name}")]
pub struct EmptyRepositoryError {
    pub branch_name: String,
}

/// Failures of the repository lifecycle operations and of the process bridge.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Bad input detected before any process is spawned or any path is touched.
    #[error("{0}")]
    Validation(String),

    #[error("unexpected service: {0}")]
    UnexpectedService(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The external tool ran but exited non-zero.
    #[error("{operation} failed ({status}): {stderr}")]
    Process {
        operation: String,
        status: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Empty(#[from] EmptyRepositoryError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl RepositoryError {
    pub fn validation(message: impl Into<String>) -> Self {
        RepositoryError::Validation(message.into())
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        RepositoryError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors raised before anything was spawned or mutated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RepositoryError::Validation(_) | RepositoryError::UnexpectedService(_)
        )
    }
}

#[derive(Debug)]
pub enum GitHttpError {
    NotFound,
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl From<RepositoryError> for GitHttpError {
    fn from(err: RepositoryError) -> Self {
        if err.is_validation() {
            GitHttpError::BadRequest(err.to_string())
        } else {
            GitHttpError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for GitHttpError {
    fn into_response(self) -> Response {
        match &self {
            GitHttpError::Internal(msg) => tracing::error!(error = %msg, "git http request failed"),
            other => tracing::debug!(error = ?other, "git http request rejected"),
        }
        match self {
            GitHttpError::NotFound => (StatusCode::NOT_FOUND, "repo not found").into_response(),
            GitHttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            GitHttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            GitHttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}
