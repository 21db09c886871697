//! Unified realm error model.
//! Authentication calls never surface these to the container; they are logged at the
//! realm boundary and collapse to "not authenticated". Lifecycle and configuration
//! failures are returned from `start()`/`stop()` and from the config loaders.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

#[derive(Debug, Error)]
pub enum RealmError {
    #[error("lifecycle violation: expected {expected}, realm is {actual}")]
    Lifecycle { expected: LifecycleState, actual: LifecycleState },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown digest algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RealmError {
    pub fn config(msg: impl Into<String>) -> Self { RealmError::Config(msg.into()) }

    pub fn code_str(&self) -> &'static str {
        match self {
            RealmError::Lifecycle { .. } => "lifecycle",
            RealmError::Config(_) => "config",
            RealmError::UnknownAlgorithm(_) => "unknown_algorithm",
            RealmError::Backend(_) => "backend_unavailable",
            RealmError::Io(_) => "io",
            RealmError::Json(_) => "json",
        }
    }
}

pub type RealmResult<T> = Result<T, RealmError>;

/// Failures raised by external collaborators (SQL, directory, login modules).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Login(#[from] LoginError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("sql connection failed: {0}")]
    Connect(String),
    #[error("sql statement failed: {0}")]
    Statement(String),
    #[error("sql connection closed")]
    Closed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory authentication failed: {0}")]
    Authentication(String),
    #[error("directory communication failure: {0}")]
    Communication(String),
    #[error("directory service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("directory entry not found: {0}")]
    NameNotFound(String),
    #[error("directory naming error: {0}")]
    Naming(String),
}

impl DirectoryError {
    /// True when the shared context is stale and a reopen is worth one retry.
    pub fn is_stale_connection(&self) -> bool {
        matches!(self, DirectoryError::Communication(_) | DirectoryError::ServiceUnavailable(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("account expired: {0}")]
    AccountExpired(String),
    #[error("credential expired: {0}")]
    CredentialExpired(String),
    #[error("login failed: {0}")]
    FailedLogin(String),
    #[error("login configuration error: {0}")]
    Config(String),
    #[error("unsupported callback: {0}")]
    UnsupportedCallback(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping() {
        assert_eq!(RealmError::config("x").code_str(), "config");
        assert_eq!(RealmError::UnknownAlgorithm("MD4".into()).code_str(), "unknown_algorithm");
        let be: RealmError = BackendError::Sql(SqlError::Closed).into();
        assert_eq!(be.code_str(), "backend_unavailable");
        let lc = RealmError::Lifecycle { expected: LifecycleState::Stopped, actual: LifecycleState::Started };
        assert_eq!(lc.code_str(), "lifecycle");
        assert_eq!(lc.to_string(), "lifecycle violation: expected stopped, realm is started");
    }

    #[test]
    fn stale_directory_errors() {
        assert!(DirectoryError::Communication("socket closed".into()).is_stale_connection());
        assert!(DirectoryError::ServiceUnavailable("busy".into()).is_stale_connection());
        assert!(!DirectoryError::Authentication("bad".into()).is_stale_connection());
        assert!(!DirectoryError::NameNotFound("uid=x".into()).is_stale_connection());
    }
}
