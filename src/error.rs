use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("scope violation: {}", .offenders.join(", "))]
    ScopeViolation { offenders: Vec<String> },

    #[error("translation failed: {0}")]
    Translation(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    /// Fatal errors end the session; everything else is reported and the
    /// next turn proceeds.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SearchError::Configuration(_) | SearchError::Connectivity(_) | SearchError::Io(_)
        )
    }

    /// Process exit status for a fatal error.
    pub fn exit_code(&self) -> u8 {
        match self {
            SearchError::Configuration(_) => 1,
            SearchError::Connectivity(_) => 2,
            SearchError::Io(_) => 3,
            // Per-turn failures never reach the top level, but map them anyway.
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_turn_errors_are_not_fatal() {
        assert!(!SearchError::Translation("empty response".to_string()).is_fatal());
        assert!(!SearchError::Execution("syntax error".to_string()).is_fatal());
        assert!(!SearchError::ScopeViolation { offenders: vec!["pg_shadow".to_string()] }.is_fatal());
    }

    #[test]
    fn test_fatal_errors_have_distinct_exit_codes() {
        let config = SearchError::Configuration("missing token".to_string());
        let connectivity = SearchError::Connectivity("connection refused".to_string());
        assert!(config.is_fatal());
        assert!(connectivity.is_fatal());
        assert_ne!(config.exit_code(), 0);
        assert_ne!(connectivity.exit_code(), 0);
        assert_ne!(config.exit_code(), connectivity.exit_code());
    }

    #[test]
    fn test_scope_violation_lists_offenders() {
        let err = SearchError::ScopeViolation {
            offenders: vec!["table secrets".to_string(), "function dblink".to_string()],
        };
        assert_eq!(err.to_string(), "scope violation: table secrets, function dblink");
    }
}
