use http::StatusCode;
use thiserror::Error;

/// Enumeration of errors surfaced by broker operations and envelope handling.
/// Every variant carries the HTTP-style status a service layer would report
/// upstream, mirroring the statuses the hosted broker's own errors map to.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BusError {
    /// The HTTP-style status carried by this error.
    pub fn status(&self) -> StatusCode {
        match self {
            BusError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BusError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BusError::Forbidden(_) => StatusCode::FORBIDDEN,
            BusError::NotFound(_) => StatusCode::NOT_FOUND,
            BusError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            BusError::Conflict(_) => StatusCode::CONFLICT,
            BusError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BusError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            BusError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error means the subscription itself is unusable (bad
    /// topic/subscription name, bad credentials) rather than a transient
    /// transport failure worth retrying.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            BusError::BadRequest(_)
                | BusError::Unauthorized(_)
                | BusError::Forbidden(_)
                | BusError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_taxonomy() {
        assert_eq!(
            BusError::BadRequest("malformed".to_owned()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BusError::Timeout("receive".to_owned()).status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            BusError::Unprocessable("data must be an object".to_owned()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BusError::TooManyRequests("throttled".to_owned()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            BusError::Internal("unclassified".to_owned()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_setup_failures_are_not_transient() {
        assert!(BusError::NotFound("no such subscription".to_owned()).is_setup_failure());
        assert!(BusError::Unauthorized("bad credentials".to_owned()).is_setup_failure());
        assert!(!BusError::Timeout("receive".to_owned()).is_setup_failure());
        assert!(!BusError::TooManyRequests("throttled".to_owned()).is_setup_failure());
        assert!(!BusError::Internal("unclassified".to_owned()).is_setup_failure());
    }

    #[test]
    fn test_display_includes_status_prefix() {
        let error = BusError::NotFound("topic orders".to_owned());
        assert_eq!(error.to_string(), "not found: topic orders");
    }
}
