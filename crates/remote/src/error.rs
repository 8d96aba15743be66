use emdash_protocol::constants::{
    RPC_CODE_AUTH, RPC_CODE_FORBIDDEN, RPC_CODE_INVALID, RPC_CODE_NOT_FOUND,
};

/// Errors from the database client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("empty result from {0}")]
    EmptyResult(&'static str),
}

impl Error {
    /// The session token was not accepted.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::Api { status: 401, .. })
            || matches!(self, Error::Rpc { code, .. } if *code == RPC_CODE_AUTH)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api { status: 404, .. })
            || matches!(self, Error::Rpc { code, .. } if *code == RPC_CODE_NOT_FOUND)
    }

    /// Worth retrying after a backoff: connection trouble, timeouts,
    /// throttling and server-side failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_redirect() && !e.is_status(),
            Error::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// The server understood the request and refused it.
    pub fn is_rejected(&self) -> bool {
        match self {
            Error::Api { status, .. } => matches!(*status, 400 | 403 | 422),
            Error::Rpc { code, .. } => {
                *code == RPC_CODE_FORBIDDEN || *code == RPC_CODE_INVALID
            }
            _ => false,
        }
    }

    /// The failure happened on the local side (reading the upload or
    /// writing the download).
    pub fn is_local_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16) -> Error {
        Error::Api {
            status,
            body: String::new(),
        }
    }

    fn rpc(code: i32) -> Error {
        Error::Rpc {
            code,
            message: "x".into(),
        }
    }

    #[test]
    fn http_status_classification() {
        assert!(api(401).is_auth_expired());
        assert!(api(404).is_not_found());
        for s in [400, 403, 422] {
            assert!(api(s).is_rejected(), "{s}");
            assert!(!api(s).is_transient(), "{s}");
        }
        for s in [408, 429, 500, 502, 503, 504] {
            assert!(api(s).is_transient(), "{s}");
        }
    }

    #[test]
    fn rpc_code_classification() {
        assert!(rpc(401).is_auth_expired());
        assert!(rpc(404).is_not_found());
        assert!(rpc(403).is_rejected());
        assert!(rpc(400).is_rejected());
        assert!(!rpc(401).is_transient());
    }

    #[test]
    fn io_is_local() {
        let err = Error::Io(std::io::Error::other("disk full"));
        assert!(err.is_local_io());
        assert!(!err.is_transient());
    }
}
