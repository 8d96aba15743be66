use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Database host used when the configuration does not name one.
pub const DEFAULT_HOST: &str = "https://ncmidb.bcm.edu";

/// Path of the JSON-RPC endpoint, relative to the host.
pub const RPC_PATH: &str = "/jsonrpc";

/// Form field that carries the file part when attaching to an existing record.
pub const DEFAULT_BINARY_PARAM: &str = "file_binary";

/// Timeout for plain JSON-RPC calls.
pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for streamed transfers.
///
/// Streamed uploads and downloads have no overall deadline: attachments
/// can be multi-gigabyte image stacks.
pub const TRANSFER_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC error code for an expired or unknown context id.
pub const RPC_CODE_AUTH: i32 = 401;

/// JSON-RPC error code for a permission denial.
pub const RPC_CODE_FORBIDDEN: i32 = 403;

/// JSON-RPC error code for a missing record or binary.
pub const RPC_CODE_NOT_FOUND: i32 = 404;

/// JSON-RPC error code for malformed parameters.
pub const RPC_CODE_INVALID: i32 = 400;

/// Remote procedure names understood by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "auth.login")]
    Login,
    #[serde(rename = "record.get")]
    RecordGet,
    #[serde(rename = "rel.children")]
    RelChildren,
    #[serde(rename = "binary.find")]
    BinaryFind,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Login => "auth.login",
            Method::RecordGet => "record.get",
            Method::RelChildren => "rel.children",
            Method::BinaryFind => "binary.find",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
