//! Wire types shared by the EMDash crates.
//!
//! Records, binary descriptors and the JSON-RPC envelope spoken by the
//! remote database.

pub mod constants;
pub mod envelope;
pub mod types;

// Re-export primary types for convenience.
pub use constants::Method;
pub use envelope::{RpcError, RpcRequest, RpcResponse};
pub use types::{BinaryDescriptor, ContextId, Record, RecordFields, RecordRef};
