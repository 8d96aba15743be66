//! Local-disk side of EMDash transfers.
//!
//! Everything here is synchronous `std::fs` work; async callers run it on
//! `spawn_blocking`.

mod checksum;
mod csv_summary;
mod gzip;
mod sidecar;
mod staging;
mod validation;

pub use checksum::{calculate_file_checksum, checksum_bytes};
pub use csv_summary::{ColumnStats, CsvSummary, summarize_csv, summarize_csv_reader};
pub use gzip::{GZIP_MAGIC, decompress_file, is_gzip_framed};
pub use sidecar::{MARKER_VERSION, SidecarError, SidecarLayout, SidecarMarker, SidecarStore};
pub use staging::{StagedFile, atomic_write};
pub use validation::validate_file_name;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("corrupt gzip stream: {0}")]
    Decompress(String),

    #[error("no numeric rows in {0}")]
    NoData(String),
}
