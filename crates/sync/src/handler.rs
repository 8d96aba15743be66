//! Upload handler kinds.
//!
//! A handler decides where an uploaded file lands and which fields travel
//! with it. The set is closed; each kind maps to a fixed behaviour record.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use emdash_protocol::constants::DEFAULT_BINARY_PARAM;
use emdash_protocol::{Record, RecordFields, RecordRef};
use emdash_transfer::CsvSummary;

use crate::error::SyncError;
use crate::remote::UploadBinary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Attach the file to the target record.
    #[default]
    File,
    /// New child record carrying per-column statistics of a sensor log.
    Csv,
    /// New child record of the given rectype, file attached to it.
    Record,
}

/// What a handler kind does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerBehaviour {
    /// Creates a new child record instead of editing the target.
    pub creates_child: bool,
    /// Needs a rectype for the new record.
    pub requires_rectype: bool,
    /// Copies groups and permissions from the target record.
    pub inherits_acl: bool,
    /// Summarizes the file as CSV into record fields.
    pub extracts_csv: bool,
    /// Sets `date_occurred` from the file's modification time.
    pub stamps_mtime: bool,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::File => "file",
            HandlerKind::Csv => "csv",
            HandlerKind::Record => "record",
        }
    }

    pub fn behaviour(&self) -> HandlerBehaviour {
        match self {
            HandlerKind::File => HandlerBehaviour {
                creates_child: false,
                requires_rectype: false,
                inherits_acl: false,
                extracts_csv: false,
                stamps_mtime: false,
            },
            HandlerKind::Csv => HandlerBehaviour {
                creates_child: true,
                requires_rectype: true,
                inherits_acl: true,
                extracts_csv: true,
                stamps_mtime: false,
            },
            HandlerKind::Record => HandlerBehaviour {
                creates_child: true,
                requires_rectype: true,
                inherits_acl: true,
                extracts_csv: false,
                stamps_mtime: true,
            },
        }
    }

    /// Checks that everything the kind needs is present.
    pub fn validate(&self, rectype: Option<&str>) -> Result<(), SyncError> {
        let missing = rectype.is_none_or(|r| r.trim().is_empty());
        if self.behaviour().requires_rectype && missing {
            return Err(SyncError::Config(format!(
                "handler '{}' requires a rectype",
                self.as_str()
            )));
        }
        Ok(())
    }
}

impl FromStr for HandlerKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "file" => Ok(HandlerKind::File),
            "csv" => Ok(HandlerKind::Csv),
            "record" => Ok(HandlerKind::Record),
            other => Err(SyncError::Config(format!("unknown handler '{other}'"))),
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs gathered for one file before its fields are built.
#[derive(Debug, Default)]
pub struct HandlerInputs<'a> {
    pub parent: Option<&'a Record>,
    pub summary: Option<&'a CsvSummary>,
    pub modified: Option<DateTime<Utc>>,
}

/// Rounds to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Adds `<column>_low|_high|_avg` plus `date_start`/`date_end`.
pub fn apply_csv_summary(fields: &mut RecordFields, summary: &CsvSummary) {
    for column in &summary.columns {
        fields.insert(format!("{}_low", column.name), round1(column.low));
        fields.insert(format!("{}_high", column.name), round1(column.high));
        fields.insert(format!("{}_avg", column.name), round1(column.avg));
    }
    fields.insert("date_start", summary.first_timestamp.clone());
    fields.insert("date_end", summary.last_timestamp.clone());
}

/// Builds the upload for `path` under `kind`.
///
/// Caller `params` are merged last and win over anything extracted.
pub fn build_upload(
    kind: HandlerKind,
    target: &RecordRef,
    rectype: Option<&str>,
    param: Option<&str>,
    params: &BTreeMap<String, String>,
    path: &Path,
    inputs: HandlerInputs<'_>,
) -> Result<UploadBinary, SyncError> {
    kind.validate(rectype)?;
    let behaviour = kind.behaviour();

    let mut fields = RecordFields::default();
    if behaviour.creates_child {
        fields.rectype = rectype.map(str::to_string);
        fields.parents = vec![target.clone()];
    }
    if behaviour.inherits_acl
        && let Some(parent) = inputs.parent
    {
        fields.inherit_from(parent);
    }
    if behaviour.extracts_csv {
        let summary = inputs
            .summary
            .ok_or_else(|| SyncError::rejected(format!("{}: no CSV summary", path.display())))?;
        apply_csv_summary(&mut fields, summary);
    }
    if behaviour.stamps_mtime
        && let Some(modified) = inputs.modified
    {
        fields.insert("date_occurred", modified.to_rfc3339());
    }
    fields.merge_params(params);

    Ok(UploadBinary {
        target: target.clone(),
        rectype: if behaviour.creates_child {
            rectype.map(str::to_string)
        } else {
            None
        },
        param: param.unwrap_or(DEFAULT_BINARY_PARAM).to_string(),
        fields,
        path: path.to_path_buf(),
    })
}
