use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::TransferError;

/// Running low/high/average for one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStats {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub avg: f64,
}

/// Summary of a sensor log: header `timestamp,<col>,<col>...`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvSummary {
    pub columns: Vec<ColumnStats>,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub rows: usize,
}

#[derive(Default)]
struct Accumulator {
    low: f64,
    high: f64,
    sum: f64,
}

/// Summarizes the CSV file at `path`.
pub fn summarize_csv(path: &Path) -> Result<CsvSummary, TransferError> {
    let file = std::fs::File::open(path)?;
    summarize(BufReader::new(file), &path.display().to_string())
}

/// Summarizes CSV content from any buffered reader.
///
/// The first line is the header, optionally prefixed with `#`. Rows whose
/// column count differs from the header or whose values are not numeric
/// are skipped.
pub fn summarize_csv_reader<R: BufRead>(reader: R) -> Result<CsvSummary, TransferError> {
    summarize(reader, "input")
}

fn summarize<R: BufRead>(reader: R, label: &str) -> Result<CsvSummary, TransferError> {
    let mut lines = reader.lines();

    let header = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(TransferError::NoData(label.to_string())),
        }
    };
    let names: Vec<String> = header
        .trim()
        .trim_start_matches('#')
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();
    if names.len() < 2 {
        return Err(TransferError::NoData(label.to_string()));
    }

    let mut acc: Vec<Accumulator> = (1..names.len()).map(|_| Accumulator::default()).collect();
    let mut first_timestamp = None;
    let mut last_timestamp = String::new();
    let mut rows = 0usize;

    for line in lines {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != names.len() || fields[0].is_empty() {
            continue;
        }
        let values: Option<Vec<f64>> = fields[1..]
            .iter()
            .map(|f| f.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect();
        let Some(values) = values else {
            continue;
        };

        for (slot, value) in acc.iter_mut().zip(values) {
            if rows == 0 {
                slot.low = value;
                slot.high = value;
            } else {
                slot.low = slot.low.min(value);
                slot.high = slot.high.max(value);
            }
            slot.sum += value;
        }
        if first_timestamp.is_none() {
            first_timestamp = Some(fields[0].to_string());
        }
        last_timestamp = fields[0].to_string();
        rows += 1;
    }

    let Some(first_timestamp) = first_timestamp else {
        return Err(TransferError::NoData(label.to_string()));
    };

    let columns = names
        .into_iter()
        .skip(1)
        .zip(acc)
        .map(|(name, a)| ColumnStats {
            name,
            low: a.low,
            high: a.high,
            avg: a.sum / rows as f64,
        })
        .collect();

    Ok(CsvSummary {
        columns,
        first_timestamp,
        last_timestamp,
        rows,
    })
}
