//! CSV result store.
//!
//! Results live under
//! `root/strategy_<name>/symbol_<sym>/start_<timestamp>/end_<timestamp>/`
//! as numbered `results_N.csv` files. Appends go to the highest-numbered
//! file whose header matches the record; a column change rotates to a fresh
//! file instead of corrupting the old one. Rows are keyed by the parameter
//! fingerprint column, so a finished combination is never recomputed.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;

pub const FINGERPRINT_COLUMN: &str = "fingerprint";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Identifies one result directory: strategy, instrument and data span.
/// The span is the first and last bar timestamp, so two same-day ranges with
/// different intraday extents never share a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub strategy: String,
    pub symbol: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Partition {
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(format!("strategy_{}", self.strategy))
            .join(format!("symbol_{}", self.symbol))
            .join(format!("start_{}", self.start.format("%Y-%m-%dT%H-%M-%S")))
            .join(format!("end_{}", self.end.format("%Y-%m-%dT%H-%M-%S")))
    }
}

/// One row to persist: identifying fields first, then metrics. Kept as
/// ordered pairs so the CSV header always matches the value order.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub fields: Vec<(String, String)>,
}

impl ResultRecord {
    pub fn headers(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn values(&self) -> Vec<&str> {
        self.fields.iter().map(|(_, v)| v.as_str()).collect()
    }
}

/// A row read back from the store.
#[derive(Debug, Clone)]
pub struct CachedRow {
    pub headers: Vec<String>,
    pub values: Vec<String>,
}

impl CachedRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers
            .iter()
            .position(|h| h == column)
            .map(|i| self.values[i].as_str())
    }
}

/// Append-only CSV store shared across sweep workers.
#[derive(Debug)]
pub struct ResultStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the row for a fingerprint across every results file in the
    /// partition, newest file first.
    pub fn lookup(
        &self,
        partition: &Partition,
        fingerprint: &str,
    ) -> Result<Option<CachedRow>, StoreError> {
        let dir = partition.dir(&self.root);
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut files = result_files(&dir)?;
        files.sort_by_key(|(n, _)| std::cmp::Reverse(*n));

        for (_, path) in files {
            let mut reader = csv::Reader::from_path(&path)?;
            let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
            let Some(fp_index) = headers.iter().position(|h| h == FINGERPRINT_COLUMN) else {
                continue;
            };
            for row in reader.records() {
                let row = row?;
                if row.get(fp_index) == Some(fingerprint) {
                    return Ok(Some(CachedRow {
                        headers,
                        values: row.iter().map(str::to_string).collect(),
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Append one record, rotating to a new numbered file when the schema
    /// changed. Returns the file written to.
    pub fn append(
        &self,
        partition: &Partition,
        record: &ResultRecord,
    ) -> Result<PathBuf, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;

        let dir = partition.dir(&self.root);
        fs::create_dir_all(&dir)?;

        let mut files = result_files(&dir)?;
        files.sort_by_key(|(n, _)| *n);

        let headers = record.headers();
        let target = match files.last() {
            Some((n, path)) => {
                let mut reader = csv::Reader::from_path(path)?;
                let existing: Vec<String> =
                    reader.headers()?.iter().map(str::to_string).collect();
                if existing == headers {
                    path.clone()
                } else {
                    let rotated = dir.join(format!("results_{}.csv", n + 1));
                    debug!(from = %path.display(), to = %rotated.display(), "schema changed, rotating results file");
                    rotated
                }
            }
            None => dir.join("results_1.csv"),
        };

        let fresh = !target.exists();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(&headers)?;
        }
        writer.write_record(record.values())?;
        writer.flush()?;

        Ok(target)
    }
}

/// `(N, path)` for every `results_N.csv` in the directory.
fn result_files(dir: &Path) -> Result<Vec<(u32, PathBuf)>, StoreError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(n) = name
            .strip_prefix("results_")
            .and_then(|rest| rest.strip_suffix(".csv"))
            .and_then(|n| n.parse::<u32>().ok())
        {
            out.push((n, path));
        }
    }
    Ok(out)
}
