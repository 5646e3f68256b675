//! JSON Lines datasets: the append-only raw dataset, per-run snapshots and
//! the processed dataset.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use collector_core::domain::{PostRecord, ProcessedRecord, Sort};
use collector_core::error::StoreError;
use collector_core::ports::{DatasetIndex, DatasetStore, RecordSink};
use collector_core::utils::snapshot_file_name;
use serde::Deserialize;
use tracing::{info, warn};

/// The raw dataset file, one [`PostRecord`] per line.
pub struct JsonlDataset {
    path: PathBuf,
    writer: Option<File>,
}

impl JsonlDataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Reads every parsable record; unreadable lines are logged and skipped.
    pub fn read_records(&self) -> Result<Vec<PostRecord>, StoreError> {
        let mut records = Vec::new();
        for_each_line(&self.path, |line_no, line| {
            match serde_json::from_slice::<PostRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    path = %self.path.display(),
                    line = line_no,
                    error = %err,
                    "skipping unreadable dataset line"
                ),
            }
        })?;
        Ok(records)
    }

    /// Opens the file for appending, creating parent directories on demand.
    ///
    /// If a previous run died mid-line the file will not end in a newline;
    /// one is written first so the fragment stays on its own line.
    fn open_writer(&mut self) -> Result<&mut File, StoreError> {
        let file = match self.writer.take() {
            Some(file) => file,
            None => {
                ensure_parent(&self.path)?;
                let mut file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(|err| StoreError::io(&self.path, err))?;

                if ends_without_newline(&mut file).map_err(|err| StoreError::io(&self.path, err))? {
                    file.write_all(b"\n")
                        .map_err(|err| StoreError::io(&self.path, err))?;
                }
                file
            }
        };
        Ok(self.writer.insert(file))
    }
}

impl RecordSink for JsonlDataset {
    fn append(&mut self, record: &PostRecord) -> Result<(), StoreError> {
        let line = encode_line(record)?;
        let file = self.open_writer()?;
        let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        written.map_err(|err| StoreError::io(&self.path, err))
    }
}

/// Only the fields needed for the index; the rest of the line is ignored.
#[derive(Deserialize)]
struct IndexEntry {
    id: String,
    #[serde(default)]
    collected_at: Option<String>,
}

impl DatasetStore for JsonlDataset {
    fn load_index(&self) -> Result<DatasetIndex, StoreError> {
        let mut index = DatasetIndex::default();
        if !self.path.exists() {
            info!(path = %self.path.display(), "no existing dataset, starting fresh");
            return Ok(index);
        }

        for_each_line(&self.path, |line_no, line| {
            let entry = match serde_json::from_slice::<IndexEntry>(line) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        line = line_no,
                        error = %err,
                        "skipping unreadable dataset line"
                    );
                    return;
                }
            };

            let collected_at = entry
                .collected_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(at) = collected_at {
                if index.latest_collected_at.map_or(true, |latest| at > latest) {
                    index.latest_collected_at = Some(at);
                }
            }
            index.ids.insert(entry.id);
        })?;

        Ok(index)
    }
}

/// Per-run copy of the records written in that run.
///
/// The file is only created once the first record arrives, so runs that find
/// nothing new leave no empty snapshot behind.
pub struct SnapshotFile {
    dir: PathBuf,
    file_name: String,
    inner: Option<JsonlDataset>,
}

impl SnapshotFile {
    pub fn new(dir: impl Into<PathBuf>, sort: Sort, started_at: DateTime<Utc>) -> Self {
        Self {
            dir: dir.into(),
            file_name: snapshot_file_name(sort, &started_at),
            inner: None,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

impl RecordSink for SnapshotFile {
    fn append(&mut self, record: &PostRecord) -> Result<(), StoreError> {
        let dataset = match self.inner.take() {
            Some(dataset) => dataset,
            None => {
                let path = self.path();
                info!(path = %path.display(), "writing snapshot of new posts");
                JsonlDataset::new(path)
            }
        };
        self.inner.insert(dataset).append(record)
    }
}

/// Writes the processed dataset, replacing any previous file. Returns the
/// number of records written.
pub fn write_processed(path: &Path, records: &[ProcessedRecord]) -> Result<usize, StoreError> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|err| StoreError::io(path, err))?;
    let mut out = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_string(record).map_err(|source| StoreError::Encode {
            id: record.post.id.clone(),
            source,
        })?;
        writeln!(out, "{line}").map_err(|err| StoreError::io(path, err))?;
    }
    out.flush().map_err(|err| StoreError::io(path, err))?;
    Ok(records.len())
}

fn encode_line(record: &PostRecord) -> Result<String, StoreError> {
    let mut line = serde_json::to_string(record).map_err(|source| StoreError::Encode {
        id: record.id.clone(),
        source,
    })?;
    line.push('\n');
    Ok(line)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }
    }
    Ok(())
}

fn ends_without_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Calls `f` with the 1-based number and bytes of every non-blank line.
fn for_each_line(path: &Path, mut f: impl FnMut(usize, &[u8])) -> Result<(), StoreError> {
    let file = File::open(path).map_err(|err| StoreError::io(path, err))?;
    let mut reader = BufReader::new(file);
    let mut contents = Vec::new();
    reader
        .read_to_end(&mut contents)
        .map_err(|err| StoreError::io(path, err))?;

    for (i, line) in contents.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        f(i + 1, line);
    }
    Ok(())
}
