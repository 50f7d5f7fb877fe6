//! JSONL journal store: one append-only file per trading day.
//!
//! Layout under the journal directory:
//! - `journal-YYYY-MM-DD.jsonl`: active day, one tagged JSON object per line
//! - `archive/journal-YYYY-MM-DD.jsonl`: days moved out by `archive`
//!
//! Every state change is a new line. On load, later record lines for the
//! same key supersede earlier ones (the journal index does the folding).
//! A malformed final line is a write torn by a crash: it is dropped with a
//! warning and cut from the file so later appends start on a clean line. A
//! malformed line anywhere else fails the load.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rangebot_core::domain::TradingDay;
use rangebot_core::journal::{
    JournalError, JournalRecord, JournalSnapshot, JournalStore, RangeLockRecord,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalLine {
    Record(JournalRecord),
    RangeLock(RangeLockRecord),
}

pub struct JsonlJournalStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlJournalStore {
    /// Open (creating if needed) a journal directory.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, write_lock: Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn day_path(&self, day: TradingDay) -> PathBuf {
        self.dir.join(file_name(day))
    }

    pub fn archive_path(&self, day: TradingDay) -> PathBuf {
        self.dir.join("archive").join(file_name(day))
    }

    fn append(&self, day: TradingDay, line: &JournalLine) -> Result<(), JournalError> {
        let json = serde_json::to_string(line).map_err(storage)?;
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.day_path(day))
            .map_err(storage)?;
        writeln!(file, "{json}").map_err(storage)?;
        file.flush().map_err(storage)?;
        file.sync_data().map_err(storage)?;
        Ok(())
    }
}

impl JournalStore for JsonlJournalStore {
    fn load(&self, day: TradingDay) -> Result<JournalSnapshot, JournalError> {
        let path = self.day_path(day);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(JournalSnapshot::default()),
            Err(e) => return Err(storage(e)),
        };

        let mut snapshot = JournalSnapshot::default();
        let mut torn: Option<TornLine> = None;
        let mut offset = 0;
        for (n, line) in text.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += line.len();
            if line.trim().is_empty() {
                continue;
            }
            if let Some(bad) = torn.take() {
                return Err(JournalError::Storage(format!(
                    "{}: malformed journal line {} is not the last line: {}",
                    path.display(),
                    bad.line,
                    bad.error
                )));
            }
            match serde_json::from_str::<JournalLine>(line.trim_end()) {
                Ok(JournalLine::Record(record)) => snapshot.records.push(record),
                Ok(JournalLine::RangeLock(lock)) => snapshot.range_locks.push(lock),
                Err(error) => torn = Some(TornLine { line: n + 1, start, error }),
            }
        }

        if let Some(bad) = &torn {
            warn!(
                path = %path.display(),
                line = bad.line,
                error = %bad.error,
                "dropping torn final journal line"
            );
            let _guard = self.write_lock.lock();
            let file = OpenOptions::new().write(true).open(&path).map_err(storage)?;
            file.set_len(bad.start as u64).map_err(storage)?;
            file.sync_data().map_err(storage)?;
        } else if !text.is_empty() && !text.ends_with('\n') {
            let _guard = self.write_lock.lock();
            let mut file = OpenOptions::new().append(true).open(&path).map_err(storage)?;
            writeln!(file).map_err(storage)?;
        }
        debug!(
            %day,
            records = snapshot.records.len(),
            range_locks = snapshot.range_locks.len(),
            torn = torn.is_some(),
            "journal file loaded"
        );
        Ok(snapshot)
    }

    fn append_record(&self, record: &JournalRecord) -> Result<(), JournalError> {
        self.append(record.key.trading_day, &JournalLine::Record(record.clone()))
    }

    fn append_range_lock(&self, lock: &RangeLockRecord) -> Result<(), JournalError> {
        self.append(lock.trading_day, &JournalLine::RangeLock(lock.clone()))
    }

    fn archive(&self, day: TradingDay) -> Result<(), JournalError> {
        let _guard = self.write_lock.lock();
        let from = self.day_path(day);
        if !from.exists() {
            debug!(%day, "nothing to archive");
            return Ok(());
        }
        let to = self.archive_path(day);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(storage)?;
        }
        fs::rename(&from, &to).map_err(storage)?;
        info!(%day, to = %to.display(), "journal archived");
        Ok(())
    }
}

impl std::fmt::Debug for JsonlJournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlJournalStore").field("dir", &self.dir).finish()
    }
}

struct TornLine {
    line: usize,
    start: usize,
    error: serde_json::Error,
}

fn file_name(day: TradingDay) -> String {
    format!("journal-{day}.jsonl")
}

fn storage(err: impl std::fmt::Display) -> JournalError {
    JournalError::Storage(err.to_string())
}
