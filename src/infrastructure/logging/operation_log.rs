use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::operation_record::OperationRecord;

const FILE_SUFFIX: &str = "_operations.jsonl";

/// 日次の追記専用操作ログ
///
/// One file per local date, one JSON record per line. Files are never
/// rotated or removed here.
#[derive(Debug)]
pub struct OperationLog {
    dir: PathBuf,
    current: Mutex<Option<(NaiveDate, File)>>,
}

impl OperationLog {
    /// ログディレクトリを開く（存在しなければ作成）
    pub fn open(dir: impl Into<PathBuf>) -> RepoflowResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            RepoflowError::io(
                format!("failed to create log directory {}", dir.display()),
                Some(dir.clone()),
                e,
            )
        })?;

        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}{}", date.format("%Y-%m-%d"), FILE_SUFFIX))
    }

    pub fn today_path(&self) -> PathBuf {
        self.path_for(Local::now().date_naive())
    }

    /// Appends one record as a single line and flushes it.
    pub fn append(&self, record: &OperationRecord) -> RepoflowResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let date = record.timestamp.date_naive();
        let mut current = self
            .current
            .lock()
            .map_err(|_| RepoflowError::internal("operation log lock poisoned"))?;

        let reopen = !matches!(current.as_ref(), Some((open_date, _)) if *open_date == date);
        if reopen {
            let path = self.path_for(date);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    RepoflowError::io(
                        format!("failed to open log file {}", path.display()),
                        Some(path.clone()),
                        e,
                    )
                })?;
            debug!("Opened operation log {}", path.display());
            *current = Some((date, file));
        }

        if let Some((_, file)) = current.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    /// Appends a record, downgrading a write failure to a warning.
    pub fn record(&self, record: &OperationRecord) {
        if let Err(e) = self.append(record) {
            warn!(
                "Failed to write operation log for {} ({}): {}",
                record.operation,
                record.repository_path.display(),
                e
            );
        }
    }

    /// 指定日のレコードを読み込む
    ///
    /// A missing file yields no records; lines that do not parse are skipped.
    pub fn read_day(&self, date: NaiveDate) -> RepoflowResult<Vec<OperationRecord>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).map_err(|e| {
            RepoflowError::io(
                format!("failed to read log file {}", path.display()),
                Some(path.clone()),
                e,
            )
        })?;

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OperationRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping line {} of {}: {}", index + 1, path.display(), e),
            }
        }
        Ok(records)
    }

    pub fn read_today(&self) -> RepoflowResult<Vec<OperationRecord>> {
        self.read_day(Local::now().date_naive())
    }
}
