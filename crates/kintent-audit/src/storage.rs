//! Audit storage backends.

use crate::error::AuditError;
use crate::logger::AuditFilter;
use crate::record::AuditRecord;
use async_trait::async_trait;
use kintent_core::AuditConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Trait for audit storage backends.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Persist a record. Returning `Ok` means the record is durable.
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError>;

    /// Query records with filters, in sequence order.
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Get a record by ID.
    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError>;

    /// Highest sequence number already stored.
    fn last_sequence(&self) -> Option<u64>;
}

/// Create a storage backend based on configuration.
pub fn create_storage(config: &AuditConfig) -> Result<Box<dyn AuditStorage>, AuditError> {
    let file = FileStorage::open(&config.path, config.sync)?;
    if config.stdout {
        Ok(Box::new(DualStorage::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn select(records: &[AuditRecord], filter: &AuditFilter) -> Vec<AuditRecord> {
    records
        .iter()
        .filter(|r| filter.matches(r))
        .skip(filter.offset.unwrap_or(0))
        .take(filter.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

fn poisoned<E: std::fmt::Display>(e: E) -> AuditError {
    AuditError::StorageError(format!("audit lock poisoned: {}", e))
}

/// JSON Lines file storage.
///
/// Every record is one line. Existing records are loaded when the file is
/// opened, so history and sequence numbering survive restarts.
pub struct FileStorage {
    path: PathBuf,
    sync: bool,
    records: RwLock<Vec<AuditRecord>>,
}

impl FileStorage {
    /// Open (or prepare to create) the log at `path`.
    ///
    /// A torn final line is cut off so later appends start on a fresh line.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };
        tracing::debug!(path = %path.display(), records = records.len(), "Opened audit log");
        Ok(Self {
            path,
            sync,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
        let content = std::fs::read(path)?;
        let lines: Vec<&[u8]> = content.split_inclusive(|b| *b == b'\n').collect();
        let last = lines.len();
        let mut records = Vec::with_capacity(last);
        // End of the last complete, parseable line.
        let mut good_end = 0;
        let mut offset = 0;

        for (idx, raw) in lines.iter().enumerate() {
            offset += raw.len();
            let line = raw.trim_ascii();
            if line.is_empty() {
                good_end = offset;
                continue;
            }
            match serde_json::from_slice::<AuditRecord>(line) {
                Ok(record) => {
                    records.push(record);
                    good_end = offset;
                }
                // A torn final line is what an interrupted append leaves behind.
                Err(e) if idx + 1 == last => {
                    tracing::warn!(path = %path.display(), line = idx + 1, error = %e, "Dropping truncated audit record");
                }
                Err(e) => {
                    return Err(AuditError::Corrupt {
                        line: idx + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if good_end < content.len() {
            let file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.set_len(good_end as u64)?;
            file.sync_data()?;
        } else if content.last().is_some_and(|b| *b != b'\n') {
            let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        if self.sync {
            file.sync_data()?;
        }

        self.records.write().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(select(&records, filter))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    fn last_sequence(&self) -> Option<u64> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.iter().map(|r| r.sequence).max())
    }
}

/// In-memory storage, used by tests and `--memory-cluster` runs.
#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<Vec<AuditRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStorage for MemoryStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AuditError::StorageError("audit storage unavailable".to_string()));
        }
        self.records.write().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(select(&records, filter))
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    fn last_sequence(&self) -> Option<u64> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.iter().map(|r| r.sequence).max())
    }
}

/// File storage that also echoes each record to stdout.
pub struct DualStorage {
    file: FileStorage,
}

impl DualStorage {
    pub fn new(file: FileStorage) -> Self {
        Self { file }
    }
}

#[async_trait]
impl AuditStorage for DualStorage {
    async fn store(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.file.store(record).await?;
        println!(
            "[audit #{} {} {} attempt={}] {}",
            record.sequence,
            record.outcome,
            record.intent.summary(),
            record.attempt,
            record.detail
        );
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.file.query(filter).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, AuditError> {
        self.file.get(id).await
    }

    fn last_sequence(&self) -> Option<u64> {
        self.file.last_sequence()
    }
}
