use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tempfile::NamedTempFile;
use vldb_core::validate::{validate_id, validate_metadata, validate_vector};
use vldb_core::{ConfigError, JsonValue, Metric, ValidationError, Vector, VectorRecord};

pub mod config;
pub mod format;

pub use config::{Durability, RecoveryMode, StoreConfig};

#[cfg(test)]
const MMAP_THRESHOLD: u64 = 1 << 10; // 1 KiB in tests
#[cfg(not(test))]
const MMAP_THRESHOLD: u64 = 1 << 20; // 1 MiB in production

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("id already exists: {0}")]
    DuplicateId(String),
    #[error("id not found: {0}")]
    NotFound(String),
    #[error("invalid file format: {0}")]
    Format(String),
    #[error("corrupted database file: {0}")]
    Corruption(String),
    #[error("database is read-only: {}", .0.display())]
    ReadOnly(PathBuf),
    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

enum FileBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileBytes::Mapped(map) => map,
            FileBytes::Owned(buf) => buf,
        }
    }
}

fn read_file(path: &Path, len: u64) -> Result<FileBytes, StorageError> {
    if len >= MMAP_THRESHOLD {
        let file = File::open(path)?;
        if let Ok(map) = unsafe { Mmap::map(&file) } {
            return Ok(FileBytes::Mapped(map));
        }
    }
    Ok(FileBytes::Owned(fs::read(path)?))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Owns every record of one database file.
///
/// Records are kept in position order; `positions` maps each id to its
/// index in `records`, so positions are always `0..len`. Every mutation
/// rewrites the whole file.
#[derive(Debug)]
pub struct VectorStore {
    path: PathBuf,
    config: StoreConfig,
    dimension: usize,
    metric: Metric,
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
    read_only: bool,
}

impl VectorStore {
    /// Opens `path`, creating it when missing or empty.
    ///
    /// For an existing file the dimension and metric come from its header
    /// and the ones in `config` are ignored.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(err.into()),
        };
        if len > 0 {
            Self::load(path, config, len)
        } else {
            Self::create(path, config)
        }
    }

    fn empty(path: PathBuf, config: StoreConfig, dimension: usize, metric: Metric) -> Self {
        Self {
            path,
            config,
            dimension,
            metric,
            records: Vec::new(),
            positions: HashMap::new(),
            read_only: false,
        }
    }

    fn create(path: PathBuf, config: StoreConfig) -> Result<Self, StorageError> {
        let dimension = config.require_dimension()?;
        let metric = config.metric;
        let store = Self::empty(path, config, dimension, metric);
        store.save()?;
        log::info!(
            target: "vldb::storage",
            "created path={} dimension={} metric={}",
            store.path.display(),
            dimension,
            metric
        );
        Ok(store)
    }

    fn load(path: PathBuf, config: StoreConfig, len: u64) -> Result<Self, StorageError> {
        let bytes = read_file(&path, len)?;
        // saves rename a temp file into the parent, so it must be writable too
        let read_only = fs::metadata(&path)?.permissions().readonly()
            || fs::metadata(parent_dir(&path))?.permissions().readonly();

        let mut store = match format::decode(&bytes) {
            Ok(decoded) => {
                let mut store = Self::empty(
                    path,
                    config,
                    decoded.header.dimension as usize,
                    decoded.header.metric,
                );
                store.records = decoded.records;
                store.reindex();
                store
            }
            Err(StorageError::Corruption(reason))
                if config.recovery == RecoveryMode::BestEffort =>
            {
                let (dimension, metric) = match format::Header::decode(&bytes) {
                    Ok(header) => (header.dimension as usize, header.metric),
                    Err(StorageError::Corruption(_)) => {
                        (config.require_dimension()?, config.metric)
                    }
                    Err(err) => return Err(err),
                };
                log::warn!(
                    target: "vldb::storage",
                    "recovered_empty path={} reason={}",
                    path.display(),
                    reason
                );
                Self::empty(path, config, dimension, metric)
            }
            Err(err) => return Err(err),
        };
        store.read_only = read_only;

        if read_only {
            log::warn!(
                target: "vldb::storage",
                "opened_read_only path={}",
                store.path.display()
            );
        }
        log::info!(
            target: "vldb::storage",
            "opened path={} records={} dimension={} metric={}",
            store.path.display(),
            store.records.len(),
            store.dimension,
            store.metric
        );
        Ok(store)
    }

    fn reindex(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly(self.path.clone()));
        }
        Ok(())
    }

    /// Adds a record at the next position and rewrites the file.
    ///
    /// Nothing changes in memory unless the write succeeds.
    pub fn insert(
        &mut self,
        id: &str,
        vector: Vector,
        metadata: Option<JsonValue>,
    ) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let id = validate_id(id)?;
        if self.positions.contains_key(id) {
            return Err(StorageError::DuplicateId(id.to_string()));
        }
        validate_vector(&vector, Some(self.dimension))?;
        let metadata = validate_metadata(metadata)?;

        let pos = self.records.len();
        self.records.push(VectorRecord::new(id, vector, metadata));
        self.positions.insert(id.to_string(), pos);

        if let Err(err) = self.save() {
            self.records.pop();
            self.positions.remove(id);
            return Err(err);
        }
        Ok(())
    }

    /// Removes a record, renumbers the rest and rewrites the file.
    pub fn delete(&mut self, id: &str) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let id = validate_id(id)?;
        let pos = *self
            .positions
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let removed = self.records.remove(pos);
        self.reindex();

        if let Err(err) = self.save() {
            self.records.insert(pos, removed);
            self.reindex();
            return Err(err);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&VectorRecord, StorageError> {
        let id = validate_id(id)?;
        self.positions
            .get(id)
            .map(|&pos| &self.records[pos])
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// All records in position order.
    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Rewrites the whole file from memory via a temp file and rename.
    pub fn save(&self) -> Result<(), StorageError> {
        let bytes = format::encode(self.metric, self.dimension, &self.records)?;

        let parent = parent_dir(&self.path);
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        if let Ok(existing) = fs::metadata(&self.path) {
            fs::set_permissions(tmp.path(), existing.permissions())?;
        }
        if self.config.durability == Durability::Fsync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;

        log::debug!(
            target: "vldb::storage",
            "saved path={} records={} bytes={}",
            self.path.display(),
            self.records.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Final save. Safe to call any number of times; a no-op when the file
    /// was opened read-only.
    pub fn close(&mut self) -> Result<(), StorageError> {
        if !self.read_only {
            self.save()?;
        }
        log::info!(
            target: "vldb::storage",
            "closed path={} records={}",
            self.path.display(),
            self.records.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn create_writes_header_immediately() -> Result<(), StorageError> {
        init_logging();
        let dir = tempdir()?;
        let path = dir.path().join("new.vldb");
        let store = VectorStore::open(&path, StoreConfig::new(3).with_metric(Metric::L2))?;
        assert!(store.is_empty());

        let bytes = fs::read(&path)?;
        let header = format::Header::decode(&bytes)?;
        assert_eq!(header, format::Header::new(Metric::L2, 3, 0));
        Ok(())
    }

    #[test]
    fn missing_dimension_on_create_fails() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("nodim.vldb");
        let err = VectorStore::open(&path, StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::Config(ConfigError::MissingDimension)));
        assert!(!path.exists());

        fs::write(&path, b"")?;
        let err = VectorStore::open(&path, StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::Config(ConfigError::MissingDimension)));
        Ok(())
    }

    #[test]
    fn insert_assigns_contiguous_positions() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let mut store = VectorStore::open(dir.path().join("pos.vldb"), StoreConfig::new(2))?;
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            store.insert(id, vec![i as f32, 1.0], None)?;
            assert_eq!(store.position(id), Some(i));
        }
        store.delete("a")?;
        assert_eq!(store.position("b"), Some(0));
        assert_eq!(store.position("c"), Some(1));
        assert_eq!(store.ids().collect::<Vec<_>>(), ["b", "c"]);
        Ok(())
    }

    #[test]
    fn rejected_inserts_leave_state_untouched() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("reject.vldb");
        let mut store = VectorStore::open(&path, StoreConfig::new(3))?;
        store.insert("x", vec![1.0, 2.0, 3.0], Some(json!({ "v": 1 })))?;
        let before = fs::read(&path)?;

        assert!(matches!(
            store.insert("x", vec![9.0, 9.0, 9.0], None),
            Err(StorageError::DuplicateId(id)) if id == "x"
        ));
        assert!(matches!(
            store.insert("y", vec![1.0, 2.0], None),
            Err(StorageError::Validation(ValidationError::DimensionMismatch {
                expected: 3,
                got: 2
            }))
        ));
        assert!(matches!(
            store.insert("", vec![1.0, 2.0, 3.0], None),
            Err(StorageError::Validation(ValidationError::EmptyId))
        ));
        assert!(matches!(
            store.insert("z", vec![1.0, 2.0, 3.0], Some(json!("text"))),
            Err(StorageError::Validation(ValidationError::InvalidMetadata(_)))
        ));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("x")?.vector, vec![1.0, 2.0, 3.0]);
        assert_eq!(fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn get_and_delete_missing_ids() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let mut store = VectorStore::open(dir.path().join("missing.vldb"), StoreConfig::new(1))?;
        assert!(matches!(store.get("nope"), Err(StorageError::NotFound(_))));
        assert!(matches!(store.delete("nope"), Err(StorageError::NotFound(_))));
        store.insert("x", vec![1.0], None)?;
        store.delete("x")?;
        assert!(matches!(store.get("x"), Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn reopen_restores_everything() -> Result<(), StorageError> {
        init_logging();
        let dir = tempdir()?;
        let path = dir.path().join("reopen.vldb");
        {
            let mut store = VectorStore::open(&path, StoreConfig::new(3).with_metric(Metric::Dot))?;
            store.insert("a", vec![1.0, 0.0, 0.0], Some(json!({ "tag": "first" })))?;
            store.insert("b", vec![0.0, f32::NAN, 0.0], None)?;
            store.insert("c", vec![0.0, 0.0, 1.0], Some(json!({})))?;
            store.delete("b")?;
            store.close()?;
        }
        let store = VectorStore::open(&path, StoreConfig::new(99).with_metric(Metric::L2))?;
        assert_eq!(store.dimension(), 3);
        assert_eq!(store.metric(), Metric::Dot);
        assert_eq!(store.ids().collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(
            store.get("a")?.metadata.as_ref().and_then(|m| m.get("tag")),
            Some(&json!("first"))
        );
        assert_eq!(store.get("c")?.metadata, Some(vldb_core::Metadata::new()));
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("close.vldb");
        let mut store = VectorStore::open(&path, StoreConfig::new(2))?;
        store.insert("a", vec![1.0, 2.0], None)?;
        store.close()?;
        store.close()?;
        assert_eq!(VectorStore::open(&path, StoreConfig::default())?.len(), 1);
        Ok(())
    }

    #[test]
    fn parent_directories_are_created() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("deeper").join("db.vldb");
        VectorStore::open(&path, StoreConfig::new(2))?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn large_files_load_through_mmap() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("large.vldb");
        let mut store = VectorStore::open(&path, StoreConfig::new(64))?;
        let mut i = 0;
        while fs::metadata(&path)?.len() < MMAP_THRESHOLD {
            store.insert(&format!("v{i}"), vec![i as f32; 64], None)?;
            i += 1;
        }
        let reopened = VectorStore::open(&path, StoreConfig::default())?;
        assert_eq!(reopened.len(), i);
        assert_eq!(reopened.get("v0")?.vector, vec![0.0; 64]);
        Ok(())
    }

    #[test]
    fn corruption_is_strict_by_default() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("trunc.vldb");
        {
            let mut store = VectorStore::open(&path, StoreConfig::new(2))?;
            store.insert("a", vec![1.0, 2.0], Some(json!({ "k": "v" })))?;
        }
        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 3])?;

        let err = VectorStore::open(&path, StoreConfig::default()).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));

        let store = VectorStore::open(
            &path,
            StoreConfig::default().with_recovery(RecoveryMode::BestEffort),
        )?;
        assert!(store.is_empty());
        assert_eq!(store.dimension(), 2);
        Ok(())
    }

    #[test]
    fn best_effort_never_masks_a_foreign_file() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("foreign.vldb");
        fs::write(&path, b"corrupted data")?;
        let cfg = StoreConfig::new(3).with_recovery(RecoveryMode::BestEffort);
        assert!(matches!(
            VectorStore::open(&path, cfg),
            Err(StorageError::Format(_))
        ));
        Ok(())
    }

    #[test]
    fn best_effort_leaves_short_foreign_file_alone() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("short_foreign.vldb");
        fs::write(&path, b"PK\x03")?;

        assert!(matches!(
            VectorStore::open(&path, StoreConfig::new(2)),
            Err(StorageError::Format(_))
        ));
        let cfg = StoreConfig::new(2).with_recovery(RecoveryMode::BestEffort);
        assert!(matches!(
            VectorStore::open(&path, cfg),
            Err(StorageError::Format(_))
        ));
        assert_eq!(fs::read(&path)?, b"PK\x03");
        Ok(())
    }

    #[test]
    fn best_effort_with_truncated_header_uses_config() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("short.vldb");
        fs::write(&path, b"VLDB\x01\x00")?;

        let with_dim = StoreConfig::new(4).with_recovery(RecoveryMode::BestEffort);
        let store = VectorStore::open(&path, with_dim)?;
        assert_eq!(store.dimension(), 4);

        let no_dim = StoreConfig::default().with_recovery(RecoveryMode::BestEffort);
        assert!(matches!(
            VectorStore::open(&path, no_dim),
            Err(StorageError::Config(ConfigError::MissingDimension))
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn read_only_files_refuse_mutation() -> Result<(), StorageError> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let path = dir.path().join("ro.vldb");
        {
            let mut store = VectorStore::open(&path, StoreConfig::new(2))?;
            store.insert("a", vec![1.0, 2.0], None)?;
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444))?;

        let mut store = VectorStore::open(&path, StoreConfig::default())?;
        assert!(store.is_read_only());
        assert_eq!(store.get("a")?.vector, vec![1.0, 2.0]);
        assert!(matches!(
            store.insert("b", vec![3.0, 4.0], None),
            Err(StorageError::ReadOnly(_))
        ));
        assert!(matches!(store.delete("a"), Err(StorageError::ReadOnly(_))));
        store.close()?;
        assert_eq!(store.len(), 1);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_makes_store_read_only() -> Result<(), StorageError> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let sub = dir.path().join("locked");
        let path = sub.join("db.vldb");
        {
            let mut store = VectorStore::open(&path, StoreConfig::new(2))?;
            store.insert("a", vec![1.0, 2.0], None)?;
        }
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o555))?;

        let mut store = VectorStore::open(&path, StoreConfig::default())?;
        let writable_file = !fs::metadata(&path)?.permissions().readonly();
        let read_only = store.is_read_only();
        let insert = store.insert("b", vec![3.0, 4.0], None);
        let close = store.close();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755))?;

        assert!(writable_file);
        assert!(read_only);
        assert!(matches!(insert, Err(StorageError::ReadOnly(_))));
        assert!(close.is_ok());
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn fsync_durability_round_trips() -> Result<(), StorageError> {
        let dir = tempdir()?;
        let path = dir.path().join("fsync.vldb");
        let cfg = StoreConfig::new(1).with_durability(Durability::Fsync);
        let mut store = VectorStore::open(&path, cfg)?;
        store.insert("a", vec![0.25], None)?;
        assert_eq!(VectorStore::open(&path, StoreConfig::default())?.len(), 1);
        Ok(())
    }
}
