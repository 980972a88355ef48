//! Embedded single-file vector database.
//!
//! Records are `(id, vector, metadata)` triples held in memory and written
//! back to one file after every change. Search is an exact scan.
//!
//! ```no_run
//! use vldb::{Metadata, VectorLiteDb};
//!
//! let mut db = VectorLiteDb::open("notes.vldb", Some(3), Some("cosine"))?;
//! db.insert("a", vec![1.0, 0.0, 0.0], None)?;
//! db.insert("b", vec![0.0, 1.0, 0.0], None)?;
//!
//! for hit in db.search(&[1.0, 0.0, 0.0], 2)? {
//!     println!("{} {:.3}", hit.id, hit.similarity);
//! }
//!
//! let tagged = db.search_filtered(&[1.0, 0.0, 0.0], 5, |m: &Metadata| m.contains_key("tag"))?;
//! assert!(tagged.is_empty());
//! db.close()?;
//! # Ok::<(), vldb::Error>(())
//! ```

use std::fmt;
use std::path::Path;

use serde::Serialize;
use vldb_core::validate::validate_vector;
use vldb_index_flat::FlatIndex;
use vldb_storage::VectorStore;

pub use vldb_core::{
    ConfigError, JsonValue, Metadata, MetadataFilter, MetadataPredicate, Metric,
    ValidationError, Vector, VectorRecord,
};
pub use vldb_core::validate;
pub use vldb_storage::{Durability, RecoveryMode, StorageError, StoreConfig};

pub type Error = StorageError;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    /// Higher is more similar. See [`Metric::similarity`].
    pub similarity: f64,
    pub metadata: Option<Metadata>,
}

pub struct VectorLiteDb {
    store: VectorStore,
    index: FlatIndex,
}

impl VectorLiteDb {
    /// Opens or creates a database.
    ///
    /// `dimension` is required only when the file is missing or empty.
    /// `metric` defaults to cosine and is validated even when the file
    /// exists, though the file's own metric wins.
    pub fn open(
        path: impl AsRef<Path>,
        dimension: Option<usize>,
        metric: Option<&str>,
    ) -> Result<Self> {
        let metric = match metric {
            Some(name) => name.parse()?,
            None => Metric::default(),
        };
        let config = StoreConfig {
            dimension,
            metric,
            ..Default::default()
        };
        Self::open_with(path, config)
    }

    pub fn open_with(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let store = VectorStore::open(path, config)?;
        let index = FlatIndex::new(store.metric());
        Ok(Self { store, index })
    }

    pub fn insert(&mut self, id: &str, vector: Vector, metadata: Option<JsonValue>) -> Result<()> {
        self.store.insert(id, vector, metadata)
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.search_with(query, top_k, None)
    }

    /// Like [`search`](Self::search), keeping only records whose metadata
    /// satisfies `predicate`. Records without metadata never match.
    pub fn search_filtered<P: MetadataPredicate>(
        &self,
        query: &[f32],
        top_k: usize,
        predicate: P,
    ) -> Result<Vec<SearchResult>> {
        self.search_with(query, top_k, Some(&predicate))
    }

    pub fn search_with(
        &self,
        query: &[f32],
        top_k: usize,
        predicate: Option<&dyn MetadataPredicate>,
    ) -> Result<Vec<SearchResult>> {
        validate_vector(query, Some(self.store.dimension()))?;
        let hits = self
            .index
            .search(query, self.store.records(), top_k, predicate)?;

        let metric = self.index.metric();
        hits.into_iter()
            .map(|hit| {
                let metadata = self.store.get(&hit.id)?.metadata.clone();
                Ok(SearchResult {
                    similarity: metric.similarity(hit.distance),
                    id: hit.id,
                    metadata,
                })
            })
            .collect()
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    pub fn get(&self, id: &str) -> Result<(&[f32], Option<&Metadata>)> {
        let record = self.store.get(id)?;
        Ok((&record.vector, record.metadata.as_ref()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    /// Identifiers in position order.
    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.store.ids()
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    pub fn metric(&self) -> Metric {
        self.store.metric()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }
}

impl fmt::Display for VectorLiteDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VectorLiteDb(path='{}', vectors={}, dim={})",
            self.path().display(),
            self.len(),
            self.dimension()
        )
    }
}

impl fmt::Debug for VectorLiteDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorLiteDb")
            .field("path", &self.path())
            .field("vectors", &self.len())
            .field("dimension", &self.dimension())
            .field("metric", &self.metric())
            .finish()
    }
}
