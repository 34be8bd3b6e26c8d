//! RocksDB-backed durable store.
//!
//! Column families:
//! - `documents` — editable content blobs (LZ4-compressed JSON)
//! - `projects`  — project entities (bincode)
//! - `users`     — user records with denormalized project lists (bincode)
//!
//! Keys are the entities' string ids, so activity-document cleanup is a
//! prefix scan over `documents`. Targeted updates are read-modify-write
//! on one key, serialized through an internal lock so two concurrent
//! mutations of the same entity never lose each other's write.

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, MultiThreaded, Options, WriteBatch,
};
use std::path::PathBuf;
use tokio::sync::Mutex;

use tripsync_core::{
    Document, DocumentStore, Project, ProjectStore, ProjectUpdate, SimpleUser,
    StoreError, UserRecord, UserStore, UserUpdate,
};

const CF_DOCUMENTS: &str = "documents";
const CF_PROJECTS: &str = "projects";
const CF_USERS: &str = "users";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_PROJECTS, CF_USERS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tripsync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            max_open_files: 64,
        }
    }
}

/// RocksDB store serving all three trait surfaces.
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
    /// Serializes read-modify-write updates; plain gets/puts bypass it.
    update_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store at the configured path, creating the database and
    /// column families on first use.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db,
            update_lock: Mutex::new(()),
        })
    }

    /// Per-CF options: point-lookup workload, bloom filters, LZ4.
    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    fn get_raw(&self, cf_name: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Database(format!("missing CF {cf_name}")))?;
        self.db
            .get_cf(&cf, key.as_bytes())
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn put_raw(&self, cf_name: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let cf = self
            .db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::Database(format!("missing CF {cf_name}")))?;
        self.db
            .put_cf(&cf, key.as_bytes(), value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn delete_raw(&self, cf_name: &str, key: &str) -> Result<bool, StoreError> {
        let existed = self.get_raw(cf_name, key)?.is_some();
        if existed {
            let cf = self
                .db
                .cf_handle(cf_name)
                .ok_or_else(|| StoreError::Database(format!("missing CF {cf_name}")))?;
            self.db
                .delete_cf(&cf, key.as_bytes())
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(existed)
    }

    // Document content is JSON, LZ4-compressed with a length prefix so
    // decompression can size its buffer up front.

    fn encode_content(content: &serde_json::Value) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_vec(content)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&json))
    }

    fn decode_content(bytes: &[u8]) -> Result<serde_json::Value, StoreError> {
        let json = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        serde_json::from_slice(&json)
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    fn encode_record<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode_record<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(value)
    }
}

#[async_trait]
impl DocumentStore for RocksStore {
    async fn find(&self, id: &str) -> Result<Option<Document>, StoreError> {
        match self.get_raw(CF_DOCUMENTS, id)? {
            Some(bytes) => Ok(Some(Document {
                id: id.to_string(),
                content: Self::decode_content(&bytes)?,
            })),
            None => Ok(None),
        }
    }

    async fn create(&self, doc: Document) -> Result<(), StoreError> {
        let _guard = self.update_lock.lock().await;
        if self.get_raw(CF_DOCUMENTS, &doc.id)?.is_some() {
            return Err(StoreError::Duplicate(doc.id));
        }
        self.put_raw(CF_DOCUMENTS, &doc.id, &Self::encode_content(&doc.content)?)
    }

    async fn update_content(
        &self,
        id: &str,
        content: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.put_raw(CF_DOCUMENTS, id, &Self::encode_content(&content)?)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_raw(CF_DOCUMENTS, id)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let cf = self
            .db
            .cf_handle(CF_DOCUMENTS)
            .ok_or_else(|| StoreError::Database(format!("missing CF {CF_DOCUMENTS}")))?;

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        let iter = self.db.iterator_cf(
            &cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        for entry in iter {
            let (key, _) = entry.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            batch.delete_cf(&cf, &key);
            removed += 1;
        }
        if removed > 0 {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ProjectStore for RocksStore {
    async fn find(&self, id: &str) -> Result<Option<Project>, StoreError> {
        match self.get_raw(CF_PROJECTS, id)? {
            Some(bytes) => Ok(Some(Self::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, project: Project) -> Result<(), StoreError> {
        let _guard = self.update_lock.lock().await;
        if self.get_raw(CF_PROJECTS, &project.id)?.is_some() {
            return Err(StoreError::Duplicate(project.id));
        }
        self.put_raw(CF_PROJECTS, &project.id, &Self::encode_record(&project)?)
    }

    async fn update(&self, id: &str, update: ProjectUpdate) -> Result<bool, StoreError> {
        let _guard = self.update_lock.lock().await;
        let Some(bytes) = self.get_raw(CF_PROJECTS, id)? else {
            return Ok(false);
        };
        let mut project: Project = Self::decode_record(&bytes)?;
        update.apply(&mut project);
        self.put_raw(CF_PROJECTS, id, &Self::encode_record(&project)?)?;
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.delete_raw(CF_PROJECTS, id)
    }
}

#[async_trait]
impl UserStore for RocksStore {
    async fn find(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        match self.get_raw(CF_USERS, id)? {
            Some(bytes) => Ok(Some(Self::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, user: &SimpleUser, update: UserUpdate) -> Result<(), StoreError> {
        let _guard = self.update_lock.lock().await;
        let mut record = match self.get_raw(CF_USERS, &user.id)? {
            Some(bytes) => Self::decode_record(&bytes)?,
            None => UserRecord::new(user.clone()),
        };
        update.apply(&mut record);
        self.put_raw(CF_USERS, &user.id, &Self::encode_record(&record)?)
    }
}
