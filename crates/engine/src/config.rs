//! Store configuration via `arbor.toml`
//!
//! On first open of a directory a commented default `arbor.toml` is written
//! next to the archives. Edit the file and reopen the store to change
//! settings. In-memory stores take a [`StoreConfig`] value directly.

use arbor_durability::CompactionStrategy;
use arbor_storage::{FileStoreOptions, WriterOptions, DEFAULT_MAX_SEGMENT_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file name placed in the store directory
pub const CONFIG_FILE_NAME: &str = "arbor.toml";

/// Errors loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unexpected fields
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Store configuration loaded from `arbor.toml`
///
/// # Example
///
/// ```toml
/// max_segment_size = 262144
/// gc_interval_ms = 3600000
///
/// [compaction]
/// cleanup = "CLEAN_OLD"
/// cleanup_older_than_ms = 3600000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum size of one segment in bytes
    pub max_segment_size: usize,
    /// Archive size at which a new archive is started
    pub max_archive_size: u64,
    /// Segments kept in the read cache
    pub segment_cache_size: usize,
    /// Capacity of each node deduplication cache; 0 disables it
    pub node_dedup_cache_size: i64,
    /// Capacity of each binary deduplication cache; 0 disables it
    pub binary_dedup_cache_size: i64,
    /// Pending transitions buffered per observer before collapsing
    pub observer_queue_length: usize,
    /// Interval of background collection passes; 0 disables them
    pub gc_interval_ms: u64,
    /// Property carrying a node's stable identity, used to detect moves
    pub identifier_property: String,
    /// Property carrying a node's type, used by node type filters
    pub node_type_property: String,
    /// Garbage collection strategy
    pub compaction: CompactionStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            max_archive_size: 256 * 1024 * 1024,
            segment_cache_size: 256,
            node_dedup_cache_size: 8192,
            binary_dedup_cache_size: 1024,
            observer_queue_length: 1000,
            gc_interval_ms: 60 * 60 * 1000,
            identifier_property: "jcr:uuid".to_string(),
            node_type_property: "jcr:primaryType".to_string(),
            compaction: CompactionStrategy::default(),
        }
    }
}

impl StoreConfig {
    /// Returns the default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# ArborDB store configuration

# Maximum segment size in bytes (default 256 KiB)
max_segment_size = 262144

# Size at which a new tar archive is started (default 256 MiB)
max_archive_size = 268435456

# Segments kept in the read cache
segment_cache_size = 256

# Deduplication cache capacities; 0 disables deduplication
node_dedup_cache_size = 8192
binary_dedup_cache_size = 1024

# Transitions queued per observer before they collapse into one
observer_queue_length = 1000

# Background garbage collection interval; 0 disables it
gc_interval_ms = 3600000

# Identity and type properties used by observation
identifier_property = "jcr:uuid"
node_type_property = "jcr:primaryType"

[compaction]
# Skip garbage collection entirely
paused = false
# Copy binaries when compacting sparse archives
clone_binaries = false
# Which in-memory references keep segments alive:
#   "CLEAN_ALL"  = none
#   "CLEAN_OLD"  = those younger than cleanup_older_than_ms
#   "CLEAN_NONE" = all
cleanup = "CLEAN_OLD"
cleanup_older_than_ms = 3600000
# Archives with a smaller share of live data are compacted
compaction_threshold = 0.75
# Attempts to catch up with concurrent commits
retry_count = 5
"#
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from(CONFIG_FILE_NAME),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config of the store in `directory`, creating the default file first
    pub fn load_or_create(directory: &Path) -> Result<Self, ConfigError> {
        std::fs::create_dir_all(directory).map_err(|source| ConfigError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = directory.join(CONFIG_FILE_NAME);
        Self::write_default_if_missing(&path)?;
        Self::from_file(&path)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_segment_size < 1024 {
            return Err(ConfigError::Invalid(format!(
                "max_segment_size must be at least 1024, got {}",
                self.max_segment_size
            )));
        }
        if self.max_archive_size < self.max_segment_size as u64 {
            return Err(ConfigError::Invalid(
                "max_archive_size must not be smaller than max_segment_size".to_string(),
            ));
        }
        if self.observer_queue_length == 0 {
            return Err(ConfigError::Invalid(
                "observer_queue_length must be positive".to_string(),
            ));
        }
        let threshold = self.compaction.compaction_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "compaction_threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        if self.identifier_property.is_empty() || self.node_type_property.is_empty() {
            return Err(ConfigError::Invalid(
                "identifier_property and node_type_property must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Options of the tar archive store
    pub fn file_store_options(&self) -> FileStoreOptions {
        FileStoreOptions {
            max_archive_size: self.max_archive_size,
            segment_cache_size: self.segment_cache_size,
        }
    }

    /// Options of the commit writer
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            max_segment_size: self.max_segment_size,
            node_cache_size: self.node_dedup_cache_size,
            blob_cache_size: self.binary_dedup_cache_size,
            ..WriterOptions::default()
        }
    }
}
