use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::catalog::covers::COVERS_DB_NAME;
use crate::catalog::CATALOGUE_DB_NAME;
use crate::sync::SynchronizedDb;

pub struct ShelfConfig {
    /// Path to the directory holding the catalogue, covers cache and backups
    pub data_dir: String,

    /// Whether scaled cover images are kept in the covers blob cache
    pub covers_cache_enabled: bool,
}

const EMPTY_CONFIG: &str = r#"### shelfdb configuration file

### directory holding the catalogue database, covers cache and backups
# data_dir = "~/.shelfdb"

### keep scaled cover images in the covers.db blob cache
# covers_cache_enabled = true
"#;

impl Default for ShelfConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.shelfdb", home_dir),
            covers_cache_enabled: true,
        }
    }
}

impl ShelfConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<ShelfConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.shelfdb/shelfdb.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        // Config dir
        let shelf_dir = format!("{}/.shelfdb", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(shelf_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create shelfdb directory: {}", e))?;
                let p = format!("{}/shelfdb.toml", shelf_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of SHELFDB)
        // E.g., `SHELFDB_DATA_DIR=~/.shelfdb` would set the data directory
        builder = builder.add_source(config::Environment::with_prefix("SHELFDB"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        // Parse data directory
        let data_dir = match config.get("data_dir") {
            Some(p) => {
                let path = Path::new(p);
                path.to_str()
                    .ok_or_else(|| anyhow!("Could not convert data_dir path to string"))?
                    .to_string()
            }
            None => {
                let dir = format!("{}/.shelfdb/", home_dir.as_str());
                std::fs::create_dir_all(dir.as_str())
                    .map_err(|e| anyhow!("Unable to create data directory: {}", e))?;
                dir
            }
        };

        // Parse cover-cache toggle (default: enabled)
        let covers_cache_enabled = config
            .get("covers_cache_enabled")
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Ok(ShelfConfig {
            data_dir,
            covers_cache_enabled,
        })
    }

    /// Get the path to the catalogue database file
    pub fn catalogue_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, CATALOGUE_DB_NAME)
    }

    /// Get the path to the covers cache database file
    pub fn covers_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, COVERS_DB_NAME)
    }

    /// Get the directory pre-migration snapshots and exports are copied to
    pub fn backup_dir(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/backups", data_dir)
    }

    /// Get the directory holding full-size cover image files
    pub fn cover_files_dir(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/covers", data_dir)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Catalogue:          {}", self.catalogue_path()),
            format!("Covers Cache:       {}", self.covers_path()),
            format!("Backups:            {}", self.backup_dir()),
            format!(
                "Cover Caching:      {}",
                if self.covers_cache_enabled { "enabled" } else { "disabled" }
            ),
        ];

        if let Ok(meta) = std::fs::metadata(self.catalogue_path()) {
            lines.push(format!("Catalogue Size:     {}", format_size(meta.len())));
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.shelfdb/shelfdb.toml", home_dir)
    }
}

/// Information about the catalogue database file
#[derive(Debug, Serialize, Clone)]
pub struct CatalogueInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_count: Option<i64>,
}

/// Information about the covers cache database file
#[derive(Debug, Serialize, Clone)]
pub struct CoversInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<i64>,
}

/// Get catalogue database information. Read-only: a missing or broken file
/// is reported, never created or repaired.
pub fn get_catalogue_info(config: &ShelfConfig) -> CatalogueInfo {
    let path = config.catalogue_path();
    let exists = Path::new(&path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&path).ok().map(|m| m.len())
    } else {
        None
    };

    let (schema_version, book_count) = if exists {
        match SynchronizedDb::open(Path::new(&path)) {
            Ok(db) => {
                let version = db.schema_version().ok();
                let books = match db.table_exists("books") {
                    Ok(true) => db
                        .query_row_opt("Select Count(*) From books", [], |row| row.get(0))
                        .ok()
                        .flatten(),
                    _ => None,
                };
                (version, books)
            }
            Err(_) => (None, None),
        }
    } else {
        (None, None)
    };

    CatalogueInfo {
        path,
        exists,
        size_bytes,
        schema_version,
        book_count,
    }
}

/// Get covers cache information, with the same read-only policy.
pub fn get_covers_info(config: &ShelfConfig) -> CoversInfo {
    let path = config.covers_path();
    let exists = Path::new(&path).exists();
    let size_bytes = if exists {
        std::fs::metadata(&path).ok().map(|m| m.len())
    } else {
        None
    };

    let image_count = if exists {
        match SynchronizedDb::open(Path::new(&path)) {
            Ok(db) => match db.table_exists("image") {
                Ok(true) => db
                    .query_row_opt("Select Count(*) From image", [], |row| row.get(0))
                    .ok()
                    .flatten(),
                _ => None,
            },
            Err(_) => None,
        }
    } else {
        None
    };

    CoversInfo {
        path,
        exists,
        size_bytes,
        image_count,
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;

    #[test]
    fn test_default_config() {
        let config = ShelfConfig::default();
        assert!(config.covers_cache_enabled);
        assert!(config.data_dir.ends_with(".shelfdb"));
    }

    #[test]
    fn test_paths() {
        let config = ShelfConfig {
            data_dir: "/test/dir".to_string(),
            covers_cache_enabled: true,
        };

        assert_eq!(config.catalogue_path(), "/test/dir/book_catalogue.db");
        assert_eq!(config.covers_path(), "/test/dir/covers.db");
        assert_eq!(config.backup_dir(), "/test/dir/backups");
        assert_eq!(config.cover_files_dir(), "/test/dir/covers");
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = ShelfConfig {
            data_dir: "/test/dir/".to_string(),
            covers_cache_enabled: false,
        };
        assert_eq!(config.catalogue_path(), "/test/dir/book_catalogue.db");
    }

    #[test]
    fn test_summary_lists_locations() {
        let config = ShelfConfig {
            data_dir: "/test/dir".to_string(),
            covers_cache_enabled: false,
        };
        let summary = config.summary();
        assert!(summary.contains("/test/dir/book_catalogue.db"));
        assert!(summary.contains("/test/dir/covers.db"));
        assert!(summary.contains("disabled"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
    }

    #[test]
    fn test_catalogue_info_reads_a_live_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ShelfConfig {
            data_dir: dir.path().to_string_lossy().to_string(),
            covers_cache_enabled: true,
        };

        let missing = get_catalogue_info(&config);
        assert!(!missing.exists);
        assert_eq!(missing.schema_version, None);

        let store = CatalogStore::open_in_dir(dir.path()).unwrap();
        store
            .db()
            .exec("Insert Into books (title) Values ('Dune')")
            .unwrap();
        drop(store);

        let info = get_catalogue_info(&config);
        assert!(info.exists);
        assert_eq!(info.schema_version, Some(crate::schema::DB_VERSION));
        assert_eq!(info.book_count, Some(1));
        assert!(info.size_bytes.unwrap_or(0) > 0);
    }
}
