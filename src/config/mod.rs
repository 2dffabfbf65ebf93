// zodbbackup/src/config/mod.rs
pub mod blob_storage;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::AppError;
use crate::utils::paths::PathResolver;
use blob_storage::{BlobStorageResolver, DEFAULT_SHAPES, PeerConfig, PeerShape};

const DEFAULT_LABEL: &str = "backup";
const DEFAULT_LOCATION: &str = "var/backups";
const DEFAULT_SNAPSHOT_LOCATION: &str = "var/snapshotbackups";
const DEFAULT_DATAFS: &str = "var/filestorage/Data.fs";
const DEFAULT_KEEP: u32 = 2;
const BLOB_SUBDIR: &str = "blobstorage";

// Struct for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawJsonConfig {
    pub buildout_directory: Option<String>,
    pub label: Option<String>,
    pub repozo: Option<String>,
    pub location: Option<String>,
    pub snapshotlocation: Option<String>,
    pub blob_backup_location: Option<String>,
    pub blob_snapshot_location: Option<String>,
    pub keep: Option<u32>,
    pub datafs: Option<String>,
    pub full: Option<bool>,
    pub debug: Option<bool>,
    pub gzip: Option<bool>,
    pub additional_filestorages: Option<serde_json::Value>,
    pub enable_snapshotrestore: Option<bool>,
    #[serde(alias = "blob-storage")]
    pub blob_storage: Option<String>,
    pub backup_blobs: Option<bool>,
    pub only_blobs: Option<bool>,
    pub parts: BTreeMap<String, PeerConfig>,
    pub blob_storage_shapes: Option<Vec<PeerShape>>,
}

/// Fully resolved settings: every path absolute, every default applied.
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub label: String,
    pub buildout_dir: PathBuf,
    pub repozo: Option<PathBuf>,
    pub datafs: PathBuf,
    pub location: PathBuf,
    pub snapshot_location: PathBuf,
    pub blob_backup_location: PathBuf,
    pub blob_snapshot_location: PathBuf,
    pub keep: u32,
    pub full: bool,
    pub debug: bool,
    pub gzip: bool,
    pub additional_filestorages: Vec<String>,
    pub enable_snapshotrestore: bool,
    pub blob_storage: Option<PathBuf>,
    /// `None` means "not configured": back up blobs iff a blob storage resolved.
    pub backup_blobs: Option<bool>,
    pub only_blobs: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_dir: PathBuf,
    pub raw_json_config: RawJsonConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;

        let config_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(AppConfig {
            config_dir,
            raw_json_config,
        })
    }

    /// Only reads `debug`, so logging can be set up before full resolution.
    pub fn debug(&self) -> bool {
        self.raw_json_config.debug.unwrap_or(false)
    }

    pub fn settings(&self, resolver: &PathResolver) -> std::result::Result<BackupSettings, AppError> {
        resolve_settings(&self.raw_json_config, &self.config_dir, resolver)
    }
}

pub fn resolve_settings(
    raw: &RawJsonConfig,
    config_dir: &Path,
    resolver: &PathResolver,
) -> std::result::Result<BackupSettings, AppError> {
    let buildout_dir = match &raw.buildout_directory {
        Some(dir) => resolver.resolve(dir, config_dir),
        None => resolver.resolve(".", config_dir),
    };
    let resolve = |value: &Option<String>, default: &str| {
        let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty());
        resolver.resolve(value.unwrap_or(default), &buildout_dir)
    };

    let location = resolve(&raw.location, DEFAULT_LOCATION);
    let snapshot_location = resolve(&raw.snapshotlocation, DEFAULT_SNAPSHOT_LOCATION);
    let blob_backup_location = match &raw.blob_backup_location {
        Some(dir) => resolver.resolve(dir, &buildout_dir),
        None => location.join(BLOB_SUBDIR),
    };
    let blob_snapshot_location = match &raw.blob_snapshot_location {
        Some(dir) => resolver.resolve(dir, &buildout_dir),
        None => snapshot_location.join(BLOB_SUBDIR),
    };

    let label = raw
        .label
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LABEL)
        .to_string();

    let blob_storage = discover_blob_storage(raw).map(|location| resolver.resolve(&location, &buildout_dir));

    Ok(BackupSettings {
        label,
        repozo: raw.repozo.as_ref().map(|r| resolver.resolve(r, &buildout_dir)),
        datafs: resolve(&raw.datafs, DEFAULT_DATAFS),
        location,
        snapshot_location,
        blob_backup_location,
        blob_snapshot_location,
        keep: raw.keep.unwrap_or(DEFAULT_KEEP),
        full: raw.full.unwrap_or(false),
        debug: raw.debug.unwrap_or(false),
        gzip: raw.gzip.unwrap_or(true),
        additional_filestorages: parse_additional_filestorages(&raw.additional_filestorages)?,
        enable_snapshotrestore: raw.enable_snapshotrestore.unwrap_or(true),
        blob_storage,
        backup_blobs: raw.backup_blobs,
        only_blobs: raw.only_blobs.unwrap_or(false),
        buildout_dir,
    })
}

/// An explicit option wins; otherwise ask the peer sections.
fn discover_blob_storage(raw: &RawJsonConfig) -> Option<String> {
    if let Some(explicit) = raw.blob_storage.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        return Some(explicit.to_string());
    }
    let shapes = raw.blob_storage_shapes.as_deref().unwrap_or(&DEFAULT_SHAPES);
    let (part, location) = BlobStorageResolver::new(shapes).resolve(&raw.parts)?;
    debug!("Using blob storage {} from part [{}]", location, part);
    Some(location.to_string())
}

/// Parses additional_filestorages: either a whitespace separated string or an
/// array of names. Order is kept; duplicates are refused.
fn parse_additional_filestorages(value: &Option<serde_json::Value>) -> std::result::Result<Vec<String>, AppError> {
    let names: Vec<String> = match value {
        None | Some(serde_json::Value::Null) => return Ok(Vec::new()),
        Some(serde_json::Value::String(text)) => text.split_whitespace().map(str::to_string).collect(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(|s| s.trim().to_string()).ok_or_else(|| {
                    AppError::Config(format!(
                        "additional_filestorages entries must be strings, got {}",
                        item
                    ))
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect(),
        Some(other) => {
            return Err(AppError::Config(format!(
                "additional_filestorages must be a string or an array of names, got {}",
                other
            )));
        }
    };

    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if name.contains(['/', '\\']) {
            return Err(AppError::Config(format!(
                "additional filestorage name '{}' must not contain path separators",
                name
            )));
        }
        if seen.contains(&name) {
            return Err(AppError::Config(format!(
                "additional filestorage '{}' is listed more than once",
                name
            )));
        }
        seen.push(name);
    }
    Ok(seen)
}
