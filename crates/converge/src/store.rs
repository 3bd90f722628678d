//! Durable engine state
//!
//! Three records are kept:
//! - the *original* state of every resource, captured the first time it is
//!   brought under management and never overwritten
//! - the *last* blueprint, replaced after every successful apply
//! - the *target* blueprint, staged while an apply is in flight; finding it
//!   on startup means a previous run was interrupted
//!
//! There is no locking: one engine run at a time is assumed.

use crate::blueprint::Blueprint;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::resource::{Registry, Resource, ResourceKey};
use std::path::{Path, PathBuf};

/// Persistence contract used by the engine
pub trait Store {
    /// Save the pre-management state of a resource; first write wins
    fn save_original_resource(&self, resource: &Resource) -> Result<()>;

    fn has_original_resource(&self, key: &ResourceKey) -> Result<bool>;

    /// Fails with [`Error::MissingOriginal`] when nothing was saved for `key`
    fn load_original_resource(&self, key: &ResourceKey) -> Result<Resource>;

    fn save_last_blueprint(&self, blueprint: &Blueprint) -> Result<()>;

    /// `None` when no blueprint was ever applied
    fn load_last_blueprint(&self) -> Result<Option<Blueprint>>;

    fn save_target_blueprint(&self, blueprint: &Blueprint) -> Result<()>;

    fn has_target_blueprint(&self) -> Result<bool>;

    fn load_target_blueprint(&self) -> Result<Blueprint>;

    fn delete_target_blueprint(&self) -> Result<()>;
}

const ORIGINALS_DIR: &str = "originals";
const LAST_FILE: &str = "last.json";
const TARGET_FILE: &str = "target.json";
const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Store kept as JSON files on the managed host itself
///
/// Layout under `root`:
/// ```text
/// originals/<kind>/<blake3(id)>.json
/// last.json
/// target.json
/// ```
/// Every write goes to a temporary file next to its destination and is
/// renamed into place, so readers never see a partial record.
pub struct HostStore<'a> {
    ctx: &'a Context,
    host: &'a dyn Host,
    registry: &'a Registry,
    root: PathBuf,
}

impl<'a> HostStore<'a> {
    pub fn new(
        ctx: &'a Context,
        host: &'a dyn Host,
        registry: &'a Registry,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            host,
            registry,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn original_path(&self, key: &ResourceKey) -> PathBuf {
        let hash = blake3::hash(key.id.as_bytes());
        self.root
            .join(ORIGINALS_DIR)
            .join(&key.kind)
            .join(format!("{}.json", hash.to_hex()))
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        self.host
            .lstat(self.ctx, path)
            .map(|stat| stat.is_some())
            .map_err(|e| Error::store(format!("stat {}", path.display()), e))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.host
            .read_file(self.ctx, path)
            .map_err(|e| Error::store(format!("read {}", path.display()), e))
    }

    /// Write `data` to `path` via a temporary file and rename
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let context = || format!("write {}", path.display());
        if let Some(parent) = path.parent() {
            self.host
                .mkdir_all(self.ctx, parent, DIR_MODE)
                .map_err(|e| Error::store(context(), e))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        self.host
            .write_file(self.ctx, &tmp, data, FILE_MODE)
            .map_err(|e| Error::store(context(), e))?;
        self.host
            .rename(self.ctx, &tmp, path)
            .map_err(|e| Error::store(context(), e))?;
        log::debug!("Wrote {}", path.display());
        Ok(())
    }

    fn save_blueprint(&self, path: &Path, blueprint: &Blueprint) -> Result<()> {
        let data = serde_json::to_vec_pretty(blueprint)?;
        self.write_atomic(path, &data)
    }

    fn load_blueprint(&self, path: &Path) -> Result<Blueprint> {
        let blueprint: Blueprint = serde_json::from_slice(&self.read(path)?)?;
        blueprint.validate(self.registry)?;
        Ok(blueprint)
    }
}

impl Store for HostStore<'_> {
    fn save_original_resource(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        if self.has_original_resource(&key)? {
            log::debug!("Original state of {key} already saved, keeping it");
            return Ok(());
        }
        let data = serde_json::to_vec_pretty(resource)?;
        self.write_atomic(&self.original_path(&key), &data)
    }

    fn has_original_resource(&self, key: &ResourceKey) -> Result<bool> {
        self.exists(&self.original_path(key))
    }

    fn load_original_resource(&self, key: &ResourceKey) -> Result<Resource> {
        let path = self.original_path(key);
        if !self.exists(&path)? {
            return Err(Error::MissingOriginal(key.clone()));
        }
        let resource: Resource = serde_json::from_slice(&self.read(&path)?)?;
        if &resource.key() != key {
            return Err(Error::store(
                format!("read {}", path.display()),
                anyhow::anyhow!("record holds {} instead of {key}", resource.key()),
            ));
        }
        self.registry.validate(&resource)?;
        Ok(resource)
    }

    fn save_last_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        self.save_blueprint(&self.root.join(LAST_FILE), blueprint)
    }

    fn load_last_blueprint(&self) -> Result<Option<Blueprint>> {
        let path = self.root.join(LAST_FILE);
        if !self.exists(&path)? {
            return Ok(None);
        }
        self.load_blueprint(&path).map(Some)
    }

    fn save_target_blueprint(&self, blueprint: &Blueprint) -> Result<()> {
        self.save_blueprint(&self.root.join(TARGET_FILE), blueprint)
    }

    fn has_target_blueprint(&self) -> Result<bool> {
        self.exists(&self.root.join(TARGET_FILE))
    }

    fn load_target_blueprint(&self) -> Result<Blueprint> {
        self.load_blueprint(&self.root.join(TARGET_FILE))
    }

    fn delete_target_blueprint(&self) -> Result<()> {
        let path = self.root.join(TARGET_FILE);
        if !self.exists(&path)? {
            return Ok(());
        }
        self.host
            .remove(self.ctx, &path)
            .map_err(|e| Error::store(format!("remove {}", path.display()), e))
    }
}
