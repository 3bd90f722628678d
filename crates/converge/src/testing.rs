//! In-memory host and kinds for unit tests

use crate::context::Context;
use crate::host::{Cmd, CmdOutput, FileKind, FileStat, Host};
use crate::resource::{GroupKind, Registry, Resource, SingleKind};
use anyhow::{Context as _, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// Where the fake package manager keeps its database
pub const PACKAGE_DB: &str = "/var/lib/fake/packages.json";

#[derive(Default)]
pub struct FakeHost {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Remaining successful writes per path before writes start failing
    failing: Mutex<HashMap<String, usize>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    /// Change a file behind the engine's back
    pub fn put(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|data| String::from_utf8_lossy(data).to_string())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// Make every write to (or removal of) `path` fail
    pub fn fail_writes(&self, path: &str) {
        self.fail_writes_after(path, 0);
    }

    /// Let `allowed` writes to `path` succeed, then fail the rest
    pub fn fail_writes_after(&self, path: &str, allowed: usize) {
        self.failing.lock().unwrap().insert(path.to_string(), allowed);
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if let Some(remaining) = self.failing.lock().unwrap().get_mut(key) {
            if *remaining == 0 {
                bail!("{key}: injected write failure");
            }
            *remaining -= 1;
        }
        Ok(())
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

impl Host for FakeHost {
    fn name(&self) -> String {
        "fake".to_string()
    }

    fn run(&self, ctx: &Context, cmd: &Cmd) -> Result<CmdOutput> {
        ctx.check()?;
        bail!("fake host cannot run `{cmd}`")
    }

    fn read_file(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>> {
        ctx.check()?;
        self.files
            .lock()
            .unwrap()
            .get(&Self::key(path))
            .cloned()
            .with_context(|| format!("{}: no such file", path.display()))
    }

    fn write_file(&self, ctx: &Context, path: &Path, data: &[u8], _mode: u32) -> Result<()> {
        ctx.check()?;
        let key = Self::key(path);
        self.check_writable(&key)?;
        self.files.lock().unwrap().insert(key, data.to_vec());
        Ok(())
    }

    fn chmod(&self, ctx: &Context, path: &Path, _mode: u32) -> Result<()> {
        self.read_file(ctx, path).map(|_| ())
    }

    fn chown(&self, ctx: &Context, path: &Path, _uid: u32, _gid: u32) -> Result<()> {
        self.read_file(ctx, path).map(|_| ())
    }

    fn lstat(&self, ctx: &Context, path: &Path) -> Result<Option<FileStat>> {
        ctx.check()?;
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&Self::key(path))
            .map(|data| FileStat {
                kind: FileKind::Regular,
                mode: 0o644,
                uid: 0,
                gid: 0,
                size: data.len() as u64,
            }))
    }

    fn mkdir_all(&self, ctx: &Context, _path: &Path, _mode: u32) -> Result<()> {
        ctx.check()?;
        Ok(())
    }

    fn rename(&self, ctx: &Context, from: &Path, to: &Path) -> Result<()> {
        ctx.check()?;
        let mut files = self.files.lock().unwrap();
        let data = files
            .remove(&Self::key(from))
            .with_context(|| format!("{}: no such file", from.display()))?;
        files.insert(Self::key(to), data);
        Ok(())
    }

    fn remove(&self, ctx: &Context, path: &Path) -> Result<()> {
        ctx.check()?;
        self.check_writable(&Self::key(path))?;
        self.files
            .lock()
            .unwrap()
            .remove(&Self::key(path))
            .map(|_| ())
            .with_context(|| format!("{}: no such file", path.display()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileState {
    content: String,
}

/// Single kind storing `content` at the path given by the id
pub struct FakeFile;

impl SingleKind for FakeFile {
    fn name(&self) -> &'static str {
        "file"
    }

    fn validate(&self, resource: &Resource) -> Result<()> {
        if !resource.id.starts_with('/') {
            bail!("path must be absolute");
        }
        resource.typed_state::<FileState>()?;
        Ok(())
    }

    fn load(&self, ctx: &Context, host: &dyn Host, id: &str) -> Result<Resource> {
        let path = Path::new(id);
        if host.lstat(ctx, path)?.is_none() {
            return Ok(Resource::absent("file", id));
        }
        let content = String::from_utf8(host.read_file(ctx, path)?)?;
        Ok(Resource::new("file", id, json!({ "content": content })))
    }

    fn apply(&self, ctx: &Context, host: &dyn Host, resource: &Resource) -> Result<()> {
        let path = Path::new(&resource.id);
        match resource.typed_state::<FileState>()? {
            Some(state) => host.write_file(ctx, path, state.content.as_bytes(), 0o644),
            None if host.lstat(ctx, path)?.is_some() => host.remove(ctx, path),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageState {
    version: String,
}

/// Group kind backed by a JSON map of name to version
pub struct FakePackage;

impl FakePackage {
    fn database(ctx: &Context, host: &dyn Host) -> Result<BTreeMap<String, String>> {
        let path = Path::new(PACKAGE_DB);
        if host.lstat(ctx, path)?.is_none() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&host.read_file(ctx, path)?)?)
    }
}

impl GroupKind for FakePackage {
    fn name(&self) -> &'static str {
        "package"
    }

    fn validate(&self, resource: &Resource) -> Result<()> {
        resource.typed_state::<PackageState>()?;
        Ok(())
    }

    fn load(&self, ctx: &Context, host: &dyn Host, ids: &[String]) -> Result<Vec<Resource>> {
        let installed = Self::database(ctx, host)?;
        Ok(ids
            .iter()
            .map(|id| match installed.get(id) {
                Some(version) => Resource::new("package", id, json!({ "version": version })),
                None => Resource::absent("package", id),
            })
            .collect())
    }

    fn apply(&self, ctx: &Context, host: &dyn Host, resources: &[Resource]) -> Result<()> {
        let mut installed = Self::database(ctx, host)?;
        for resource in resources {
            match resource.typed_state::<PackageState>()? {
                Some(state) => installed.insert(resource.id.clone(), state.version),
                None => installed.remove(&resource.id),
            };
        }
        let data = serde_json::to_vec(&installed)?;
        host.write_file(ctx, Path::new(PACKAGE_DB), &data, 0o644)
    }
}

pub fn file(id: &str, content: &str) -> Resource {
    Resource::new("file", id, json!({ "content": content }))
}

pub fn package(id: &str, version: &str) -> Resource {
    Resource::new("package", id, json!({ "version": version }))
}

pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_single(FakeFile).register_group(FakePackage);
    registry
}
