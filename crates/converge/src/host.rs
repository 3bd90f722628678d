//! Host transport contract
//!
//! The engine never touches a machine directly. Everything it needs from
//! the target host goes through this trait, so the same engine drives the
//! local machine, a remote one, or an in-memory fake in tests.

use crate::context::Context;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A command to run on the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    /// Program path or name looked up in `PATH`
    pub path: String,
    pub args: Vec<String>,
    /// Environment variables, added to a minimal default environment
    pub env: Vec<(String, String)>,
    /// Working directory
    pub dir: Option<PathBuf>,
    /// Data written to the command's stdin
    pub stdin: Option<Vec<u8>>,
}

impl Cmd {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Output from a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code, `-1` when the process was killed by a signal
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Metadata of a path on the host (not following symlinks)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits (`0o7777` mask)
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Operations the engine and resource kinds perform on a target host
///
/// All calls are synchronous from the engine's point of view and must
/// honour cancellation requested through the [`Context`].
pub trait Host: Send + Sync {
    /// Human-readable name of the host, used in messages
    fn name(&self) -> String;

    /// Run a command, returning its exit status and captured output
    fn run(&self, ctx: &Context, cmd: &Cmd) -> Result<CmdOutput>;

    /// Read the whole content of a file
    fn read_file(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>>;

    /// Create or truncate a file with the given permission bits
    fn write_file(&self, ctx: &Context, path: &Path, data: &[u8], mode: u32) -> Result<()>;

    fn chmod(&self, ctx: &Context, path: &Path, mode: u32) -> Result<()>;

    fn chown(&self, ctx: &Context, path: &Path, uid: u32, gid: u32) -> Result<()>;

    /// Stat a path without following symlinks, `None` when it does not exist
    fn lstat(&self, ctx: &Context, path: &Path) -> Result<Option<FileStat>>;

    /// Create a directory and all missing parents
    fn mkdir_all(&self, ctx: &Context, path: &Path, mode: u32) -> Result<()>;

    /// Atomically replace `to` with `from`
    fn rename(&self, ctx: &Context, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file or empty directory
    fn remove(&self, ctx: &Context, path: &Path) -> Result<()>;

    /// Run a command and fail unless it exits successfully
    fn run_checked(&self, ctx: &Context, cmd: &Cmd) -> Result<CmdOutput> {
        let output = self.run(ctx, cmd)?;
        if !output.success() {
            bail!(
                "`{}` exited with status {}: {}",
                cmd,
                output.status,
                output.stderr_str().trim()
            );
        }
        Ok(output)
    }

    /// Resolve a user name to its numeric id using the host's passwd database
    fn lookup_uid(&self, ctx: &Context, user: &str) -> Result<u32> {
        let passwd = self.read_file(ctx, Path::new("/etc/passwd"))?;
        lookup_id(&String::from_utf8_lossy(&passwd), user, 2)
            .ok_or_else(|| anyhow::anyhow!("unknown user: {user}"))
    }

    /// Resolve a group name to its numeric id using the host's group database
    fn lookup_gid(&self, ctx: &Context, group: &str) -> Result<u32> {
        let groups = self.read_file(ctx, Path::new("/etc/group"))?;
        lookup_id(&String::from_utf8_lossy(&groups), group, 2)
            .ok_or_else(|| anyhow::anyhow!("unknown group: {group}"))
    }
}

/// Find `name` in a colon-separated database and parse the id column
fn lookup_id(database: &str, name: &str, column: usize) -> Option<u32> {
    database
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.first() == Some(&name))
        .and_then(|fields| fields.get(column)?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
# comment:x:9:9
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
alice:x:1000:1000::/home/alice:/bin/sh
";

    #[test]
    fn test_lookup_id() {
        assert_eq!(lookup_id(PASSWD, "root", 2), Some(0));
        assert_eq!(lookup_id(PASSWD, "alice", 2), Some(1000));
        assert_eq!(lookup_id(PASSWD, "comment", 2), None);
        assert_eq!(lookup_id(PASSWD, "bob", 2), None);
    }

    #[test]
    fn test_lookup_id_ignores_prefix_matches() {
        assert_eq!(lookup_id(PASSWD, "ali", 2), None);
    }

    #[test]
    fn test_cmd_display() {
        let cmd = Cmd::new("apt-get").args(["install", "-y"]).arg("foo=1.0");
        assert_eq!(cmd.to_string(), "apt-get install -y foo=1.0");
    }

    #[test]
    fn test_cmd_output_success() {
        let ok = CmdOutput {
            status: 0,
            stdout: b"hello\n".to_vec(),
            stderr: Vec::new(),
        };
        assert!(ok.success());
        assert_eq!(ok.stdout_str(), "hello\n");
        assert!(!CmdOutput { status: 1, ..ok }.success());
    }
}
