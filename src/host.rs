//! The local machine as a converge host

use anyhow::{Context as _, Result, bail};
use converge::{Cmd, CmdOutput, Context, FileKind, FileStat, Host};
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// `PATH` for commands run on the host
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// How often a running command is checked for completion or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs commands and touches files on the machine hostward runs on
#[derive(Debug, Default)]
pub struct LocalHost;

impl LocalHost {
    pub fn new() -> Self {
        Self
    }
}

/// Read a child pipe to the end on a separate thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Wait for a child, killing it if the context gets cancelled
fn wait(ctx: &Context, child: &mut Child, cmd: &Cmd) -> Result<i32> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.code().unwrap_or(-1));
        }
        if ctx.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            bail!("`{cmd}` cancelled");
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl Host for LocalHost {
    fn name(&self) -> String {
        "localhost".to_string()
    }

    fn run(&self, ctx: &Context, cmd: &Cmd) -> Result<CmdOutput> {
        ctx.check()?;
        log::debug!("Running `{cmd}`");

        let mut command = Command::new(&cmd.path);
        command
            .args(&cmd.args)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("LC_ALL", "C")
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute: {cmd}"))?;

        let writer = match (child.stdin.take(), cmd.stdin.clone()) {
            (Some(mut stdin), Some(data)) => Some(thread::spawn(move || stdin.write_all(&data))),
            _ => None,
        };
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = wait(ctx, &mut child, cmd)?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Err(e)) if e.kind() != ErrorKind::BrokenPipe => {
                    return Err(e).with_context(|| format!("Failed to write stdin of {cmd}"));
                }
                _ => {}
            }
        }
        let join = |handle: JoinHandle<Vec<u8>>| {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("output reader of `{cmd}` panicked"))
        };
        Ok(CmdOutput {
            status,
            stdout: join(stdout)?,
            stderr: join(stderr)?,
        })
    }

    fn read_file(&self, ctx: &Context, path: &Path) -> Result<Vec<u8>> {
        ctx.check()?;
        fs::read(path).with_context(|| format!("Could not read {}", path.display()))
    }

    fn write_file(&self, ctx: &Context, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        ctx.check()?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .with_context(|| format!("Could not open {}", path.display()))?;
        file.write_all(data)
            .and_then(|()| file.sync_all())
            .with_context(|| format!("Could not write {}", path.display()))?;
        // the mode given to open is only used for new files and masked by the umask
        self.chmod(ctx, path, mode)
    }

    fn chmod(&self, ctx: &Context, path: &Path, mode: u32) -> Result<()> {
        ctx.check()?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Could not chmod {:o} {}", mode, path.display()))
    }

    fn chown(&self, ctx: &Context, path: &Path, uid: u32, gid: u32) -> Result<()> {
        ctx.check()?;
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
            .with_context(|| format!("Could not chown {uid}:{gid} {}", path.display()))
    }

    fn lstat(&self, ctx: &Context, path: &Path) -> Result<Option<FileStat>> {
        ctx.check()?;
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Could not stat {}", path.display())),
        };
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        Ok(Some(FileStat {
            kind,
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
        }))
    }

    fn mkdir_all(&self, ctx: &Context, path: &Path, mode: u32) -> Result<()> {
        ctx.check()?;
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .with_context(|| format!("Could not create {}", path.display()))
    }

    fn rename(&self, ctx: &Context, from: &Path, to: &Path) -> Result<()> {
        ctx.check()?;
        fs::rename(from, to)
            .with_context(|| format!("Could not rename {} to {}", from.display(), to.display()))
    }

    fn remove(&self, ctx: &Context, path: &Path) -> Result<()> {
        ctx.check()?;
        let result = match self.lstat(ctx, path)? {
            Some(stat) if stat.kind == FileKind::Directory => fs::remove_dir(path),
            _ => fs::remove_file(path),
        };
        result.with_context(|| format!("Could not remove {}", path.display()))
    }
}
