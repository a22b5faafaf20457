//! Child process creation.
//!
//! Forking is expressed as re-executing the current binary with the worker marker set.
//! Children are separate OS processes: a crash in one never takes the primary or its
//! siblings down.
//!
//! Each child's stdin is a pipe whose write end only the primary holds. When the
//! primary exits, by signal or otherwise, the child reads end-of-file there and
//! [`primary_exited`] resolves.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Environment variable carrying the slot index of a worker process.
pub const WORKER_SLOT_ENV: &str = "FLEETLINE_WORKER_SLOT";

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when the process was terminated by a signal or could not be waited on.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running child. Dropping `exit` before it resolves kills the child.
pub struct SpawnedWorker {
    pub pid: u32,
    pub exit: BoxFuture<'static, WorkerExit>,
}

impl std::fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Creates worker processes for the supervisor.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, slot: usize) -> io::Result<SpawnedWorker>;
}

/// Spawns `program args...` with [`WORKER_SLOT_ENV`] set to the slot index.
#[derive(Debug, Clone)]
pub struct ExecSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
}

impl ExecSpawner {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self { program: program.into(), args: args.into_iter().map(Into::into).collect(), envs: Vec::new() }
    }

    /// Re-execute the running binary with the arguments it was started with.
    pub fn current_exe() -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, std::env::args_os().skip(1)))
    }

    /// Extra environment for every child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerSpawner for ExecSpawner {
    fn spawn(&self, slot: usize) -> io::Result<SpawnedWorker> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_SLOT_ENV, slot.to_string())
            .stdin(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id().unwrap_or_default();
        let liveness = child.stdin.take();
        tracing::debug!(target: "fleetline::topology", slot, pid, program = ?self.program, "worker process spawned");

        let exit = async move {
            // Held open until the child is reaped.
            let _liveness = liveness;
            match child.wait().await {
                Ok(status) => WorkerExit { code: status.code() },
                Err(error) => {
                    tracing::error!(target: "fleetline::topology", pid, %error, "failed to wait on worker process");
                    WorkerExit { code: None }
                }
            }
        }
        .boxed();

        Ok(SpawnedWorker { pid, exit })
    }
}

/// Resolves once the primary that spawned this process has gone away.
///
/// Only meaningful in a worker started by [`ExecSpawner`]; elsewhere stdin may be a
/// terminal and this resolves whenever it is closed.
pub fn primary_exited() -> BoxFuture<'static, ()> {
    eof(io::stdin())
}

/// Resolves when `reader` reaches end-of-file or fails.
///
/// The read runs on a detached OS thread so a blocked read never holds up runtime
/// shutdown.
pub fn eof<R>(mut reader: R) -> BoxFuture<'static, ()>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let spawned = std::thread::Builder::new().name("fleetline-liveness".into()).spawn(move || {
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::warn!(target: "fleetline::topology", %error, "liveness pipe read failed");
                    break;
                }
            }
        }
        let _ = tx.send(());
    });
    match spawned {
        Ok(_) => async move {
            let _ = rx.await;
        }
        .boxed(),
        Err(error) => {
            tracing::warn!(target: "fleetline::topology", %error, "cannot watch primary liveness");
            futures::future::pending().boxed()
        }
    }
}
