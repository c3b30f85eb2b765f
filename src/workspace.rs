use crate::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Root folder layout for one workspace. User-facing folders live at the
/// top level, system state under the hidden `.coworker/` directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub organized: PathBuf,
    pub review: PathBuf,
    pub exports: PathBuf,
    pub system: PathBuf,
    pub cache_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub trash_dir: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path) -> Workspace {
        let root = root.to_path_buf();
        let system = root.join(".coworker");
        Workspace {
            inbox: root.join("Inbox"),
            organized: root.join("Organized"),
            review: root.join("Review"),
            exports: root.join("Exports"),
            cache_dir: system.join("cache"),
            logs_dir: system.join("logs"),
            runs_dir: system.join("runs"),
            trash_dir: system.join("trash"),
            config_path: system.join("config.toml"),
            lock_path: system.join("lock"),
            system,
            root,
        }
    }

    /// Create the full folder structure (init command).
    pub fn ensure_structure(&self) -> Result<(), Error> {
        for dir in [
            &self.inbox,
            &self.organized,
            &self.review,
            &self.exports,
            &self.system,
            &self.cache_dir,
            &self.logs_dir,
            &self.runs_dir,
            &self.trash_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        debug!("Workspace structure ensured at {}", self.root.display());
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.system.exists()
    }

    pub fn require_valid(&self) -> Result<(), Error> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidWorkspace(self.root.clone()))
        }
    }

    /// Acquire the workspace-level run lock. Fails with `LockContention`
    /// if another run holds it. The lock is released on drop.
    pub fn acquire_run_lock(&self, run_id: &str) -> Result<RunLock, Error> {
        fs::create_dir_all(&self.system)?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::LockContention(self.lock_path.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        writeln!(file, "{} pid={}", run_id, std::process::id())?;
        debug!("Run lock acquired: {}", self.lock_path.display());
        Ok(RunLock {
            path: self.lock_path.clone(),
        })
    }
}

/// RAII guard for the workspace run lock.
pub struct RunLock {
    path: PathBuf,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Failed to remove run lock {}: {}", self.path.display(), err);
        }
    }
}
