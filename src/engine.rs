// nachweisbackup/src/engine.rs
//! The backup engine: one immutable configuration snapshot plus the
//! collaborators every operation needs.
//!
//! Operations live next to the code they orchestrate (`backup::logic`,
//! `restore::logic`, `retention`, `catalog`, `scheduler`) as `impl BackupEngine` blocks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use tempfile::TempDir;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

use crate::config::{AppConfig, BackupConfig, DatasourceConfig};
use crate::errors::{BackupError, Phase, Result};
use crate::restore::db_restore::{AdminSql, PgAdmin};
use crate::tools::ToolSet;
use crate::utils::remove_dir_best_effort;

/// Name prefix shared by every scratch directory the engine creates.
pub const SCRATCH_PREFIX: &str = ".scratch_";

/// Process-wide run locks, one per backup directory. Engines rebuilt on reload
/// share the lock of their directory.
static RUN_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Held for the duration of a backup or restore run.
pub type RunGuard = OwnedMutexGuard<()>;

pub struct BackupEngine {
    config: BackupConfig,
    datasource: DatasourceConfig,
    tools: ToolSet,
    backend_root: PathBuf,
    admin: Arc<dyn AdminSql>,
}

impl BackupEngine {
    pub fn new(
        config: BackupConfig,
        datasource: DatasourceConfig,
        tools: ToolSet,
        backend_root: PathBuf,
        admin: Arc<dyn AdminSql>,
    ) -> Self {
        Self {
            config,
            datasource,
            tools,
            backend_root,
            admin,
        }
    }

    /// Builds an engine talking to the configured Postgres server.
    pub fn from_app_config(app_config: &AppConfig, backend_root: PathBuf) -> Self {
        let admin: Arc<dyn AdminSql> = Arc::new(PgAdmin::new(&app_config.datasource));
        Self::new(
            app_config.backup.clone(),
            app_config.datasource.clone(),
            ToolSet::new(app_config.tools.clone()),
            backend_root,
            admin,
        )
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn backend_root(&self) -> &Path {
        &self.backend_root
    }

    pub(crate) fn datasource(&self) -> &DatasourceConfig {
        &self.datasource
    }

    pub(crate) fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub(crate) fn admin(&self) -> &dyn AdminSql {
        self.admin.as_ref()
    }

    /// Creates the backup directory (with parents) if it does not exist yet.
    pub(crate) fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(self.directory()).map_err(|e| {
            BackupError::io(
                None,
                format!("creating backup directory {}", self.directory().display()),
                e,
            )
        })
    }

    /// Unique per-run scratch directory inside the backup directory,
    /// named `.scratch_<purpose>_<random>`.
    pub(crate) fn scratch_dir(&self, purpose: &str, phase: Phase) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix(&format!("{}{}_", SCRATCH_PREFIX, purpose))
            .tempdir_in(self.directory())
            .map_err(|e| BackupError::io(Some(phase), "creating scratch directory", e))
    }

    /// Claims the directory for one run, failing with `BUSY` instead of waiting.
    pub(crate) fn try_lock(&self) -> Result<RunGuard> {
        let lock = {
            let mut locks = RUN_LOCKS
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(self.config.directory.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned()
            .map_err(|_| BackupError::Busy(self.config.directory.clone()))
    }
}

/// Removes a scratch directory. Failures are logged, never returned.
pub(crate) fn discard_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!(scratch = %path.display(), error = %e, "scratch cleanup failed");
        remove_dir_best_effort(&path);
    }
}
