// nachweisbackup/src/utils/testing.rs
//! Fixtures shared by the unit tests: fake Postgres client tools written as
//! shell scripts, a recording admin-SQL stub and a ready-made engine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::{BackupConfig, DatasourceConfig, ToolSettings};
use crate::engine::BackupEngine;
use crate::restore::db_restore::AdminSql;
use crate::tools::ToolSet;

pub const TEST_PASSWORD: &str = "secret";

/// Writes an executable `#!/bin/sh` script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}

#[derive(Default)]
pub struct RecordingAdmin {
    pub statements: Mutex<Vec<String>>,
    pub fail_execute: bool,
    pub database_missing: bool,
}

impl RecordingAdmin {
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AdminSql for RecordingAdmin {
    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(sql.to_string());
        }
        if self.fail_execute {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }

    async fn database_exists(&self, _name: &str) -> anyhow::Result<bool> {
        Ok(!self.database_missing)
    }
}

/// Temp tree with `backups/`, `backend/` and `bin/` (fake tools).
pub struct TestBed {
    pub root: TempDir,
    pub admin: Arc<RecordingAdmin>,
    pub tools: ToolSettings,
    pub config: BackupConfig,
}

impl TestBed {
    pub fn new() -> io::Result<Self> {
        Self::with_admin(RecordingAdmin::default())
    }

    pub fn with_admin(admin: RecordingAdmin) -> io::Result<Self> {
        let root = tempfile::tempdir()?;
        let bin = root.path().join("bin");
        fs::create_dir_all(&bin)?;
        fs::create_dir_all(root.path().join("backend"))?;

        let bin_display = bin.display().to_string();
        let pg_dump = write_script(
            &bin,
            "pg_dump",
            &format!(
                "[ \"$PGPASSWORD\" = \"{TEST_PASSWORD}\" ] || exit 7\n\
                 printf '%s\\n' \"$@\" > \"{bin_display}/pg_dump_args\"\n\
                 printf 'CREATE DATABASE nachweise_db;\\n\\\\connect nachweise_db\\nCREATE TABLE t (id int);\\nINSERT INTO t VALUES (1);\\n'"
            ),
        )?;
        let psql = write_script(
            &bin,
            "psql",
            &format!(
                "printf '%s\\n' \"$@\" > \"{bin_display}/psql_args\"\n\
                 cat > \"{bin_display}/restored.sql\""
            ),
        )?;

        let tools = ToolSettings {
            pg_dump: pg_dump.display().to_string(),
            psql: psql.display().to_string(),
            ..ToolSettings::default()
        };
        let config = BackupConfig {
            enabled: true,
            directory: root.path().join("backups"),
            retention_days: 7,
            schedule_cron: "0 0 2 * * 0".to_string(),
        };

        Ok(Self {
            root,
            admin: Arc::new(admin),
            tools,
            config,
        })
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.path().join("bin")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.config.directory.clone()
    }

    pub fn backend_root(&self) -> PathBuf {
        self.root.path().join("backend")
    }

    pub fn datasource() -> DatasourceConfig {
        DatasourceConfig {
            host: "localhost".to_string(),
            port: Some(5432),
            database: "nachweise_db".to_string(),
            username: "postgres".to_string(),
            password: TEST_PASSWORD.to_string(),
        }
    }

    pub fn engine(&self) -> BackupEngine {
        let admin: Arc<dyn AdminSql> = self.admin.clone();
        BackupEngine::new(
            self.config.clone(),
            Self::datasource(),
            ToolSet::new(self.tools.clone()),
            self.backend_root(),
            admin,
        )
    }

    /// Replaces the fake dumper's body.
    pub fn set_dumper(&mut self, body: &str) -> io::Result<()> {
        let path = write_script(&self.bin_dir(), "pg_dump_custom", body)?;
        self.tools.pg_dump = path.display().to_string();
        Ok(())
    }

    /// Replaces the fake restorer's body.
    pub fn set_restorer(&mut self, body: &str) -> io::Result<()> {
        let path = write_script(&self.bin_dir(), "psql_custom", body)?;
        self.tools.psql = path.display().to_string();
        Ok(())
    }

    pub fn restored_sql(&self) -> io::Result<String> {
        fs::read_to_string(self.bin_dir().join("restored.sql"))
    }

    pub fn recorded_args(&self, tool: &str) -> io::Result<Vec<String>> {
        let raw = fs::read_to_string(self.bin_dir().join(format!("{tool}_args")))?;
        Ok(raw.lines().map(str::to_string).collect())
    }

    /// Writes `relative` under the backend root, creating parents.
    pub fn write_content(&self, relative: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.backend_root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    /// Directory entries of the backup directory, sorted by name.
    pub fn backup_dir_entries(&self) -> io::Result<Vec<String>> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }
}
