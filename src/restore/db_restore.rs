// nachweisbackup/src/restore/db_restore.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tracing::{info, warn};

use crate::config::DatasourceConfig;
use crate::errors::{BackupError, Phase, Result};
use crate::tools::{self, Invocation, Sink, Tool, ToolSet};

/// Database the restore pipeline and the DROP statement connect to.
pub const ADMIN_DATABASE: &str = "postgres";

/// Pause after the drop so pooled application connections notice it.
pub const QUIESCENCE_DELAY: Duration = Duration::from_millis(500);

const DEFAULT_PG_PORT: u16 = 5432;

/// Administrative SQL against the maintenance database of the server.
#[async_trait]
pub trait AdminSql: Send + Sync {
    /// Runs one statement with the simple query protocol (no transaction).
    async fn execute(&self, sql: &str) -> anyhow::Result<()>;

    async fn database_exists(&self, name: &str) -> anyhow::Result<bool>;
}

/// [`AdminSql`] over a short-lived sqlx connection per call.
pub struct PgAdmin {
    options: PgConnectOptions,
}

impl PgAdmin {
    pub fn new(datasource: &DatasourceConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&datasource.host)
            .port(datasource.port.unwrap_or(DEFAULT_PG_PORT))
            .username(&datasource.username)
            .password(&datasource.password)
            .database(ADMIN_DATABASE);
        Self { options }
    }

    async fn connect(&self) -> anyhow::Result<PgConnection> {
        PgConnection::connect_with(&self.options)
            .await
            .with_context(|| format!("Failed to connect to '{}' database", ADMIN_DATABASE))
    }
}

#[async_trait]
impl AdminSql for PgAdmin {
    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        let mut conn = self.connect().await?;
        // DROP DATABASE cannot run inside the implicit transaction of a prepared statement
        let outcome = conn.execute(sql).await.map(|_| ());
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close administrative connection");
        }
        outcome.context("Administrative statement failed")
    }

    async fn database_exists(&self, name: &str) -> anyhow::Result<bool> {
        let mut conn = self.connect().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(name)
                .fetch_one(&mut conn)
                .await
                .with_context(|| format!("Failed to check existence of database '{}'", name))?;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "failed to close administrative connection");
        }
        Ok(exists)
    }
}

/// Quotes a Postgres identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `DROP DATABASE IF EXISTS "<name>" WITH (FORCE)`, then waits [`QUIESCENCE_DELAY`].
///
/// A failing statement only logs a warning: the dump recreates the database
/// itself. Dropping the maintenance database is refused outright.
pub async fn drop_database(admin: &dyn AdminSql, name: &str) -> Result<()> {
    if name.eq_ignore_ascii_case(ADMIN_DATABASE) {
        return Err(BackupError::step(
            Phase::Drop,
            format!(
                "refusing to drop '{}': it is the administrative database",
                name
            ),
        ));
    }

    let sql = format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name));
    info!(database = name, "dropping database");
    match admin.execute(&sql).await {
        Ok(()) => info!(database = name, "✓ database dropped"),
        Err(e) => warn!(
            database = name,
            error = %format!("{:#}", e),
            "drop failed, continuing with restore"
        ),
    }

    tokio::time::sleep(QUIESCENCE_DELAY).await;
    Ok(())
}

/// The decompressor and restorer for one dump, located up front so a
/// missing utility fails the restore before the database is dropped.
#[derive(Debug)]
pub struct Replay {
    decompressor: Invocation,
    restorer: Invocation,
    dump_file: PathBuf,
}

/// Builds the `gzip -dc <dump> | psql ... -v ON_ERROR_STOP=1` pipeline
/// against the administrative database without starting it.
pub fn prepare_replay(
    tools: &ToolSet,
    datasource: &DatasourceConfig,
    dump_file: &Path,
) -> Result<Replay> {
    let decompressor = tools
        .invocation(Tool::Decompressor, Phase::Restore)?
        .arg("-dc")
        .arg(dump_file);
    let restorer = tools
        .invocation(Tool::Restorer, Phase::Restore)?
        .args(["-X", "-q"])
        .connect_to(datasource, ADMIN_DATABASE)
        .args(["-v", "ON_ERROR_STOP=1"]);

    Ok(Replay {
        decompressor,
        restorer,
        dump_file: dump_file.to_path_buf(),
    })
}

impl Replay {
    /// Streams the decompressed dump into the restorer.
    pub async fn run(&self) -> Result<()> {
        info!(dump = %self.dump_file.display(), "replaying dump");
        let bytes = tools::pipe(&self.decompressor, &self.restorer, Sink::Discard).await?;
        info!(bytes, "✓ dump replayed");
        Ok(())
    }
}
