// nachweisbackup/src/api/mod.rs
//! Administrative HTTP surface under `/api/backup`.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, warn};

use crate::backup::BackupResult;
use crate::catalog::ArchiveInfo;
use crate::engine::BackupEngine;
use crate::errors::{BackupError, FailureKind, Phase};
use crate::restore::RestoreReport;

#[derive(Clone)]
pub struct ApiState {
    engines: watch::Receiver<Arc<BackupEngine>>,
    admin_token: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(engines: watch::Receiver<Arc<BackupEngine>>, admin_token: Option<String>) -> Self {
        Self {
            engines,
            admin_token: admin_token.map(Arc::from),
        }
    }

    /// The engine built from the most recent configuration.
    fn engine(&self) -> Arc<BackupEngine> {
        self.engines.borrow().clone()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/backup/create", post(create_backup))
        .route("/api/backup/list", get(list_backups))
        .route("/api/backup/restore/:filename", post(restore_backup))
        .route("/api/backup/delete/:filename", delete(delete_backup))
        .layer(middleware::from_fn_with_state(state.clone(), admin_gate))
        .with_state(state)
}

/// Requires `Authorization: Bearer <adminToken>`.
async fn admin_gate(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return (StatusCode::UNAUTHORIZED, "Missing authorization header").into_response();
    };
    let Some(token) = header.to_str().ok().and_then(|h| h.strip_prefix("Bearer ")) else {
        return (StatusCode::UNAUTHORIZED, "Invalid authorization header format").into_response();
    };

    match state.admin_token.as_deref() {
        Some(expected) if expected == token => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "rejected backup request with wrong token");
            (StatusCode::FORBIDDEN, "Administrator access required").into_response()
        }
        None => (StatusCode::FORBIDDEN, "No administrator token configured").into_response(),
    }
}

/// Runs a backup or restore on its own task. A client that disconnects drops
/// only the wait, never the run, so spawned utilities are not killed midway.
async fn detached<T, F>(run: F) -> Result<T, BackupError>
where
    F: Future<Output = Result<T, BackupError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(run).await {
        Ok(outcome) => outcome,
        Err(e) => Err(BackupError::io(
            None,
            "backup task did not complete",
            std::io::Error::other(e),
        )),
    }
}

async fn create_backup(State(state): State<ApiState>) -> Result<Json<BackupResult>, BackupError> {
    let engine = state.engine();
    detached(async move { engine.perform_backup().await })
        .await
        .map(Json)
}

async fn list_backups(State(state): State<ApiState>) -> Result<Json<Vec<ArchiveInfo>>, BackupError> {
    state.engine().list_backups().map(Json)
}

async fn restore_backup(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
) -> Result<Json<RestoreReport>, BackupError> {
    let engine = state.engine();
    detached(async move { engine.restore_backup(&filename).await })
        .await
        .map(Json)
}

async fn delete_backup(
    State(state): State<ApiState>,
    Path(filename): Path<String>,
) -> Result<String, BackupError> {
    state.engine().delete_backup(&filename)?;
    Ok(format!("Backup deleted: {}", filename))
}

#[derive(Serialize)]
struct ErrorBody {
    code: FailureKind,
    phase: Option<Phase>,
    message: String,
}

impl IntoResponse for BackupError {
    fn into_response(self) -> Response {
        let code = self.kind();
        let status = match code {
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, code = %code, "backup request failed");
        }

        let body = Json(ErrorBody {
            code,
            phase: self.phase(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::utils::testing::TestBed;

    const TOKEN: &str = "admin-secret";

    fn build_app(bed: &TestBed, token: Option<&str>) -> (Router, Arc<BackupEngine>) {
        let engine = Arc::new(bed.engine());
        let (sender, receiver) = watch::channel(Arc::clone(&engine));
        // The router only reads the current value; the sender may go away.
        drop(sender);
        let state = ApiState::new(receiver, token.map(str::to_string));
        (router(state), engine)
    }

    fn request(method: &str, uri: &str, token: Option<&str>) -> anyhow::Result<Request<Body>> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(builder.body(Body::empty())?)
    }

    async fn json_body(response: Response) -> anyhow::Result<serde_json::Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthorized() -> anyhow::Result<()> {
        let bed = TestBed::new()?;
        let (app, _) = build_app(&bed, Some(TOKEN));
        let response = app.oneshot(request("GET", "/api/backup/list", None)?).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_wrong_or_unconfigured_token_is_forbidden() -> anyhow::Result<()> {
        let bed = TestBed::new()?;
        let (app, _) = build_app(&bed, Some(TOKEN));
        let response = app
            .oneshot(request("GET", "/api/backup/list", Some("guess"))?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (app, _) = build_app(&bed, None);
        let response = app
            .oneshot(request("GET", "/api/backup/list", Some(TOKEN))?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_then_list_then_delete() -> anyhow::Result<()> {
        let bed = TestBed::new()?;
        let (app, _) = build_app(&bed, Some(TOKEN));

        let response = app
            .clone()
            .oneshot(request("POST", "/api/backup/create", Some(TOKEN))?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await?;
        assert_eq!(created["status"], "SUCCESS");
        let file_name = created["fileName"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("fileName missing"))?
            .to_string();
        assert!(created["filePath"].is_string());
        assert!(created["fileSize"].as_u64().is_some_and(|size| size > 0));

        let response = app
            .clone()
            .oneshot(request("GET", "/api/backup/list", Some(TOKEN))?)
            .await?;
        let listing = json_body(response).await?;
        assert_eq!(listing[0]["filename"], file_name.as_str());

        let response = app
            .clone()
            .oneshot(request("DELETE", &format!("/api/backup/delete/{}", file_name), Some(TOKEN))?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(bed.backup_dir_entries()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_of_unknown_archive_is_404() -> anyhow::Result<()> {
        let bed = TestBed::new()?;
        let (app, _) = build_app(&bed, Some(TOKEN));

        let response = app
            .oneshot(request(
                "POST",
                "/api/backup/restore/nachweise_backup_19990101_000000.tar.gz",
                Some(TOKEN),
            )?)
            .await?;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await?;
        assert_eq!(body["code"], "NOT_FOUND");
        Ok(())
    }

    #[tokio::test]
    async fn test_busy_is_409_and_failures_are_500() -> anyhow::Result<()> {
        let mut bed = TestBed::new()?;
        let (app, engine) = build_app(&bed, Some(TOKEN));

        let guard = engine.try_lock()?;
        let response = app
            .oneshot(request("POST", "/api/backup/create", Some(TOKEN))?)
            .await?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await?["code"], "BUSY");
        drop(guard);

        bed.set_dumper("exit 2")?;
        let (app, _) = build_app(&bed, Some(TOKEN));
        let response = app
            .oneshot(request("POST", "/api/backup/create", Some(TOKEN))?)
            .await?;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await?;
        assert_eq!(body["code"], "DUMP_FAILED");
        assert_eq!(body["phase"], "dump");
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_finishes_after_client_disconnects() -> anyhow::Result<()> {
        let mut bed = TestBed::new()?;
        let result = bed.engine().perform_backup().await?;

        let restored = bed.bin_dir().join("slow_restored.sql");
        bed.set_restorer(&format!("sleep 1\ncat > \"{}\"", restored.display()))?;
        let (app, engine) = build_app(&bed, Some(TOKEN));

        let uri = format!("/api/backup/restore/{}", result.file_name);
        let pending = app.oneshot(request("POST", &uri, Some(TOKEN))?);
        // Dropping the request future is what the server does on disconnect.
        let timed_out = tokio::time::timeout(Duration::from_millis(300), pending).await;
        assert!(timed_out.is_err());

        let mut finished = false;
        for _ in 0..100 {
            if restored.exists() && engine.try_lock().is_ok() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(finished);
        assert!(std::fs::read_to_string(&restored)?.contains("INSERT INTO t VALUES (1);"));
        assert_eq!(bed.admin.statements().len(), 1);
        Ok(())
    }
}
