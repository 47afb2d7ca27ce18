use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use aps_engine::{Collaborators, PatientService};

use crate::error::panic_response;
use crate::handlers;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    /// Directory for per-patient calculation logs. Created at startup.
    pub log_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PatientService>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/patients", get(handlers::list_patients))
        .route("/patients/{id}", delete(handlers::delete_patient))
        .route("/patients/{id}/initialize", post(handlers::initialize))
        .route("/patients/{id}/calculate", post(handlers::calculate))
        .route("/patients/{id}/status", get(handlers::status))
        .route("/patients/{id}/history", get(handlers::history))
        .route("/patients/{id}/profile", patch(handlers::update_profile))
        .route("/test/templates", get(handlers::templates))
        .route("/test/patients/{id}/from-template", post(handlers::from_template))
        .route("/test/scenario/{id}", post(handlers::run_scenario))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create the log directory and start serving with the reference
/// collaborators.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    start_with(config, Collaborators::reference()).await
}

/// Like [`start`], with caller-supplied collaborators.
pub async fn start_with(
    config: ServerConfig,
    collaborators: Collaborators,
) -> Result<ServerHandle, std::io::Error> {
    tokio::fs::create_dir_all(&config.log_dir).await?;
    let service = Arc::new(PatientService::new(collaborators, config.log_dir.clone()));
    let router = build_router(AppState { service });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        port = local_addr.port(),
        log_dir = %config.log_dir.display(),
        "APS server started"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async {
            shutdown_rx.await.ok();
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx,
        server,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running
/// until the runtime stops; call [`ServerHandle::shutdown`] to drain.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
        tracing::info!("APS server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_engine::mock::MockSet;
    use serde_json::{json, Value};

    const T0: i64 = 1_700_000_000_000;

    async fn spawn(dir: &tempfile::TempDir) -> (ServerHandle, String) {
        let config = ServerConfig {
            port: 0, // Random port
            log_dir: dir.path().join("logs"),
        };
        let handle = start(config).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    fn glucose(count: i64) -> Vec<Value> {
        (0..count)
            .map(|i| json!({"date": T0 - i * 300_000, "glucose": 115 + i, "device": "test"}))
            .collect()
    }

    fn init_body(count: i64) -> Value {
        json!({
            "profile": {
                "carb_ratio": 10, "sens": 50, "dia": 4, "min_bg": 100, "max_bg": 120,
                "current_basal": 1.0, "max_basal": 3.0, "max_iob": 3.0
            },
            "initialData": {"glucoseHistory": glucose(count)},
            "settings": {"historyRetentionHours": 24}
        })
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, base) = spawn(&dir).await;
        assert!(handle.port > 0);
        assert!(dir.path().join("logs").is_dir());

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["activePatients"], 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn initialize_then_calculate() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/patients/p1/initialize"))
            .json(&init_body(5))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let resp = client
            .post(format!("{base}/patients/p1/calculate"))
            .json(&json!({"currentTime": T0, "newData": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert!(body["suggestion"]["rate"].is_number());
        assert_eq!(body["context"]["glucose"]["glucose"], 115.0);
        assert!(body["context"]["iob"]["iob"].is_number());
        assert!(body["diagnostics"].as_str().unwrap().contains("eventual"));

        let status: Value = client
            .get(format!("{base}/patients/p1/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["patientId"], "p1");
        assert_eq!(status["lastGlucose"]["value"], 115.0);
        assert_eq!(status["historyCount"]["glucose"], 5);
        assert!(status["lastCalculation"].is_string());
        assert!(dir.path().join("logs").join("p1_calculations.log").exists());
    }

    #[tokio::test]
    async fn validation_errors_are_400_with_violations() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();

        let mut body = init_body(5);
        body["profile"]["carb_ratio"] = json!(2);
        body["profile"]["sens"] = json!(0);
        let resp = client
            .post(format!("{base}/patients/p1/initialize"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "validation_error");
        assert_eq!(err["violations"].as_array().unwrap().len(), 2);

        let resp = client
            .post(format!("{base}/patients/p1/initialize"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn unknown_patient_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/patients/ghost/status")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
        let resp = client
            .post(format!("{base}/patients/ghost/calculate"))
            .json(&json!({"currentTime": T0}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let resp = client.delete(format!("{base}/patients/ghost")).send().await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn stale_data_is_a_500_and_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{base}/patients/p1/initialize"))
            .json(&init_body(5))
            .send()
            .await
            .unwrap();

        let resp = client
            .post(format!("{base}/patients/p1/calculate"))
            .json(&json!({"currentTime": T0 + 30 * 60_000}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let err: Value = resp.json().await.unwrap();
        assert!(err["message"].as_str().unwrap().contains("stale"));

        let status: Value = client
            .get(format!("{base}/patients/p1/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status["lastCalculation"].is_null());
        assert!(status["currentIOB"].is_null());
    }

    #[tokio::test]
    async fn profile_history_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{base}/patients/p1/initialize"))
            .json(&init_body(30))
            .send()
            .await
            .unwrap();

        let resp = client
            .patch(format!("{base}/patients/p1/profile"))
            .json(&json!({"max_iob": 4}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["profile"]["max_iob"], 4.0);

        let resp = client
            .patch(format!("{base}/patients/p1/profile"))
            .json(&json!({"carb_ratio": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        // seeded data is from 2023, far outside a wall-clock window
        let body: Value = client
            .get(format!("{base}/patients/p1/history?type=glucose&hours=1&limit=5"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["patientId"], "p1");
        assert!(body["result"]["glucose"].as_array().unwrap().is_empty());
        assert!(body["result"].get("pump").is_none());

        let resp = client
            .get(format!("{base}/patients/p1/history?hours=-1e20"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let body: Value = client
            .get(format!("{base}/patients"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["count"], 1);

        let resp = client.delete(format!("{base}/patients/p1")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let health: Value = client
            .get(format!("{base}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["activePatients"], 0);
    }

    #[tokio::test]
    async fn template_and_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (_handle, base) = spawn(&dir).await;
        let client = reqwest::Client::new();

        let body: Value = client
            .get(format!("{base}/test/templates"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["templates"].as_array().unwrap().len(), 3);

        let resp = client
            .post(format!("{base}/test/patients/sim/from-template"))
            .json(&json!({"template": "adult-standard"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let resp = client
            .post(format!("{base}/test/scenario/sim"))
            .json(&json!({"scenario": "basic"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let report: Value = resp.json().await.unwrap();
        let values: Vec<f64> = report["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["glucose"].as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![115.0, 113.0, 111.0]);
        assert_eq!(report["summary"]["steps"], 3);

        let resp = client
            .post(format!("{base}/test/scenario/sim"))
            .json(&json!({"scenario": "marathon"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn mock_collaborators_can_be_injected() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = MockSet::new();
        let config = ServerConfig {
            port: 0,
            log_dir: dir.path().to_path_buf(),
        };
        let handle = start_with(config, mocks.collaborators()).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        let client = reqwest::Client::new();
        client
            .post(format!("{base}/patients/p1/initialize"))
            .json(&init_body(3))
            .send()
            .await
            .unwrap();
        let resp = client
            .post(format!("{base}/patients/p1/calculate"))
            .json(&json!({"currentTime": "2023-11-14T22:13:20Z"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(mocks.decision.call_count(), 1);
        assert_eq!(mocks.decision.last_now_ms(), Some(T0));
    }

    #[test]
    fn build_router_creates_routes() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(PatientService::with_reference_collaborators(dir.path()));
        let _router = build_router(AppState { service });
    }
}
