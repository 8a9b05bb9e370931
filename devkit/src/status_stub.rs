/*!
Serveur HTTP factice exposant `/status`

Remplace NGINX Plus pendant les tests: le corps, le code HTTP et la latence
de la réponse sont modifiables à chaud, et chaque requête est comptée.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Clone)]
struct StubState {
    body: Arc<Mutex<String>>,
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    hits: Arc<AtomicUsize>,
}

struct ServerTask(JoinHandle<()>);

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Source de statut simulée; les clones partagent le même serveur
#[derive(Clone)]
pub struct StatusServerStub {
    addr: SocketAddr,
    state: StubState,
    _task: Arc<ServerTask>,
}

impl StatusServerStub {
    pub async fn start(body: impl Into<String>) -> Result<Self> {
        let state = StubState {
            body: Arc::new(Mutex::new(body.into())),
            status: Arc::new(AtomicU16::new(200)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicUsize::new(0)),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = Router::new()
            .route("/status", get(serve_status))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ [MOCK status] server error: {}", e);
            }
        });

        log::info!("🌐 [MOCK status] serving on http://{}/status", addr);
        Ok(Self { addr, state, _task: Arc::new(ServerTask(task)) })
    }

    pub fn url(&self) -> String {
        format!("http://{}/status", self.addr)
    }

    pub fn set_body(&self, body: impl Into<String>) {
        *self.state.body.lock().unwrap() = body.into();
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    /// Retarde chaque réponse (pour tester les timeouts)
    pub fn set_delay(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Nombre de requêtes reçues
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn serve_status(State(state): State<StubState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = state.body.lock().unwrap().clone();

    (status, [(header::CONTENT_TYPE, "application/json")], body)
}
