use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::ExportError;
use crate::notifier::{Toast, ToastQueue};
use crate::remote::{CredentialStore, DocumentStore, LocalAuth, LocalDocumentStore};
use crate::session::Session;
use crate::store::RecordStore;
use crate::view::{Action, Dataset, ExportFormat, RootSlot, ViewController};

const SESSION_COOKIE: &str = "session";
const MAX_EVENT_BYTES: usize = 64 * 1024;

/// One browser: its own controller, toast buffer and root markup
struct Client {
    controller: tokio::sync::Mutex<ViewController>,
    toasts: Arc<ToastQueue>,
    root: Arc<RootSlot>,
    last_seen: Mutex<Instant>,
}

pub struct AppState {
    config: Config,
    credentials: Arc<CredentialStore>,
    documents: Arc<dyn DocumentStore>,
    clients: Mutex<HashMap<String, Arc<Client>>>,
}

#[derive(Deserialize)]
struct ExportParams {
    format: Option<String>,
}

#[derive(Serialize)]
struct FrameResponse {
    frame: u64,
    markup: String,
    toasts: Vec<Toast>,
    loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    download: Option<String>,
}

impl AppState {
    pub fn new(config: Config, credentials: Arc<CredentialStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            credentials,
            documents,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<Client>> {
        let client = self.clients.lock().ok()?.get(id).cloned()?;
        client.touch(Instant::now());
        Some(client)
    }

    /// Forget browsers idle for longer than the configured timeout.
    ///
    /// Dropping a client drops its controller, which closes its live feeds.
    /// Returns how many were evicted.
    fn evict_idle(&self, now: Instant) -> usize {
        let timeout = self.config.client_idle_timeout();
        let Ok(mut clients) = self.clients.lock() else {
            return 0;
        };
        let before = clients.len();
        clients.retain(|_, client| client.idle_for(now) <= timeout);
        let evicted = before - clients.len();
        if evicted > 0 {
            info!("evicted {} idle clients ({} open)", evicted, clients.len());
        }
        evicted
    }

    async fn open_client(&self) -> Result<(String, Arc<Client>), Response> {
        let toasts = Arc::new(ToastQueue::new());
        let root = Arc::new(RootSlot::new());
        let provider = Arc::new(LocalAuth::new(self.credentials.clone()));
        let session = Session::new(provider, self.documents.clone(), toasts.clone());
        let records = RecordStore::with_page_size(self.documents.clone(), toasts.clone(), self.config.page_size);

        let mut controller = ViewController::new(session, records, toasts.clone(), root.clone())
            .map_err(|e| {
                warn!("failed to build view: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })?
            .with_targets(self.config.monthly_target)
            .with_live_updates(self.config.live_updates);
        controller.start().await;

        let id = Uuid::new_v4().simple().to_string();
        let client = Arc::new(Client {
            controller: tokio::sync::Mutex::new(controller),
            toasts,
            root,
            last_seen: Mutex::new(Instant::now()),
        });
        self.evict_idle(Instant::now());
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(id.clone(), client.clone());
            debug!("opened client {} ({} open)", id, clients.len());
        }
        Ok((id, client))
    }

    /// The cookie's client, or a fresh one with a new cookie
    async fn client(&self, jar: CookieJar) -> Result<(CookieJar, Arc<Client>), Response> {
        if let Some(client) = jar.get(SESSION_COOKIE).and_then(|c| self.lookup(c.value())) {
            return Ok((jar, client));
        }
        let (id, client) = self.open_client().await?;
        let mut cookie = Cookie::new(SESSION_COOKIE, id);
        cookie.set_path("/");
        cookie.set_http_only(true);
        Ok((jar.add(cookie), client))
    }
}

impl Client {
    fn touch(&self, now: Instant) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.last_seen
            .lock()
            .map(|last_seen| now.saturating_duration_since(*last_seen))
            .unwrap_or_default()
    }

    fn frame(&self, frame: u64, download: Option<(Dataset, ExportFormat)>) -> FrameResponse {
        FrameResponse {
            frame,
            markup: self.root.markup(),
            toasts: self.toasts.drain(),
            loading: self.toasts.is_loading(),
            download: download.map(|(dataset, format)| {
                format!("/api/export/{}?format={}", dataset.as_str(), format.extension())
            }),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_page))
        .route("/api/frame", get(get_frame))
        .route("/api/event", post(post_event))
        .route("/api/export/:dataset", get(export_dataset))
        .layer(RequestBodyLimitLayer::new(MAX_EVENT_BYTES))
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = Arc::new(CredentialStore::open(config.users_path())?);
    let documents: Arc<dyn DocumentStore> = Arc::new(LocalDocumentStore::open(config.documents_path())?);
    let bind = config.bind.clone();

    let state = Arc::new(AppState::new(config, credentials, documents));
    spawn_eviction(state.clone());
    let app = router(state);

    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Sweep idle clients periodically so silent browsers do not accumulate
fn spawn_eviction(state: Arc<AppState>) {
    let period = (state.config.client_idle_timeout() / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.evict_idle(Instant::now());
        }
    });
}

async fn serve_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    match state.client(jar).await {
        Ok((jar, _)) => (jar, Html(include_str!("./static/index.html"))).into_response(),
        Err(response) => response,
    }
}

async fn get_frame(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let (jar, client) = match state.client(jar).await {
        Ok(found) => found,
        Err(response) => return response,
    };
    let frame = {
        let mut controller = client.controller.lock().await;
        controller.refresh().await;
        controller.frame_count()
    };
    (jar, Json(client.frame(frame, None))).into_response()
}

async fn post_event(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(action): Json<Action>,
) -> Response {
    let (jar, client) = match state.client(jar).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let (frame, download) = {
        let mut controller = client.controller.lock().await;
        controller.refresh().await;
        // rejected actions were already reported as toasts
        let _ = controller.dispatch(action).await;
        (controller.frame_count(), controller.take_download())
    };
    (jar, Json(client.frame(frame, download))).into_response()
}

async fn export_dataset(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(dataset): Path<String>,
    Query(params): Query<ExportParams>,
) -> Response {
    let Some(dataset) = Dataset::parse(&dataset) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let format = match params.format.as_deref() {
        None => ExportFormat::default(),
        Some(name) => match ExportFormat::parse(name) {
            Some(format) => format,
            None => return StatusCode::BAD_REQUEST.into_response(),
        },
    };
    let (jar, client) = match state.client(jar).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let exported = client.controller.lock().await.export(dataset, format);
    match exported {
        Ok(download) => (
            jar,
            [
                (header::CONTENT_TYPE, download.content_type.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", download.filename),
                ),
            ],
            download.bytes,
        )
            .into_response(),
        Err(ExportError::Empty) => (StatusCode::NOT_FOUND, jar, "No data to export").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, jar, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::FormKind;

    #[tokio::test]
    async fn idle_clients_are_evicted_with_their_feeds() {
        let credentials = Arc::new(CredentialStore::in_memory());
        credentials.register("ana@waspa.org.za", "password1").unwrap();
        let documents = Arc::new(LocalDocumentStore::in_memory());
        let config = Config {
            client_idle_secs: 60,
            ..Config::default()
        };
        let state = AppState::new(config, credentials, documents.clone());

        let Ok((idle_id, idle)) = state.open_client().await else {
            panic!("client not opened");
        };
        let login = Action::Submit {
            form: FormKind::Login,
            fields: HashMap::from([
                ("email".to_string(), "ana@waspa.org.za".to_string()),
                ("password".to_string(), "password1".to_string()),
            ]),
        };
        idle.controller.lock().await.dispatch(login).await.unwrap();
        assert_eq!(documents.listener_count(), 2);
        drop(idle);

        let Ok((fresh_id, fresh)) = state.open_client().await else {
            panic!("client not opened");
        };
        let later = Instant::now() + Duration::from_secs(61);
        fresh.touch(later);

        assert_eq!(state.evict_idle(later), 1);
        assert!(state.lookup(&idle_id).is_none());
        assert!(state.lookup(&fresh_id).is_some());
        assert_eq!(documents.listener_count(), 0);
    }
}
