//! HTTP face of the runner: commands in over POST, events out over SSE.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::controller::{Commander, RunnerEvent, TestReport};
use crate::error::RunnerError;
use crate::types::{Macro, Step};

pub const PORT_ATTEMPTS: u16 = 10;
const BROADCAST_BUFFER: usize = 64;

type SpawnContext = dyn Fn() -> (Commander, mpsc::Receiver<RunnerEvent>) + Send + Sync;

pub struct AppState {
    commander: RwLock<Commander>,
    events: broadcast::Sender<RunnerEvent>,
    spawn_context: Box<SpawnContext>,
}

impl AppState {
    /// Opens the first execution context and starts relaying its events.
    pub fn start<F>(spawn_context: F) -> Arc<Self>
    where
        F: Fn() -> (Commander, mpsc::Receiver<RunnerEvent>) + Send + Sync + 'static,
    {
        let (commander, events) = spawn_context();
        let (event_tx, _) = broadcast::channel(BROADCAST_BUFFER);
        let state = Arc::new(Self {
            commander: RwLock::new(commander),
            events: event_tx,
            spawn_context: Box::new(spawn_context),
        });
        tokio::spawn(relay(state.clone(), events));
        state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    async fn commander(&self) -> Commander {
        self.commander.read().await.clone()
    }
}

/// Forwards context events to SSE subscribers. A context that closes is
/// replaced and told to resume whatever run it left behind.
async fn relay(state: Arc<AppState>, mut events: mpsc::Receiver<RunnerEvent>) {
    loop {
        while let Some(event) = events.recv().await {
            let _ = state.events.send(event);
        }
        info!("[Web] execution context closed, reopening and resuming");
        let (commander, next) = (state.spawn_context)();
        *state.commander.write().await = commander.clone();
        events = next;
        if let Err(e) = commander.resume().await {
            warn!("[Web] resume after reconnect failed: {e}");
            break;
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/status", get(status_handler))
        .route("/run", post(run_handler))
        .route("/resume", post(resume_handler))
        .route("/stop", post(stop_handler))
        .route("/test-step", post(test_step_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

/// Binds the first free port in `port..port + PORT_ATTEMPTS`.
pub async fn bind(port: u16) -> anyhow::Result<(TcpListener, u16)> {
    let last = port.saturating_add(PORT_ATTEMPTS - 1);
    for p in port..=last {
        match TcpListener::bind(("127.0.0.1", p)).await {
            Ok(listener) => {
                let bound = listener.local_addr()?.port();
                return Ok((listener, bound));
            }
            Err(e) => warn!("[Web] port {p} unavailable: {e}"),
        }
    }
    anyhow::bail!("could not bind to any port {port}-{last}")
}

pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let (listener, port) = bind(port).await?;
    info!("[Web] runner UI at http://localhost:{port}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

type Reply = Result<&'static str, (StatusCode, String)>;

fn rejected(e: RunnerError) -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let phase = state.commander().await.phase();
    Json(json!({ "phase": phase }))
}

async fn run_handler(State(state): State<Arc<AppState>>, Json(m): Json<Macro>) -> Reply {
    info!("[Web] POST /run: {} ({} steps)", m.name, m.steps.len());
    state.commander().await.run(m).await.map_err(rejected)?;
    Ok("ok")
}

async fn resume_handler(State(state): State<Arc<AppState>>) -> Reply {
    info!("[Web] POST /resume");
    state.commander().await.resume().await.map_err(rejected)?;
    Ok("ok")
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Reply {
    info!("[Web] POST /stop");
    state.commander().await.stop().await.map_err(rejected)?;
    Ok("ok")
}

async fn test_step_handler(
    State(state): State<Arc<AppState>>,
    Json(step): Json<Step>,
) -> Result<Json<TestReport>, (StatusCode, String)> {
    info!("[Web] POST /test-step: {}", step.kind());
    let report = state
        .commander()
        .await
        .test_step(step)
        .await
        .map_err(rejected)?;
    Ok(Json(report))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.subscribe()).filter_map(
        |result: Result<RunnerEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
            Err(_) => None,
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &RunnerEvent) -> Event {
    let name = match event {
        RunnerEvent::State { .. } => "state",
        RunnerEvent::Progress { .. } => "progress",
        RunnerEvent::Error { .. } => "error",
        RunnerEvent::Done { .. } => "done",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Macro Runner</title>
<style>
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif; margin: 0; }
  header { padding: 20px 32px; border-bottom: 1px solid #1a1a2e; display: flex; gap: 12px; align-items: center; }
  header h1 { font-size: 18px; margin: 0; }
  #phase { font-size: 13px; color: #888; }
  .main { max-width: 800px; margin: 0 auto; padding: 24px 32px; display: flex; flex-direction: column; gap: 12px; }
  textarea { background: #111118; color: #fff; border: 1px solid #222; border-radius: 8px; padding: 12px; min-height: 140px; font-family: monospace; }
  .buttons { display: flex; gap: 8px; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 8px; padding: 10px 20px; cursor: pointer; }
  button.secondary { background: #333; }
  #log div { padding: 8px 12px; margin-bottom: 6px; border-radius: 6px; background: #111118; font-family: monospace; font-size: 13px; }
  #log .error { border-left: 3px solid #ef4444; color: #fca5a5; }
  #log .done { border-left: 3px solid #22c55e; color: #86efac; }
  #log .progress { border-left: 3px solid #3b82f6; }
</style>
</head>
<body>
  <header><h1>Macro Runner</h1><span id="phase"></span></header>
  <div class="main">
    <textarea id="macro" placeholder='{"name": "demo", "steps": [{"type": "click", "selector": "#go"}]}'></textarea>
    <div class="buttons">
      <button onclick="post('/run', document.getElementById('macro').value)">Run</button>
      <button class="secondary" onclick="post('/resume')">Resume</button>
      <button class="secondary" onclick="post('/stop')">Stop</button>
    </div>
    <div id="log"></div>
  </div>
<script>
  const log = document.getElementById('log');
  function add(cls, text) {
    const div = document.createElement('div');
    div.className = cls;
    div.textContent = text;
    log.prepend(div);
  }
  async function post(path, body) {
    const res = await fetch(path, { method: 'POST', headers: { 'Content-Type': 'application/json' }, body });
    if (!res.ok) add('error', await res.text());
    refresh();
  }
  async function refresh() {
    const res = await fetch('/status');
    const d = await res.json();
    document.getElementById('phase').textContent = d.phase;
  }
  const es = new EventSource('/events');
  es.addEventListener('state', e => { const d = JSON.parse(e.data); add('state', 'Starting at step ' + d.step + ' of ' + d.total); refresh(); });
  es.addEventListener('progress', e => { const d = JSON.parse(e.data); add('progress', d.step + '/' + d.total + '  ' + d.label); });
  es.addEventListener('error', e => { if (!e.data) return; const d = JSON.parse(e.data); add('error', d.error); refresh(); });
  es.addEventListener('done', e => { const d = JSON.parse(e.data); add('done', 'Done, ' + d.total + ' steps'); refresh(); });
  refresh();
</script>
</body>
</html>
"##;
