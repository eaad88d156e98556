//! SPARC trajectory server
//! - Run-parameter file watcher
//! - Trajectory computation on blocking workers
//! - WebSocket binary trajectory streaming and id-correlated run requests

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::{SinkExt, StreamExt};
use notify_debouncer_mini::{new_debouncer, notify::RecursiveMode, DebounceEventResult};
use sparc_beam::{compute_trajectory_with, RunParameters, RunPhase, SimulationConfig};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{broadcast, mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod runs;

#[derive(Parser, Debug)]
#[command(name = "sparc-server")]
#[command(about = "Serve SPARC beam trajectories over WebSocket")]
struct Args {
    /// Run-parameter JSON file to watch
    #[arg(default_value = "run.json")]
    params: PathBuf,

    /// Simulation config JSON (constants, species, time domain, solver)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long, default_value = "3001")]
    port: u16,
}

struct AppState {
    config: Arc<SimulationConfig>,
    traj_tx: broadcast::Sender<Vec<u8>>,
    current_traj: RwLock<Option<Vec<u8>>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => SimulationConfig::default(),
    };

    info!("Watching: {:?}", args.params);

    let (traj_tx, _) = broadcast::channel::<Vec<u8>>(16);
    let (params_tx, params_rx) = mpsc::unbounded_channel::<RunParameters>();

    let state = Arc::new(AppState {
        config: Arc::new(config),
        traj_tx,
        current_traj: RwLock::new(None),
    });

    // Recompute whenever the watched parameters change
    let state_clone = state.clone();
    tokio::spawn(async move {
        process_parameter_updates(params_rx, state_clone).await;
    });

    // Load initial file
    if args.params.exists() {
        match read_params(&args.params).await {
            Ok(params) => {
                let _ = params_tx.send(params);
            }
            Err(e) => error!("{:#}", e),
        }
    }

    // File watcher
    let watch_path = args.params.clone();
    tokio::spawn(async move {
        if let Err(e) = watch_file(watch_path, params_tx).await {
            error!("File watcher stopped: {:#}", e);
        }
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Server: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn read_params(path: &Path) -> Result<RunParameters> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Malformed run parameters in {:?}", path))
}

async fn process_parameter_updates(mut rx: mpsc::UnboundedReceiver<RunParameters>, state: Arc<AppState>) {
    while let Some(params) = rx.recv().await {
        debug!("watched run: {}", RunPhase::Idle);
        let config = state.config.clone();
        let result = tokio::task::spawn_blocking(move || compute_trajectory_with(&params, &config)).await;

        match result {
            Ok(Ok(trajectory)) => {
                let binary = trajectory.to_binary();
                info!(
                    "Generated trajectory: {} points, {:.4e} m path, {} bytes",
                    trajectory.len(),
                    trajectory.path_length(),
                    binary.len()
                );
                *state.current_traj.write().await = Some(binary.clone());
                let _ = state.traj_tx.send(binary);
            }
            Ok(Err(e)) => error!("Run failed: {}", e),
            Err(e) => error!("Worker panicked: {}", e),
        }
    }
}

async fn watch_file(path: PathBuf, tx: mpsc::UnboundedSender<RunParameters>) -> Result<()> {
    let (notify_tx, mut notify_rx) = mpsc::channel::<PathBuf>(10);

    let mut debouncer = new_debouncer(Duration::from_millis(200), move |res: DebounceEventResult| {
        if let Ok(events) = res {
            for event in events {
                let _ = notify_tx.blocking_send(event.path);
            }
        }
    })
    .context("Failed to create file watcher")?;

    let watch_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    debouncer
        .watcher()
        .watch(&watch_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", watch_dir))?;

    info!("Watching directory: {:?}", watch_dir);

    while let Some(changed) = notify_rx.recv().await {
        if changed == path || changed.file_name() == path.file_name() {
            match read_params(&path).await {
                Ok(params) => {
                    info!("Parameters changed, recomputing trajectory...");
                    let _ = tx.send(params);
                }
                Err(e) => warn!("{:#}", e),
            }
        }
    }

    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.traj_tx.subscribe();
    // Replies from this socket's runs; dropped with the socket, which
    // abandons any run still in flight
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();

    // Send current trajectory if available
    if let Some(traj) = state.current_traj.read().await.clone() {
        let _ = sender.send(Message::Binary(traj)).await;
    }

    loop {
        tokio::select! {
            Ok(traj) = rx.recv() => {
                if sender.send(Message::Binary(traj)).await.is_err() {
                    break;
                }
            }
            Some(reply) = reply_rx.recv() => {
                if sender.send(Message::Text(reply)).await.is_err() {
                    break;
                }
            }
            Some(msg) = receiver.next() => {
                match msg {
                    Ok(Message::Text(text)) => submit_run(&text, &state, reply_tx.clone()),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            else => break,
        }
    }
}

fn submit_run(text: &str, state: &Arc<AppState>, reply_tx: mpsc::UnboundedSender<String>) {
    let request = match runs::parse_request(text) {
        Ok(request) => request,
        Err(reply) => {
            let _ = reply_tx.send(reply.to_json());
            return;
        }
    };

    debug!("run {}: {}", request.id, RunPhase::Idle);
    let config = state.config.clone();
    tokio::task::spawn_blocking(move || {
        let reply = runs::execute(&request, &config);
        if reply_tx.send(reply.to_json()).is_err() {
            debug!("run {}: viewer gone, result dropped", request.id);
        }
    });
}
