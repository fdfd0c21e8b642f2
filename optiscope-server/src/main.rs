mod backfills;
mod protocol;

use backfills::BackfillRegistry;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use optiscope_analytics::{
    AnalysisOrchestrator,
    benchmark::BackfillHandle,
    cache::{HV_NAMESPACE, PRICE_NAMESPACE},
    clock::SystemClock,
    config::AnalyticsConfig,
};
use protocol::{ClientRequest, ServerMessage, parse_request};
use smol_str::SmolStr;
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const DEFAULT_WS_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    9002,
);
const DEFAULT_WS_BUFFER_SIZE: usize = 1024;

/// Shared by every client connection.
struct ServerState {
    orchestrator: Arc<AnalysisOrchestrator>,
    broadcast: broadcast::Sender<ServerMessage>,
    backfills: BackfillRegistry,
}

#[tokio::main]
async fn main() {
    init_logging();

    info!("Starting optiscope WebSocket server");

    let config = AnalyticsConfig::from_env();
    let orchestrator = match AnalysisOrchestrator::from_config(config, Arc::new(SystemClock)) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(error) => {
            error!(%error, "failed to configure analysis pipeline");
            return;
        }
    };

    // Configurable buffer size via WS_BUFFER_SIZE env var
    let buffer_size = std::env::var("WS_BUFFER_SIZE")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_WS_BUFFER_SIZE);
    let (tx, _rx) = broadcast::channel::<ServerMessage>(buffer_size);

    let state = Arc::new(ServerState {
        orchestrator,
        broadcast: tx,
        backfills: BackfillRegistry::default(),
    });

    // Configurable via WS_ADDR env var
    let server_addr = std::env::var("WS_ADDR")
        .ok()
        .and_then(|value| value.parse::<SocketAddr>().ok())
        .unwrap_or(DEFAULT_WS_ADDR);

    tokio::select! {
        _ = start_websocket_server(server_addr, state.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    for (symbol, cancel) in state.backfills.drain() {
        info!(%symbol, "cancelling backfill on shutdown");
        cancel.cancel();
    }
}

async fn start_websocket_server(addr: SocketAddr, state: Arc<ServerState>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%addr, %error, "failed to bind WebSocket server");
            return;
        }
    };

    info!("WebSocket server listening on ws://{}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(stream, peer_addr, state.clone()));
    }
}

/// Handle individual WebSocket client connection
async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, state: Arc<ServerState>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut broadcast_rx = state.broadcast.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let welcome = ServerMessage::Welcome {
        message: "Connected to optiscope analytics".to_string(),
        timestamp: Utc::now(),
    };
    let _ = reply_tx.send(welcome);

    // Direct replies and broadcast backfill events share the one sink
    let mut send_task = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(message) => message,
                    None => break,
                },
                event = broadcast_rx.recv() => match event {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let Some(json) = message.to_json() else {
                warn!("Failed to serialise message for {}", peer_addr);
                continue;
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => {
                    debug!("Received text from {}: {}", peer_addr, text);
                    let reply = match parse_request(&text) {
                        Ok(request) => handle_request(&state, request).await,
                        Err(error) => Some(error),
                    };
                    if let Some(reply) = reply {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", peer_addr, e);
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket connection closed for {}", peer_addr);
}

/// Execute one client request, returning the direct reply if there is one.
async fn handle_request(state: &Arc<ServerState>, request: ClientRequest) -> Option<ServerMessage> {
    let orchestrator = &state.orchestrator;

    let reply = match request {
        ClientRequest::Stocks => ServerMessage::Stocks {
            stocks: orchestrator.stocks(),
        },
        ClientRequest::Analyze(request) => ServerMessage::Analysis {
            report: Box::new(orchestrator.analyze(&request).await),
        },
        ClientRequest::StartBackfill {
            symbol,
            window_days,
        } => match orchestrator.start_backfill(&symbol, window_days) {
            Ok(handle) => {
                let window_days =
                    window_days.unwrap_or(orchestrator.config().backfill_window_days);
                let symbol = handle.symbol.clone();
                state
                    .backfills
                    .insert(symbol.clone(), handle.cancel.clone());
                tokio::spawn(forward_backfill(state.clone(), handle));

                ServerMessage::BackfillStarted {
                    symbol,
                    window_days,
                }
            }
            Err(error) => ServerMessage::error(error.to_string()),
        },
        ClientRequest::CancelBackfill { symbol } => {
            let symbol = SmolStr::new(symbol.to_ascii_uppercase());
            match state.backfills.get(&symbol) {
                Some(cancel) => {
                    info!(%symbol, "backfill cancellation requested");
                    cancel.cancel();
                    // The forwarder broadcasts the cancelled status
                    return None;
                }
                None => ServerMessage::error(format!("no backfill running for {symbol}")),
            }
        }
        ClientRequest::Benchmark { symbol } => {
            let snapshot = orchestrator.load_latest_benchmark(&symbol).await;
            let status = orchestrator.benchmark_status(&symbol).await;
            match (status, snapshot) {
                (Ok(status), Ok(snapshot)) => ServerMessage::Benchmark { status, snapshot },
                (Err(error), _) | (_, Err(error)) => ServerMessage::error(error.to_string()),
            }
        }
        ClientRequest::CacheStats => ServerMessage::CacheStats {
            namespaces: orchestrator.cache_stats(),
        },
        ClientRequest::ClearCache { namespace } => {
            if namespace != PRICE_NAMESPACE && namespace != HV_NAMESPACE {
                ServerMessage::error(format!("unknown cache namespace {namespace}"))
            } else {
                match orchestrator.clear_cache(&namespace) {
                    Ok(()) => ServerMessage::CacheCleared { namespace },
                    Err(error) => ServerMessage::error(error.to_string()),
                }
            }
        }
    };

    Some(reply)
}

/// Broadcast a backfill's progress until it finishes, then its outcome.
async fn forward_backfill(state: Arc<ServerState>, handle: BackfillHandle) {
    let BackfillHandle {
        symbol,
        mut progress,
        cancel,
        join,
    } = handle;

    while let Some(event) = progress.recv().await {
        // No receivers is fine; progress is best effort
        let _ = state.broadcast.send(ServerMessage::BackfillProgress(event));
    }

    let finished = match join.await {
        Ok(Ok(snapshot)) => ServerMessage::BackfillFinished {
            symbol: symbol.clone(),
            snapshot: Some(snapshot),
            error: None,
        },
        Ok(Err(error)) => ServerMessage::BackfillFinished {
            symbol: symbol.clone(),
            snapshot: None,
            error: Some(error.to_string()),
        },
        Err(error) => {
            error!(%symbol, %error, "backfill task panicked");
            ServerMessage::BackfillFinished {
                symbol: symbol.clone(),
                snapshot: None,
                error: Some("backfill task aborted".to_string()),
            }
        }
    };

    state.backfills.release(&symbol, &cancel);
    let _ = state.broadcast.send(finished);
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
