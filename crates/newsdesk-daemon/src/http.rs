use crate::core::CoreEvent;
use crate::BroadcastMessage;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use newsdesk_proto::bulletin::BulletinSource;
use newsdesk_proto::protocol::{Command, PlayerState};
use newsdesk_proto::state::StateManager;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::UnboundedSender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

pub fn router(
    state_manager: Arc<StateManager>,
    event_tx: mpsc::UnboundedSender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> Router {
    let app_state = HttpState {
        state_manager,
        event_tx,
        broadcast_tx,
    };
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/events", get(events))
        .route("/api/play/:idx", post(play_station))
        .route("/api/bulletin/:source", post(play_bulletin))
        .route("/api/pause", post(toggle_pause))
        .route("/api/stop", post(stop))
        .route("/api/seek/:delta", post(seek_relative))
        .route("/api/seek-to/:secs", post(seek_to))
        .route("/api/scrub/start", post(scrub_start))
        .route("/api/scrub/end/:secs", post(scrub_end))
        .route("/api/volume/:percent", post(set_volume))
        .route("/api/retry", post(retry))
        .route("/api/metadata/refresh", post(refresh_metadata))
        .route("/api/stations/move/:from/:to", post(move_station))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::UnboundedSender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx, broadcast_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(CoreEvent::Command(cmd)).is_err() {
        error!("Failed to send command, coordinator gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<PlayerState> {
    Json(state.state_manager.get_state())
}

/// Server-sent events: every broadcast message as JSON.
async fn events(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.broadcast_tx.subscribe();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    let event = Event::default()
                        .json_data(&msg)
                        .unwrap_or_else(|_| Event::default().comment("unserializable"));
                    return Some((Ok(event), rx));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("HTTP events: client lagged by {}", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn play_station(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    if state.state_manager.station(idx).is_none() {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::Play { station_idx: idx })
}

async fn play_bulletin(State(state): State<HttpState>, Path(source): Path<String>) -> StatusCode {
    match BulletinSource::from_slug(&source) {
        Some(source) => dispatch(&state, Command::PlayBulletin { source }),
        None => StatusCode::NOT_FOUND,
    }
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePause)
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Stop)
}

async fn seek_relative(State(state): State<HttpState>, Path(delta): Path<f64>) -> StatusCode {
    dispatch(&state, Command::SeekRelative { seconds: delta })
}

async fn seek_to(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    dispatch(&state, Command::SeekTo { seconds: secs })
}

async fn scrub_start(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::ScrubStart)
}

async fn scrub_end(State(state): State<HttpState>, Path(secs): Path<f64>) -> StatusCode {
    dispatch(&state, Command::ScrubEnd { seconds: secs })
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<u8>) -> StatusCode {
    let value = percent.min(100) as f32 / 100.0;
    dispatch(&state, Command::Volume { value })
}

async fn retry(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::Retry)
}

async fn refresh_metadata(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::RefreshMetadata)
}

async fn move_station(
    State(state): State<HttpState>,
    Path((from, to)): Path<(usize, usize)>,
) -> StatusCode {
    dispatch(&state, Command::MoveStation { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_proto::protocol::Station;

    struct Served {
        base: String,
        rx: mpsc::UnboundedReceiver<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        _dir: tempfile::TempDir,
    }

    async fn serve() -> Served {
        let dir = tempfile::tempdir().unwrap();
        let stations = vec![Station {
            name: "Live A".into(),
            url: "https://live.test/a".into(),
            description: String::new(),
        }];
        let state = Arc::new(StateManager::new(
            dir.path().join("station_order.json"),
            stations,
            0.5,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(16);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(state, tx, broadcast_tx.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Served {
            base,
            rx,
            broadcast_tx,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_routes_forward_commands() {
        let Served { base, mut rx, .. } = serve().await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{}/api/bulletin/zb", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 202);
        assert!(matches!(
            rx.recv().await,
            Some(CoreEvent::Command(Command::PlayBulletin {
                source: BulletinSource::NewstalkZb
            }))
        ));

        let resp = client.post(format!("{}/api/volume/40", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 202);
        match rx.recv().await {
            Some(CoreEvent::Command(Command::Volume { value })) => assert!((value - 0.4).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }

        let resp = client.post(format!("{}/api/bulletin/bbc", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        let resp = client.post(format!("{}/api/play/7", base)).send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_state_endpoint() {
        let served = serve().await;
        let state: PlayerState = reqwest::get(format!("{}/api/state", served.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(state.stations.len(), 1);
        assert_eq!(state.volume, 0.5);
        assert!(state.online);
    }

    #[tokio::test]
    async fn test_events_stream_broadcasts() {
        let served = serve().await;
        let mut resp = reqwest::get(format!("{}/api/events", served.base))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);

        served
            .broadcast_tx
            .send(BroadcastMessage::Track(Some("Lorde - Royals".into())))
            .unwrap();
        let chunk = resp.chunk().await.unwrap().unwrap();
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("data: "), "{}", text);
        assert!(text.contains("\"Track\""));
        assert!(text.contains("Lorde - Royals"));
    }
}
