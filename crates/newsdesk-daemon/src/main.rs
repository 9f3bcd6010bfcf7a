mod connectivity;
mod core;
mod fetch;
mod http;
mod mpv;
mod observers;
mod output;
mod player;
mod probe;
mod session;
mod tasks;
#[cfg(test)]
mod testing;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use newsdesk_proto::bulletin::BulletinResolver;
use newsdesk_proto::config::Config;
use newsdesk_proto::protocol::Notice;
use newsdesk_proto::state::StateManager;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BroadcastMessage {
    StateUpdated,
    Notice(Notice),
    /// A persistent notice with this key went away.
    NoticeCleared(String),
    Track(Option<String>),
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // no receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Broadcast channel first so logging can use it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let config = Config::load()?;

    let data_dir = config.paths.state_dir.clone();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("newsdesk.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,newsdesk=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", Config::config_path());

    let state_manager = Arc::new(StateManager::new(
        config.paths.station_order_file(),
        config.stations.clone(),
        config.player.default_volume,
    ));
    let resolver = BulletinResolver::from_config(&config.bulletins);

    // Every input funnels into the coordinator through this channel
    let (event_tx, event_rx) = mpsc::unbounded_channel::<core::CoreEvent>();

    let track_source = fetch::HttpTrackSource::new(
        &config.metadata.relay_prefix,
        &config.metadata.target_url,
    )?;
    info!("Now-playing page: {}", track_source.url());

    let collaborators = core::Collaborators {
        backend: Box::new(player::MpvBackend::spawn(config.player.default_volume)),
        prober: Box::new(probe::HttpProber::new(Duration::from_secs(
            config.bulletins.probe_timeout_secs,
        ))?),
        track_source: Arc::new(track_source),
    };

    if config.connectivity.enabled {
        let _watcher = connectivity::spawn_watcher(config.connectivity.clone(), event_tx.clone());
    }

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
            broadcast_tx.clone(),
        );
    } else {
        warn!("HTTP API disabled; nothing can control playback");
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            let _ = shutdown_tx.send(core::CoreEvent::Shutdown);
        }
    });

    let coordinator = core::Coordinator::new(
        config,
        state_manager,
        resolver,
        collaborators,
        event_tx,
        broadcast_tx,
    );

    info!("newsdesk initialised, running event loop");
    coordinator.run(event_rx).await?;

    Ok(())
}
