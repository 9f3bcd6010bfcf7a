use std::future::Future;
use std::time::Duration;

use newsdesk_proto::config::ConnectivityConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::CoreEvent;

/// One TCP connect attempt, bounded by `timeout`.
pub async fn check(address: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Watch the network and report changes only.  The coordinator starts out
/// assuming it is online.
pub fn spawn_watcher(
    config: ConnectivityConfig,
    tx: mpsc::UnboundedSender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    info!(
        "connectivity: probing {} every {:?}",
        config.probe_address, interval
    );
    let address = config.probe_address;
    tokio::spawn(watch(interval, tx, move || {
        let address = address.clone();
        async move {
            let online = check(&address, timeout).await;
            debug!("connectivity: {} reachable={}", address, online);
            online
        }
    }))
}

async fn watch<F, Fut>(interval: Duration, tx: mpsc::UnboundedSender<CoreEvent>, mut reachable: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut online = true;
    loop {
        tokio::time::sleep(interval).await;
        let now_online = reachable().await;
        if now_online == online {
            continue;
        }
        online = now_online;
        if tx.send(CoreEvent::Connectivity { online }).is_err() {
            break;
        }
    }
}
