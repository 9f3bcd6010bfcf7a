//! Fakes for the coordinator's collaborators and a harness that drives the
//! event loop by hand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use newsdesk_proto::bulletin::{BulletinHosts, BulletinResolver};
use newsdesk_proto::clock::{Clock, BULLETIN_ZONE};
use newsdesk_proto::config::Config;
use newsdesk_proto::protocol::{Command, Notice, PlayerState, Station};
use newsdesk_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};

use crate::core::{Collaborators, CoreEvent, Coordinator};
use crate::fetch::{FetchError, TrackSource};
use crate::observers::{Emitter, Release};
use crate::output::{AudioBackend, OutputEvent, OutputHandle};
use crate::probe::{ProbeHandle, ProbeOutcome, Prober};
use crate::BroadcastMessage;

pub const LIVE_URL: &str = "https://live.test/a";
pub const X_URL: &str = "https://x.test/stream";

type Range = Arc<Mutex<Option<(f64, f64)>>>;

pub struct Opened {
    pub url: String,
    pub volume: f32,
    pub observers: Emitter<OutputEvent>,
    pub seekable: Range,
}

#[derive(Default)]
pub struct BackendLog {
    pub opens: Vec<Opened>,
    /// `open #n url`, `play #n`, `pause #n`, `seek #n secs`, `volume #n v`,
    /// `release #n`, in call order.
    pub steps: Vec<String>,
}

pub struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl AudioBackend for FakeBackend {
    fn open(
        &mut self,
        url: &str,
        volume: f32,
        observers: Emitter<OutputEvent>,
    ) -> anyhow::Result<Box<dyn OutputHandle>> {
        let mut log = self.log.lock().unwrap();
        let id = log.opens.len();
        let seekable: Range = Arc::new(Mutex::new(None));
        log.steps.push(format!("open #{} {}", id, url));
        log.opens.push(Opened {
            url: url.to_string(),
            volume,
            observers,
            seekable: Arc::clone(&seekable),
        });
        Ok(Box::new(FakeOutput {
            id,
            log: Arc::clone(&self.log),
            seekable,
        }))
    }
}

struct FakeOutput {
    id: usize,
    log: Arc<Mutex<BackendLog>>,
    seekable: Range,
}

impl FakeOutput {
    fn step(&self, what: String) {
        self.log.lock().unwrap().steps.push(what);
    }
}

impl OutputHandle for FakeOutput {
    fn play(&mut self) {
        self.step(format!("play #{}", self.id));
    }

    fn pause(&mut self) {
        self.step(format!("pause #{}", self.id));
    }

    fn seek(&mut self, secs: f64) {
        self.step(format!("seek #{} {}", self.id, secs));
    }

    fn set_volume(&mut self, volume: f32) {
        self.step(format!("volume #{} {}", self.id, volume));
    }

    fn seekable_range(&self) -> Option<(f64, f64)> {
        *self.seekable.lock().unwrap()
    }
}

impl Release for FakeOutput {
    fn release(&mut self) {
        self.step(format!("release #{}", self.id));
    }
}

pub struct ProbeRecord {
    pub url: String,
    pub observers: Emitter<ProbeOutcome>,
    pub released: Arc<AtomicBool>,
}

pub struct FakeProber {
    log: Arc<Mutex<Vec<ProbeRecord>>>,
}

impl Prober for FakeProber {
    fn probe(&mut self, url: &str, observers: Emitter<ProbeOutcome>) -> Box<dyn ProbeHandle> {
        let released = Arc::new(AtomicBool::new(false));
        self.log.lock().unwrap().push(ProbeRecord {
            url: url.to_string(),
            observers,
            released: Arc::clone(&released),
        });
        Box::new(FakeProbe(released))
    }
}

struct FakeProbe(Arc<AtomicBool>);

impl Release for FakeProbe {
    fn release(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl ProbeHandle for FakeProbe {}

#[derive(Default)]
pub struct FakeTrackSource {
    results: Mutex<VecDeque<Result<String, FetchError>>>,
    fetches: AtomicUsize,
}

impl TrackSource for FakeTrackSource {
    fn fetch_page(&self) -> BoxFuture<'static, Result<String, FetchError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let result = self
            .results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Request("no page queued".into())));
        Box::pin(async move { result })
    }
}

pub struct SharedClock(Mutex<DateTime<Utc>>);

impl Clock for SharedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub struct Harness {
    pub core: Coordinator,
    rx: mpsc::UnboundedReceiver<CoreEvent>,
    tx: mpsc::UnboundedSender<CoreEvent>,
    broadcast_rx: broadcast::Receiver<BroadcastMessage>,
    state: Arc<StateManager>,
    backend: Arc<Mutex<BackendLog>>,
    probes: Arc<Mutex<Vec<ProbeRecord>>>,
    tracks: Arc<FakeTrackSource>,
    clock: Arc<SharedClock>,
    notices: Vec<Notice>,
    cleared: Vec<String>,
    _dir: tempfile::TempDir,
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

impl Harness {
    /// Coordinator started at the given UTC instant with two stations:
    /// 0 = a live stream, 1 = the now-playing station.
    pub async fn at((y, mo, d, h, mi): (i32, u32, u32, u32, u32)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.state_dir = dir.path().to_path_buf();
        config.metadata.station_url = X_URL.to_string();
        config.bulletins.rnz_host = "rnz.example".into();
        config.bulletins.zb_host = "zb.example".into();
        config.connectivity.enabled = false;
        config.stations = vec![
            Station {
                name: "Live A".into(),
                url: LIVE_URL.into(),
                description: String::new(),
            },
            Station {
                name: "Station X".into(),
                url: X_URL.into(),
                description: String::new(),
            },
        ];

        let state = Arc::new(StateManager::new(
            config.paths.station_order_file(),
            config.stations.clone(),
            config.player.default_volume,
        ));
        let clock = Arc::new(SharedClock(Mutex::new(utc(y, mo, d, h, mi))));
        let resolver = BulletinResolver::new(
            BULLETIN_ZONE,
            BulletinHosts {
                rnz: "rnz.example".into(),
                zb: "zb.example".into(),
            },
            clock.clone(),
        );

        let backend = Arc::new(Mutex::new(BackendLog::default()));
        let probes = Arc::new(Mutex::new(Vec::new()));
        let tracks = Arc::new(FakeTrackSource::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = broadcast::channel(4096);

        let mut core = Coordinator::new(
            config,
            Arc::clone(&state),
            resolver,
            Collaborators {
                backend: Box::new(FakeBackend {
                    log: Arc::clone(&backend),
                }),
                prober: Box::new(FakeProber {
                    log: Arc::clone(&probes),
                }),
                track_source: tracks.clone(),
            },
            tx.clone(),
            broadcast_tx,
        );
        core.start();

        let mut h = Self {
            core,
            rx,
            tx,
            broadcast_rx,
            state,
            backend,
            probes,
            tracks,
            clock,
            notices: Vec::new(),
            cleared: Vec::new(),
            _dir: dir,
        };
        h.pump().await;
        h
    }

    /// Let spawned tasks run and feed everything queued into the coordinator.
    pub async fn pump(&mut self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            while let Ok(evt) = self.rx.try_recv() {
                self.core.handle_event(evt);
            }
            while let Ok(msg) = self.broadcast_rx.try_recv() {
                match msg {
                    BroadcastMessage::Notice(n) => self.notices.push(n),
                    BroadcastMessage::NoticeCleared(key) => self.cleared.push(key),
                    _ => {}
                }
            }
        }
    }

    pub async fn send(&mut self, evt: CoreEvent) {
        let _ = self.tx.send(evt);
        self.pump().await;
    }

    pub async fn command(&mut self, cmd: Command) {
        self.send(CoreEvent::Command(cmd)).await;
    }

    /// Needs a paused clock.
    pub async fn advance(&mut self, by: Duration) {
        tokio::time::advance(by).await;
        self.pump().await;
    }

    pub fn set_now(&self, y: i32, mo: u32, d: u32, h: u32, mi: u32) {
        *self.clock.0.lock().unwrap() = utc(y, mo, d, h, mi);
    }

    pub fn state(&self) -> PlayerState {
        self.state.get_state()
    }

    pub fn probe_urls(&self) -> Vec<String> {
        self.probes.lock().unwrap().iter().map(|p| p.url.clone()).collect()
    }

    pub fn probe_released(&self, idx: usize) -> bool {
        self.probes.lock().unwrap()[idx].released.load(Ordering::Acquire)
    }

    pub fn probe_emit(&self, idx: usize, outcome: ProbeOutcome) -> bool {
        self.probes.lock().unwrap()[idx].observers.emit(outcome)
    }

    pub async fn probe_outcome(&mut self, idx: usize, outcome: ProbeOutcome) {
        assert!(self.probe_emit(idx, outcome), "probe {} is detached", idx);
        self.pump().await;
    }

    pub fn backend_opens(&self) -> Vec<String> {
        self.backend
            .lock()
            .unwrap()
            .opens
            .iter()
            .map(|o| o.url.clone())
            .collect()
    }

    pub fn backend_steps(&self) -> Vec<String> {
        self.backend.lock().unwrap().steps.clone()
    }

    pub fn open_volume(&self, idx: usize) -> f32 {
        self.backend.lock().unwrap().opens[idx].volume
    }

    pub fn set_seekable(&self, idx: usize, range: Option<(f64, f64)>) {
        *self.backend.lock().unwrap().opens[idx].seekable.lock().unwrap() = range;
    }

    pub fn output_emit(&self, idx: usize, event: OutputEvent) -> bool {
        self.backend.lock().unwrap().opens[idx].observers.emit(event)
    }

    pub async fn output_event(&mut self, idx: usize, event: OutputEvent) {
        assert!(self.output_emit(idx, event), "output {} is detached", idx);
        self.pump().await;
    }

    pub fn queue_fetches(&self, results: Vec<Result<String, FetchError>>) {
        self.tracks.results.lock().unwrap().extend(results);
    }

    pub fn fetch_count(&self) -> usize {
        self.tracks.fetches.load(Ordering::SeqCst)
    }

    /// Every notice broadcast so far, in order.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.clone()
    }

    pub fn notices_with_key(&self, key: &str) -> Vec<Notice> {
        self.notices
            .iter()
            .filter(|n| n.key.as_deref() == Some(key))
            .cloned()
            .collect()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.clone()
    }
}
