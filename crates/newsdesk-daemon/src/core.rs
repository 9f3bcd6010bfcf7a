/// Coordinator: the single owner of playback, probing and timers.
///
/// ```text
///   HTTP API ─┐
///   output ───┤
///   probe ────┼──► CoreEvent ──► Coordinator::handle_event ──► StateManager (watch)
///   timers ───┤                                            └─► BroadcastMessage
///   fetch ────┤
///   network ──┘
/// ```
///
/// Everything that can race (probe outcomes, output events, timer ticks,
/// metadata results) carries the generation it was issued under and is
/// dropped if that generation is no longer current.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use newsdesk_proto::bulletin::{bulletin_display_name, BulletinResolver, BulletinSource};
use newsdesk_proto::config::Config;
use newsdesk_proto::metadata::{extract_track, split_artist_title, FailureCounter};
use newsdesk_proto::protocol::{
    Command, MediaInfo, Notice, PlaybackStatus, PlayerState, ScrubView,
};
use newsdesk_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::fetch::{fetch_with_timeout, FetchError, TrackSource};
use crate::observers::{attach, Scope};
use crate::output::{AudioBackend, OutputEvent, LIFECYCLE_OBSERVERS};
use crate::probe::{ProbeOutcome, Prober, PROBE_OBSERVERS};
use crate::session::{classify_bulletin, BulletinMarker, PlaybackSession, ProbeSession};
use crate::tasks::{TaskKind, TaskRegistry};
use crate::ui;
use crate::BroadcastMessage;

/// Notices kept in the snapshot.
const MAX_RECENT_NOTICES: usize = 16;

const NOTICE_BULLETIN: &str = "bulletin";
const NOTICE_PLAYBACK: &str = "playback";
const NOTICE_METADATA: &str = "metadata";
const NOTICE_OFFLINE: &str = "offline";
const NOTICE_STATIONS: &str = "stations";

#[derive(Debug)]
pub enum CoreEvent {
    Command(Command),
    Output {
        generation: u64,
        event: OutputEvent,
    },
    Probe {
        generation: u64,
        outcome: ProbeOutcome,
    },
    Tick {
        kind: TaskKind,
        generation: u64,
    },
    MetadataFetched {
        generation: u64,
        result: Result<String, FetchError>,
    },
    Connectivity {
        online: bool,
    },
    Shutdown,
}

impl CoreEvent {
    pub fn output(generation: u64, event: OutputEvent) -> Self {
        Self::Output { generation, event }
    }

    pub fn probe(generation: u64, outcome: ProbeOutcome) -> Self {
        Self::Probe {
            generation,
            outcome,
        }
    }
}

/// The outside world, behind traits.
pub struct Collaborators {
    pub backend: Box<dyn AudioBackend>,
    pub prober: Box<dyn Prober>,
    pub track_source: Arc<dyn TrackSource>,
}

pub struct Coordinator {
    config: Config,
    state: Arc<StateManager>,
    resolver: BulletinResolver,
    backend: Box<dyn AudioBackend>,
    prober: Box<dyn Prober>,
    track_source: Arc<dyn TrackSource>,
    event_tx: mpsc::UnboundedSender<CoreEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    tasks: TaskRegistry,

    session: Option<PlaybackSession>,
    probe: Option<ProbeSession>,
    markers: HashMap<BulletinSource, BulletinMarker>,
    next_generation: u64,

    failures: FailureCounter,
    metadata_warned: bool,
    last_track: Option<String>,
    poll_generation: u64,

    volume: f32,
    /// `(url, display name)` of the last load that errored.
    failed_load: Option<(String, String)>,
    online: bool,
}

impl Coordinator {
    pub fn new(
        config: Config,
        state: Arc<StateManager>,
        resolver: BulletinResolver,
        collaborators: Collaborators,
        event_tx: mpsc::UnboundedSender<CoreEvent>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let volume = state.get_state().volume;
        let failures = FailureCounter::new(config.metadata.failure_threshold);
        Self {
            tasks: TaskRegistry::new(event_tx.clone()),
            config,
            state,
            resolver,
            backend: collaborators.backend,
            prober: collaborators.prober,
            track_source: collaborators.track_source,
            event_tx,
            broadcast_tx,
            session: None,
            probe: None,
            markers: HashMap::new(),
            next_generation: 1,
            failures,
            metadata_warned: false,
            last_track: None,
            poll_generation: 0,
            volume,
            failed_load: None,
            online: true,
        }
    }

    /// Arm the clock refresh and render the initial labels.
    pub fn start(&mut self) {
        let period = Duration::from_secs(self.config.timers.clock_refresh_secs.max(1));
        self.tasks.arm_clock_refresh_once(period);
        self.refresh_labels();
    }

    pub async fn run(mut self, mut event_rx: mpsc::UnboundedReceiver<CoreEvent>) -> anyhow::Result<()> {
        info!("Coordinator: starting event loop");
        self.start();
        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt) {
                break;
            }
        }
        self.teardown();
        info!("Coordinator: stopped");
        Ok(())
    }

    /// Returns false once the loop should stop.
    pub fn handle_event(&mut self, evt: CoreEvent) -> bool {
        match evt {
            CoreEvent::Shutdown => {
                info!("Coordinator: shutdown requested");
                return false;
            }
            CoreEvent::Command(cmd) => {
                debug!("Coordinator: command {:?}", cmd);
                self.handle_command(cmd);
            }
            CoreEvent::Output { generation, event } => self.on_output(generation, event),
            CoreEvent::Probe {
                generation,
                outcome,
            } => self.on_probe_outcome(generation, outcome),
            CoreEvent::Tick { kind, generation } => self.on_tick(kind, generation),
            CoreEvent::MetadataFetched { generation, result } => {
                self.on_metadata(generation, result)
            }
            CoreEvent::Connectivity { online } => self.on_connectivity(online),
        }
        true
    }

    fn next_generation(&mut self) -> u64 {
        let g = self.next_generation;
        self.next_generation += 1;
        g
    }

    fn publish(&self, f: impl FnOnce(&mut PlayerState)) {
        self.state.update(f);
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    fn notify(&self, notice: Notice) {
        info!("notice: {:?} {}", notice.severity, notice.message);
        let kept = notice.clone();
        self.publish(move |s| {
            if let Some(key) = &kept.key {
                s.recent_notices.retain(|n| n.key.as_ref() != Some(key));
            }
            s.recent_notices.push(kept);
            if s.recent_notices.len() > MAX_RECENT_NOTICES {
                s.recent_notices.remove(0);
            }
        });
        let _ = self.broadcast_tx.send(BroadcastMessage::Notice(notice));
    }

    fn clear_notice(&self, key: &str) {
        self.publish(|s| {
            s.recent_notices.retain(|n| n.key.as_deref() != Some(key));
        });
        let _ = self
            .broadcast_tx
            .send(BroadcastMessage::NoticeCleared(key.to_string()));
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play { station_idx } => self.play_station(station_idx),
            Command::PlayUrl { url, name } => {
                self.probe = None;
                let idx = self
                    .state
                    .get_state()
                    .stations
                    .iter()
                    .position(|s| s.url == url);
                self.load(&url, &name);
                self.publish(|s| s.current_station = idx);
            }
            Command::PlayBulletin { source } => self.probe_bulletin(source),
            Command::TogglePause => self.toggle_pause(),
            Command::Stop => self.stop(),
            Command::Volume { value } => self.set_volume(value),
            Command::SeekRelative { seconds } => {
                if let Some(session) = self.session.as_mut() {
                    if session.seek_by(seconds).is_some() {
                        self.sync_ui();
                    }
                }
            }
            Command::SeekTo { seconds } => {
                if let Some(session) = self.session.as_mut() {
                    if session.seek_to(seconds).is_some() {
                        self.sync_ui();
                    }
                }
            }
            Command::ScrubStart => {
                self.publish(|s| s.scrub.dragging = true);
            }
            Command::ScrubEnd { seconds } => {
                self.publish(|s| s.scrub.dragging = false);
                if let Some(session) = self.session.as_mut() {
                    session.seek_to(seconds);
                }
                self.sync_ui();
            }
            Command::Retry => match self.failed_load.take() {
                Some((url, name)) => self.load(&url, &name),
                None => debug!("Coordinator: nothing to retry"),
            },
            Command::RefreshMetadata => {
                if self.on_metadata_station() {
                    self.spawn_metadata_fetch();
                }
            }
            Command::MoveStation { from, to } => match self.state.move_station(from, to) {
                Ok(true) => {
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
                Ok(false) => self.notify(
                    Notice::warning(format!("Cannot move station {} to {}", from, to))
                        .keyed(NOTICE_STATIONS),
                ),
                Err(e) => {
                    warn!("station order not saved: {}", e);
                    self.notify(
                        Notice::error("Station order could not be saved").keyed(NOTICE_STATIONS),
                    );
                }
            },
            Command::GetState => {
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
    }

    fn play_station(&mut self, idx: usize) {
        let Some(station) = self.state.station(idx) else {
            self.notify(Notice::warning(format!("No station at position {}", idx)));
            return;
        };
        self.probe = None;
        self.markers.clear();
        self.load(&station.url, &station.name);
        self.publish(|s| s.current_station = Some(idx));
        self.refresh_labels();
    }

    // ── bulletin probe ────────────────────────────────────────────────────

    pub fn probe_bulletin(&mut self, source: BulletinSource) {
        info!("Coordinator: resolving {} bulletin", source.display_name());
        self.publish(|s| s.loading = true);
        self.start_probe_attempt(source, 0);
    }

    fn start_probe_attempt(&mut self, source: BulletinSource, hours_back: u32) {
        // the previous probe is detached and released before the new one exists
        self.probe = None;

        let candidate = self.resolver.resolve(source, hours_back);
        let generation = self.next_generation();
        let (attachment, emitter) = attach::<ProbeOutcome>(
            generation,
            &PROBE_OBSERVERS,
            self.event_tx.clone(),
            CoreEvent::probe,
        );
        debug!(
            "probe gen={} {} (hours_back={})",
            generation, candidate.url, hours_back
        );
        let handle = self.prober.probe(&candidate.url, emitter);
        self.probe = Some(ProbeSession::new(candidate, Scope::new(attachment, handle)));
    }

    fn on_probe_outcome(&mut self, generation: u64, outcome: ProbeOutcome) {
        let current = self.probe.as_ref().map(|p| p.generation());
        if current != Some(generation) {
            debug!("probe gen={} outcome ignored (current {:?})", generation, current);
            return;
        }
        let Some(probe) = self.probe.take() else {
            return;
        };
        let candidate = probe.candidate.clone();
        drop(probe);

        match outcome {
            ProbeOutcome::Playable => {
                self.markers.insert(
                    candidate.source,
                    BulletinMarker::Pinned(candidate.label_hour.clone()),
                );
                self.on_resolved(
                    candidate.source,
                    &candidate.url,
                    Some(candidate.label_hour.as_str()),
                );
                self.refresh_labels();
            }
            ProbeOutcome::Failed(reason) if candidate.hours_back == 0 => {
                debug!("probe: current hour unavailable ({}), trying previous", reason);
                self.start_probe_attempt(candidate.source, 1);
            }
            ProbeOutcome::Failed(reason) => {
                warn!("probe: no bulletin for {} ({})", candidate.source.display_name(), reason);
                self.on_resolved(candidate.source, &candidate.url, None);
                self.notify(
                    Notice::warning(format!(
                        "{} bulletin unavailable, trying the latest file anyway",
                        candidate.source.display_name()
                    ))
                    .keyed(NOTICE_BULLETIN),
                );
            }
        }
    }

    fn on_resolved(&mut self, source: BulletinSource, url: &str, label_hour: Option<&str>) {
        let name = bulletin_display_name(source, &self.config.bulletins.marker_term, label_hour);
        self.load(url, &name);
        self.publish(|s| s.current_station = None);
    }

    // ── playback session ──────────────────────────────────────────────────

    pub fn load(&mut self, url: &str, display_name: &str) {
        if let Some(old) = self.session.take() {
            debug!("session gen={} superseded", old.generation);
            old.close();
        }

        let generation = self.next_generation();
        let (attachment, emitter) = attach::<OutputEvent>(
            generation,
            &LIFECYCLE_OBSERVERS,
            self.event_tx.clone(),
            CoreEvent::output,
        );
        let is_bulletin = classify_bulletin(
            url,
            display_name,
            &self.resolver,
            &self.config.bulletins.marker_term,
        );

        let handle = match self.backend.open(url, self.volume, emitter) {
            Ok(h) => h,
            Err(e) => {
                warn!("open {} failed: {}", url, e);
                drop(attachment);
                self.tasks.disarm(TaskKind::MetadataPoll);
                self.playback_failed(url, display_name, &e.to_string());
                return;
            }
        };
        info!("session gen={} {} ({})", generation, display_name, url);
        self.session = Some(PlaybackSession::new(
            Scope::new(attachment, handle),
            url.to_string(),
            display_name.to_string(),
            is_bulletin,
        ));
        self.failed_load = None;

        let title = display_name.to_string();
        let url_owned = url.to_string();
        self.publish(move |s| {
            s.current_url = Some(url_owned);
            s.display_name = Some(title.clone());
            s.is_bulletin = is_bulletin;
            s.playback_status = PlaybackStatus::Loading;
            s.loading = true;
            s.on_air = false;
            s.bulletin_controls_visible = false;
            s.scrub = ScrubView::default();
            s.scrub.position_label = ui::format_clock(0.0);
            s.scrub.duration_label = ui::format_clock(0.0);
            s.media = Some(MediaInfo {
                title,
                artist: None,
                album: String::new(),
            });
        });
        self.configure_metadata_poll(url);
    }

    fn playback_failed(&mut self, url: &str, display_name: &str, reason: &str) {
        self.failed_load = Some((url.to_string(), display_name.to_string()));
        self.publish(|s| {
            s.loading = false;
            s.on_air = false;
            s.playback_status = PlaybackStatus::Error;
        });
        self.notify(
            Notice::error(format!("Could not play {}: {}", display_name, reason))
                .keyed(NOTICE_PLAYBACK)
                .with_retry(Command::PlayUrl {
                    url: url.to_string(),
                    name: display_name.to_string(),
                }),
        );
    }

    fn on_output(&mut self, generation: u64, event: OutputEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!("output gen={} {:?} with no session", generation, event);
            return;
        };
        if session.generation != generation {
            debug!("output gen={} {:?} ignored", generation, event);
            return;
        }

        match event {
            OutputEvent::Ready => {
                session.output_mut().play();
                self.publish(|s| s.playback_status = PlaybackStatus::Playing);
            }
            OutputEvent::Error(reason) => {
                let url = session.url.clone();
                let name = session.display_name.clone();
                self.playback_failed(&url, &name, &reason);
            }
            OutputEvent::Buffering => self.publish(|s| s.loading = true),
            OutputEvent::Playing => {
                self.publish(|s| {
                    s.loading = false;
                    s.on_air = true;
                    s.playback_status = PlaybackStatus::Playing;
                });
            }
            OutputEvent::Ended => {
                self.publish(|s| {
                    s.loading = false;
                    s.on_air = false;
                    s.playback_status = PlaybackStatus::Ended;
                });
                // an unloaded file takes its seekable range with it
                self.sync_ui();
            }
            OutputEvent::MetadataReady => self.sync_ui(),
            OutputEvent::DurationKnown(d) => {
                session.duration = Some(d);
                self.sync_ui();
            }
            OutputEvent::TimeUpdate(t) => {
                session.current_time = t;
                self.sync_ui();
            }
        }
    }

    fn toggle_pause(&mut self) {
        let status = self.state.get_state().playback_status;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if status == PlaybackStatus::Playing {
            session.output_mut().pause();
            self.publish(|s| {
                s.playback_status = PlaybackStatus::Paused;
                s.on_air = false;
            });
        } else if status == PlaybackStatus::Ended {
            // replay from the top, only while the finished file is still loaded
            if session.seek_to(0.0).is_none() {
                debug!("toggle_pause: ended and not seekable");
                return;
            }
            session.output_mut().play();
            self.publish(|s| s.playback_status = PlaybackStatus::Playing);
            self.sync_ui();
        } else {
            session.output_mut().play();
            self.publish(|s| s.playback_status = PlaybackStatus::Playing);
        }
    }

    fn stop(&mut self) {
        self.probe = None;
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.disarm_metadata_poll();
        self.publish(|s| {
            s.current_station = None;
            s.current_url = None;
            s.display_name = None;
            s.is_bulletin = false;
            s.playback_status = PlaybackStatus::Idle;
            s.on_air = false;
            s.loading = false;
            s.bulletin_controls_visible = false;
            s.scrub = ScrubView::default();
            s.media = None;
            s.track = None;
            s.metadata_refresh_visible = false;
        });
    }

    fn set_volume(&mut self, value: f32) {
        let volume = value.clamp(0.0, 1.0);
        self.volume = volume;
        if let Some(session) = self.session.as_mut() {
            session.output_mut().set_volume(volume);
        }
        self.publish(|s| s.volume = volume);
    }

    fn sync_ui(&self) {
        let view = self.session.as_ref().map(|s| s.view()).unwrap_or_default();
        self.publish(|s| {
            s.bulletin_controls_visible = ui::bulletin_controls_visible(&view);
            ui::sync_scrub(&mut s.scrub, &view);
        });
    }

    fn refresh_labels(&self) {
        let labels = ui::bulletin_labels(&self.markers, &self.resolver.now());
        self.publish(|s| s.bulletin_labels = labels);
    }

    // ── metadata ──────────────────────────────────────────────────────────

    fn on_metadata_station(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.url == self.config.metadata.station_url)
    }

    fn configure_metadata_poll(&mut self, url: &str) {
        if url != self.config.metadata.station_url {
            self.disarm_metadata_poll();
            return;
        }
        self.last_track = None;
        self.poll_generation += 1;
        self.publish(|s| {
            s.track = None;
            s.metadata_refresh_visible = true;
        });
        self.spawn_metadata_fetch();
        let period = Duration::from_secs(self.config.metadata.poll_interval_secs.max(1));
        self.tasks.arm(TaskKind::MetadataPoll, period);
    }

    fn disarm_metadata_poll(&mut self) {
        self.tasks.disarm(TaskKind::MetadataPoll);
        // results still in flight belong to the old poll
        self.poll_generation += 1;
        self.publish(|s| {
            s.track = None;
            s.metadata_refresh_visible = false;
        });
    }

    fn spawn_metadata_fetch(&self) {
        let source = Arc::clone(&self.track_source);
        let tx = self.event_tx.clone();
        let generation = self.poll_generation;
        let timeout = Duration::from_secs(self.config.metadata.fetch_timeout_secs);
        tokio::spawn(async move {
            let result = fetch_with_timeout(source, timeout).await;
            let _ = tx.send(CoreEvent::MetadataFetched { generation, result });
        });
    }

    fn on_metadata(&mut self, generation: u64, result: Result<String, FetchError>) {
        if generation != self.poll_generation {
            debug!("metadata gen={} result ignored", generation);
            return;
        }
        match result {
            Ok(html) => {
                self.failures.record_success();
                if self.metadata_warned {
                    self.metadata_warned = false;
                    self.clear_notice(NOTICE_METADATA);
                }
                let Some(track) = extract_track(&html, &self.config.metadata.boilerplate) else {
                    debug!("metadata: no track on page");
                    return;
                };
                if self.last_track.as_deref() == Some(track.as_str()) {
                    return;
                }
                info!("metadata: now playing {}", track);
                self.last_track = Some(track.clone());
                let (artist, title) = match split_artist_title(&track) {
                    Some((a, t)) => (Some(a), t),
                    None => (None, track.clone()),
                };
                let album = self
                    .session
                    .as_ref()
                    .map(|s| s.display_name.clone())
                    .unwrap_or_default();
                let shown = track.clone();
                self.publish(move |s| {
                    s.track = Some(shown);
                    s.media = Some(MediaInfo {
                        title,
                        artist,
                        album,
                    });
                });
                let _ = self.broadcast_tx.send(BroadcastMessage::Track(Some(track)));
            }
            Err(e) => {
                warn!("metadata fetch failed: {}", e);
                if self.failures.record_failure() {
                    self.metadata_warned = true;
                    self.notify(
                        Notice::warning("Now-playing info unavailable")
                            .keyed(NOTICE_METADATA)
                            .persistent(),
                    );
                }
            }
        }
    }

    fn on_tick(&mut self, kind: TaskKind, generation: u64) {
        if !self.tasks.is_current(kind, generation) {
            debug!("tick {:?} gen={} from a cancelled timer", kind, generation);
            return;
        }
        match kind {
            TaskKind::ClockRefresh => self.refresh_labels(),
            TaskKind::MetadataPoll => self.spawn_metadata_fetch(),
        }
    }

    // ── connectivity ──────────────────────────────────────────────────────

    fn on_connectivity(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;
        if online {
            info!("network: back online");
            self.publish(|s| s.online = true);
            self.clear_notice(NOTICE_OFFLINE);
            self.notify(Notice::success("Back online"));
            return;
        }

        warn!("network: offline");
        if let Some(session) = self.session.as_mut() {
            session.output_mut().pause();
        }
        self.publish(|s| {
            s.online = false;
            s.on_air = false;
            s.loading = false;
            if s.playback_status == PlaybackStatus::Playing {
                s.playback_status = PlaybackStatus::Paused;
            }
        });
        self.notify(
            Notice::warning("Offline, playback paused")
                .keyed(NOTICE_OFFLINE)
                .persistent(),
        );
    }

    pub fn teardown(&mut self) {
        self.probe = None;
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.tasks.shutdown();
        self.backend.shutdown();
    }
}
