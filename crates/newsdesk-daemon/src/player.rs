/// mpv-backed audio output.
///
/// `MpvBackend` is a thin front for a player task that owns the mpv process.
/// Each `open` gives the task a new route (generation + observers); mpv
/// events are translated into `OutputEvent`s for whichever route is current.
/// Requests from a released output are dropped by generation.
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::mpv::{
    MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE, OBS_DURATION, OBS_EOF_REACHED, OBS_PAUSE,
    OBS_PAUSED_FOR_CACHE, OBS_SEEKABLE, OBS_TIME_POS,
};
use crate::observers::{Emitter, Release};
use crate::output::{AudioBackend, OutputEvent, OutputHandle};

type SharedRange = Arc<Mutex<Option<(f64, f64)>>>;

enum PlayerRequest {
    Load {
        generation: u64,
        url: String,
        volume: f32,
        observers: Emitter<OutputEvent>,
        seekable: SharedRange,
    },
    Play { generation: u64 },
    Pause { generation: u64 },
    Seek { generation: u64, secs: f64 },
    Volume { generation: u64, volume: f32 },
    Release { generation: u64 },
    Shutdown,
}

pub struct MpvBackend {
    tx: mpsc::UnboundedSender<PlayerRequest>,
}

impl MpvBackend {
    /// Spawns the player task.  mpv itself starts on the first load.
    pub fn spawn(initial_volume: f32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(player_task(rx, initial_volume));
        Self { tx }
    }
}

impl AudioBackend for MpvBackend {
    fn open(
        &mut self,
        url: &str,
        volume: f32,
        observers: Emitter<OutputEvent>,
    ) -> anyhow::Result<Box<dyn OutputHandle>> {
        let generation = observers.generation();
        let seekable: SharedRange = Arc::new(Mutex::new(None));
        self.tx
            .send(PlayerRequest::Load {
                generation,
                url: url.to_string(),
                volume,
                observers,
                seekable: Arc::clone(&seekable),
            })
            .map_err(|_| anyhow::anyhow!("player task gone"))?;
        Ok(Box::new(MpvOutput {
            generation,
            tx: self.tx.clone(),
            seekable,
            released: false,
        }))
    }

    fn shutdown(&mut self) {
        let _ = self.tx.send(PlayerRequest::Shutdown);
    }
}

struct MpvOutput {
    generation: u64,
    tx: mpsc::UnboundedSender<PlayerRequest>,
    seekable: SharedRange,
    released: bool,
}

impl MpvOutput {
    fn send(&self, req: PlayerRequest) {
        if self.released {
            return;
        }
        if self.tx.send(req).is_err() {
            debug!("player: task gone, dropping request");
        }
    }
}

impl OutputHandle for MpvOutput {
    fn play(&mut self) {
        self.send(PlayerRequest::Play {
            generation: self.generation,
        });
    }

    fn pause(&mut self) {
        self.send(PlayerRequest::Pause {
            generation: self.generation,
        });
    }

    fn seek(&mut self, secs: f64) {
        self.send(PlayerRequest::Seek {
            generation: self.generation,
            secs,
        });
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(PlayerRequest::Volume {
            generation: self.generation,
            volume,
        });
    }

    fn seekable_range(&self) -> Option<(f64, f64)> {
        self.seekable.lock().ok().and_then(|r| *r)
    }
}

impl Release for MpvOutput {
    fn release(&mut self) {
        self.send(PlayerRequest::Release {
            generation: self.generation,
        });
        self.released = true;
    }
}

/// The output the player task is currently feeding events to.
struct Route {
    generation: u64,
    observers: Emitter<OutputEvent>,
    seekable: SharedRange,
    core_idle: bool,
    paused: bool,
    playing: bool,
    ended: bool,
    duration: Option<f64>,
    can_seek: bool,
}

impl Route {
    fn new(generation: u64, observers: Emitter<OutputEvent>, seekable: SharedRange) -> Self {
        Self {
            generation,
            observers,
            seekable,
            core_idle: true,
            paused: true,
            playing: false,
            ended: false,
            duration: None,
            can_seek: false,
        }
    }

    fn publish_range(&self) {
        let range = match self.duration {
            Some(d) if self.can_seek && d.is_finite() && d > 0.0 => Some((0.0, d)),
            _ => None,
        };
        if let Ok(mut slot) = self.seekable.lock() {
            *slot = range;
        }
    }

    fn update_playing(&mut self) {
        let playing = !self.core_idle && !self.paused;
        if playing && !self.playing {
            self.observers.emit(OutputEvent::Playing);
        }
        self.playing = playing;
    }

    /// `Ended` once per finished file.
    fn finish(&mut self) {
        self.playing = false;
        if !self.ended {
            self.ended = true;
            self.observers.emit(OutputEvent::Ended);
        }
    }

    fn on_event(&mut self, evt: &MpvEvent) {
        if let Some((id, data)) = evt.as_property_change() {
            self.on_property(id, data);
            return;
        }
        match evt.event_name() {
            Some("start-file") => {
                self.ended = false;
                self.observers.emit(OutputEvent::Buffering);
            }
            Some("file-loaded") => {
                self.observers.emit(OutputEvent::MetadataReady);
                self.observers.emit(OutputEvent::Ready);
            }
            Some("end-file") => match evt.end_reason() {
                Some("eof") => {
                    // unloaded: nothing left to seek in
                    self.duration = None;
                    self.can_seek = false;
                    self.publish_range();
                    self.finish();
                }
                Some("error") => {
                    self.playing = false;
                    let msg = evt.file_error().unwrap_or("playback failed").to_string();
                    self.observers.emit(OutputEvent::Error(msg));
                }
                // stop / redirect / quit belong to a replaced file
                _ => {}
            },
            _ => {}
        }
    }

    fn on_property(&mut self, id: u64, data: &Value) {
        match id {
            OBS_CORE_IDLE => {
                if let Some(idle) = data.as_bool() {
                    self.core_idle = idle;
                    self.update_playing();
                }
            }
            OBS_PAUSE => {
                if let Some(paused) = data.as_bool() {
                    self.paused = paused;
                    self.update_playing();
                }
            }
            OBS_TIME_POS => {
                if let Some(t) = data.as_f64() {
                    self.observers.emit(OutputEvent::TimeUpdate(t));
                }
            }
            OBS_DURATION => {
                self.duration = data.as_f64();
                self.publish_range();
                if let Some(d) = self.duration {
                    self.observers.emit(OutputEvent::DurationKnown(d));
                }
            }
            OBS_SEEKABLE => {
                self.can_seek = data.as_bool().unwrap_or(false);
                self.publish_range();
            }
            OBS_EOF_REACHED => match data.as_bool() {
                Some(true) => self.finish(),
                // seeking back out of the end
                Some(false) => self.ended = false,
                None => {}
            },
            OBS_PAUSED_FOR_CACHE => {
                if data.as_bool() == Some(true) {
                    self.observers.emit(OutputEvent::Buffering);
                }
            }
            _ => {}
        }
    }
}

async fn ensure_connected(
    driver: &mut MpvDriver,
    handle: &mut Option<MpvHandle>,
    event_tx: &mpsc::Sender<MpvEvent>,
) -> Option<MpvHandle> {
    if handle.is_some() && driver.process_alive() {
        return handle.clone();
    }
    match driver.spawn_and_connect(event_tx.clone()).await {
        Ok(h) => {
            h.observe_properties().await;
            *handle = Some(h.clone());
            Some(h)
        }
        Err(e) => {
            warn!("player: mpv start failed: {}", e);
            *handle = None;
            None
        }
    }
}

async fn player_task(mut rx: mpsc::UnboundedReceiver<PlayerRequest>, initial_volume: f32) {
    let mut driver = MpvDriver::new(initial_volume);
    let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(256);
    let mut handle: Option<MpvHandle> = None;
    let mut route: Option<Route> = None;

    loop {
        tokio::select! {
            req = rx.recv() => {
                let Some(req) = req else { break };
                let current = route.as_ref().map(|r| r.generation);
                match req {
                    PlayerRequest::Shutdown => break,
                    PlayerRequest::Load { generation, url, volume, observers, seekable } => {
                        let Some(h) = ensure_connected(&mut driver, &mut handle, &event_tx).await else {
                            observers.emit(OutputEvent::Error("audio player unavailable".into()));
                            continue;
                        };
                        driver.last_volume = volume;
                        route = Some(Route::new(generation, observers.clone(), seekable));
                        info!("player: load gen={} {}", generation, url);
                        if let Err(e) = h.load_paused(&url, volume).await {
                            warn!("player: load failed: {}", e);
                            observers.emit(OutputEvent::Error(e.to_string()));
                        }
                    }
                    PlayerRequest::Release { generation } => {
                        if current == Some(generation) {
                            route = None;
                            if let Some(h) = &handle {
                                let _ = h.stop().await;
                            }
                        }
                    }
                    other => {
                        let Some(h) = handle.as_ref() else { continue };
                        let result = match other {
                            PlayerRequest::Play { generation } if current == Some(generation) => {
                                h.set_pause(false).await
                            }
                            PlayerRequest::Pause { generation } if current == Some(generation) => {
                                h.set_pause(true).await
                            }
                            PlayerRequest::Seek { generation, secs } if current == Some(generation) => {
                                h.seek_to(secs).await
                            }
                            PlayerRequest::Volume { generation, volume } if current == Some(generation) => {
                                driver.last_volume = volume;
                                h.set_volume(volume).await
                            }
                            _ => Ok(()),
                        };
                        if let Err(e) = result {
                            warn!("player: command failed: {}", e);
                        }
                    }
                }
            }
            Some(evt) = event_rx.recv() => {
                if let Some(r) = route.as_mut() {
                    r.on_event(&evt);
                }
            }
        }
    }

    info!("player: shutting down");
    driver.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreEvent;
    use crate::observers::{attach, Attachment};
    use crate::output::LIFECYCLE_OBSERVERS;
    use serde_json::json;

    struct Fixture {
        route: Route,
        rx: mpsc::UnboundedReceiver<CoreEvent>,
        range: SharedRange,
        _attachment: Attachment,
    }

    fn fixture() -> Fixture {
        let (tx, rx) = mpsc::unbounded_channel();
        let (attachment, emitter) =
            attach::<OutputEvent>(7, &LIFECYCLE_OBSERVERS, tx, CoreEvent::output);
        let range: SharedRange = Arc::new(Mutex::new(None));
        Fixture {
            route: Route::new(7, emitter, Arc::clone(&range)),
            rx,
            range,
            _attachment: attachment,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        while let Ok(CoreEvent::Output { event, .. }) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn prop(id: u64, data: Value) -> MpvEvent {
        MpvEvent {
            raw: json!({"event": "property-change", "id": id, "data": data}),
        }
    }

    #[test]
    fn test_lifecycle_translation() {
        let Fixture {
            route: mut r,
            mut rx,
            _attachment: _attached,
            ..
        } = fixture();
        r.on_event(&MpvEvent { raw: json!({"event": "start-file"}) });
        r.on_event(&MpvEvent { raw: json!({"event": "file-loaded"}) });
        r.on_event(&prop(OBS_CORE_IDLE, json!(false)));
        r.on_event(&prop(OBS_PAUSE, json!(false)));
        r.on_event(&prop(OBS_TIME_POS, json!(1.5)));
        r.on_event(&MpvEvent {
            raw: json!({"event": "end-file", "reason": "stop"}),
        });
        r.on_event(&MpvEvent {
            raw: json!({"event": "end-file", "reason": "eof"}),
        });
        assert_eq!(
            drain(&mut rx),
            vec![
                OutputEvent::Buffering,
                OutputEvent::MetadataReady,
                OutputEvent::Ready,
                OutputEvent::Playing,
                OutputEvent::TimeUpdate(1.5),
                OutputEvent::Ended,
            ]
        );
    }

    #[test]
    fn test_seekable_range_needs_duration_and_seekable() {
        let Fixture {
            route: mut r,
            mut rx,
            range,
            _attachment: _attached,
        } = fixture();
        r.on_event(&prop(OBS_SEEKABLE, json!(true)));
        assert_eq!(*range.lock().unwrap(), None);
        r.on_event(&prop(OBS_DURATION, json!(120.0)));
        assert_eq!(*range.lock().unwrap(), Some((0.0, 120.0)));
        r.on_event(&prop(OBS_SEEKABLE, json!(false)));
        assert_eq!(*range.lock().unwrap(), None);
        assert_eq!(drain(&mut rx), vec![OutputEvent::DurationKnown(120.0)]);
    }

    #[test]
    fn test_error_end_reason() {
        let Fixture {
            route: mut r,
            mut rx,
            _attachment: _attached,
            ..
        } = fixture();
        r.on_event(&MpvEvent {
            raw: json!({"event": "end-file", "reason": "error", "file_error": "unrecognized file format"}),
        });
        assert_eq!(
            drain(&mut rx),
            vec![OutputEvent::Error("unrecognized file format".into())]
        );
    }

    #[test]
    fn test_kept_open_eof_ends_once_and_stays_seekable() {
        let Fixture {
            route: mut r,
            mut rx,
            range,
            _attachment: _attached,
        } = fixture();
        r.on_event(&MpvEvent { raw: json!({"event": "start-file"}) });
        r.on_event(&prop(OBS_SEEKABLE, json!(true)));
        r.on_event(&prop(OBS_DURATION, json!(90.0)));
        r.on_event(&prop(OBS_EOF_REACHED, json!(true)));
        r.on_event(&prop(OBS_EOF_REACHED, json!(true)));
        assert_eq!(*range.lock().unwrap(), Some((0.0, 90.0)));

        // seek back in, play to the end again
        r.on_event(&prop(OBS_EOF_REACHED, json!(false)));
        r.on_event(&prop(OBS_EOF_REACHED, json!(true)));
        assert_eq!(
            drain(&mut rx),
            vec![
                OutputEvent::Buffering,
                OutputEvent::DurationKnown(90.0),
                OutputEvent::Ended,
                OutputEvent::Ended,
            ]
        );
    }

    #[test]
    fn test_unloaded_eof_clears_range() {
        let Fixture {
            route: mut r,
            mut rx,
            range,
            _attachment: _attached,
        } = fixture();
        r.on_event(&prop(OBS_SEEKABLE, json!(true)));
        r.on_event(&prop(OBS_DURATION, json!(90.0)));
        r.on_event(&MpvEvent {
            raw: json!({"event": "end-file", "reason": "eof"}),
        });
        assert_eq!(*range.lock().unwrap(), None);
        assert_eq!(
            drain(&mut rx),
            vec![OutputEvent::DurationKnown(90.0), OutputEvent::Ended]
        );
    }
}
