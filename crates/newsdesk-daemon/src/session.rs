/// The live playback session and the outstanding bulletin probe.
///
/// Both wrap their handle in a [`Scope`], so dropping either one detaches
/// its observers and then releases the handle.
use newsdesk_proto::bulletin::{BulletinCandidate, BulletinResolver};

use crate::observers::Scope;
use crate::output::OutputHandle;
use crate::probe::ProbeHandle;
use crate::ui::SessionView;

/// Whether a source's button label follows the clock or stays on the hour
/// of the bulletin that was loaded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BulletinMarker {
    #[default]
    Unset,
    Pinned(String),
}

pub struct PlaybackSession {
    pub generation: u64,
    pub url: String,
    pub display_name: String,
    pub is_bulletin: bool,
    pub current_time: f64,
    pub duration: Option<f64>,
    output: Scope<dyn OutputHandle>,
}

impl PlaybackSession {
    pub fn new(
        output: Scope<dyn OutputHandle>,
        url: String,
        display_name: String,
        is_bulletin: bool,
    ) -> Self {
        Self {
            generation: output.generation(),
            url,
            display_name,
            is_bulletin,
            current_time: 0.0,
            duration: None,
            output,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            is_bulletin: self.is_bulletin,
            duration: self.duration,
            current_time: self.current_time,
            seekable_range: self.output.handle().seekable_range(),
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.view().is_seekable()
    }

    /// Seek to `target` clamped to `[0, duration]`.  Returns the position
    /// sought to, or `None` when the session cannot seek.
    pub fn seek_to(&mut self, target: f64) -> Option<f64> {
        if !self.is_seekable() || !target.is_finite() {
            return None;
        }
        let duration = self.duration?;
        let pos = target.clamp(0.0, duration);
        self.output.handle_mut().seek(pos);
        self.current_time = pos;
        Some(pos)
    }

    pub fn seek_by(&mut self, delta: f64) -> Option<f64> {
        self.seek_to(self.current_time + delta)
    }

    pub fn output_mut(&mut self) -> &mut dyn OutputHandle {
        self.output.handle_mut()
    }

    /// Pause, then detach and release.
    pub fn close(mut self) {
        self.output.handle_mut().pause();
    }
}

pub struct ProbeSession {
    pub candidate: BulletinCandidate,
    scope: Scope<dyn ProbeHandle>,
}

impl ProbeSession {
    pub fn new(candidate: BulletinCandidate, scope: Scope<dyn ProbeHandle>) -> Self {
        Self { candidate, scope }
    }

    pub fn generation(&self) -> u64 {
        self.scope.generation()
    }
}

/// Bulletin when the URL looks like a bulletin file or the name carries the
/// marker term as a whole word.  Either signal alone is enough.
pub fn classify_bulletin(
    url: &str,
    display_name: &str,
    resolver: &BulletinResolver,
    marker: &str,
) -> bool {
    resolver.is_bulletin_url(url)
        || (!marker.is_empty() && display_name.split_whitespace().any(|w| w == marker))
}
