/// The audio output seen by the coordinator.
///
/// One `OutputHandle` per playback session.  Lifecycle events flow back
/// through the `Emitter` passed to `AudioBackend::open`; the coordinator
/// never polls the output except for its seekable range.
use crate::observers::{Emitter, Observed, Release};

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Enough is loaded to start playing.
    Ready,
    Error(String),
    Buffering,
    Playing,
    Ended,
    MetadataReady,
    DurationKnown(f64),
    TimeUpdate(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEventKind {
    Ready,
    Error,
    Buffering,
    Playing,
    Ended,
    MetadataReady,
    DurationKnown,
    TimeUpdate,
}

/// The observers attached to every playback session, no more and no fewer.
pub const LIFECYCLE_OBSERVERS: [OutputEventKind; 8] = [
    OutputEventKind::Ready,
    OutputEventKind::Error,
    OutputEventKind::Buffering,
    OutputEventKind::Playing,
    OutputEventKind::Ended,
    OutputEventKind::MetadataReady,
    OutputEventKind::DurationKnown,
    OutputEventKind::TimeUpdate,
];

impl Observed for OutputEvent {
    type Kind = OutputEventKind;

    fn kind(&self) -> OutputEventKind {
        match self {
            Self::Ready => OutputEventKind::Ready,
            Self::Error(_) => OutputEventKind::Error,
            Self::Buffering => OutputEventKind::Buffering,
            Self::Playing => OutputEventKind::Playing,
            Self::Ended => OutputEventKind::Ended,
            Self::MetadataReady => OutputEventKind::MetadataReady,
            Self::DurationKnown(_) => OutputEventKind::DurationKnown,
            Self::TimeUpdate(_) => OutputEventKind::TimeUpdate,
        }
    }
}

pub trait OutputHandle: Release + Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn seek(&mut self, secs: f64);
    fn set_volume(&mut self, volume: f32);
    /// `(start, end)` the output can currently seek within, if any.
    fn seekable_range(&self) -> Option<(f64, f64)>;
}

pub trait AudioBackend: Send {
    fn open(
        &mut self,
        url: &str,
        volume: f32,
        observers: Emitter<OutputEvent>,
    ) -> anyhow::Result<Box<dyn OutputHandle>>;

    /// Stop whatever process backs the outputs.
    fn shutdown(&mut self) {}
}
