use serde::{Deserialize, Serialize};

use crate::bulletin::BulletinSource;

/// Requests accepted by the coordinator, from the HTTP API or from a notice's
/// retry action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station_idx: usize },
    PlayUrl { url: String, name: String },
    PlayBulletin { source: BulletinSource },
    TogglePause,
    Stop,
    Volume { value: f32 },
    SeekRelative { seconds: f64 },
    SeekTo { seconds: f64 },
    /// The user grabbed the scrub control; time updates stop moving it.
    ScrubStart,
    /// The user let go of the scrub control at `seconds`.
    ScrubEnd { seconds: f64 },
    /// Re-issue the last load that failed.
    Retry,
    RefreshMetadata,
    MoveStation { from: usize, to: usize },
    GetState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// User-visible message.  Persistent notices stay until a notice with the
/// same key clears them; the rest are transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub key: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub persistent: bool,
    /// Action offered alongside the message.
    #[serde(default)]
    pub retry: Option<Command>,
}

impl Notice {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            key: None,
            severity,
            message: message.into(),
            persistent: false,
            retry: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_retry(mut self, cmd: Command) -> Self {
        self.retry = Some(cmd);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    /// Load issued; waiting for the output to become ready.
    Loading,
    Playing,
    Paused,
    Ended,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Scrub control as the UI should draw it.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScrubView {
    pub position_secs: f64,
    pub duration_secs: f64,
    /// `M:SS`
    pub position_label: String,
    /// `M:SS`
    pub duration_label: String,
    pub dragging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulletinLabel {
    pub source: BulletinSource,
    pub text: String,
    /// True while a loaded bulletin holds the label at its hour.
    pub pinned: bool,
}

/// What an OS media session / lock screen would show.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MediaInfo {
    pub title: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: String,
}

/// Snapshot published after every state change.  `rev` increases by one per
/// publish.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlayerState {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<Station>,
    pub current_station: Option<usize>,
    pub current_url: Option<String>,
    pub display_name: Option<String>,
    pub is_bulletin: bool,
    pub playback_status: PlaybackStatus,
    pub on_air: bool,
    pub loading: bool,
    pub volume: f32,
    pub bulletin_controls_visible: bool,
    pub scrub: ScrubView,
    pub bulletin_labels: Vec<BulletinLabel>,
    pub media: Option<MediaInfo>,
    pub track: Option<String>,
    pub metadata_refresh_visible: bool,
    pub online: bool,
    pub recent_notices: Vec<Notice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd = Command::PlayBulletin {
            source: BulletinSource::NewstalkZb,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["cmd"], "PlayBulletin");
        assert_eq!(json["source"], "newstalk_zb");

        let back: Command = serde_json::from_str(r#"{"cmd":"SeekTo","seconds":12.5}"#).unwrap();
        assert_eq!(back, Command::SeekTo { seconds: 12.5 });
    }

    #[test]
    fn test_notice_builders() {
        let n = Notice::error("Playback failed")
            .keyed("playback")
            .with_retry(Command::PlayUrl {
                url: "https://x.test/a".into(),
                name: "A".into(),
            });
        assert_eq!(n.severity, Severity::Error);
        assert_eq!(n.key.as_deref(), Some("playback"));
        assert!(!n.persistent);
        assert!(matches!(n.retry, Some(Command::PlayUrl { .. })));
        assert!(Notice::warning("offline").persistent().persistent);
    }

    #[test]
    fn test_state_defaults_deserialize() {
        let s: PlayerState = serde_json::from_str(
            r#"{"stations":[],"current_station":null,"current_url":null,"display_name":null,
                "is_bulletin":false,"playback_status":"Idle","on_air":false,"loading":false,
                "volume":0.5,"bulletin_controls_visible":false,
                "scrub":{"position_secs":0.0,"duration_secs":0.0,"position_label":"0:00",
                         "duration_label":"0:00","dragging":false},
                "bulletin_labels":[],"media":null,"track":null,
                "metadata_refresh_visible":false,"online":true,"recent_notices":[]}"#,
        )
        .unwrap();
        assert_eq!(s.rev, 0);
        assert_eq!(s.playback_status, PlaybackStatus::Idle);
    }
}
