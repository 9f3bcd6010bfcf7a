/// Projection of playback state onto the controls clients draw.
use std::collections::HashMap;

use newsdesk_proto::bulletin::BulletinSource;
use newsdesk_proto::clock::ClockReading;
use newsdesk_proto::protocol::{BulletinLabel, ScrubView};

use crate::session::BulletinMarker;

/// What the projection needs to know about the live session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub is_bulletin: bool,
    pub duration: Option<f64>,
    pub current_time: f64,
    pub seekable_range: Option<(f64, f64)>,
}

fn usable_duration(d: Option<f64>) -> Option<f64> {
    d.filter(|d| d.is_finite() && *d > 0.0)
}

impl SessionView {
    /// Finite positive duration and a non-empty seekable range.
    pub fn is_seekable(&self) -> bool {
        usable_duration(self.duration).is_some()
            && self.seekable_range.is_some_and(|(start, end)| end > start)
    }
}

pub fn bulletin_controls_visible(view: &SessionView) -> bool {
    view.is_bulletin && view.is_seekable()
}

/// `M:SS`, seconds truncated.  Anything not finite or negative reads `0:00`.
pub fn format_clock(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "0:00".to_string();
    }
    let total = secs as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Mirror time and duration into the scrub control unless the user holds it.
pub fn sync_scrub(scrub: &mut ScrubView, view: &SessionView) {
    if scrub.dragging {
        return;
    }
    let duration = usable_duration(view.duration).unwrap_or(0.0);
    scrub.position_secs = view.current_time.max(0.0);
    scrub.duration_secs = duration;
    scrub.position_label = format_clock(scrub.position_secs);
    scrub.duration_label = format_clock(duration);
}

/// Button labels: the live hour for unset sources, the pinned hour otherwise.
pub fn bulletin_labels(
    markers: &HashMap<BulletinSource, BulletinMarker>,
    now: &ClockReading,
) -> Vec<BulletinLabel> {
    BulletinSource::ALL
        .iter()
        .map(|source| {
            let (hour, pinned) = match markers.get(source) {
                Some(BulletinMarker::Pinned(h)) => (h.clone(), true),
                _ => (now.hour_label(), false),
            };
            BulletinLabel {
                source: *source,
                text: format!("{} {}:00", source.short_name(), hour),
                pinned,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(hour: u32) -> ClockReading {
        ClockReading {
            year: 2024,
            month: 7,
            day: 1,
            hour,
            minute: 10,
            second: 0,
        }
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(65.9), "1:05");
        assert_eq!(format_clock(600.0), "10:00");
        assert_eq!(format_clock(f64::NAN), "0:00");
        assert_eq!(format_clock(f64::INFINITY), "0:00");
        assert_eq!(format_clock(-3.0), "0:00");
    }

    #[test]
    fn test_controls_visibility() {
        let mut v = SessionView {
            is_bulletin: true,
            duration: Some(180.0),
            current_time: 0.0,
            seekable_range: Some((0.0, 180.0)),
        };
        assert!(bulletin_controls_visible(&v));

        v.seekable_range = Some((0.0, 0.0));
        assert!(!bulletin_controls_visible(&v));

        v.seekable_range = Some((0.0, 180.0));
        v.duration = Some(f64::INFINITY);
        assert!(!bulletin_controls_visible(&v));

        v.duration = Some(180.0);
        v.is_bulletin = false;
        assert!(!bulletin_controls_visible(&v));
    }

    #[test]
    fn test_sync_scrub_respects_drag() {
        let view = SessionView {
            is_bulletin: true,
            duration: Some(125.0),
            current_time: 61.2,
            seekable_range: Some((0.0, 125.0)),
        };
        let mut scrub = ScrubView::default();
        sync_scrub(&mut scrub, &view);
        assert_eq!(scrub.position_label, "1:01");
        assert_eq!(scrub.duration_label, "2:05");

        scrub.dragging = true;
        let later = SessionView {
            current_time: 90.0,
            ..view
        };
        sync_scrub(&mut scrub, &later);
        assert_eq!(scrub.position_secs, 61.2);
    }

    #[test]
    fn test_labels_follow_markers() {
        let mut markers = HashMap::new();
        markers.insert(BulletinSource::Rnz, BulletinMarker::Pinned("13".into()));
        let labels = bulletin_labels(&markers, &reading(15));
        assert_eq!(labels[0].text, "RNZ 13:00");
        assert!(labels[0].pinned);
        assert_eq!(labels[1].text, "ZB 15:00");
        assert!(!labels[1].pinned);
    }
}
