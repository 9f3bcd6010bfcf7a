//! Now-playing extraction from a station web page.
//!
//! The page is plain marketing HTML with the current track somewhere in its
//! text as `Artist - Title`.  We take the first text node that looks like that
//! and is not obvious boilerplate.

use regex::Regex;
use scraper::{Html, Node};
use std::sync::OnceLock;

/// Candidates at or below this many characters are rejected.
pub const MIN_TRACK_CHARS: usize = 5;
/// Candidates at or above this many characters are rejected.
pub const MAX_TRACK_CHARS: usize = 200;

fn track_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\S.*?)\s+[-\u{2013}\u{2014}]\s+(\S.*)$").expect("static track pattern")
    })
}

/// Split `Artist - Title`.  Returns `None` when there is no delimiter.
pub fn split_artist_title(s: &str) -> Option<(String, String)> {
    let caps = track_pattern().captures(s.trim())?;
    let artist = caps.get(1)?.as_str().trim().to_string();
    let title = caps.get(2)?.as_str().trim().to_string();
    if artist.is_empty() || title.is_empty() {
        return None;
    }
    Some((artist, title))
}

fn is_candidate(text: &str, boilerplate: &[String]) -> bool {
    let len = text.chars().count();
    if len <= MIN_TRACK_CHARS || len >= MAX_TRACK_CHARS {
        return false;
    }
    let lower = text.to_lowercase();
    if boilerplate
        .iter()
        .any(|b| !b.is_empty() && lower.contains(&b.to_lowercase()))
    {
        return false;
    }
    track_pattern().is_match(text)
}

/// First `Artist - Title` string in the page's visible text.
pub fn extract_track(html: &str, boilerplate: &[String]) -> Option<String> {
    let doc = Html::parse_document(html);
    for node in doc.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let in_code = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "title"));
        if in_code {
            continue;
        }
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if is_candidate(&collapsed, boilerplate) {
            return Some(collapsed);
        }
    }
    None
}

/// Consecutive metadata-fetch failures.  `record_failure` returns true only
/// on the failure that reaches the threshold, so one streak raises one
/// warning however long it runs.
#[derive(Debug, Clone)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == self.threshold
    }

    pub fn record_success(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
