//! Hourly news bulletin addressing.
//!
//! Both services publish one file per hour, named after the local wall-clock
//! hour in `Pacific/Auckland`:
//!
//! ```text
//!   RNZ          https://<host>/news/YYYYMMDD-HH00-064.mp3
//!   Newstalk ZB  https://<host>/WeekOnDemand/ZB/auckland/YYYY.MM.DD-HH.00.00-D.mp3
//! ```

use std::sync::Arc;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::clock::{reading_at, Clock, ClockReading, SystemClock};
use crate::config::BulletinsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletinSource {
    Rnz,
    NewstalkZb,
}

impl BulletinSource {
    pub const ALL: [BulletinSource; 2] = [BulletinSource::Rnz, BulletinSource::NewstalkZb];

    /// Path segment used by the HTTP API.
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Rnz => "rnz",
            Self::NewstalkZb => "zb",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.to_ascii_lowercase().as_str() {
            "rnz" => Some(Self::Rnz),
            "zb" | "newstalkzb" => Some(Self::NewstalkZb),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Rnz => "RNZ",
            Self::NewstalkZb => "Newstalk ZB",
        }
    }

    /// Button-sized name.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Rnz => "RNZ",
            Self::NewstalkZb => "ZB",
        }
    }

    fn format(&self, host: &str, r: &ClockReading) -> String {
        match self {
            Self::Rnz => format!(
                "https://{}/news/{:04}{:02}{:02}-{:02}00-064.mp3",
                host, r.year, r.month, r.day, r.hour
            ),
            Self::NewstalkZb => format!(
                "https://{}/WeekOnDemand/ZB/auckland/{:04}.{:02}.{:02}-{:02}.00.00-D.mp3",
                host, r.year, r.month, r.day, r.hour
            ),
        }
    }
}

/// One concrete URL to try for a bulletin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinCandidate {
    pub source: BulletinSource,
    pub hours_back: u32,
    pub url: String,
    pub label_hour: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinHosts {
    pub rnz: String,
    pub zb: String,
}

impl BulletinHosts {
    pub fn host_for(&self, source: BulletinSource) -> &str {
        match source {
            BulletinSource::Rnz => &self.rnz,
            BulletinSource::NewstalkZb => &self.zb,
        }
    }
}

pub struct BulletinResolver {
    zone: Tz,
    hosts: BulletinHosts,
    clock: Arc<dyn Clock>,
}

impl BulletinResolver {
    pub fn new(zone: Tz, hosts: BulletinHosts, clock: Arc<dyn Clock>) -> Self {
        Self { zone, hosts, clock }
    }

    pub fn from_config(config: &BulletinsConfig) -> Self {
        Self::new(
            crate::clock::parse_zone(&config.zone),
            BulletinHosts {
                rnz: config.rnz_host.clone(),
                zb: config.zb_host.clone(),
            },
            Arc::new(SystemClock),
        )
    }

    /// Fresh wall-clock reading; never cached.
    pub fn now(&self) -> ClockReading {
        reading_at(self.clock.now_utc(), self.zone)
    }

    pub fn resolve(&self, source: BulletinSource, hours_back: u32) -> BulletinCandidate {
        let reading = self.now().minus_hours(hours_back);
        BulletinCandidate {
            source,
            hours_back,
            url: source.format(self.hosts.host_for(source), &reading),
            label_hour: reading.hour_label(),
        }
    }

    /// True when `url` points at one of the bulletin hosts and names an mp3.
    pub fn is_bulletin_url(&self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        let on_host = BulletinSource::ALL.iter().any(|s| {
            let host = self.hosts.host_for(*s).to_ascii_lowercase();
            !host.is_empty() && lower.contains(&format!("://{}/", host))
        });
        on_host && lower.split(['?', '#']).next().unwrap_or("").ends_with(".mp3")
    }
}

/// Name shown for a loaded bulletin, e.g. `"RNZ News 14:00"`.
pub fn bulletin_display_name(source: BulletinSource, marker: &str, label_hour: Option<&str>) -> String {
    match label_hour {
        Some(hh) => format!("{} {} {}:00", source.display_name(), marker, hh),
        None => format!("{} {}", source.display_name(), marker),
    }
}
