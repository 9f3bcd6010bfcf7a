use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::protocol::Station;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub bulletins: BulletinsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub timers: TimersConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default = "default_stations")]
    pub stations: Vec<Station>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulletinsConfig {
    /// IANA zone the bulletin file names are stamped in.
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_rnz_host")]
    pub rnz_host: String,
    #[serde(default = "default_zb_host")]
    pub zb_host: String,
    /// Display-name term that marks a session as a bulletin.
    #[serde(default = "default_marker_term")]
    pub marker_term: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

/// Now-playing scrape for the one station that exposes track info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Prepended to `target_url`.  Empty means fetch directly.
    #[serde(default)]
    pub relay_prefix: String,
    #[serde(default = "default_metadata_target")]
    pub target_url: String,
    /// Stream URL of the station whose playback enables polling.
    #[serde(default = "default_metadata_station")]
    pub station_url: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Lines containing any of these (case-insensitive) are never a track.
    #[serde(default = "default_boilerplate")]
    pub boilerplate: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimersConfig {
    #[serde(default = "default_clock_refresh_secs")]
    pub clock_refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_connectivity_enabled")]
    pub enabled: bool,
    #[serde(default = "default_probe_address")]
    pub probe_address: String,
    #[serde(default = "default_connectivity_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_connectivity_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where the station order and logs live.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    pub fn station_order_file(&self) -> PathBuf {
        self.state_dir.join("station_order.json")
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
        }
    }
}

impl Default for BulletinsConfig {
    fn default() -> Self {
        Self {
            zone: default_zone(),
            rnz_host: default_rnz_host(),
            zb_host: default_zb_host(),
            marker_term: default_marker_term(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            relay_prefix: String::new(),
            target_url: default_metadata_target(),
            station_url: default_metadata_station(),
            poll_interval_secs: default_poll_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            boilerplate: default_boilerplate(),
        }
    }
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            clock_refresh_secs: default_clock_refresh_secs(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: default_connectivity_enabled(),
            probe_address: default_probe_address(),
            interval_secs: default_connectivity_interval_secs(),
            timeout_secs: default_connectivity_timeout_secs(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.8
}

fn default_zone() -> String {
    "Pacific/Auckland".to_string()
}

fn default_rnz_host() -> String {
    "podcast.radionz.co.nz".to_string()
}

fn default_zb_host() -> String {
    "weekondemand.newstalkzb.co.nz".to_string()
}

fn default_marker_term() -> String {
    "News".to_string()
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_metadata_target() -> String {
    "https://www.georgefm.co.nz/".to_string()
}

fn default_metadata_station() -> String {
    "https://ais-nzme.streamguys1.com/nz_009_aac".to_string()
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_boilerplate() -> Vec<String> {
    [
        "now playing",
        "listen live",
        "recently played",
        "all rights reserved",
        "privacy policy",
        "terms and conditions",
        "download the app",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_clock_refresh_secs() -> u64 {
    60
}

fn default_connectivity_enabled() -> bool {
    true
}

fn default_probe_address() -> String {
    "1.1.1.1:443".to_string()
}

fn default_connectivity_interval_secs() -> u64 {
    15
}

fn default_connectivity_timeout_secs() -> u64 {
    5
}

fn default_state_dir() -> PathBuf {
    platform::data_dir()
}

fn default_stations() -> Vec<Station> {
    vec![
        Station {
            name: "RNZ National".to_string(),
            url: "https://radionz.streamguys1.com/national/national/playlist.m3u8".to_string(),
            description: "Public broadcaster, news and talk".to_string(),
        },
        Station {
            name: "Newstalk ZB".to_string(),
            url: "https://ais-nzme.streamguys1.com/nz_002_aac".to_string(),
            description: "Talkback and news".to_string(),
        },
        Station {
            name: "George FM".to_string(),
            url: default_metadata_station(),
            description: "Dance music, with now-playing info".to_string(),
        },
    ]
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            player: PlayerConfig::default(),
            bulletins: BulletinsConfig::default(),
            metadata: MetadataConfig::default(),
            timers: TimersConfig::default(),
            connectivity: ConnectivityConfig::default(),
            paths: PathsConfig::default(),
            stations: default_stations(),
        }
    }
}
