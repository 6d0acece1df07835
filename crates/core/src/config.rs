use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("default_volume {0} is out of range (0, 1]")]
    VolumeOutOfRange(f32),
    #[error("votes.{action}.min_percent {value} is out of range [0, 1]")]
    PercentOutOfRange { action: &'static str, value: f64 },
    #[error("fetch.max_in_flight must be at least 1")]
    NoFetchCapacity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    pub owner_id: String,
    pub owner_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    pub default_volume: f32,
    /// Zero or negative disables the cap.
    pub max_playlist_length: i64,
    /// Seconds; zero or negative disables the cap.
    pub max_song_length: i64,
    pub mention_playing: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            default_volume: 0.15,
            max_playlist_length: 50,
            max_song_length: 900,
            mention_playing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuorumConfig {
    pub min_count: i64,
    pub min_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotesConfig {
    pub self_insta_skip: bool,
    /// Seconds after which a skip vote passes on its own; zero disables.
    pub pass_skip_vote_after: u64,
    pub skip: QuorumConfig,
    pub clear: QuorumConfig,
}

impl Default for VotesConfig {
    fn default() -> Self {
        Self {
            self_insta_skip: true,
            pass_skip_vote_after: 0,
            skip: QuorumConfig {
                min_count: 3,
                min_percent: 0.5,
            },
            clear: QuorumConfig {
                min_count: 4,
                min_percent: 0.6,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub max_in_flight: usize,
    pub max_query_len: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            max_query_len: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub resolver_program: String,
    pub player_program: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            resolver_program: "yt-dlp".to_string(),
            player_program: "ffplay".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub log_level: String,
    pub command_prefix: String,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    #[serde(default)]
    pub votes: VotesConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            command_prefix: "!".to_string(),
            permissions: PermissionsConfig::default(),
            preferences: PreferencesConfig::default(),
            votes: VotesConfig::default(),
            fetch: FetchConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let volume = self.preferences.default_volume;
        if !(volume > 0.0 && volume <= 1.0) {
            return Err(ConfigError::VolumeOutOfRange(volume));
        }
        for (action, quorum) in [("skip", &self.votes.skip), ("clear", &self.votes.clear)] {
            if !(0.0..=1.0).contains(&quorum.min_percent) {
                return Err(ConfigError::PercentOutOfRange {
                    action,
                    value: quorum.min_percent,
                });
            }
        }
        if self.fetch.max_in_flight == 0 {
            return Err(ConfigError::NoFetchCapacity);
        }
        Ok(())
    }
}
