pub mod config;
pub mod format;
pub mod model;
pub mod permissions;

pub use config::{
    AppConfig, BackendConfig, ConfigError, FetchConfig, PermissionsConfig, PreferencesConfig,
    QuorumConfig, VotesConfig,
};
pub use model::{ChannelId, ElapsedTimeTracker, ParticipantId, QueueEntity};
pub use permissions::Permissions;
