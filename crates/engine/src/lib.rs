pub mod fetch;
pub mod player;
pub mod service;
pub mod votes;

pub use fetch::{
    classify, BatchLimits, BatchResolution, DispatchError, FetchDispatcher, FetchOutcome,
    FetchPipeline, FetchRequest, QueryKind, Resolution, ResolutionError,
};
pub use player::{ChangeListener, NowPlaying, Player, PlayerEvent, PlayerSnapshot, ValidationError};
pub use service::{PlayerClosed, PlayerHandle, PlayerService};
pub use votes::{
    remaining_votes, skip_bypass, BypassReason, GatedAction, SkipBypassPolicy, VoteCoordinator,
};
