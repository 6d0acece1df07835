use futures_util::StreamExt;
use jukebox_core::{ChannelId, ParticipantId, QueueEntity};
use jukebox_providers::{MediaMetadata, MetadataResolver, ResolveError, SearchProvider};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

const DIRECT_MARKERS: [&str; 2] = ["youtube.com/watch", "youtu.be/"];
const PLAYLIST_MARKERS: [&str; 1] = ["youtube.com/playlist"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    DirectLink,
    PlaylistLink,
    Search,
}

pub fn classify(query: &str) -> QueryKind {
    if DIRECT_MARKERS.iter().any(|m| query.contains(m)) {
        QueryKind::DirectLink
    } else if PLAYLIST_MARKERS.iter().any(|m| query.contains(m)) {
        QueryKind::PlaylistLink
    } else {
        QueryKind::Search
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("no results for `{0}`")]
    NoResults(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("excluded: {0}")]
    ItemExcluded(String),
}

impl From<ResolveError> for ResolutionError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Value(msg) => ResolutionError::MalformedInput(msg),
            ResolveError::Upstream(msg) => ResolutionError::UpstreamUnavailable(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResolution {
    pub items: Vec<QueueEntity>,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Single(QueueEntity),
    Batch(BatchResolution),
}

impl Resolution {
    pub fn into_items(self) -> Vec<QueueEntity> {
        match self {
            Resolution::Single(item) => vec![item],
            Resolution::Batch(batch) => batch.items,
        }
    }
}

/// Playlist caps; zero or negative means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchLimits {
    pub max_count: i64,
    pub max_item_length: i64,
}

#[derive(Clone)]
pub struct FetchPipeline {
    resolver: Arc<dyn MetadataResolver>,
    search: Arc<dyn SearchProvider>,
    max_query_len: usize,
}

impl FetchPipeline {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        search: Arc<dyn SearchProvider>,
        max_query_len: usize,
    ) -> Self {
        Self {
            resolver,
            search,
            max_query_len,
        }
    }

    pub async fn resolve(&self, query: &str, limits: BatchLimits) -> Result<Resolution, ResolutionError> {
        let query = self.check_query(query)?;
        match classify(query) {
            QueryKind::PlaylistLink => self
                .resolve_batch(query, limits.max_count, limits.max_item_length)
                .await
                .map(Resolution::Batch),
            _ => self.resolve_single(query).await.map(Resolution::Single),
        }
    }

    pub async fn resolve_single(&self, query: &str) -> Result<QueueEntity, ResolutionError> {
        let query = self.check_query(query)?;
        let locator = match classify(query) {
            QueryKind::DirectLink => query.to_string(),
            QueryKind::PlaylistLink => {
                return Err(ResolutionError::MalformedInput(
                    "playlist links resolve to several items".to_string(),
                ))
            }
            QueryKind::Search => {
                let candidates = self.search.search(query).await?;
                candidates
                    .into_iter()
                    .next()
                    .ok_or_else(|| ResolutionError::NoResults(query.to_string()))?
            }
        };

        let meta = self.resolver.resolve_one(&locator).await?;
        debug!(resolver = self.resolver.name(), title = %meta.title, "resolved");
        Ok(entity_from(meta))
    }

    pub async fn resolve_batch(
        &self,
        playlist_query: &str,
        max_count: i64,
        max_item_length: i64,
    ) -> Result<BatchResolution, ResolutionError> {
        let query = self.check_query(playlist_query)?;
        let mut entries = self.resolver.resolve_playlist(query).await?;
        let mut items = Vec::new();
        let mut skipped = 0usize;

        while let Some(entry) = entries.next().await {
            match admit(entry, max_item_length) {
                Ok(item) => items.push(item),
                Err(err) => {
                    debug!(error = %err, "playlist entry skipped");
                    skipped += 1;
                }
            }
            if max_count > 0 && items.len() as i64 >= max_count {
                break;
            }
        }

        info!(accepted = items.len(), skipped, "playlist resolved");
        Ok(BatchResolution { items, skipped })
    }

    fn check_query<'q>(&self, query: &'q str) -> Result<&'q str, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::MalformedInput("empty query".to_string()));
        }
        if query.chars().count() > self.max_query_len {
            return Err(ResolutionError::MalformedInput(format!(
                "query longer than {} characters",
                self.max_query_len
            )));
        }
        Ok(query)
    }
}

fn admit(
    entry: Result<MediaMetadata, ResolveError>,
    max_item_length: i64,
) -> Result<QueueEntity, ResolutionError> {
    let meta = entry?;
    if max_item_length > 0 && meta.length_seconds > max_item_length as u64 {
        return Err(ResolutionError::ItemExcluded(format!(
            "{} is {}s long",
            meta.title, meta.length_seconds
        )));
    }
    Ok(entity_from(meta))
}

fn entity_from(meta: MediaMetadata) -> QueueEntity {
    let mut item = QueueEntity::new(meta.stream_locator, meta.title).with_length(meta.length_seconds);
    item.artwork_url = meta.artwork_url;
    item.canonical_url = meta.canonical_url;
    item
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub requester: ParticipantId,
    pub channel: ChannelId,
    pub query: String,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub request: FetchRequest,
    pub result: Result<Resolution, ResolutionError>,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("too many resolutions in flight (limit {0})")]
    Saturated(usize),
}

pub struct FetchDispatcher {
    pipeline: FetchPipeline,
    limits: BatchLimits,
    permits: Arc<Semaphore>,
    capacity: usize,
    outcomes: mpsc::Sender<FetchOutcome>,
}

impl FetchDispatcher {
    pub fn new(
        pipeline: FetchPipeline,
        limits: BatchLimits,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<FetchOutcome>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity * 4);
        (
            Self {
                pipeline,
                limits,
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                outcomes: tx,
            },
            rx,
        )
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn dispatch(&self, request: FetchRequest) -> Result<(), DispatchError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| DispatchError::Saturated(self.capacity))?;
        let pipeline = self.pipeline.clone();
        let limits = self.limits;
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let result = pipeline
                .resolve(&request.query, limits)
                .await
                .map(|resolution| attach_origin(resolution, &request));
            drop(permit);
            if let Err(err) = &result {
                warn!(query = %request.query, error = %err, "resolution failed");
            }
            if outcomes.send(FetchOutcome { request, result }).await.is_err() {
                debug!("session gone; discarding resolution");
            }
        });
        Ok(())
    }
}

fn attach_origin(resolution: Resolution, request: &FetchRequest) -> Resolution {
    let tag = |item: QueueEntity| item.requested_by(request.requester.clone(), request.channel.clone());
    match resolution {
        Resolution::Single(item) => Resolution::Single(tag(item)),
        Resolution::Batch(batch) => Resolution::Batch(BatchResolution {
            items: batch.items.into_iter().map(tag).collect(),
            skipped: batch.skipped,
        }),
    }
}
