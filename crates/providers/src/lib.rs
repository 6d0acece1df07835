use async_trait::async_trait;
use futures_util::stream::BoxStream;
use jukebox_core::{BackendConfig, QueueEntity};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

pub mod ffplay;
pub mod ytdlp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMetadata {
    pub stream_locator: String,
    pub title: String,
    pub length_seconds: u64,
    pub artwork_url: Option<String>,
    pub canonical_url: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid value: {0}")]
    Value(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

pub type MetadataStream = BoxStream<'static, Result<MediaMetadata, ResolveError>>;

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve_one(&self, locator: &str) -> Result<MediaMetadata, ResolveError>;
    async fn resolve_playlist(&self, locator: &str) -> Result<MetadataStream, ResolveError>;
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, term: &str) -> Result<Vec<String>, ResolveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    Finished,
    Failed(String),
}

/// A running stream plus its completion signal, which fires at most once.
#[derive(Debug)]
pub struct StartedStream {
    pub handle: StreamHandle,
    pub ended: oneshot::Receiver<StreamEnd>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("stream unavailable: {0}")]
    Unavailable(String),
    #[error("unknown stream handle {0:?}")]
    UnknownHandle(StreamHandle),
}

#[async_trait]
pub trait PlaybackSink: Send {
    fn name(&self) -> &'static str;
    async fn start_stream(&mut self, item: &QueueEntity, volume: f32) -> Result<StartedStream, SinkError>;
    async fn stop(&mut self, handle: StreamHandle) -> Result<(), SinkError>;
    async fn set_volume(&mut self, handle: StreamHandle, volume: f32) -> Result<(), SinkError>;
}

pub fn build_sink(cfg: &BackendConfig) -> Box<dyn PlaybackSink> {
    if cfg.player_program.trim().is_empty() {
        return Box::new(NullSink::default());
    }
    Box::new(ffplay::FfplaySink::new(cfg.player_program.clone()))
}

pub fn build_resolver(cfg: &BackendConfig) -> ytdlp::YtDlp {
    ytdlp::YtDlp::new(cfg.resolver_program.clone())
}

/// Plays nothing. A stream ends once the item's length has passed; items
/// of unknown length (0) run until stopped.
#[derive(Default)]
pub struct NullSink {
    next_id: u64,
    active: HashMap<StreamHandle, oneshot::Sender<()>>,
}

#[async_trait]
impl PlaybackSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn start_stream(&mut self, item: &QueueEntity, _volume: f32) -> Result<StartedStream, SinkError> {
        self.next_id += 1;
        let handle = StreamHandle(self.next_id);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (ended_tx, ended_rx) = oneshot::channel();
        self.active.insert(handle, stop_tx);

        let length = item.length_seconds;
        tokio::spawn(async move {
            let finished = async {
                if length == 0 {
                    std::future::pending::<()>().await;
                }
                tokio::time::sleep(Duration::from_secs(length)).await;
            };
            tokio::select! {
                _ = finished => {
                    let _ = ended_tx.send(StreamEnd::Finished);
                }
                _ = stop_rx => {}
            }
        });

        debug!(?handle, locator = %item.source_locator, length, "null sink accepted stream");
        Ok(StartedStream {
            handle,
            ended: ended_rx,
        })
    }

    async fn stop(&mut self, handle: StreamHandle) -> Result<(), SinkError> {
        let stop = self
            .active
            .remove(&handle)
            .ok_or(SinkError::UnknownHandle(handle))?;
        let _ = stop.send(());
        Ok(())
    }

    async fn set_volume(&mut self, handle: StreamHandle, _volume: f32) -> Result<(), SinkError> {
        if self.active.contains_key(&handle) {
            Ok(())
        } else {
            Err(SinkError::UnknownHandle(handle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{build_sink, NullSink, PlaybackSink, SinkError, StreamEnd};
    use jukebox_core::{BackendConfig, QueueEntity};

    fn item(name: &str, length: u64) -> QueueEntity {
        QueueEntity::new(name, name).with_length(length)
    }

    #[tokio::test]
    async fn null_sink_tracks_handles() {
        let mut sink = NullSink::default();
        let first = sink.start_stream(&item("a", 0), 0.5).await.unwrap();
        let second = sink.start_stream(&item("b", 0), 0.5).await.unwrap();
        assert_ne!(first.handle, second.handle);

        sink.stop(first.handle).await.unwrap();
        assert_eq!(
            sink.set_volume(first.handle, 0.3).await,
            Err(SinkError::UnknownHandle(first.handle))
        );
        assert!(sink.set_volume(second.handle, 0.3).await.is_ok());
    }

    #[tokio::test]
    async fn stopping_closes_the_end_signal() {
        let mut sink = NullSink::default();
        let started = sink.start_stream(&item("a", 600), 0.5).await.unwrap();
        sink.stop(started.handle).await.unwrap();
        assert!(started.ended.await.is_err());
    }

    #[tokio::test]
    async fn stream_finishes_after_item_length() {
        let mut sink = NullSink::default();
        let started = sink.start_stream(&item("short", 1), 0.5).await.unwrap();
        let end = tokio::time::timeout(std::time::Duration::from_secs(5), started.ended)
            .await
            .expect("stream should end on its own")
            .unwrap();
        assert_eq!(end, StreamEnd::Finished);
    }

    #[test]
    fn empty_player_program_selects_null_sink() {
        let cfg = BackendConfig {
            resolver_program: "yt-dlp".to_string(),
            player_program: " ".to_string(),
        };
        assert_eq!(build_sink(&cfg).name(), "null");
    }
}
