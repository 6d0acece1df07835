use jukebox_core::QueueEntity;
use jukebox_providers::{PlaybackSink, SinkError, StreamEnd, StreamHandle};
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum ValidationError {
    #[error("volume {0} is out of range (0, 1]")]
    VolumeOutOfRange(f32),
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    CurrentChanged(Option<QueueEntity>),
    StartFailed { item: QueueEntity, error: SinkError },
    StreamFailed { item: QueueEntity, reason: String },
}

pub type ChangeListener = Box<dyn FnMut(PlayerEvent) + Send>;

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub item: QueueEntity,
    pub elapsed: u64,
    /// Unique per started stream, so a replay of the same item differs.
    pub play_id: u64,
}

#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub current: Option<NowPlaying>,
    pub queued: Vec<QueueEntity>,
    pub volume: f32,
    pub wait_seconds: u64,
    pub can_play: bool,
}

struct Playing {
    item: QueueEntity,
    play_id: u64,
    handle: StreamHandle,
    ended: Option<oneshot::Receiver<StreamEnd>>,
}

pub struct Player {
    queue: VecDeque<QueueEntity>,
    current: Option<Playing>,
    volume: f32,
    sink: Option<Box<dyn PlaybackSink>>,
    listener: Option<ChangeListener>,
    plays: u64,
}

impl Player {
    pub fn new(volume: f32) -> Result<Self, ValidationError> {
        validate_volume(volume)?;
        Ok(Self {
            queue: VecDeque::new(),
            current: None,
            volume,
            sink: None,
            listener: None,
            plays: 0,
        })
    }

    pub fn with_listener(mut self, listener: ChangeListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn can_play(&self) -> bool {
        self.sink.is_some()
    }

    pub fn current(&self) -> Option<&QueueEntity> {
        self.current.as_ref().map(|p| &p.item)
    }

    pub fn queued(&self) -> impl Iterator<Item = &QueueEntity> {
        self.queue.iter()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub async fn attach_sink(&mut self, sink: Box<dyn PlaybackSink>) {
        if self.sink.is_some() {
            self.detach_sink().await;
        }
        info!(sink = sink.name(), "sink attached");
        self.sink = Some(sink);
        self.ensure_playing().await;
    }

    pub async fn detach_sink(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        if let Some(mut playing) = self.current.take() {
            if let Err(err) = sink.stop(playing.handle).await {
                debug!(error=%err, "stop on detach failed");
            }
            playing.item.tracker.pause();
            self.queue.push_front(playing.item);
            self.emit(PlayerEvent::CurrentChanged(None));
        }
        info!(sink = sink.name(), "sink detached");
    }

    pub async fn ensure_playing(&mut self) {
        if !self.is_playing() && !self.queue.is_empty() && self.can_play() {
            self.advance().await;
        }
    }

    pub async fn enqueue(&mut self, item: QueueEntity) -> u64 {
        info!(title = %item.display_title, "added to queue");
        self.queue.push_back(item);
        let wait = self.estimate_wait_seconds(true);
        if !self.is_playing() && self.can_play() {
            self.advance().await;
        }
        wait
    }

    pub async fn advance(&mut self) {
        if let Some(mut finished) = self.current.take() {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(err) = sink.stop(finished.handle).await {
                    debug!(error=%err, "stopping finished stream failed");
                }
            }
            finished.item.tracker.pause();
            info!(title = %finished.item.display_title, "finished");
        }

        while let Some(mut item) = self.queue.pop_front() {
            let Some(sink) = self.sink.as_mut() else {
                self.queue.push_front(item);
                break;
            };
            let started = sink.start_stream(&item, self.volume).await;
            match started {
                Ok(started) => {
                    item.tracker.resume();
                    self.plays += 1;
                    info!(title = %item.display_title, handle = ?started.handle, "now playing");
                    self.current = Some(Playing {
                        item,
                        play_id: self.plays,
                        handle: started.handle,
                        ended: Some(started.ended),
                    });
                    break;
                }
                Err(error) => {
                    warn!(title = %item.display_title, error = %error, "playback failed to start");
                    self.emit(PlayerEvent::StartFailed { item, error });
                }
            }
        }

        let current = self.current().cloned();
        self.emit(PlayerEvent::CurrentChanged(current));
    }

    /// Waits for the active stream to end. Pending forever while idle.
    ///
    /// Cancel safe: dropping the future leaves the end signal in place.
    pub async fn next_stream_end(&mut self) -> (StreamHandle, StreamEnd) {
        let (handle, ended) = match self.current.as_mut() {
            Some(Playing {
                handle,
                ended: Some(ended),
                ..
            }) => (*handle, ended),
            _ => return std::future::pending().await,
        };
        let end = ended
            .await
            .unwrap_or_else(|_| StreamEnd::Failed("sink dropped the stream".to_string()));
        if let Some(playing) = self.current.as_mut() {
            playing.ended = None;
        }
        (handle, end)
    }

    pub async fn on_stream_end(&mut self, handle: StreamHandle, end: StreamEnd) {
        let is_current = self
            .current
            .as_ref()
            .map(|p| p.handle == handle)
            .unwrap_or(false);
        if !is_current {
            debug!(?handle, "ignoring end of a stream that is no longer current");
            return;
        }
        if let StreamEnd::Failed(reason) = end {
            warn!(?handle, %reason, "stream ended with an error");
            if let Some(item) = self.current().cloned() {
                self.emit(PlayerEvent::StreamFailed { item, reason });
            }
        }
        self.advance().await;
    }

    pub fn clear_queue(&mut self) -> usize {
        let removed = self.queue.len();
        self.queue.clear();
        if removed > 0 {
            info!(removed, "queue cleared");
        }
        removed
    }

    pub fn shuffle_queue(&mut self) {
        if self.queue.len() < 2 {
            return;
        }
        self.queue
            .make_contiguous()
            .shuffle(&mut rand::thread_rng());
        debug!(len = self.queue.len(), "queue shuffled");
    }

    pub fn estimate_wait_seconds(&self, before_new_item: bool) -> u64 {
        self.estimate_wait_seconds_at(before_new_item, Instant::now())
    }

    /// Queued lengths plus what is left of the current item. With
    /// `before_new_item` the tail is left out: it is the item being estimated for.
    pub fn estimate_wait_seconds_at(&self, before_new_item: bool, now: Instant) -> u64 {
        let counted = if before_new_item {
            self.queue.len().saturating_sub(1)
        } else {
            self.queue.len()
        };
        let queued: u64 = self
            .queue
            .iter()
            .take(counted)
            .map(|item| item.length_seconds)
            .sum();
        queued + self.current_remaining_at(now)
    }

    pub fn current_remaining_at(&self, now: Instant) -> u64 {
        self.current()
            .map(|item| item.remaining_at(now))
            .unwrap_or(0)
    }

    pub async fn set_volume(&mut self, volume: f32) -> Result<(), ValidationError> {
        validate_volume(volume)?;
        self.volume = volume;
        if let (Some(sink), Some(playing)) = (self.sink.as_mut(), self.current.as_ref()) {
            if let Err(err) = sink.set_volume(playing.handle, volume).await {
                warn!(error=%err, "sink rejected volume change");
            }
        }
        Ok(())
    }

    pub fn snapshot_at(&self, now: Instant) -> PlayerSnapshot {
        PlayerSnapshot {
            current: self.current.as_ref().map(|playing| NowPlaying {
                item: playing.item.clone(),
                elapsed: playing.item.elapsed_at(now),
                play_id: playing.play_id,
            }),
            queued: self.queue.iter().cloned().collect(),
            volume: self.volume,
            wait_seconds: self.estimate_wait_seconds_at(false, now),
            can_play: self.can_play(),
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener(event);
        }
    }
}

fn validate_volume(volume: f32) -> Result<(), ValidationError> {
    if volume > 0.0 && volume <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::VolumeOutOfRange(volume))
    }
}
