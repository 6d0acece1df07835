use crate::player::{Player, PlayerSnapshot, ValidationError};
use jukebox_core::QueueEntity;
use jukebox_providers::PlaybackSink;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("player is no longer running")]
pub struct PlayerClosed;

enum PlayerCommand {
    Enqueue(Vec<QueueEntity>, oneshot::Sender<u64>),
    Advance(oneshot::Sender<()>),
    Clear(oneshot::Sender<usize>),
    Shuffle(oneshot::Sender<()>),
    SetVolume(f32, oneshot::Sender<Result<(), ValidationError>>),
    Snapshot(oneshot::Sender<PlayerSnapshot>),
    AttachSink(Box<dyn PlaybackSink>, oneshot::Sender<()>),
    DetachSink(oneshot::Sender<()>),
}

pub struct PlayerService {
    player: Player,
    commands: mpsc::Receiver<PlayerCommand>,
}

impl PlayerService {
    pub fn spawn(player: Player) -> PlayerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let service = Self {
            player,
            commands: rx,
        };
        tokio::spawn(service.run());
        PlayerHandle { tx }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.apply(cmd).await,
                    None => break,
                },
                (handle, end) = self.player.next_stream_end() => {
                    self.player.on_stream_end(handle, end).await;
                }
            }
        }
        self.player.detach_sink().await;
        info!("player service stopped");
    }

    async fn apply(&mut self, cmd: PlayerCommand) {
        let player = &mut self.player;
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            PlayerCommand::Enqueue(items, reply) => {
                let mut first_wait = None;
                for item in items {
                    let wait = player.enqueue(item).await;
                    first_wait.get_or_insert(wait);
                }
                let _ = reply.send(first_wait.unwrap_or(0));
            }
            PlayerCommand::Advance(reply) => {
                player.advance().await;
                let _ = reply.send(());
            }
            PlayerCommand::Clear(reply) => {
                let _ = reply.send(player.clear_queue());
            }
            PlayerCommand::Shuffle(reply) => {
                player.shuffle_queue();
                let _ = reply.send(());
            }
            PlayerCommand::SetVolume(volume, reply) => {
                let _ = reply.send(player.set_volume(volume).await);
            }
            PlayerCommand::Snapshot(reply) => {
                let _ = reply.send(player.snapshot_at(Instant::now()));
            }
            PlayerCommand::AttachSink(sink, reply) => {
                player.attach_sink(sink).await;
                let _ = reply.send(());
            }
            PlayerCommand::DetachSink(reply) => {
                player.detach_sink().await;
                let _ = reply.send(());
            }
        }
    }
}

#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<PlayerCommand>,
}

impl PlayerHandle {
    pub async fn enqueue(&self, item: QueueEntity) -> Result<u64, PlayerClosed> {
        self.enqueue_many(vec![item]).await
    }

    pub async fn enqueue_many(&self, items: Vec<QueueEntity>) -> Result<u64, PlayerClosed> {
        self.request(|reply| PlayerCommand::Enqueue(items, reply)).await
    }

    pub async fn advance(&self) -> Result<(), PlayerClosed> {
        self.request(PlayerCommand::Advance).await
    }

    pub async fn clear_queue(&self) -> Result<usize, PlayerClosed> {
        self.request(PlayerCommand::Clear).await
    }

    pub async fn shuffle_queue(&self) -> Result<(), PlayerClosed> {
        self.request(PlayerCommand::Shuffle).await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<Result<(), ValidationError>, PlayerClosed> {
        self.request(|reply| PlayerCommand::SetVolume(volume, reply)).await
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot, PlayerClosed> {
        self.request(PlayerCommand::Snapshot).await
    }

    pub async fn is_playing(&self) -> Result<bool, PlayerClosed> {
        Ok(self.snapshot().await?.current.is_some())
    }

    pub async fn current(&self) -> Result<Option<QueueEntity>, PlayerClosed> {
        Ok(self.snapshot().await?.current.map(|now| now.item))
    }

    pub async fn estimate_wait_seconds(&self) -> Result<u64, PlayerClosed> {
        Ok(self.snapshot().await?.wait_seconds)
    }

    pub async fn attach_sink(&self, sink: Box<dyn PlaybackSink>) -> Result<(), PlayerClosed> {
        self.request(|reply| PlayerCommand::AttachSink(sink, reply)).await
    }

    pub async fn detach_sink(&self) -> Result<(), PlayerClosed> {
        self.request(PlayerCommand::DetachSink).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand,
    ) -> Result<T, PlayerClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| {
            debug!("player command after shutdown");
            PlayerClosed
        })?;
        rx.await.map_err(|_| PlayerClosed)
    }
}
