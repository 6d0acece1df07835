use crate::{PlaybackSink, SinkError, StartedStream, StreamEnd, StreamHandle};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jukebox_core::QueueEntity;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// `ffplay` has no runtime volume control, so a volume change on a running
/// stream only takes effect from the next stream on.
pub struct FfplaySink {
    program: String,
    next_id: u64,
    running: HashMap<StreamHandle, oneshot::Sender<()>>,
}

impl FfplaySink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            next_id: 0,
            running: HashMap::new(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn probe(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("{} -version exited with {}", self.program, status));
        }
        Ok(())
    }

    fn spawn_player(&self, locator: &str, volume: f32) -> Result<tokio::process::Child> {
        Command::new(&self.program)
            .args(["-nodisp", "-autoexit", "-loglevel", "error", "-volume"])
            .arg(volume_percent(volume).to_string())
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))
    }
}

#[async_trait]
impl PlaybackSink for FfplaySink {
    fn name(&self) -> &'static str {
        "ffplay"
    }

    async fn start_stream(&mut self, item: &QueueEntity, volume: f32) -> Result<StartedStream, SinkError> {
        let mut child = self
            .spawn_player(&item.source_locator, volume)
            .map_err(|err| SinkError::Unavailable(format!("{err:#}")))?;

        self.next_id += 1;
        let handle = StreamHandle(self.next_id);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (ended_tx, ended_rx) = oneshot::channel();
        self.running.insert(handle, kill_tx);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let end = match status {
                        Ok(s) if s.success() => StreamEnd::Finished,
                        Ok(s) => StreamEnd::Failed(format!("player exited with {s}")),
                        Err(err) => StreamEnd::Failed(err.to_string()),
                    };
                    debug!(?handle, ?end, "player process ended");
                    let _ = ended_tx.send(end);
                }
                _ = kill_rx => {
                    if let Err(err) = child.kill().await {
                        warn!(?handle, error=%err, "failed to kill player process");
                    }
                }
            }
        });

        info!(?handle, "player process started");
        Ok(StartedStream {
            handle,
            ended: ended_rx,
        })
    }

    async fn stop(&mut self, handle: StreamHandle) -> Result<(), SinkError> {
        let kill = self
            .running
            .remove(&handle)
            .ok_or(SinkError::UnknownHandle(handle))?;
        // The process may already have exited; a closed receiver is fine.
        let _ = kill.send(());
        Ok(())
    }

    async fn set_volume(&mut self, handle: StreamHandle, volume: f32) -> Result<(), SinkError> {
        if !self.running.contains_key(&handle) {
            return Err(SinkError::UnknownHandle(handle));
        }
        debug!(?handle, volume, "volume applies from the next stream");
        Ok(())
    }
}

fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}
