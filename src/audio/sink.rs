//! Playback sinks for finished WAV clips.
//!
//! The chat core only produces WAV bytes; where they go is decided here.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{Duration, timeout};

use crate::config::{SinkKind, SpeechConfig};

/// Media type of every clip handed to a sink.
pub const MEDIA_TYPE: &str = "audio/wav";

/// One synthesized reply, ready to play.
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Id of the chat message this clip voices.
    pub id: String,
    pub wav: Vec<u8>,
}

#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, clip: &AudioClip) -> Result<()>;
}

pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        log::debug!("Discarding clip {} ({} bytes)", clip.id, clip.wav.len());
        Ok(())
    }
}

/// Writes each clip to `<dir>/<id>.wav`.
pub struct WavFileSink {
    dir: PathBuf,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl AudioSink for WavFileSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.dir.join(format!("{}.wav", clip.id));
        tokio::fs::write(&path, &clip.wav)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::info!("Saved reply audio to {}", path.display());
        Ok(())
    }
}

/// Pipes each clip into an external player's stdin (e.g. `aplay -q -`).
pub struct CommandSink {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandSink {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    async fn play(&self, clip: &AudioClip) -> Result<()> {
        log::info!("Playing clip {} via {}", clip.id, self.program);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program))?;

        // 写入放到独立任务，播放器不读 stdin 时超时仍然生效
        let writer = child.stdin.take().map(|mut stdin| {
            let wav = clip.wav.clone();
            let program = self.program.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&wav).await {
                    log::warn!("Player {} closed stdin early: {}", program, e);
                }
            })
        });

        // wait_with_output drains stderr while waiting; on timeout the child is
        // dropped and kill_on_drop stops it
        let waited = timeout(self.timeout, child.wait_with_output()).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let output = match waited {
            Ok(result) => result.with_context(|| format!("Failed to wait for {}", self.program))?,
            Err(_) => anyhow::bail!(
                "Player {} timed out after {} ms",
                self.program,
                self.timeout.as_millis()
            ),
        };

        if !output.status.success() {
            let err_str = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Player {} failed: {}", self.program, err_str.trim());
        }
        Ok(())
    }
}

/// Factory function: pick a sink from the speech configuration.
///
/// Built even when speech starts disabled so it can be switched on at runtime.
pub fn sink_from_config(config: &SpeechConfig) -> Box<dyn AudioSink> {
    match &config.sink {
        SinkKind::Null => Box::new(NullSink),
        SinkKind::File { dir } => Box::new(WavFileSink::new(dir)),
        SinkKind::Command { program, args } => Box::new(CommandSink::new(
            program.clone(),
            args.clone(),
            Duration::from_millis(config.player_timeout_ms),
        )),
    }
}
