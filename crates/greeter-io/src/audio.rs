//! Audio playback through external player and speech commands.

use greeter_core::ContentPools;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio command is empty")]
    EmptyCommand,
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("audio clip not found: {0}")]
    MissingClip(PathBuf),
    #[error("player exited with {0}")]
    PlayerFailed(ExitStatus),
    #[error("waiting for player failed: {0}")]
    Wait(std::io::Error),
    #[error("playback abandoned")]
    Abandoned,
}

/// Completion signal for one clip.
#[derive(Debug)]
pub struct Playback {
    done: oneshot::Receiver<Result<(), AudioError>>,
}

impl Playback {
    /// Resolves when the player exits.
    pub async fn finished(self) -> Result<(), AudioError> {
        self.done.await.unwrap_or(Err(AudioError::Abandoned))
    }
}

/// Audio collaborator as seen by the engine.
pub trait AudioOutput: Send {
    /// Rebuild the text-key → clip map from the content pools.
    fn load_clips(&mut self, pools: &ContentPools);

    /// Best-effort playback for a line without its own clip. Returns `false`
    /// when nothing could be played and the line stays silent.
    fn play_by_key(&mut self, text: &str) -> bool;

    /// Play a named clip from the assets directory.
    fn play_clip(&mut self, clip: &str) -> Result<Playback, AudioError>;
}

/// Lower-cased text with whitespace runs collapsed to `_`.
pub fn audio_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

fn split_command(command: &str) -> Result<Vec<String>, AudioError> {
    let parts: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        return Err(AudioError::EmptyCommand);
    }
    Ok(parts)
}

/// Plays clips with a player command line (e.g. `mpg123 -q`) and optionally
/// speaks unmatched lines with a TTS command (text passed as last argument).
pub struct CommandAudio {
    player: Vec<String>,
    tts: Option<Vec<String>>,
    assets_dir: PathBuf,
    clips: BTreeMap<String, String>,
    rng: StdRng,
}

impl CommandAudio {
    pub fn new(player: &str, tts: Option<&str>, assets_dir: &Path) -> Result<Self, AudioError> {
        Ok(Self {
            player: split_command(player)?,
            tts: tts.map(split_command).transpose()?,
            assets_dir: assets_dir.to_path_buf(),
            clips: BTreeMap::new(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Number of keyed clips currently known.
    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    fn speak(&self, text: &str) -> bool {
        let Some(tts) = &self.tts else {
            return false;
        };
        let spawned = Command::new(&tts[0])
            .args(&tts[1..])
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) if !status.success() => {
                            tracing::warn!(%status, "tts command failed")
                        }
                        Err(e) => tracing::warn!(error = %e, "waiting for tts failed"),
                        Ok(_) => {}
                    }
                });
                true
            }
            Err(e) => {
                tracing::warn!(command = %tts[0], error = %e, "failed to spawn tts");
                false
            }
        }
    }
}

impl AudioOutput for CommandAudio {
    fn load_clips(&mut self, pools: &ContentPools) {
        self.clips = pools
            .all()
            .iter()
            .filter_map(|c| c.audio.as_ref().map(|clip| (audio_key(&c.text), clip.clone())))
            .collect();
        tracing::debug!(clips = self.clips.len(), "audio clip map rebuilt");
    }

    fn play_by_key(&mut self, text: &str) -> bool {
        let key = audio_key(text);
        if let Some(clip) = self.clips.get(&key).cloned() {
            match self.play_clip(&clip) {
                Ok(_) => return true,
                Err(e) => tracing::warn!(key, error = %e, "keyed clip failed"),
            }
        }

        if self.speak(text) {
            return true;
        }

        let random = self.clips.values().choose(&mut self.rng).cloned();
        if let Some(clip) = random {
            tracing::debug!(clip, "no clip or speech for line; playing a random clip");
            return self.play_clip(&clip).is_ok();
        }
        false
    }

    fn play_clip(&mut self, clip: &str) -> Result<Playback, AudioError> {
        let path = self.assets_dir.join(clip);
        if !path.is_file() {
            return Err(AudioError::MissingClip(path));
        }

        let mut child = Command::new(&self.player[0])
            .args(&self.player[1..])
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| AudioError::Spawn {
                command: self.player[0].clone(),
                source,
            })?;

        tracing::debug!(clip = %path.display(), "playing clip");
        let (tx, done) = oneshot::channel();
        tokio::spawn(async move {
            let result = match child.wait().await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(AudioError::PlayerFailed(status)),
                Err(e) => Err(AudioError::Wait(e)),
            };
            let _ = tx.send(result);
        });
        Ok(Playback { done })
    }
}
