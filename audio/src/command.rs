//! `SpeechModel` backed by a command-line engine.
//!
//! Each call writes to its own temp WAV, reads it back and removes it. The
//! child's stdout and stderr are always captured: stdout of this process is
//! the frame channel.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use narrator_core::audio::decode_wav;
use narrator_core::{ModelError, SpeechModel, Synthesis};
use tracing::{debug, warn};

use crate::engine::{EngineConfig, EngineKind};
use crate::utils::gen_id;

pub struct CommandModel {
    kind: EngineKind,
    bin: PathBuf,
    config: Arc<EngineConfig>,
}

impl CommandModel {
    pub fn new(kind: EngineKind, bin: PathBuf, config: Arc<EngineConfig>) -> Self {
        Self { kind, bin, config }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Map a request voice through the alias table. Empty means the
    /// engine's default voice.
    pub fn engine_voice<'a>(&'a self, voice: &'a str) -> &'a str {
        self.config
            .voices
            .get(voice)
            .map(String::as_str)
            .unwrap_or(voice)
    }

    fn resolve_piper_voice(&self, voice: &str) -> Result<PathBuf, ModelError> {
        if voice.is_empty() {
            if let Some(v) = &self.config.piper_voice {
                return Ok(v.clone());
            }
        } else {
            let direct = PathBuf::from(voice);
            if direct.is_file() {
                return Ok(direct);
            }
            if let Some(dir) = &self.config.piper_voice_dir {
                let candidate = dir.join(voice);
                if candidate.is_file() {
                    return Ok(candidate);
                }
                let candidate = dir.join(format!("{}.onnx", voice));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        Err(ModelError::VoiceNotFound(if voice.is_empty() {
            "no default Piper voice; set PIPER_VOICE".to_string()
        } else {
            voice.to_string()
        }))
    }

    fn run_piper(
        &self,
        voice: &str,
        speed: f32,
        text: &str,
        out_wav: &Path,
    ) -> Result<(), ModelError> {
        let model_path = self.resolve_piper_voice(voice)?;
        let length_scale = (1.0f32 / speed).clamp(0.5, 2.0);

        let mut cmd = Command::new(&self.bin);
        cmd.arg("-m").arg(model_path);
        cmd.arg("-f").arg(out_wav);
        cmd.arg("--length_scale").arg(format!("{:.2}", length_scale));
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!(target: "engine", command = ?cmd, "Running piper");
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(ModelError::SynthesisFailed(format!(
                "Piper failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn run_espeak(
        &self,
        voice: &str,
        speed: f32,
        text: &str,
        out_wav: &Path,
    ) -> Result<(), ModelError> {
        let wpm = (175.0 * speed).round().clamp(80.0, 450.0) as i32;

        let mut cmd = Command::new(&self.bin);
        if !voice.is_empty() {
            cmd.arg("-v").arg(voice);
        }
        cmd.arg("-s").arg(wpm.to_string());
        cmd.arg("-w").arg(out_wav);
        // Text after `--` so a leading dash is not read as an option.
        cmd.arg("--").arg(text);
        cmd.stdin(Stdio::null());

        debug!(target: "engine", command = ?cmd, "Running espeak-ng");
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(ModelError::SynthesisFailed(format!(
                "espeak-ng failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl SpeechModel for CommandModel {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn generate(&self, text: &str, voice: &str, speed: f32) -> Result<Synthesis, ModelError> {
        let voice = self.engine_voice(voice);
        let wav = TempWav::new(&self.config.temp_dir);
        let started = Instant::now();

        match self.kind {
            EngineKind::Piper => self.run_piper(voice, speed, text, wav.path())?,
            EngineKind::EspeakNg => self.run_espeak(voice, speed, text, wav.path())?,
        }

        let bytes = fs::read(wav.path()).map_err(|e| {
            ModelError::SynthesisFailed(format!("{} produced no audio: {}", self.kind, e))
        })?;
        let (samples, sample_rate) = decode_wav(&bytes)?;

        debug!(
            target: "engine",
            engine = %self.kind,
            samples = samples.len(),
            sample_rate,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesized"
        );
        Ok(Synthesis::new(samples, sample_rate))
    }
}

/// Temp WAV path, removed on drop.
struct TempWav {
    path: PathBuf,
}

impl TempWav {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("narrator_{}.wav", gen_id())),
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWav {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                target: "engine",
                path = ?self.path,
                error = %e,
                "Failed to remove temp WAV"
            ),
        }
    }
}
