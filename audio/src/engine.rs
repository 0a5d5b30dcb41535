//! Engine detection and the `ModelLoader` for command-line speech engines.
//!
//! Two engines are supported, detected from env or PATH:
//! - Piper (preferred, needs a voice model)
//! - espeak-ng (fallback, widely available)
//!
//! Env overrides:
//! - NARRATOR_ENGINE (auto|piper|espeak-ng)
//! - PIPER_BIN, PIPER_VOICE, PIPER_VOICE_DIR
//! - ESPEAK_BIN
//! - TTS_TEMP_DIR

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use narrator_core::{ModelError, ModelLoader, SpeechModel, DEFAULT_VOICE};
use serde::Deserialize;
use tracing::{info, warn};

use crate::command::CommandModel;
use crate::utils::{get_from_env_or_path, get_from_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Piper,
    EspeakNg,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Piper => "piper",
            EngineKind::EspeakNg => "espeak-ng",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engine to use; `Auto` prefers Piper when it is fully configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnginePreference {
    #[default]
    Auto,
    Piper,
    EspeakNg,
}

impl FromStr for EnginePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "piper" => Ok(Self::Piper),
            "espeak-ng" | "espeak" => Ok(Self::EspeakNg),
            other => Err(format!("unknown engine: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub preference: EnginePreference,
    pub piper_bin: Option<PathBuf>,
    pub piper_voice: Option<PathBuf>,
    pub piper_voice_dir: Option<PathBuf>,
    pub espeak_bin: Option<PathBuf>,
    pub temp_dir: PathBuf,
    /// Synthesized once by `load` so the first real request is not the one
    /// paying for engine start-up.
    pub warmup_text: String,
    /// Request voice name -> engine voice. An empty target means the
    /// engine's default voice.
    pub voices: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let preference = std::env::var("NARRATOR_ENGINE")
            .ok()
            .and_then(|s| match s.parse::<EnginePreference>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(target: "engine", error = %e, "Ignoring NARRATOR_ENGINE");
                    None
                }
            })
            .unwrap_or_default();
        let temp_dir = std::env::var("TTS_TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());

        let piper_bin = get_from_env_or_path("PIPER_BIN", "piper");
        let piper_voice = std::env::var("PIPER_VOICE").ok().map(PathBuf::from);
        let piper_voice_dir = std::env::var("PIPER_VOICE_DIR").ok().map(PathBuf::from);
        let espeak_bin =
            get_from_env_or_path("ESPEAK_BIN", "espeak-ng").or_else(|| get_from_path("espeak"));

        let mut voices = HashMap::new();
        voices.insert(DEFAULT_VOICE.to_string(), String::new());

        Self {
            preference,
            piper_bin,
            piper_voice,
            piper_voice_dir,
            espeak_bin,
            temp_dir,
            warmup_text: "Hello.".to_string(),
            voices,
        }
    }
}

impl EngineConfig {
    /// Piper is usable when its binary and some source of voice models exist.
    fn piper_ready(&self) -> bool {
        self.piper_bin.is_some() && (self.piper_voice.is_some() || self.piper_voice_dir.is_some())
    }

    /// Pick the engine to run and its binary.
    pub fn select(&self) -> Result<(EngineKind, PathBuf), ModelError> {
        match self.preference {
            EnginePreference::Piper => {
                let bin = self
                    .piper_bin
                    .clone()
                    .ok_or_else(|| ModelError::Unavailable("Piper binary not found".into()))?;
                if !self.piper_ready() {
                    return Err(ModelError::Unavailable(
                        "Piper voice not configured; set PIPER_VOICE or PIPER_VOICE_DIR".into(),
                    ));
                }
                Ok((EngineKind::Piper, bin))
            }
            EnginePreference::EspeakNg => self
                .espeak_bin
                .clone()
                .map(|bin| (EngineKind::EspeakNg, bin))
                .ok_or_else(|| ModelError::Unavailable("espeak-ng not found".into())),
            EnginePreference::Auto => {
                if let (true, Some(bin)) = (self.piper_ready(), self.piper_bin.clone()) {
                    return Ok((EngineKind::Piper, bin));
                }
                if let Some(bin) = self.espeak_bin.clone() {
                    return Ok((EngineKind::EspeakNg, bin));
                }
                Err(ModelError::Unavailable(
                    "No TTS engine detected (Piper/espeak-ng missing)".into(),
                ))
            }
        }
    }
}

/// Builds a `CommandModel` for the selected engine.
pub struct CommandEngineLoader {
    config: Arc<EngineConfig>,
}

impl CommandEngineLoader {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl ModelLoader for CommandEngineLoader {
    fn probe(&self) -> Result<(), ModelError> {
        let (kind, bin) = self.config.select()?;
        info!(target: "engine", engine = %kind, bin = ?bin, "Detected speech engine");
        Ok(())
    }

    fn load(&self) -> Result<Arc<dyn SpeechModel>, ModelError> {
        let (kind, bin) = self.config.select()?;
        let model = CommandModel::new(kind, bin, Arc::clone(&self.config));

        if !self.config.warmup_text.trim().is_empty() {
            model
                .generate(&self.config.warmup_text, DEFAULT_VOICE, 1.0)
                .map_err(|e| ModelError::LoadFailed(format!("warm-up failed: {}", e)))?;
        }
        Ok(Arc::new(model))
    }
}
