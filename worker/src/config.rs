use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use narrator_audio::{EngineConfig, EnginePreference};
use narrator_core::{DispatchConfig, ProtocolErrorPolicy, WorkerConfig, DEFAULT_MAX_FRAME_LEN};

/// Everything the worker binary needs to start
#[derive(Clone, Debug)]
pub struct NarratorConfig {
    pub engine: EngineConfig,
    pub dispatch: DispatchConfig,
    pub worker: WorkerConfig,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        // Engine defaults already consider PIPER_*, ESPEAK_BIN and TTS_TEMP_DIR
        let engine = EngineConfig::default();

        let mut dispatch = DispatchConfig::default();
        if let Some(v) = std::env::var("NARRATOR_DEFAULT_VOICE")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            dispatch.default_voice = v;
        }

        let mut worker = WorkerConfig::default();
        if let Some(v) = std::env::var("NARRATOR_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
        {
            // Config can only lower the frame cap
            worker.max_frame_len = v.min(DEFAULT_MAX_FRAME_LEN);
        }
        if let Ok(v) = std::env::var("NARRATOR_ON_PROTOCOL_ERROR") {
            match v.parse::<ProtocolErrorPolicy>() {
                Ok(policy) => worker.on_protocol_error = policy,
                Err(e) => tracing::warn!(
                    target: "narrator_worker",
                    error = %e,
                    "Ignoring NARRATOR_ON_PROTOCOL_ERROR"
                ),
            }
        }

        Self {
            engine,
            dispatch,
            worker,
        }
    }
}

impl NarratorConfig {
    /// Load configuration from a TOML file (path via NARRATOR_CONFIG or ./narrator.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("NARRATOR_CONFIG").unwrap_or_else(|_| "narrator.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(
                target: "narrator_worker",
                path = %path,
                "No TOML config found; using defaults/env"
            );
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::overlay_toml(&s, default.clone()) {
                Ok(cfg) => {
                    tracing::info!(target: "narrator_worker", path = %path, "Loaded TOML config");
                    cfg
                }
                Err(e) => {
                    tracing::warn!(
                        target: "narrator_worker",
                        error = %e,
                        "Failed to parse TOML; using defaults"
                    );
                    default
                }
            },
            Err(e) => {
                tracing::warn!(
                    target: "narrator_worker",
                    error = %e,
                    "Failed to read TOML; using defaults"
                );
                default
            }
        }
    }

    pub fn overlay_toml(source: &str, base: Self) -> Result<Self, toml::de::Error> {
        let t: NarratorToml = toml::from_str(source)?;
        Ok(t.overlay(base))
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct NarratorToml {
    pub default_voice: Option<String>,
    pub default_speed: Option<f32>,
    pub max_frame_bytes: Option<usize>,
    pub on_protocol_error: Option<ProtocolErrorPolicy>,
    pub engine: Option<EngineToml>,
}

impl NarratorToml {
    fn overlay(self, mut base: NarratorConfig) -> NarratorConfig {
        if let Some(v) = self.default_voice.filter(|v| !v.trim().is_empty()) {
            base.dispatch.default_voice = v;
        }
        if let Some(v) = self.default_speed.filter(|v| v.is_finite() && *v > 0.0) {
            base.dispatch.default_speed =
                v.clamp(base.dispatch.min_speed, base.dispatch.max_speed);
        }
        if let Some(v) = self.max_frame_bytes.filter(|v| *v > 0) {
            base.worker.max_frame_len = v.min(DEFAULT_MAX_FRAME_LEN);
        }
        if let Some(v) = self.on_protocol_error {
            base.worker.on_protocol_error = v;
        }
        if let Some(e) = self.engine {
            e.apply(&mut base.engine);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineToml {
    pub kind: Option<EnginePreference>,
    pub piper_bin: Option<PathBuf>,
    pub piper_voice: Option<PathBuf>,
    pub piper_voice_dir: Option<PathBuf>,
    pub espeak_bin: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub warmup_text: Option<String>,
    pub voices: Option<HashMap<String, String>>,
}

impl EngineToml {
    fn apply(self, e: &mut EngineConfig) {
        if let Some(v) = self.kind {
            e.preference = v;
        }
        if let Some(v) = self.piper_bin {
            e.piper_bin = Some(v);
        }
        if let Some(v) = self.piper_voice {
            e.piper_voice = Some(v);
        }
        if let Some(v) = self.piper_voice_dir {
            e.piper_voice_dir = Some(v);
        }
        if let Some(v) = self.espeak_bin {
            e.espeak_bin = Some(v);
        }
        if let Some(v) = self.temp_dir {
            e.temp_dir = v;
        }
        if let Some(v) = self.warmup_text {
            e.warmup_text = v;
        }
        if let Some(v) = self.voices {
            // Extends the built-in aliases rather than replacing them
            e.voices.extend(v);
        }
    }
}
