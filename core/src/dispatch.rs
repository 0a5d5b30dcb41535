//! Request dispatcher
//!
//! Turns one decoded `Request` into one `Response`:
//! 1. validate `text` and `speed`, fill in the default voice and speed
//! 2. fetch the model from the `ModelCache` (loading it on first use)
//! 3. run a single blocking `generate` call with standard output redirected
//! 4. resample to 24 kHz, encode WAV, base64 the container
//!
//! Every failure becomes `{ "error": ... }`; nothing escapes to the loop.

use std::time::Instant;

use thiserror::Error;
use tokio::task;
use tracing::{debug, info, warn};

use crate::audio::{encode_base64, encode_wav, resample_linear, StdoutRedirect};
use crate::cache::ModelCache;
use crate::model::{ModelError, Synthesis};
use crate::protocol::{Request, Response, SynthesisResponse};
use crate::{AUDIO_FORMAT, DEFAULT_VOICE, SAMPLE_RATE};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("empty_text")]
    EmptyText,

    #[error("invalid_speed")]
    InvalidSpeed,

    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Synthesis task failed: {0}")]
    Task(String),

    #[error("Failed to redirect standard output: {0}")]
    Redirect(#[source] std::io::Error),
}

impl DispatchError {
    /// Validation failures are the caller's fault and never touch the model.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DispatchError::EmptyText
                | DispatchError::InvalidSpeed
                | DispatchError::InvalidRequest(_)
        )
    }
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub default_voice: String,
    pub default_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Point standard output at standard error while the model runs
    pub redirect_stdout: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_voice: DEFAULT_VOICE.to_string(),
            default_speed: 1.0,
            min_speed: 0.5,
            max_speed: 2.0,
            redirect_stdout: true,
        }
    }
}

/// A request that passed validation, with defaults applied
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisJob {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

pub struct Dispatcher {
    cache: ModelCache,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(cache: ModelCache, config: DispatchConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Handle one request. Always produces exactly one response.
    pub async fn handle(&self, request: Request) -> Response {
        match self.synthesize(request).await {
            Ok(response) => Response::Success(response),
            Err(e) if e.is_validation() => {
                debug!(target: "dispatch", error = %e, "Rejected request");
                Response::failure(e.to_string())
            }
            Err(e) => {
                warn!(target: "dispatch", error = %e, "Error generating audio");
                Response::failure(e.to_string())
            }
        }
    }

    /// Apply defaults and reject requests that cannot be synthesized.
    ///
    /// Deliberately narrower than "any non-empty string, any speed":
    /// whitespace-only text counts as empty, and a finite positive speed is
    /// clamped to `[min_speed, max_speed]` instead of reaching the engine as is.
    pub fn validate(&self, request: Request) -> Result<SynthesisJob, DispatchError> {
        let text = match request.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(DispatchError::EmptyText),
        };

        let voice = request
            .voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.config.default_voice.clone());

        let speed = match request.speed {
            Some(s) if !s.is_finite() || s <= 0.0 => return Err(DispatchError::InvalidSpeed),
            Some(s) => s.clamp(self.config.min_speed, self.config.max_speed),
            None => self.config.default_speed,
        };

        Ok(SynthesisJob { text, voice, speed })
    }

    pub async fn synthesize(&self, request: Request) -> Result<SynthesisResponse, DispatchError> {
        let job = self.validate(request)?;
        let started = Instant::now();
        info!(
            target: "dispatch",
            text = %preview(&job.text),
            voice = %job.voice,
            speed = job.speed,
            "Generating"
        );

        let model = self.cache.get_or_init().await?;
        let redirect = self.config.redirect_stdout;

        let t_gen = Instant::now();
        let synthesis = task::spawn_blocking(move || -> Result<Synthesis, DispatchError> {
            let _redirect = if redirect {
                Some(StdoutRedirect::to_stderr().map_err(DispatchError::Redirect)?)
            } else {
                None
            };
            Ok(model.generate(&job.text, &job.voice, job.speed)?)
        })
        .await
        .map_err(|e| DispatchError::Task(e.to_string()))??;
        let gen_ms = t_gen.elapsed().as_millis() as u64;

        let response = package(synthesis)?;
        info!(
            target: "dispatch",
            duration = response.duration,
            audio_b64_len = response.audio_base64.len(),
            generation_ms = gen_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "Generated audio"
        );
        Ok(response)
    }
}

/// Normalize to the output rate and wrap the samples in a base64 WAV.
fn package(synthesis: Synthesis) -> Result<SynthesisResponse, DispatchError> {
    if synthesis.sample_rate == 0 {
        return Err(ModelError::Audio("engine reported a sample rate of 0".into()).into());
    }
    let samples = resample_linear(&synthesis.samples, synthesis.sample_rate, SAMPLE_RATE);
    let wav = encode_wav(&samples, SAMPLE_RATE)?;

    Ok(SynthesisResponse {
        audio_base64: encode_base64(&wav),
        duration: samples.len() as f64 / SAMPLE_RATE as f64,
        sample_rate: SAMPLE_RATE,
        format: AUDIO_FORMAT.to_string(),
    })
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(50).collect();
    if text.chars().nth(50).is_some() {
        out.push_str("...");
    }
    out
}
