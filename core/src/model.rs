// Speech model interface
//
// The dispatcher only sees these two traits. Concrete engines live in
// narrator-audio; tests plug in stubs or mocks.

use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Speech engine unavailable: {0}")]
    Unavailable(String),

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Voice not found: {0}")]
    VoiceNotFound(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mono PCM produced by one synthesis call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Synthesis {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Synthesis {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A loaded speech model.
///
/// `generate` blocks and returns exactly one finished result. Engines that
/// produce audio incrementally must collect it before returning.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechModel: Send + Sync {
    /// A static identifier for the implementation
    fn name(&self) -> &'static str;

    fn generate(&self, text: &str, voice: &str, speed: f32) -> Result<Synthesis, ModelError>;
}

/// Knows how to check for and construct a `SpeechModel`.
#[cfg_attr(test, mockall::automock)]
pub trait ModelLoader: Send + Sync {
    /// Cheap availability check used at startup. Must not load the model.
    fn probe(&self) -> Result<(), ModelError>;

    /// Expensive construction, invoked at most once per successful load.
    fn load(&self) -> Result<Arc<dyn SpeechModel>, ModelError>;
}
