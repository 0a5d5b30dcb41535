// Narrator Core Library
// Framed stdio text-to-speech worker runtime

pub mod audio;
pub mod cache;
pub mod client;
pub mod dispatch;
pub mod model;
pub mod protocol;
pub mod worker;

// Export core types
pub use cache::ModelCache;
pub use client::{AudioData, ClientError, WorkerClient, WorkerProcess};
pub use dispatch::{DispatchConfig, DispatchError, Dispatcher};
pub use model::{ModelError, ModelLoader, SpeechModel, Synthesis};
pub use protocol::{
    FrameError, FrameReader, FrameWriter, Request, Response, SynthesisResponse,
    DEFAULT_MAX_FRAME_LEN,
};
pub use worker::{ProtocolErrorPolicy, Worker, WorkerConfig, WorkerExit, WorkerState, WorkerStats};

/// Sample rate of every audio payload the worker emits.
pub const SAMPLE_RATE: u32 = 24_000;

/// Container format of every audio payload the worker emits.
pub const AUDIO_FORMAT: &str = "wav";

/// Voice used when a request does not name one.
pub const DEFAULT_VOICE: &str = "af_bella";

/// Line logged on stderr once the worker accepts frames.
pub const READY_MARKER: &str = "Worker ready for requests";

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NarratorError {
    #[error("Readiness check failed: {0}")]
    NotReady(#[source] ModelError),
}
pub type Result<T> = std::result::Result<T, NarratorError>;
