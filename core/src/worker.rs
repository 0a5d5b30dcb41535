//! Worker loop
//!
//! Lifecycle: `Starting -> Ready -> (Serving)* -> ShuttingDown -> Terminated`.
//!
//! Exactly one request is in flight at a time: a frame is decoded, dispatched
//! and answered before the next read starts. The parent paces the worker by
//! choosing when to send the next frame.

use std::str::FromStr;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info, warn};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::protocol::{
    FrameError, FrameReader, FrameWriter, Request, Response, DEFAULT_MAX_FRAME_LEN,
};
use crate::{ModelError, NarratorError, READY_MARKER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Serving,
    ShuttingDown,
    Terminated,
}

/// What to do when a length prefix is invalid and the next frame boundary
/// is therefore unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolErrorPolicy {
    /// Stop serving; the stream can no longer be trusted.
    #[default]
    Terminate,
    /// Answer with an error and keep reading.
    Continue,
}

impl FromStr for ProtocolErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminate" => Ok(Self::Terminate),
            "continue" => Ok(Self::Continue),
            other => Err(format!("unknown protocol error policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_frame_len: usize,
    pub on_protocol_error: ProtocolErrorPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            on_protocol_error: ProtocolErrorPolicy::default(),
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Input closed; the normal shutdown signal.
    EndOfStream,
    /// An invalid length prefix was read under `ProtocolErrorPolicy::Terminate`.
    Desynchronized,
    /// Reading from or writing to the channel failed.
    ChannelError,
}

impl WorkerExit {
    pub fn exit_code(self) -> i32 {
        match self {
            WorkerExit::EndOfStream => 0,
            WorkerExit::Desynchronized => 3,
            WorkerExit::ChannelError => 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Responses written, successful or not
    pub requests_served: u64,
    /// Responses that carried an error
    pub requests_failed: u64,
    /// Frames that could not be decoded
    pub protocol_errors: u64,
}

pub struct Worker {
    dispatcher: Dispatcher,
    config: WorkerConfig,
    state: WorkerState,
    stats: WorkerStats,
}

impl Worker {
    /// `config.max_frame_len` can lower the frame cap but never raise it
    /// above `DEFAULT_MAX_FRAME_LEN`.
    pub fn new(dispatcher: Dispatcher, mut config: WorkerConfig) -> Self {
        config.max_frame_len = config.max_frame_len.min(DEFAULT_MAX_FRAME_LEN);
        Self {
            dispatcher,
            config,
            state: WorkerState::Starting,
            stats: WorkerStats::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Readiness check: `Starting -> Ready`.
    ///
    /// Only verifies that the speech engine is available; the model itself is
    /// loaded by the first request.
    pub async fn start(&mut self) -> crate::Result<()> {
        info!(target: "worker", "Worker starting");
        if let Err(e) = self.dispatcher.cache().probe().await {
            error!(target: "worker", error = %e, "Failed to find speech engine");
            return Err(NarratorError::NotReady(e));
        }
        self.state = WorkerState::Ready;
        info!(target: "worker", "{}", READY_MARKER);
        Ok(())
    }

    /// Readiness check followed by the serving loop.
    pub async fn run<R, W>(&mut self, input: R, output: W) -> crate::Result<WorkerExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.start().await?;
        self.serve(input, output).await
    }

    /// Serve frames until the input closes or the channel breaks.
    pub async fn serve<R, W>(&mut self, input: R, output: W) -> crate::Result<WorkerExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.state != WorkerState::Ready {
            return Err(NarratorError::NotReady(ModelError::Unavailable(
                "readiness check has not passed".into(),
            )));
        }

        let mut reader = FrameReader::with_max_len(input, self.config.max_frame_len);
        let mut writer = FrameWriter::new(output);

        let exit = loop {
            let response = match reader.read_object().await {
                Ok(None) => {
                    info!(target: "worker", "Input closed, shutting down");
                    break WorkerExit::EndOfStream;
                }
                Ok(Some(object)) => {
                    self.state = WorkerState::Serving;
                    if Request::lacks_text(&object) {
                        warn!(target: "worker", "Request has no text");
                        Response::failure(DispatchError::EmptyText.to_string())
                    } else {
                        match Request::from_object(object) {
                            Ok(request) => self.dispatcher.handle(request).await,
                            Err(e) => {
                                warn!(target: "worker", error = %e, "Request has invalid fields");
                                invalid_request(e)
                            }
                        }
                    }
                }
                Err(e) if e.is_truncated() => {
                    self.stats.protocol_errors += 1;
                    error!(target: "worker", error = %e, "Input closed mid-frame, shutting down");
                    break WorkerExit::EndOfStream;
                }
                Err(FrameError::Io(e)) => {
                    error!(target: "worker", error = %e, "Error reading message");
                    break WorkerExit::ChannelError;
                }
                Err(e) if e.breaks_framing() => {
                    self.stats.protocol_errors += 1;
                    error!(
                        target: "worker",
                        error = %e,
                        policy = ?self.config.on_protocol_error,
                        "Invalid length prefix"
                    );
                    match self.config.on_protocol_error {
                        ProtocolErrorPolicy::Terminate => break WorkerExit::Desynchronized,
                        ProtocolErrorPolicy::Continue => {
                            Response::failure(format!("protocol_error: {}", e))
                        }
                    }
                }
                Err(e) => {
                    self.stats.protocol_errors += 1;
                    warn!(target: "worker", error = %e, code = e.code(), "Undecodable frame");
                    invalid_request(e)
                }
            };

            self.stats.requests_served += 1;
            if response.is_error() {
                self.stats.requests_failed += 1;
            }

            if let Err(e) = writer.write_message(&response).await {
                error!(target: "worker", error = %e, "Error writing message");
                break WorkerExit::ChannelError;
            }
            self.state = WorkerState::Ready;
        };

        self.state = WorkerState::ShuttingDown;
        info!(
            target: "worker",
            reason = ?exit,
            requests_served = self.stats.requests_served,
            requests_failed = self.stats.requests_failed,
            protocol_errors = self.stats.protocol_errors,
            "Worker shutting down"
        );
        self.state = WorkerState::Terminated;
        Ok(exit)
    }
}

fn invalid_request(e: impl std::fmt::Display) -> Response {
    Response::failure(DispatchError::InvalidRequest(e.to_string()).to_string())
}
