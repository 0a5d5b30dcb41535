/// Parent-side client for a worker process
///
/// `WorkerClient` speaks the framed protocol over any reader/writer pair.
/// `WorkerProcess` spawns the worker binary, forwards its stderr into
/// tracing and watches for the readiness line before requests are sent.
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::audio::decode_base64;
use crate::protocol::{FrameError, FrameReader, FrameWriter, Request, Response};
use crate::READY_MARKER;

/// Responses carry base64 audio and can be far larger than requests.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 100 * 1024 * 1024;

/// How long `shutdown` waits for the worker to exit on its own.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Worker process not running")]
    ProcessNotRunning,

    #[error("Worker did not become ready in time")]
    WarmupTimeout,

    #[error("Audio generation failed: {0}")]
    GenerationFailed(String),

    #[error("Invalid response from worker: {0}")]
    InvalidResponse(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::ProcessNotRunning => "process_not_running",
            ClientError::WarmupTimeout => "warmup_timeout",
            ClientError::GenerationFailed(_) => "generation_failed",
            ClientError::InvalidResponse(_) => "invalid_response",
            ClientError::Frame(_) => "frame_error",
            ClientError::Io(_) => "io_error",
        }
    }
}

/// Decoded audio from a successful response
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    /// Complete audio container (WAV)
    pub data: Vec<u8>,
    pub duration: f64,
    pub sample_rate: u32,
    pub format: String,
}

pub struct WorkerClient<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R, W> WorkerClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `reader` is the worker's stdout, `writer` its stdin.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::with_max_len(reader, DEFAULT_MAX_RESPONSE_LEN),
            writer: FrameWriter::new(writer),
        }
    }

    pub async fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        self.writer.write_message(request).await?;
        Ok(())
    }

    pub async fn receive(&mut self) -> Result<Response, ClientError> {
        match self.reader.read_message::<Response>().await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(ClientError::ProcessNotRunning),
            Err(FrameError::Malformed(e)) => Err(ClientError::InvalidResponse(e.to_string())),
            Err(e) if e.is_truncated() => Err(ClientError::ProcessNotRunning),
            Err(e) => Err(e.into()),
        }
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.send(request).await?;
        self.receive().await
    }

    pub async fn synthesize(&mut self, request: &Request) -> Result<AudioData, ClientError> {
        match self.request(request).await? {
            Response::Failure { error } => Err(ClientError::GenerationFailed(error)),
            Response::Success(ok) => {
                let data = decode_base64(&ok.audio_base64)
                    .map_err(|e| ClientError::InvalidResponse(format!("audio_base64: {}", e)))?;
                Ok(AudioData {
                    data,
                    duration: ok.duration,
                    sample_rate: ok.sample_rate,
                    format: ok.format,
                })
            }
        }
    }

    /// Flush and shut down the writer. Transports that only signal EOF on
    /// drop (child stdin) also need `into_parts`.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader.into_inner(), self.writer.into_inner())
    }
}

/// A spawned worker process
pub struct WorkerProcess {
    child: Child,
    client: WorkerClient<ChildStdout, ChildStdin>,
    ready: watch::Receiver<bool>,
}

impl WorkerProcess {
    pub fn spawn<I, S>(
        program: impl AsRef<OsStr>,
        args: I,
        envs: &[(String, String)],
    ) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = program.as_ref();
        info!(target: "worker_process", program = ?program, "Spawning worker");

        let mut child = Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!(target: "worker_process", error = %e, "Failed to spawn worker process");
                ClientError::Io(e)
            })?;

        let stdin = child.stdin.take().ok_or(ClientError::ProcessNotRunning)?;
        let stdout = child.stdout.take().ok_or(ClientError::ProcessNotRunning)?;
        let stderr = child.stderr.take().ok_or(ClientError::ProcessNotRunning)?;

        let (ready_tx, ready_rx) = watch::channel(false);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "worker_process", "[worker] {}", line);
                if line.contains(READY_MARKER) {
                    ready_tx.send_replace(true);
                }
            }
            debug!(target: "worker_process", "Worker stderr closed");
        });

        Ok(Self {
            child,
            client: WorkerClient::new(stdout, stdin),
            ready: ready_rx,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for the readiness line on the worker's stderr.
    pub async fn wait_until_ready(&mut self, limit: Duration) -> Result<(), ClientError> {
        match timeout(limit, self.ready.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => Ok(()),
            // stderr closed before the marker: the worker died during startup
            Ok(Err(_)) => Err(ClientError::ProcessNotRunning),
            Err(_) => Err(ClientError::WarmupTimeout),
        }
    }

    pub fn client(&mut self) -> &mut WorkerClient<ChildStdout, ChildStdin> {
        &mut self.client
    }

    pub async fn synthesize(&mut self, request: &Request) -> Result<AudioData, ClientError> {
        if self.child.try_wait()?.is_some() {
            return Err(ClientError::ProcessNotRunning);
        }
        if !self.is_ready() {
            return Err(ClientError::WarmupTimeout);
        }
        self.client.synthesize(request).await
    }

    /// Close stdin and wait for the worker to exit, killing it after
    /// `SHUTDOWN_GRACE`. Returns the exit status when the worker exited on
    /// its own.
    pub async fn shutdown(mut self) -> Result<Option<ExitStatus>, ClientError> {
        info!(target: "worker_process", "Stopping worker");
        if let Err(e) = self.client.close().await {
            debug!(target: "worker_process", error = %e, "Worker stdin already closed");
        }
        // The pipe only reaches EOF once stdin is dropped.
        let (_stdout, stdin) = self.client.into_parts();
        drop(stdin);

        match timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => {
                warn!(target: "worker_process", "Worker did not exit, killing it");
                self.child.kill().await?;
                Ok(None)
            }
        }
    }
}
