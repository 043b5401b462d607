//! [`FaceInference`] backed by an external vision helper process.
//!
//! The helper hosts the pretrained detection, landmark, expression,
//! age/gender and recognition nets. It talks line-delimited JSON over
//! stdin/stdout:
//!
//! * on startup it prints `{"ready":true}` once its models are loaded;
//! * each request is one JSON header line followed by `width*height*3`
//!   raw RGB bytes;
//! * each response is one line, `{"faces":[...]}` or `{"error":"..."}`.

use async_trait::async_trait;
use facelens_core::{
    Capabilities, DetectionResult, DetectorOptions, FaceInference, Frame, InferenceError, LoadState,
};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex};

#[derive(Serialize)]
struct Request<'a> {
    op: &'a str,
    width: u32,
    height: u32,
    options: &'a DetectorOptions,
    capabilities: Capabilities,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Response {
    Faces { faces: Vec<DetectionResult> },
    Error { error: String },
}

#[derive(Deserialize)]
struct Handshake {
    ready: bool,
}

struct HelperIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
    // Held so the helper is killed when the backend is dropped.
    _child: Child,
}

impl HelperIo {
    async fn read_line(&mut self) -> Result<&str, InferenceError> {
        self.line.clear();
        let n = self.stdout.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(InferenceError::Unavailable("helper exited".into()));
        }
        Ok(self.line.trim_end())
    }

    async fn call(
        &mut self,
        op: &str,
        frame: &Frame,
        options: &DetectorOptions,
        capabilities: Capabilities,
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        let request = Request {
            op,
            width: frame.width,
            height: frame.height,
            options,
            capabilities,
        };
        let mut header = serde_json::to_vec(&request)
            .map_err(|e| InferenceError::Failed(format!("encode request: {e}")))?;
        header.push(b'\n');

        self.stdin.write_all(&header).await?;
        self.stdin.write_all(&frame.data).await?;
        self.stdin.flush().await?;

        let line = self.read_line().await?;
        match serde_json::from_str::<Response>(line) {
            Ok(Response::Faces { faces }) => Ok(faces),
            Ok(Response::Error { error }) => Err(InferenceError::Failed(error)),
            Err(e) => Err(InferenceError::Failed(format!("malformed helper response: {e}"))),
        }
    }
}

pub struct HelperInference {
    io: Arc<Mutex<HelperIo>>,
    state: watch::Receiver<LoadState>,
}

impl HelperInference {
    /// Spawn the helper. Returns immediately; [`FaceInference::load_state`]
    /// moves to `Ready` once the helper announces its models, or to
    /// `Failed` if it exits or answers anything else first.
    pub fn spawn(command: &[String]) -> Result<Self, InferenceError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| InferenceError::Unavailable("empty helper command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InferenceError::Unavailable(format!("failed to spawn {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| InferenceError::Unavailable("helper stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InferenceError::Unavailable("helper stdout not piped".into()))?;

        tracing::info!(program = %program, pid = ?child.id(), "vision helper spawned");

        let io = Arc::new(Mutex::new(HelperIo {
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
            _child: child,
        }));
        let (state_tx, state) = watch::channel(LoadState::Loading);

        // Hold the io lock until the handshake so no request races it.
        let handshake_io = io.clone();
        tokio::spawn(async move {
            let mut io = handshake_io.lock().await;
            let outcome = match io.read_line().await {
                Ok(line) => match serde_json::from_str::<Handshake>(line) {
                    Ok(Handshake { ready: true }) => LoadState::Ready,
                    Ok(Handshake { ready: false }) => {
                        LoadState::Failed("helper reported models unavailable".into())
                    }
                    Err(e) => LoadState::Failed(format!("malformed handshake: {e}")),
                },
                Err(e) => LoadState::Failed(format!("helper failed before handshake: {e}")),
            };
            match &outcome {
                LoadState::Failed(reason) => tracing::error!(reason = %reason, "vision helper unusable"),
                _ => tracing::info!("vision helper models loaded"),
            }
            state_tx.send_replace(outcome);
        });

        Ok(Self { io, state })
    }

    fn ensure_ready(&self) -> Result<(), InferenceError> {
        match self.load_state() {
            LoadState::Ready => Ok(()),
            LoadState::Loading => Err(InferenceError::NotLoaded),
            LoadState::Failed(reason) => Err(InferenceError::Unavailable(reason)),
        }
    }
}

#[async_trait]
impl FaceInference for HelperInference {
    fn load_state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    async fn detect_all(
        &self,
        frame: &Frame,
        options: &DetectorOptions,
        capabilities: Capabilities,
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        self.ensure_ready()?;
        self.io.lock().await.call("detect_all", frame, options, capabilities).await
    }

    async fn detect_single(
        &self,
        frame: &Frame,
        options: &DetectorOptions,
        capabilities: Capabilities,
    ) -> Result<Option<DetectionResult>, InferenceError> {
        self.ensure_ready()?;
        let faces = self
            .io
            .lock()
            .await
            .call("detect_single", frame, options, capabilities)
            .await?;
        Ok(faces.into_iter().next())
    }
}
