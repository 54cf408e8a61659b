//! Render process supervision.
//!
//! A [`RenderSupervisor`] runs one task on one GPU slot: it launches the
//! renderer, streams its stdout through a [`ProgressTracker`], kills the
//! process when the task's cancellation token fires, and reports the exit
//! back to the engine. It never touches the registry or the pool itself;
//! everything flows back as [`SupervisorMessage`]s.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{Task, TaskId};
use crate::orchestration::progress::ProgressTracker;

const READ_BUFFER_SIZE: usize = 8192;

/// Number of stderr lines kept for the failure log.
const STDERR_TAIL_LINES: usize = 20;

/// How to launch the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub program: PathBuf,
    /// First positional argument.
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub backend: String,
}

impl RendererConfig {
    /// Resolve the renderer from configuration.
    ///
    /// The program is looked up on `PATH`; if it cannot be found the bare
    /// name is kept and the failure surfaces when a task is launched.
    pub fn from_config(config: &Config) -> Self {
        let name = config.effective_renderer();
        let program = which::which(name).unwrap_or_else(|_| {
            warn!(renderer = name, "Renderer not found on PATH");
            PathBuf::from(name)
        });
        Self {
            program,
            script: config.renderer_script_path(),
            working_dir: config.neural_style_dir(),
            backend: config.effective_backend().to_string(),
        }
    }
}

/// Fully built command line for one render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl RenderInvocation {
    pub fn new(renderer: &RendererConfig, task: &Task, slot: usize, output_path: &Path) -> Self {
        let s = &task.settings;
        let mut args: Vec<String> = vec![
            renderer.script.display().to_string(),
            "-content_image".into(),
            task.content_path.display().to_string(),
            "-style_image".into(),
            task.style_path.display().to_string(),
            "-image_size".into(),
            s.image_size.to_string(),
            "-gpu".into(),
            slot.to_string(),
            "-num_iterations".into(),
            s.num_iterations.to_string(),
            "-content_weight".into(),
            s.content_weight.to_string(),
            "-style_weight".into(),
            s.style_weight.to_string(),
            "-tv_weight".into(),
            s.tv_weight.to_string(),
            "-init".into(),
            s.init.as_str().into(),
            "-content_layers".into(),
            s.content_layers.join(","),
            "-style_layers".into(),
            s.style_layers.join(","),
            "-style_scale".into(),
            s.style_scale.to_string(),
            "-pooling".into(),
            s.pooling.as_str().into(),
            "-optimizer".into(),
            s.optimizer.as_str().into(),
            "-learning_rate".into(),
            s.learning_rate.to_string(),
            "-output_image".into(),
            output_path.display().to_string(),
            "-print_iter".into(),
            s.print_interval().to_string(),
            "-save_iter".into(),
            s.save_interval().to_string(),
            "-backend".into(),
            renderer.backend.clone(),
        ];
        if renderer.backend == "cudnn" {
            args.push("-cudnn_autotune".into());
        }
        if s.normalize_gradients {
            args.push("-normalize_gradients".into());
        }

        Self {
            program: renderer.program.clone(),
            args,
            working_dir: renderer.working_dir.clone(),
        }
    }
}

/// Reports from a running supervisor to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorMessage {
    /// The renderer reported a higher iteration than before.
    Progress { task_id: TaskId, iter: u32 },
    /// The renderer is gone and its slot can be released.
    Exited {
        task_id: TaskId,
        slot: usize,
        /// Exit code 0. A cancelled render may still report success.
        success: bool,
    },
}

/// Supervises one render process.
pub struct RenderSupervisor {
    invocation: RenderInvocation,
    task_id: TaskId,
    slot: usize,
    cancel: CancellationToken,
    msg_tx: mpsc::UnboundedSender<SupervisorMessage>,
}

impl RenderSupervisor {
    pub fn new(
        invocation: RenderInvocation,
        task_id: TaskId,
        slot: usize,
        cancel: CancellationToken,
        msg_tx: mpsc::UnboundedSender<SupervisorMessage>,
    ) -> Self {
        Self {
            invocation,
            task_id,
            slot,
            cancel,
            msg_tx,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the render to completion. Always ends with one `Exited` message.
    pub async fn run(self) {
        let success = self.supervise().await;
        let _ = self.msg_tx.send(SupervisorMessage::Exited {
            task_id: self.task_id.clone(),
            slot: self.slot,
            success,
        });
    }

    async fn supervise(&self) -> bool {
        let id = &self.task_id;
        let mut child = match self.launch() {
            Ok(child) => child,
            Err(e) => {
                error!(task_id = %id, program = %self.invocation.program.display(), error = %e, "Failed to launch renderer");
                return false;
            }
        };
        info!(task_id = %id, slot = self.slot, pid = ?child.id(), "Renderer started");

        let stderr_tail = child.stderr.take().map(|s| tokio::spawn(tail_lines(s)));
        let mut killed = false;

        if let Some(stdout) = child.stdout.take() {
            killed = self.stream_progress(stdout, &mut child).await;
        }

        let status = loop {
            tokio::select! {
                _ = self.cancel.cancelled(), if !killed => {
                    kill(&mut child, id);
                    killed = true;
                }
                status = child.wait() => break status,
            }
        };

        let stderr = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) if status.success() => {
                info!(task_id = %id, "Renderer exited cleanly");
                true
            }
            Ok(status) if killed => {
                info!(task_id = %id, exit_code = ?status.code(), "Renderer stopped after cancellation");
                false
            }
            Ok(status) => {
                warn!(task_id = %id, exit_code = ?status.code(), stderr = %stderr, "Renderer failed");
                false
            }
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to wait for renderer");
                false
            }
        }
    }

    fn launch(&self) -> std::io::Result<Child> {
        debug!(task_id = %self.task_id, args = ?self.invocation.args, "Launching renderer");
        Command::new(&self.invocation.program)
            .args(&self.invocation.args)
            .current_dir(&self.invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Read stdout until EOF, reporting progress.
    ///
    /// Returns true if the process was killed because of cancellation.
    async fn stream_progress(
        &self,
        mut stdout: impl AsyncRead + Unpin,
        child: &mut Child,
    ) -> bool {
        let mut tracker = ProgressTracker::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut last_iter = 0;
        let mut killed = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled(), if !killed => {
                    kill(child, &self.task_id);
                    killed = true;
                }
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]);
                        if let Some(iter) = tracker.feed(&chunk) {
                            if iter > last_iter {
                                last_iter = iter;
                                let _ = self.msg_tx.send(SupervisorMessage::Progress {
                                    task_id: self.task_id.clone(),
                                    iter,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        warn!(task_id = %self.task_id, error = %e, "Failed to read renderer output");
                        break;
                    }
                },
            }
        }
        killed
    }
}

fn kill(child: &mut Child, id: &TaskId) {
    info!(task_id = %id, "Cancelling render");
    if let Err(e) = child.start_kill() {
        warn!(task_id = %id, error = %e, "Failed to signal renderer");
    }
}

/// Collect the last few lines of a stream.
///
/// The stream is drained to EOF whatever its encoding so the writer never
/// sees a closed pipe.
async fn tail_lines(stream: impl AsyncRead + Unpin) -> String {
    let mut reader = BufReader::new(stream);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Failed to read renderer stderr");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line.trim_end_matches(['\n', '\r']).to_string());
    }
    Vec::from(tail).join("\n")
}
