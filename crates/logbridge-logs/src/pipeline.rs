//! External command pipelines
//!
//! A [`ProcessPipeline`] chains commands so that each command's stdout feeds the
//! next command's stdin, and exposes the last command's stdout as a single
//! readable stream. Closing escalates through SIGINT and SIGTERM sent to the head
//! process before killing whatever is left, with a bounded wait at every stage.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

/// A single external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How long to wait for the pipeline to exit after each termination stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Wait after SIGINT to the head process
    pub interrupt_timeout: Duration,

    /// Wait after SIGTERM to the head process
    pub terminate_timeout: Duration,

    /// Wait after SIGKILL before giving up on reaping
    pub kill_timeout: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            interrupt_timeout: Duration::from_millis(200),
            terminate_timeout: Duration::from_millis(400),
            kill_timeout: Duration::from_millis(200),
        }
    }
}

impl TerminationPolicy {
    /// Upper bound on the time `close` can take
    pub fn total(&self) -> Duration {
        self.interrupt_timeout + self.terminate_timeout + self.kill_timeout
    }
}

/// Lifecycle of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Running,
    Terminating,
    Closed,
}

/// How the processes of a closed pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// All processes had exited before any signal was needed
    Exited,
    /// Exited after SIGINT
    Interrupted,
    /// Exited after SIGTERM
    Terminated,
    /// Exited after SIGKILL
    Killed,
    /// Still not reaped after SIGKILL; the reaper task keeps waiting in the background
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

/// A chain of child processes connected stdout to stdin
pub struct ProcessPipeline {
    commands: Vec<CommandSpec>,
    policy: TerminationPolicy,
    state: PipelineState,
    termination: Option<Termination>,

    /// Stdout of the last command
    stream: Option<ChildStdout>,

    /// Signal requests for the reaper task
    signals: Option<mpsc::UnboundedSender<Signal>>,

    /// Task waiting on every child process
    reaper: Option<JoinHandle<()>>,

    /// Exit status per command, filled in by the reaper
    statuses: Arc<Mutex<Vec<Option<ExitStatus>>>>,

    /// Process id per command, empty until started
    pids: Vec<Option<u32>>,
}

impl ProcessPipeline {
    /// Create a pipeline without starting it
    pub fn new(commands: Vec<CommandSpec>, policy: TerminationPolicy) -> Self {
        let statuses = Arc::new(Mutex::new(vec![None; commands.len()]));
        Self {
            commands,
            policy,
            state: PipelineState::Created,
            termination: None,
            stream: None,
            signals: None,
            reaper: None,
            statuses,
            pids: Vec::new(),
        }
    }

    /// Create and start a pipeline
    pub fn spawn(
        commands: Vec<CommandSpec>,
        policy: TerminationPolicy,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = Self::new(commands, policy);
        pipeline.start()?;
        Ok(pipeline)
    }

    /// Launch every command
    ///
    /// Must be called within a tokio runtime. If any command fails to launch,
    /// the commands already started are killed and reaped in the background
    /// and the pipeline is closed.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Created {
            return Ok(());
        }
        if self.commands.is_empty() {
            self.state = PipelineState::Closed;
            return Err(PipelineError::Empty);
        }

        let mut children = Vec::with_capacity(self.commands.len());
        let stream = match spawn_chain(&self.commands, &mut children) {
            Ok(stream) => stream,
            Err(err) => {
                abort_children(children);
                self.state = PipelineState::Closed;
                self.termination = Some(Termination::Killed);
                return Err(err);
            }
        };

        self.pids = children.iter().map(|c| c.id()).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let statuses = Arc::clone(&self.statuses);
        self.reaper = Some(tokio::spawn(reap(children, rx, statuses)));
        self.signals = Some(tx);
        self.stream = Some(stream);
        self.state = PipelineState::Running;

        info!(pipeline = %self.describe(), "Started pipeline");
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Take ownership of the output stream
    ///
    /// After this the pipeline itself reads as empty.
    pub fn take_stream(&mut self) -> Option<ChildStdout> {
        self.stream.take()
    }

    /// Process ids of the started commands
    pub fn process_ids(&self) -> &[Option<u32>] {
        &self.pids
    }

    /// Exit statuses collected so far, one per command
    pub fn exit_statuses(&self) -> Vec<Option<ExitStatus>> {
        self.statuses.lock().clone()
    }

    /// Close the output stream and terminate every process
    ///
    /// Idempotent: later calls return the outcome of the first one.
    pub async fn close(&mut self) -> Termination {
        match self.state {
            PipelineState::Closed => return self.termination.unwrap_or(Termination::Exited),
            PipelineState::Created => {
                self.state = PipelineState::Closed;
                self.termination = Some(Termination::Exited);
                return Termination::Exited;
            }
            PipelineState::Running | PipelineState::Terminating => {}
        }

        self.state = PipelineState::Terminating;
        self.stream.take();

        let termination = self.terminate().await;
        self.signals.take();
        self.state = PipelineState::Closed;
        self.termination = Some(termination);

        debug!(pipeline = %self.describe(), ?termination, "Closed pipeline");
        termination
    }

    async fn terminate(&mut self) -> Termination {
        let Some(mut reaper) = self.reaper.take() else {
            return Termination::Exited;
        };
        if reaper.is_finished() {
            let _ = reaper.await;
            return Termination::Exited;
        }

        let stages = [
            (Signal::Interrupt, self.policy.interrupt_timeout, Termination::Interrupted),
            (Signal::Terminate, self.policy.terminate_timeout, Termination::Terminated),
            (Signal::Kill, self.policy.kill_timeout, Termination::Killed),
        ];

        for (signal, timeout, outcome) in stages {
            if let Some(signals) = &self.signals {
                let _ = signals.send(signal);
            }
            if tokio::time::timeout(timeout, &mut reaper).await.is_ok() {
                return outcome;
            }
            debug!(pipeline = %self.describe(), ?signal, "Pipeline still running, escalating");
        }

        warn!(
            pipeline = %self.describe(),
            "Pipeline processes not reaped after kill, leaving them to the background reaper"
        );
        Termination::Abandoned
    }

    fn describe(&self) -> String {
        self.commands
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

impl AsyncRead for ProcessPipeline {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for ProcessPipeline {
    fn drop(&mut self) {
        if matches!(self.state, PipelineState::Running | PipelineState::Terminating) {
            if let Some(signals) = &self.signals {
                let _ = signals.send(Signal::Kill);
            }
        }
    }
}

/// Spawn the commands, pushing each child as soon as it starts
fn spawn_chain(
    commands: &[CommandSpec],
    children: &mut Vec<Child>,
) -> Result<ChildStdout, PipelineError> {
    let mut upstream: Option<Stdio> = None;

    for (index, spec) in commands.iter().enumerate() {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(upstream.take().unwrap_or_else(Stdio::null))
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let stdout = child.stdout.take();
        children.push(child);

        let stdout = stdout.ok_or_else(|| {
            PipelineError::Io(std::io::Error::other(format!(
                "no stdout captured for '{}'",
                spec.program
            )))
        })?;

        if index + 1 == commands.len() {
            return Ok(stdout);
        }
        upstream = Some(stdout.try_into()?);
    }

    Err(PipelineError::Empty)
}

/// Kill and reap the processes of a pipeline that failed to start
fn abort_children(mut children: Vec<Child>) {
    for child in &mut children {
        let _ = child.start_kill();
    }
    if children.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for child in &mut children {
            let _ = child.wait().await;
        }
    });
}

/// Wait on every child in order, delivering signals as they are requested
///
/// Signals for the head process are only sent while it has not been reaped,
/// so a recycled pid is never signalled.
async fn reap(
    mut children: Vec<Child>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
    statuses: Arc<Mutex<Vec<Option<ExitStatus>>>>,
) {
    let pids: Vec<Option<u32>> = children.iter().map(|c| c.id()).collect();
    let mut signals_open = true;

    for (index, child) in children.iter_mut().enumerate() {
        loop {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => statuses.lock()[index] = Some(status),
                        Err(err) => warn!(error = %err, "Failed to wait for pipeline process"),
                    }
                    break;
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => deliver(signal, index, &pids),
                    None => signals_open = false,
                },
            }
        }
    }
}

fn deliver(signal: Signal, reaped: usize, pids: &[Option<u32>]) {
    let targets: &[Option<u32>] = match signal {
        Signal::Interrupt | Signal::Terminate if reaped == 0 => &pids[..1],
        Signal::Interrupt | Signal::Terminate => &[],
        Signal::Kill => &pids[reaped..],
    };
    let signo = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    for pid in targets.iter().flatten() {
        let Ok(pid) = libc::pid_t::try_from(*pid) else {
            continue;
        };
        // SAFETY: kill(2) only sends a signal; the pid belongs to a child we have not reaped yet
        let result = unsafe { libc::kill(pid, signo) };
        if result != 0 {
            debug!(
                pid,
                ?signal,
                error = %std::io::Error::last_os_error(),
                "Failed to signal pipeline process"
            );
        }
    }
}
