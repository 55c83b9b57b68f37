//! Live tailing of the aggregated log file
//!
//! A session first greps the compressed history (only when a filter is set),
//! then follows the rotated and live files through `tail -f | grep -E`.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use logbridge_query::build_matcher;
use logbridge_types::{Envelope, Filter};

use crate::error::TailError;
use crate::pipeline::{CommandSpec, ProcessPipeline, TerminationPolicy};
use crate::pump::{PumpExit, spawn_pump};
use crate::rotated::RotatedLogs;

/// Tailing settings
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Live log file
    pub source: PathBuf,

    /// Lines of history shown for an empty filter
    pub history_lines: usize,

    pub tail_program: String,
    pub grep_program: String,
    pub zgrep_program: String,

    /// Pass `--line-buffered` to grep
    pub line_buffered: bool,

    pub termination: TerminationPolicy,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("/var/log/messages"),
            history_lines: 100,
            tail_program: "tail".to_string(),
            grep_program: "grep".to_string(),
            zgrep_program: "zgrep".to_string(),
            line_buffered: false,
            termination: TerminationPolicy::default(),
        }
    }
}

/// Commands run by a tail session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailPlan {
    /// Grep over compressed history, run to completion first
    pub history: Option<Vec<CommandSpec>>,

    /// Follow the live file
    pub live: Vec<CommandSpec>,
}

impl TailPlan {
    pub fn build(config: &TailConfig, filter: &Filter, rotated: &RotatedLogs) -> Self {
        let matcher = build_matcher(filter);
        let source = config.source.to_string_lossy().into_owned();

        let history = if !filter.is_empty() && !rotated.compressed.is_empty() {
            Some(vec![
                CommandSpec::new(&config.zgrep_program)
                    .args(["-h", "-E", "-e"])
                    .arg(&matcher)
                    .args(rotated.compressed.iter().map(|p| p.to_string_lossy().into_owned())),
            ])
        } else {
            None
        };

        let mut tail = CommandSpec::new(&config.tail_program).arg("-q").arg("-n");
        if filter.is_empty() {
            tail = tail.arg(config.history_lines.to_string());
        } else {
            tail = tail.arg("+1");
            if let Some(main) = &rotated.main {
                tail = tail.arg(main.to_string_lossy());
            }
        }
        let tail = tail.arg("-f").arg(source);

        let mut grep = CommandSpec::new(&config.grep_program);
        if config.line_buffered {
            grep = grep.arg("--line-buffered");
        }
        let grep = grep.args(["-E", "-e"]).arg(matcher);

        Self {
            history,
            live: vec![tail, grep],
        }
    }
}

/// Streams matching log lines to a consumer
pub struct TailSession {
    config: TailConfig,
}

impl TailSession {
    pub fn new(config: TailConfig) -> Self {
        Self { config }
    }

    /// Run until the logs end, `tx` is closed or `cancel` fires
    ///
    /// Every pipeline is closed and its pump joined before this returns.
    pub async fn run(
        &self,
        filter: &Filter,
        tx: mpsc::Sender<Envelope>,
        cancel: CancellationToken,
    ) -> Result<PumpExit, TailError> {
        let rotated =
            RotatedLogs::discover(&self.config.source)
                .await
                .map_err(|source| TailError::Rotated {
                    dir: self
                        .config
                        .source
                        .parent()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_default(),
                    source,
                })?;
        let plan = TailPlan::build(&self.config, filter, &rotated);
        info!(
            source = %self.config.source.display(),
            matcher = %build_matcher(filter),
            "Starting tail session"
        );

        if let Some(history) = plan.history {
            let exit = self.run_pipeline(history, tx.clone(), &cancel).await?;
            if matches!(exit, PumpExit::Cancelled | PumpExit::ReceiverClosed) {
                return Ok(exit);
            }
        }

        self.run_pipeline(plan.live, tx, &cancel).await
    }

    async fn run_pipeline(
        &self,
        commands: Vec<CommandSpec>,
        tx: mpsc::Sender<Envelope>,
        cancel: &CancellationToken,
    ) -> Result<PumpExit, TailError> {
        let mut pipeline = ProcessPipeline::spawn(commands, self.config.termination.clone())?;

        let exit = match pipeline.take_stream() {
            Some(stream) => {
                let pump = spawn_pump(stream, tx, cancel.child_token());
                pump.await.unwrap_or(PumpExit::ReadError)
            }
            None => PumpExit::EndOfStream,
        };

        let termination = pipeline.close().await;
        debug!(?exit, ?termination, "Tail pipeline finished");
        Ok(exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(source: &Path) -> TailConfig {
        TailConfig {
            source: source.to_path_buf(),
            ..Default::default()
        }
    }

    fn rotated() -> RotatedLogs {
        RotatedLogs {
            main: Some(PathBuf::from("/var/log/messages.0")),
            compressed: vec![
                PathBuf::from("/var/log/messages.2.gz"),
                PathBuf::from("/var/log/messages.1.gz"),
            ],
        }
    }

    #[test]
    fn test_plan_for_filter() {
        let mut filter = Filter::default();
        filter.add_pod("web");
        let cfg = config(Path::new("/var/log/messages"));
        let plan = TailPlan::build(&cfg, &filter, &rotated());
        let matcher = build_matcher(&filter);

        assert_eq!(
            plan.history,
            Some(vec![CommandSpec::new("zgrep").args([
                "-h",
                "-E",
                "-e",
                matcher.as_str(),
                "/var/log/messages.2.gz",
                "/var/log/messages.1.gz",
            ])])
        );
        assert_eq!(
            plan.live,
            vec![
                CommandSpec::new("tail").args([
                    "-q",
                    "-n",
                    "+1",
                    "/var/log/messages.0",
                    "-f",
                    "/var/log/messages",
                ]),
                CommandSpec::new("grep").args(["-E", "-e", matcher.as_str()]),
            ]
        );
    }

    #[test]
    fn test_plan_for_empty_filter() {
        let cfg = TailConfig {
            line_buffered: true,
            history_lines: 25,
            ..config(Path::new("/var/log/messages"))
        };
        let plan = TailPlan::build(&cfg, &Filter::default(), &rotated());

        assert_eq!(plan.history, None);
        assert_eq!(
            plan.live[0],
            CommandSpec::new("tail").args(["-q", "-n", "25", "-f", "/var/log/messages"])
        );
        assert_eq!(plan.live[1].args[0], "--line-buffered");
    }

    #[test]
    fn test_plan_keeps_dash_text_as_pattern() {
        let filter = Filter::free_text("--file=/etc/passwd");
        let plan = TailPlan::build(&config(Path::new("/var/log/messages")), &filter, &rotated());

        let history = plan.history.unwrap();
        assert_eq!(history[0].args[..4], ["-h", "-E", "-e", "--file=/etc/passwd"]);
        assert_eq!(plan.live[1].args, vec!["-E", "-e", "--file=/etc/passwd"]);
    }

    #[tokio::test]
    async fn test_session_matches_text_starting_with_dash() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("messages");
        std::fs::write(
            &source,
            concat!(
                "2019-01-01T01:01:02.1Z fwd web_default_nginx-a plain line\n",
                "2019-01-01T01:01:03.1Z fwd web_default_nginx-a run with -x flag\n",
            ),
        )
        .unwrap();

        let session = TailSession::new(TailConfig {
            line_buffered: true,
            ..config(&source)
        });
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            async move { session.run(&Filter::free_text("-x"), tx, cancel).await }
        };
        let handle = tokio::spawn(run);

        let envelope = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.payload, "run with -x flag");

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, PumpExit::Cancelled);
    }

    #[tokio::test]
    async fn test_session_streams_matching_lines() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("messages");
        std::fs::write(
            dir.path().join("messages.0"),
            "2019-01-01T01:01:01.1Z fwd web_default_nginx-a rotated\n",
        )
        .unwrap();
        std::fs::write(
            &source,
            concat!(
                "2019-01-01T01:01:02.1Z fwd api_default_nginx-a skipped\n",
                "2019-01-01T01:01:03.1Z fwd web_default_nginx-a {\"log\":\"live\"}\n",
            ),
        )
        .unwrap();

        let session = TailSession::new(TailConfig {
            line_buffered: true,
            ..config(&source)
        });
        let mut filter = Filter::default();
        filter.add_pod("web");

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            async move { session.run(&filter, tx, cancel).await }
        };
        let handle = tokio::spawn(run);

        let mut payloads = Vec::new();
        while payloads.len() < 2 {
            let envelope = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
            payloads.push(envelope.payload);
        }
        assert_eq!(payloads, vec!["rotated", "live"]);

        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, PumpExit::Cancelled);
    }

    #[tokio::test]
    async fn test_session_stops_when_receiver_dropped() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("messages");
        std::fs::write(&source, "").unwrap();

        let session = TailSession::new(config(&source));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            session.run(&Filter::default(), tx, CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(exit, PumpExit::ReceiverClosed);
    }

    #[tokio::test]
    async fn test_session_missing_directory() {
        let session = TailSession::new(config(Path::new("/nonexistent/logbridge/messages")));
        let (tx, _rx) = mpsc::channel(1);
        let result = session
            .run(&Filter::default(), tx, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TailError::Rotated { .. })));
    }
}
