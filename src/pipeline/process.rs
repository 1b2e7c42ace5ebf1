use super::{ConversionPipeline, EventStream};
use crate::error::PipelineError;
use crate::model::{ConversionEvent, JobConfig};
use futures::stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

/// Script the default tool config runs, relative to the mov2wav checkout.
pub const DEFAULT_SCRIPT: &str = "tools/mov2wav.ps1";

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// How to invoke the external conversion tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    /// Arguments placed before the subcommand (interpreter flags, script path).
    pub base_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let program = if cfg!(windows) { "powershell" } else { "pwsh" };
        Self {
            program: program.to_string(),
            base_args: [
                "-NoProfile",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
                DEFAULT_SCRIPT,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl ToolConfig {
    /// A command for `subcommand`, with the base arguments already applied.
    pub fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).arg(subcommand);
        cmd
    }

    /// Rebase relative base args that name a file under `root` onto it, so the tool is found
    /// wherever mov2wav is launched from. Flags and args with no such file are left alone.
    pub fn anchored_at(mut self, root: &Path) -> Self {
        for arg in &mut self.base_args {
            if arg.starts_with('-') || Path::new(arg.as_str()).is_absolute() {
                continue;
            }
            let candidate = root.join(arg.as_str());
            if candidate.is_file() {
                *arg = candidate.to_string_lossy().into_owned();
            }
        }
        self
    }
}

/// Root of the mov2wav checkout holding the running executable: the git toplevel around it,
/// else the nearest ancestor directory containing [`DEFAULT_SCRIPT`].
pub async fn locate_tool_root() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;
    let git = Command::new("git")
        .arg("-C")
        .arg(exe_dir)
        .args(["rev-parse", "--show-toplevel"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;
    match git {
        Ok(out) if out.status.success() => {
            let top = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if !top.is_empty() {
                return Some(PathBuf::from(top));
            }
        }
        Ok(_) => {}
        Err(e) => tracing::debug!("git unavailable for tool root lookup: {e}"),
    }
    script_root_from(exe_dir)
}

fn script_root_from(dir: &Path) -> Option<PathBuf> {
    dir.ancestors()
        .find(|d| d.join(DEFAULT_SCRIPT).is_file())
        .map(Path::to_path_buf)
}

/// Runs the external tool once per run and decodes one JSON event per stdout line.
#[derive(Debug, Clone, Default)]
pub struct ProcessPipeline {
    tool: ToolConfig,
}

impl ProcessPipeline {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }
}

/// Tool arguments for a `convert` invocation, after the subcommand.
pub(crate) fn convert_args(config: &JobConfig) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--input".into(),
        config.input_folder().into(),
        "--output".into(),
        config.output_folder().into(),
        "--filter".into(),
        config.format_filter.as_arg().into(),
        "--stream".into(),
        config.stream.as_arg().into(),
        "--sample-rate".into(),
        config.sample_rate.hz().to_string(),
        "--codec".into(),
        config.codec.as_str().into(),
        "--channels".into(),
        config.channels.count().to_string(),
    ];
    if config.normalize {
        args.push("--normalize".into());
    }
    if config.embed_ixml {
        args.push("--ixml".into());
    }
    if config.dry_run {
        args.push("--dry-run".into());
    }
    args.extend(["--events".into(), "jsonl".into()]);
    args
}

/// Decode one stdout line. `None` for chatter that is not an event.
pub(crate) fn parse_line(line: &str) -> Option<ConversionEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        if !trimmed.is_empty() {
            tracing::info!(target: "mov2wav::tool", "{trimmed}");
        }
        return None;
    }
    match serde_json::from_str::<ConversionEvent>(trimmed) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!(line = trimmed, "skipping undecodable tool event: {e}");
            None
        }
    }
}

struct ToolRun {
    child: Child,
    stdout: BufReader<ChildStdout>,
    buf: Vec<u8>,
    cancel: CancellationToken,
    done: bool,
}

impl ToolRun {
    async fn next_event(&mut self) -> Option<Result<ConversionEvent, PipelineError>> {
        if self.done {
            return None;
        }
        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.done = true;
                    if let Err(e) = self.child.kill().await {
                        tracing::warn!("failed to kill conversion tool: {e}");
                    }
                    return None;
                }
                read = self.stdout.read_until(b'\n', &mut self.buf) => read,
            };
            match read {
                Ok(0) => {
                    self.done = true;
                    return match self.child.wait().await {
                        Ok(status) if status.success() => None,
                        Ok(status) => Some(Err(PipelineError::Exited { status })),
                        Err(e) => Some(Err(e.into())),
                    };
                }
                Ok(_) => {
                    // Tools on legacy code pages emit non-UTF-8 chatter; decode lossily.
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    if let Some(ev) = parse_line(&line) {
                        return Some(Ok(ev));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

impl ConversionPipeline for ProcessPipeline {
    fn run(
        &self,
        config: &JobConfig,
        cancel: CancellationToken,
    ) -> Result<EventStream, PipelineError> {
        let mut cmd = self.tool.command("convert");
        cmd.args(convert_args(config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Keep the tool out of the terminal's process group: Ctrl-C is ours to turn into a stop.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

        let mut child = cmd
            .spawn()
            .map_err(|e| PipelineError::launch(&self.tool.program, e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Unavailable("conversion tool stdout not captured".into()))?;
        tracing::debug!(program = %self.tool.program, pid = ?child.id(), "conversion tool started");

        let run = ToolRun {
            child,
            stdout: BufReader::new(stdout),
            buf: Vec::new(),
            cancel,
            done: false,
        };
        let events = stream::unfold(run, |mut run| async move {
            run.next_event().await.map(|ev| (ev, run))
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobSettings, Outcome};

    fn config(dry_run: bool) -> JobConfig {
        JobConfig::try_from(&JobSettings {
            input_folder: "/in".into(),
            output_folder: "/out".into(),
            embed_ixml: true,
            dry_run,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn convert_args_reflect_config() {
        let args = convert_args(&config(true));
        assert_eq!(
            args,
            [
                "--input",
                "/in",
                "--output",
                "/out",
                "--filter",
                "mov",
                "--stream",
                "0",
                "--sample-rate",
                "48000",
                "--codec",
                "pcm_s24le",
                "--channels",
                "2",
                "--ixml",
                "--dry-run",
                "--events",
                "jsonl",
            ]
        );
    }

    #[test]
    fn chatter_and_garbage_are_skipped() {
        assert!(parse_line("Portable tools detected in .\\tools").is_none());
        assert!(parse_line("{not json").is_none());
        assert!(parse_line("").is_none());
        let ev = parse_line(r#"  {"source":"a.mov","outcome":"ready"}  "#).unwrap();
        assert_eq!(ev.outcome, Outcome::Ready);
    }

    #[cfg(unix)]
    fn shell(script: &str) -> ProcessPipeline {
        // `sh -c script sh convert ...`: the convert args land in $1.. and are ignored.
        ProcessPipeline::new(ToolConfig {
            program: "sh".into(),
            base_args: vec!["-c".into(), script.into(), "sh".into()],
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn decodes_events_from_child_stdout() {
        use futures::StreamExt;

        let pipeline = shell(
            r#"echo 'probing...'; echo '{"source":"a.mov","reel":"A001","outcome":"ready"}'; echo '{"source":"b.mp4","outcome":"error"}'"#,
        );
        let events: Vec<_> = pipeline
            .run(&config(false), CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.source, "a.mov");
        assert_eq!(first.reel.as_deref(), Some("A001"));
        assert_eq!(events[1].as_ref().unwrap().outcome, Outcome::Error);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_chatter_does_not_end_the_run() {
        use futures::StreamExt;

        let pipeline = shell(
            r#"printf 'Verarbeite Datei caf\351.mov\n'; echo '{"source":"caf.mov","outcome":"ready"}'"#,
        );
        let events: Vec<_> = pipeline
            .run(&config(false), CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().source, "caf.mov");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn tool_runs_in_its_own_process_group() {
        use futures::StreamExt;

        // Field 5 of /proc/<pid>/stat is the process group id.
        let pipeline = shell(
            r#"pgrp=$(cut -d' ' -f5 /proc/$$/stat); echo "{\"source\":\"$pgrp\",\"detail\":\"$$\",\"outcome\":\"ready\"}""#,
        );
        let events: Vec<_> = pipeline
            .run(&config(false), CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        let ev = events[0].as_ref().unwrap();
        // A group leader's pgid is its own pid.
        assert_eq!(Some(ev.source.as_str()), ev.detail.as_deref());
    }

    #[test]
    fn anchoring_rebases_script_onto_root() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("tools")).unwrap();
        std::fs::write(root.path().join(DEFAULT_SCRIPT), "").unwrap();

        let tool = ToolConfig::default().anchored_at(root.path());
        let script = root.path().join(DEFAULT_SCRIPT);
        assert_eq!(tool.base_args[0], "-NoProfile");
        assert_eq!(tool.base_args[3], "-File");
        assert_eq!(tool.base_args[4], script.to_string_lossy());
        // "Bypass" is not a file under the root.
        assert_eq!(tool.base_args[2], "Bypass");
    }

    #[test]
    fn anchoring_leaves_missing_and_absolute_paths() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let absolute = other.path().join("x.ps1").to_string_lossy().into_owned();
        let tool = ToolConfig {
            program: "pwsh".into(),
            base_args: vec!["-File".into(), DEFAULT_SCRIPT.into(), absolute.clone()],
        }
        .anchored_at(root.path());
        assert_eq!(tool.base_args, ["-File", DEFAULT_SCRIPT, absolute.as_str()]);
    }

    #[test]
    fn script_root_is_nearest_ancestor_with_the_script() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("tools")).unwrap();
        std::fs::write(root.path().join(DEFAULT_SCRIPT), "").unwrap();
        let nested = root.path().join("target").join("release");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(script_root_from(&nested).as_deref(), Some(root.path()));
        let elsewhere = tempfile::tempdir().unwrap();
        assert_eq!(script_root_from(elsewhere.path()), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_fatal() {
        use futures::StreamExt;

        let pipeline = shell(r#"echo '{"source":"a.mov","outcome":"ready"}'; exit 3"#);
        let events: Vec<_> = pipeline
            .run(&config(false), CancellationToken::new())
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(PipelineError::Exited { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_ends_stream_and_kills_child() {
        use futures::StreamExt;

        let pipeline = shell("sleep 30");
        let cancel = CancellationToken::new();
        let mut events = pipeline.run(&config(false), cancel.clone()).unwrap();
        cancel.cancel();
        let next = tokio::time::timeout(std::time::Duration::from_secs(5), events.next())
            .await
            .expect("stream should end after cancel");
        assert!(next.is_none());
    }

    #[test]
    fn missing_program_fails_to_launch() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let pipeline = ProcessPipeline::new(ToolConfig {
            program: "mov2wav-definitely-not-installed".into(),
            base_args: Vec::new(),
        });
        let err = pipeline
            .run(&config(false), CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Launch { .. }));
    }
}
