use crate::model::{BitDepthCodec, Channels, FormatFilter, JobSettings, RunOutcome, SampleRate, StreamSelection};
use crate::orchestrator::{
    process_run_completion, run_controller, ControllerEvent, Orchestrator, PostProcessOptions,
    UiCommand,
};
use crate::pipeline::{locate_tool_root, ProcessPipeline, ToolConfig};
use crate::settings::{self, AppSettings};
use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mov2wav",
    version,
    about = "Offline conform pipeline: extract WAV + iXML metadata from camera files"
)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/mov2wav/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More diagnostic output on stderr (-v, -vv, -vvv); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Defaults to `convert`
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Convert (or probe, with --dry-run) every matching file in the input folder
    Convert(ConvertArgs),
    /// Hand a subcommand and its arguments straight to the conversion tool
    Tool {
        subcommand: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Options for a run. Anything left out falls back to the settings file.
#[derive(Debug, Args, Clone, Default)]
pub struct ConvertArgs {
    /// Folder with the source media
    #[arg(long)]
    pub input: Option<String>,

    /// Folder for the WAV files
    #[arg(long)]
    pub output: Option<String>,

    /// Which containers to pick up: mov | all
    #[arg(long)]
    pub filter: Option<FormatFilter>,

    /// Audio stream: 0 | 1 | all (all streams into one multichannel WAV)
    #[arg(long)]
    pub stream: Option<StreamSelection>,

    /// 44100 | 48000 | 96000
    #[arg(long)]
    pub sample_rate: Option<SampleRate>,

    /// pcm_s16le | pcm_s24le | pcm_s32le
    #[arg(long)]
    pub codec: Option<BitDepthCodec>,

    /// mono | stereo
    #[arg(long)]
    pub channels: Option<Channels>,

    /// Normalize audio (`--normalize false` to turn off a saved default)
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub normalize: Option<bool>,

    /// Embed an iXML chunk with timecode and reel
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub embed_ixml: Option<bool>,

    /// Probe only; write nothing
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub dry_run: Option<bool>,

    /// Conversion tool program, overriding the settings file
    #[arg(long)]
    pub tool: Option<String>,

    /// Print the run report as JSON instead of a table
    #[arg(long)]
    pub json: bool,

    /// Export the result table as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the result table as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, action = ArgAction::Set)]
    pub auto_save: Option<bool>,

    /// Write the resulting form values back to the settings file
    #[arg(long)]
    pub save_defaults: bool,
}

impl ConvertArgs {
    /// Overlay the flags that were given onto saved form values.
    pub fn apply(&self, job: &mut JobSettings) {
        if let Some(v) = &self.input {
            job.input_folder = v.clone();
        }
        if let Some(v) = &self.output {
            job.output_folder = v.clone();
        }
        if let Some(v) = self.filter {
            job.format_filter = v;
        }
        if let Some(v) = self.stream {
            job.stream = v;
        }
        if let Some(v) = self.sample_rate {
            job.sample_rate = v;
        }
        if let Some(v) = self.codec {
            job.codec = v;
        }
        if let Some(v) = self.channels {
            job.channels = v;
        }
        if let Some(v) = self.normalize {
            job.normalize = v;
        }
        if let Some(v) = self.embed_ixml {
            job.embed_ixml = v;
        }
        if let Some(v) = self.dry_run {
            job.dry_run = v;
        }
    }
}

/// Run the parsed command. Returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let settings_path = match cli.config {
        Some(path) => path,
        None => settings::default_path()?,
    };
    let mut app = AppSettings::load_or_default(&settings_path)?;
    if let Some(root) = locate_tool_root().await {
        tracing::debug!(root = %root.display(), "resolving tool paths");
        app.tool = app.tool.anchored_at(&root);
    }

    match cli
        .command
        .unwrap_or_else(|| Command::Convert(ConvertArgs::default()))
    {
        Command::Convert(args) => {
            run_convert(args, app, &settings_path).await?;
            Ok(0)
        }
        Command::Tool { subcommand, args } => relay(&app.tool, &subcommand, &args).await,
    }
}

/// Pass-through to the tool; yields the tool's exit code.
async fn relay(tool: &ToolConfig, subcommand: &str, args: &[String]) -> Result<i32> {
    let status = tool
        .command(subcommand)
        .args(args)
        .status()
        .await
        .with_context(|| format!("failed to launch {}", tool.program))?;
    Ok(if status.success() {
        0
    } else {
        status.code().unwrap_or(1)
    })
}

/// Ctrl-C listener registered once per run; presses between polls stay queued.
struct Interrupts {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
    #[cfg(windows)]
    inner: tokio::signal::windows::CtrlC,
}

impl Interrupts {
    fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        let inner = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        #[cfg(windows)]
        let inner = tokio::signal::windows::ctrl_c()?;
        Ok(Self { inner })
    }

    async fn recv(&mut self) -> Option<()> {
        self.inner.recv().await
    }
}

async fn run_convert(args: ConvertArgs, mut app: AppSettings, settings_path: &Path) -> Result<()> {
    if let Some(program) = &args.tool {
        app.tool.program = program.clone();
    }
    args.apply(&mut app.job);
    if let Some(auto_save) = args.auto_save {
        app.auto_save = auto_save;
    }

    let (out_tx, out_handle) = spawn_output_writer();
    if args.save_defaults {
        app.save(settings_path)?;
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "Saved defaults: {}",
            settings_path.display()
        )));
    }

    let pipeline = Arc::new(ProcessPipeline::new(app.tool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(pipeline));
    let outcome = drive_run(orchestrator.clone(), app.job.clone(), &out_tx).await?;

    if matches!(outcome, RunOutcome::Completed { .. } | RunOutcome::Stopped | RunOutcome::Failed { .. }) {
        let processed = process_run_completion(
            &orchestrator.snapshot(),
            &PostProcessOptions {
                auto_save: app.auto_save,
                runs_dir: None,
                export_json: args.export_json.clone(),
                export_csv: args.export_csv.clone(),
            },
        );
        if args.json {
            let out = serde_json::to_string_pretty(&processed.report)?;
            let _ = out_tx.send(OutputLine::Stdout(out));
        } else {
            let summary = crate::text_summary::build_text_summary(&processed.report.results);
            for line in summary.lines {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
        }
        if let Some(path) = processed.auto_saved_path {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", path.display())));
        }
        for msg in processed.export_messages {
            let _ = out_tx.send(OutputLine::Stderr(msg));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;

    if let RunOutcome::Failed { reason } = outcome {
        anyhow::bail!("conversion run failed: {reason}");
    }
    Ok(())
}

/// Run one job through the controller. Ctrl-C becomes a stop command.
async fn drive_run(
    orchestrator: Arc<Orchestrator>,
    job: JobSettings,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<RunOutcome> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<ControllerEvent>();
    let controller = tokio::spawn(run_controller(orchestrator.clone(), cmd_rx, evt_tx));

    let mut interrupts = Interrupts::new().context("failed to listen for Ctrl-C")?;
    let mut revision = orchestrator.subscribe();
    let mut printed = 0usize;
    let _ = cmd_tx.send(UiCommand::Start(job));

    let outcome = loop {
        tokio::select! {
            ev = evt_rx.recv() => match ev {
                Some(ControllerEvent::RunFinished(outcome)) => break outcome,
                None => break RunOutcome::Failed { reason: "controller exited".into() },
            },
            Ok(()) = revision.changed() => {
                printed = echo_log(&orchestrator, printed, out_tx);
            }
            Some(()) = interrupts.recv() => {
                let _ = cmd_tx.send(UiCommand::Stop);
            }
        }
    };
    echo_log(&orchestrator, printed, out_tx);

    let _ = cmd_tx.send(UiCommand::Quit);
    controller.await.context("controller task failed")??;
    Ok(outcome)
}

fn echo_log(
    orchestrator: &Orchestrator,
    printed: usize,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> usize {
    let lines = orchestrator.log_since(printed);
    for line in &lines {
        let _ = out_tx.send(OutputLine::Stderr(line.to_string()));
    }
    printed + lines.len()
}
