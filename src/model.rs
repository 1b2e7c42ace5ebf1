use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which containers under the input folder the pipeline picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFilter {
    #[default]
    MovOnly,
    AllSupported,
}

impl FormatFilter {
    pub fn label(self) -> &'static str {
        match self {
            FormatFilter::MovOnly => "MOV only",
            FormatFilter::AllSupported => "All supported formats",
        }
    }

    pub fn as_arg(self) -> &'static str {
        match self {
            FormatFilter::MovOnly => "mov",
            FormatFilter::AllSupported => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSelection {
    #[default]
    Stream0,
    Stream1,
    /// Every audio stream folded into one multichannel WAV.
    AllStreamsMultichannel,
}

impl StreamSelection {
    pub fn label(self) -> &'static str {
        match self {
            StreamSelection::Stream0 => "Stream 0 (default)",
            StreamSelection::Stream1 => "Stream 1",
            StreamSelection::AllStreamsMultichannel => "All streams to multichannel WAV",
        }
    }

    pub fn as_arg(self) -> &'static str {
        match self {
            StreamSelection::Stream0 => "0",
            StreamSelection::Stream1 => "1",
            StreamSelection::AllStreamsMultichannel => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleRate {
    #[serde(rename = "44100")]
    Hz44100,
    #[default]
    #[serde(rename = "48000")]
    Hz48000,
    #[serde(rename = "96000")]
    Hz96000,
}

impl SampleRate {
    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44_100,
            SampleRate::Hz48000 => 48_000,
            SampleRate::Hz96000 => 96_000,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SampleRate::Hz44100 => "44.1kHz",
            SampleRate::Hz48000 => "48kHz",
            SampleRate::Hz96000 => "96kHz",
        }
    }
}

/// PCM codec handed to the encoder; the name doubles as the bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepthCodec {
    PcmS16le,
    #[default]
    PcmS24le,
    PcmS32le,
}

impl BitDepthCodec {
    pub fn as_str(self) -> &'static str {
        match self {
            BitDepthCodec::PcmS16le => "pcm_s16le",
            BitDepthCodec::PcmS24le => "pcm_s24le",
            BitDepthCodec::PcmS32le => "pcm_s32le",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channels {
    Mono,
    #[default]
    Stereo,
}

impl Channels {
    pub fn count(self) -> u8 {
        match self {
            Channels::Mono => 1,
            Channels::Stereo => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channels::Mono => "Mono",
            Channels::Stereo => "Stereo",
        }
    }
}

fn unknown(field: &'static str, value: &str) -> ConfigError {
    ConfigError::UnknownValue {
        field,
        value: value.to_string(),
    }
}

impl FromStr for FormatFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mov" | "mov-only" => Ok(FormatFilter::MovOnly),
            "all" | "all-supported" => Ok(FormatFilter::AllSupported),
            _ => Err(unknown("format filter", s)),
        }
    }
}

impl FromStr for StreamSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" => Ok(StreamSelection::Stream0),
            "1" => Ok(StreamSelection::Stream1),
            "all" | "multichannel" => Ok(StreamSelection::AllStreamsMultichannel),
            _ => Err(unknown("stream selection", s)),
        }
    }
}

impl FromStr for SampleRate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches("hz") {
            "44100" | "44.1k" => Ok(SampleRate::Hz44100),
            "48000" | "48k" => Ok(SampleRate::Hz48000),
            "96000" | "96k" => Ok(SampleRate::Hz96000),
            _ => Err(unknown("sample rate", s)),
        }
    }
}

impl FromStr for BitDepthCodec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm_s16le" | "16" => Ok(BitDepthCodec::PcmS16le),
            "pcm_s24le" | "24" => Ok(BitDepthCodec::PcmS24le),
            "pcm_s32le" | "32" => Ok(BitDepthCodec::PcmS32le),
            _ => Err(unknown("bit depth codec", s)),
        }
    }
}

impl FromStr for Channels {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mono" | "1" => Ok(Channels::Mono),
            "stereo" | "2" => Ok(Channels::Stereo),
            _ => Err(unknown("channels", s)),
        }
    }
}

/// Editable form state. Lives in the UI (or the CLI flags) and is only turned into a
/// [`JobConfig`] when a run is started.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub input_folder: String,
    pub output_folder: String,
    pub format_filter: FormatFilter,
    pub stream: StreamSelection,
    pub sample_rate: SampleRate,
    pub codec: BitDepthCodec,
    pub channels: Channels,
    pub normalize: bool,
    pub embed_ixml: bool,
    pub dry_run: bool,
}

/// Options frozen at the moment a run is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    input_folder: String,
    output_folder: String,
    pub format_filter: FormatFilter,
    pub stream: StreamSelection,
    pub sample_rate: SampleRate,
    pub codec: BitDepthCodec,
    pub channels: Channels,
    pub normalize: bool,
    pub embed_ixml: bool,
    pub dry_run: bool,
}

impl TryFrom<&JobSettings> for JobConfig {
    type Error = ConfigError;

    fn try_from(s: &JobSettings) -> Result<Self, Self::Error> {
        let input_folder = s.input_folder.trim();
        let output_folder = s.output_folder.trim();
        if input_folder.is_empty() || output_folder.is_empty() {
            return Err(ConfigError::MissingFolders);
        }
        Ok(Self {
            input_folder: input_folder.to_string(),
            output_folder: output_folder.to_string(),
            format_filter: s.format_filter,
            stream: s.stream,
            sample_rate: s.sample_rate,
            codec: s.codec,
            channels: s.channels,
            normalize: s.normalize,
            embed_ixml: s.embed_ixml,
            dry_run: s.dry_run,
        })
    }
}

impl JobConfig {
    pub fn input_folder(&self) -> &str {
        &self.input_folder
    }

    pub fn output_folder(&self) -> &str {
        &self.output_folder
    }

    /// One human-readable line per facet of the run, in the order they are logged.
    pub fn summary_lines(&self) -> [String; 7] {
        [
            format!("Input folder: {}", self.input_folder),
            format!("Output folder: {}", self.output_folder),
            format!("Format filter: {}", self.format_filter.label()),
            format!(
                "Audio: {} {} {}",
                self.sample_rate.label(),
                self.codec.as_str(),
                self.channels.label()
            ),
            format!("Normalize: {}", on_off(self.normalize)),
            format!("Embed iXML: {}", on_off(self.embed_ixml)),
            format!("Stream selection: {}", self.stream.label()),
        ]
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
    Completed,
}

/// Per-file outcome tag reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Ready,
    MissingMetadata,
    Error,
    Probed,
}

/// One progress event from the conversion pipeline, describing a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub source: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub timecode: Option<String>,
    #[serde(default)]
    pub reel: Option<String>,
    /// Free-form explanation, usually only present on errors.
    #[serde(default)]
    pub detail: Option<String>,
    pub outcome: Outcome,
}

impl ConversionEvent {
    pub fn new(source: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            source: source.into(),
            output: None,
            timecode: None,
            reel: None,
            detail: None,
            outcome,
        }
    }

    pub fn with_timecode(mut self, timecode: impl Into<String>) -> Self {
        self.timecode = Some(timecode.into());
        self
    }

    pub fn with_reel(mut self, reel: impl Into<String>) -> Self {
        self.reel = Some(reel.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    Ready,
    DryRun,
    MissingMetadata,
    Error,
}

impl RowStatus {
    pub fn label(self) -> &'static str {
        match self {
            RowStatus::Pending => "Pending",
            RowStatus::Ready => "Ready",
            RowStatus::DryRun => "Dry run",
            RowStatus::MissingMetadata => "Missing metadata",
            RowStatus::Error => "Error",
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    pub source: String,
    pub output: String,
    pub timecode: Option<String>,
    pub reel: Option<String>,
    pub status: RowStatus,
}

impl ResultRow {
    pub fn pending(source: &str) -> Self {
        Self {
            source: source.to_string(),
            output: output_name_for(source),
            timecode: None,
            reel: None,
            status: RowStatus::Pending,
        }
    }
}

/// Destination name for a source: its final extension swapped for `.wav`.
pub fn output_name_for(source: &str) -> String {
    Path::new(source)
        .with_extension("wav")
        .to_string_lossy()
        .into_owned()
}

/// How a call to `start` ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Folders missing; an advisory was logged.
    Rejected,
    /// Another run holds the orchestrator.
    AlreadyRunning,
    Completed { files: usize },
    Stopped,
    Failed { reason: String },
}
