use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolver::BroadcastMetadata;

/// Where one capture run reads and writes. Scratch names are disjoint
/// per job, so jobs never contend on a file.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    /// Formatted, sanitized broadcast name, without extension.
    pub base_name: String,
    /// Directory receiving the final artifact.
    pub output_dir: PathBuf,
    /// Directory holding intermediate artifacts for this run.
    pub scratch_dir: PathBuf,
}

impl CapturePlan {
    pub fn new(
        base_name: impl Into<String>,
        output_dir: impl AsRef<Path>,
        scratch_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            base_name: base_name.into(),
            output_dir: output_dir.as_ref().to_path_buf(),
            scratch_dir: scratch_dir.as_ref().to_path_buf(),
        }
    }

    pub fn scratch_playlist(&self) -> PathBuf {
        self.scratch_dir.join(format!("{}.m3u8", self.base_name))
    }

    pub fn historical_output(&self) -> PathBuf {
        self.scratch_dir.join(format!("{}.m4a", self.base_name))
    }

    pub fn live_edge_output(&self) -> PathBuf {
        self.scratch_dir.join(format!("{}_new.m4a", self.base_name))
    }

    pub fn final_output(&self) -> PathBuf {
        self.output_dir.join(format!("{}.m4a", self.base_name))
    }
}

/// One unit of work for the external muxer.
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub stage: CaptureStage,
    /// Playlist file path, live URL, or concat pseudo-input.
    pub source: String,
    pub output: PathBuf,
    /// Wall-clock budget. None runs to completion.
    pub timeout: Option<Duration>,
    /// Local playlist inputs need the muxer's protocol whitelist opened
    /// for the https segment fetches the playlist points at.
    pub local_input: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Historical,
    LiveEdge,
    Concat,
}

impl CaptureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStage::Historical => "historical",
            CaptureStage::LiveEdge => "live-edge",
            CaptureStage::Concat => "concat",
        }
    }
}

impl std::fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of one job, observed individually so the
/// orchestrator can decide the overall outcome explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Completed,
    Failed { status: Option<i32>, detail: String },
    TimedOut,
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Completed)
    }

    pub fn describe(&self) -> String {
        match self {
            CaptureOutcome::Completed => "completed".to_string(),
            CaptureOutcome::Failed { status, detail } => match status {
                Some(code) => format!("exited with status {code}: {detail}"),
                None => format!("failed: {detail}"),
            },
            CaptureOutcome::TimedOut => "exceeded its wall-clock budget".to_string(),
        }
    }
}

/// Descriptive tags stamped onto the output container.
#[derive(Debug, Clone, Default)]
pub struct MuxTags {
    pub title: String,
    pub author: String,
    pub episode_id: String,
}

impl MuxTags {
    pub fn from_metadata(metadata: &BroadcastMetadata) -> Self {
        Self {
            title: metadata.title.clone(),
            author: metadata.creator_name.clone(),
            episode_id: metadata.id.clone(),
        }
    }
}
