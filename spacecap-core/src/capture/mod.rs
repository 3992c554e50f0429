mod error;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::process::Command;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::chain::StreamEndpoints;
use crate::config::CaptureSection;
use crate::resolver::BroadcastMetadata;

pub use error::{CaptureError, CaptureResult};
pub use types::{CaptureJob, CaptureOutcome, CapturePlan, CaptureStage, MuxTags};

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Decides single- vs dual-source capture from the broadcast lifecycle
/// state, runs the muxer job(s), and publishes exactly one final
/// artifact on success.
pub struct CaptureOrchestrator {
    config: CaptureSection,
    executor: Arc<dyn CommandExecutor>,
    muxer_probe: OnceCell<()>,
}

impl CaptureOrchestrator {
    pub fn new(config: CaptureSection, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        Self {
            config,
            executor,
            muxer_probe: OnceCell::new(),
        }
    }

    /// Probes the muxer binary once per orchestrator. Called eagerly so
    /// a missing tool fails the run before any derivation network work.
    pub async fn ensure_muxer(&self) -> CaptureResult<()> {
        self.muxer_probe
            .get_or_try_init(|| async {
                let mut command = Command::new(&self.config.muxer_binary);
                command.arg("-version");
                let output = self.executor.run(&mut command).await.map_err(|err| {
                    CaptureError::MuxerUnavailable {
                        binary: self.config.muxer_binary.clone(),
                        detail: err.to_string(),
                    }
                })?;
                if !output.status.success() {
                    return Err(CaptureError::MuxerUnavailable {
                        binary: self.config.muxer_binary.clone(),
                        detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    });
                }
                debug!(binary = %self.config.muxer_binary, "muxer probe succeeded");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn capture(
        &self,
        metadata: &BroadcastMetadata,
        endpoints: &StreamEndpoints,
        plan: &CapturePlan,
    ) -> CaptureResult<PathBuf> {
        self.ensure_muxer().await?;

        fs::create_dir_all(&plan.scratch_dir)
            .await
            .map_err(CaptureError::io(&plan.scratch_dir))?;
        fs::create_dir_all(&plan.output_dir)
            .await
            .map_err(CaptureError::io(&plan.output_dir))?;
        let playlist_path = plan.scratch_playlist();
        fs::write(&playlist_path, &endpoints.playlist_text)
            .await
            .map_err(CaptureError::io(&playlist_path))?;

        let tags = MuxTags::from_metadata(metadata);
        match endpoints.dynamic_url.as_deref() {
            Some(dynamic_url) if metadata.state.is_running() => {
                self.capture_dual(&playlist_path, dynamic_url, plan, &tags)
                    .await
            }
            _ => self.capture_single(&playlist_path, plan, &tags).await,
        }
    }

    /// Deterministic branch for broadcasts that are no longer growing:
    /// one job replays the rewritten playlist into the final artifact.
    async fn capture_single(
        &self,
        playlist_path: &Path,
        plan: &CapturePlan,
        tags: &MuxTags,
    ) -> CaptureResult<PathBuf> {
        let job = CaptureJob {
            stage: CaptureStage::Historical,
            source: playlist_path.to_string_lossy().to_string(),
            output: plan.historical_output(),
            timeout: None,
            local_input: true,
        };
        let outcome = run_job(
            Arc::clone(&self.executor),
            &self.config.muxer_binary,
            &job,
            tags,
        )
        .await;
        if !outcome.is_success() {
            return Err(CaptureError::JobFailed {
                stage: job.stage.to_string(),
                outcome: outcome.describe(),
            });
        }
        self.publish(&job.output, plan).await
    }

    /// Live branch: the playlist only covers segments buffered at query
    /// time, so a second job tails the live edge while the first drains
    /// the history, and a sequential concat stitches them.
    async fn capture_dual(
        &self,
        playlist_path: &Path,
        dynamic_url: &str,
        plan: &CapturePlan,
        tags: &MuxTags,
    ) -> CaptureResult<PathBuf> {
        let budget = self.config.job_timeout();
        let historical_job = CaptureJob {
            stage: CaptureStage::Historical,
            source: playlist_path.to_string_lossy().to_string(),
            output: plan.historical_output(),
            timeout: Some(budget),
            local_input: true,
        };
        let live_job = CaptureJob {
            stage: CaptureStage::LiveEdge,
            source: dynamic_url.to_string(),
            output: plan.live_edge_output(),
            timeout: Some(budget),
            local_input: false,
        };

        let pool = Arc::new(Semaphore::new(self.config.effective_parallelism().max(1)));
        let historical_handle = tokio::spawn(run_pooled(
            Arc::clone(&self.executor),
            self.config.muxer_binary.clone(),
            historical_job.clone(),
            tags.clone(),
            Arc::clone(&pool),
        ));
        let live_handle = tokio::spawn(run_pooled(
            Arc::clone(&self.executor),
            self.config.muxer_binary.clone(),
            live_job.clone(),
            tags.clone(),
            Arc::clone(&pool),
        ));

        let historical = join_outcome(historical_handle.await);
        let live_edge = join_outcome(live_handle.await);
        debug!(
            historical = %historical.describe(),
            live_edge = %live_edge.describe(),
            "parallel capture jobs settled"
        );

        // The historical playlist is the only complete record of the
        // broadcast so far; without it there is nothing to publish.
        if !historical.is_success() {
            return Err(CaptureError::JobFailed {
                stage: historical_job.stage.to_string(),
                outcome: historical.describe(),
            });
        }
        // A lost live edge degrades to the buffered history alone.
        if !live_edge.is_success() {
            warn!(
                outcome = %live_edge.describe(),
                "live-edge capture lost; publishing buffered history only"
            );
            return self.publish(&historical_job.output, plan).await;
        }

        // Chronological continuity requires history before live edge.
        let concat_job = CaptureJob {
            stage: CaptureStage::Concat,
            source: format!(
                "concat:{}|{}",
                historical_job.output.display(),
                live_job.output.display()
            ),
            output: plan.final_output(),
            timeout: None,
            local_input: false,
        };
        let outcome = run_job(
            Arc::clone(&self.executor),
            &self.config.muxer_binary,
            &concat_job,
            tags,
        )
        .await;
        if !outcome.is_success() {
            // Never leave a partial final artifact behind.
            let _ = fs::remove_file(&concat_job.output).await;
            return Err(CaptureError::JobFailed {
                stage: concat_job.stage.to_string(),
                outcome: outcome.describe(),
            });
        }
        info!(path = %concat_job.output.display(), "capture finished");
        Ok(concat_job.output)
    }

    async fn publish(&self, staged: &Path, plan: &CapturePlan) -> CaptureResult<PathBuf> {
        let final_path = plan.final_output();
        fs::rename(staged, &final_path)
            .await
            .map_err(CaptureError::io(&final_path))?;
        info!(path = %final_path.display(), "capture finished");
        Ok(final_path)
    }
}

async fn run_pooled(
    executor: Arc<dyn CommandExecutor>,
    muxer: String,
    job: CaptureJob,
    tags: MuxTags,
    pool: Arc<Semaphore>,
) -> CaptureOutcome {
    let _permit = match pool.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return CaptureOutcome::Failed {
                status: None,
                detail: "worker pool closed".to_string(),
            }
        }
    };
    run_job(executor, &muxer, &job, &tags).await
}

async fn run_job(
    executor: Arc<dyn CommandExecutor>,
    muxer: &str,
    job: &CaptureJob,
    tags: &MuxTags,
) -> CaptureOutcome {
    let mut command = Command::new(muxer);
    // An abandoned job must not outlive its budget.
    command.kill_on_drop(true);
    for arg in mux_args(job, tags) {
        command.arg(arg);
    }

    let result = match job.timeout {
        Some(budget) => match timeout(budget, executor.run(&mut command)).await {
            Ok(result) => result,
            Err(_) => return CaptureOutcome::TimedOut,
        },
        None => executor.run(&mut command).await,
    };
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            return CaptureOutcome::Failed {
                status: None,
                detail: err.to_string(),
            }
        }
    };
    if !output.status.success() {
        return CaptureOutcome::Failed {
            status: output.status.code(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
    }
    // A successful exit still has to have produced the artifact.
    match fs::metadata(&job.output).await {
        Ok(_) => CaptureOutcome::Completed,
        Err(_) => CaptureOutcome::Failed {
            status: output.status.code(),
            detail: "produced no output file".to_string(),
        },
    }
}

fn join_outcome(result: Result<CaptureOutcome, JoinError>) -> CaptureOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(err) => CaptureOutcome::Failed {
            status: None,
            detail: format!("capture task aborted: {err}"),
        },
    }
}

/// Muxer command line for one job: stream copy into the audio
/// container, descriptive tags, overwrite allowed.
fn mux_args(job: &CaptureJob, tags: &MuxTags) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-stats".to_string(),
        "-v".to_string(),
        "warning".to_string(),
    ];
    if job.local_input {
        args.push("-protocol_whitelist".to_string());
        args.push("file,https,tls,tcp".to_string());
    }
    args.push("-i".to_string());
    args.push(job.source.clone());
    args.push("-c".to_string());
    args.push("copy".to_string());
    args.push("-metadata".to_string());
    args.push(format!("title={}", tags.title));
    args.push("-metadata".to_string());
    args.push(format!("author={}", tags.author));
    args.push("-metadata".to_string());
    args.push(format!("episode_id={}", tags.episode_id));
    args.push(job.output.to_string_lossy().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_inputs_open_the_protocol_whitelist() {
        let job = CaptureJob {
            stage: CaptureStage::Historical,
            source: "tmp/space.m3u8".to_string(),
            output: PathBuf::from("tmp/space.m4a"),
            timeout: None,
            local_input: true,
        };
        let args = mux_args(&job, &MuxTags::default());
        let whitelist = args
            .iter()
            .position(|arg| arg == "-protocol_whitelist")
            .expect("whitelist flag present");
        assert_eq!(args[whitelist + 1], "file,https,tls,tcp");
        assert!(args.ends_with(&["tmp/space.m4a".to_string()]));
    }

    #[test]
    fn remote_inputs_run_without_whitelist_and_carry_tags() {
        let job = CaptureJob {
            stage: CaptureStage::LiveEdge,
            source: "https://host.tv/dynamic_playlist.m3u8".to_string(),
            output: PathBuf::from("tmp/space_new.m4a"),
            timeout: None,
            local_input: false,
        };
        let tags = MuxTags {
            title: "late show".to_string(),
            author: "Ana".to_string(),
            episode_id: "1vOx".to_string(),
        };
        let args = mux_args(&job, &tags);
        assert!(!args.contains(&"-protocol_whitelist".to_string()));
        assert!(args.contains(&"title=late show".to_string()));
        assert!(args.contains(&"author=Ana".to_string()));
        assert!(args.contains(&"episode_id=1vOx".to_string()));
        let input = args.iter().position(|arg| arg == "-i").unwrap();
        assert_eq!(args[input + 1], "https://host.tv/dynamic_playlist.m3u8");
    }
}
