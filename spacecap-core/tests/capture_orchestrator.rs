use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;

use spacecap_core::capture::{
    CaptureError, CaptureOrchestrator, CapturePlan, CommandExecutor,
};
use spacecap_core::chain::StreamEndpoints;
use spacecap_core::config::CaptureSection;
use spacecap_core::resolver::{BroadcastMetadata, LifecycleState};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
#[cfg(windows)]
use std::os::windows::process::ExitStatusExt;

const DYNAMIC_URL: &str = "https://host.tv/hls/abc/dynamic_playlist.m3u8?type=live";
const PLAYLIST_TEXT: &str = "#EXTM3U\n#EXTINF:2.999,\nhttps://host.tv/hls/abc/chunk_0001.ts\n#EXT-X-ENDLIST\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeStage {
    Probe,
    Historical,
    LiveEdge,
    Concat,
}

#[derive(Debug, Clone, Copy)]
enum JobResponse {
    Succeed,
    Fail(&'static str),
    /// Exits successfully but leaves the partial output file behind.
    FailLeavingOutput(&'static str),
    Hang,
    NotFound,
}

/// Test double for the muxer binary: records every command line and
/// answers according to the per-stage script.
struct ScriptedMuxer {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    script: Arc<dyn Fn(FakeStage) -> JobResponse + Send + Sync>,
}

impl ScriptedMuxer {
    fn new(script: impl Fn(FakeStage) -> JobResponse + Send + Sync + 'static) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(script),
        }
    }

    fn succeed_all() -> Self {
        Self::new(|_| JobResponse::Succeed)
    }

    fn recorded(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

fn classify(args: &[String]) -> FakeStage {
    if args.iter().any(|arg| arg == "-version") {
        return FakeStage::Probe;
    }
    let source = source_arg(args);
    if source.starts_with("concat:") {
        FakeStage::Concat
    } else if source.starts_with("http") {
        FakeStage::LiveEdge
    } else {
        FakeStage::Historical
    }
}

fn source_arg(args: &[String]) -> &str {
    let input = args
        .iter()
        .position(|arg| arg == "-i")
        .expect("capture command carries an input");
    &args[input + 1]
}

fn success_status() -> std::process::ExitStatus {
    std::process::ExitStatus::from_raw(0)
}

fn failure_status() -> std::process::ExitStatus {
    #[cfg(unix)]
    {
        std::process::ExitStatus::from_raw(1 << 8)
    }
    #[cfg(windows)]
    {
        std::process::ExitStatus::from_raw(1)
    }
}

#[async_trait::async_trait]
impl CommandExecutor for ScriptedMuxer {
    async fn run(&self, command: &mut Command) -> io::Result<std::process::Output> {
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        let stage = classify(&args);
        let response = (self.script)(stage);
        if !matches!(response, JobResponse::NotFound) {
            self.calls.lock().unwrap().push(args.clone());
        }
        match response {
            JobResponse::NotFound => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )),
            JobResponse::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(std::process::Output {
                    status: success_status(),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
            }
            JobResponse::Succeed => {
                if stage != FakeStage::Probe {
                    let output = args.last().unwrap();
                    std::fs::write(output, b"AUDIO").unwrap();
                }
                Ok(std::process::Output {
                    status: success_status(),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                })
            }
            JobResponse::Fail(stderr) => Ok(std::process::Output {
                status: failure_status(),
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            }),
            JobResponse::FailLeavingOutput(stderr) => {
                if stage != FakeStage::Probe {
                    let output = args.last().unwrap();
                    std::fs::write(output, b"PARTIAL").unwrap();
                }
                Ok(std::process::Output {
                    status: failure_status(),
                    stdout: Vec::new(),
                    stderr: stderr.as_bytes().to_vec(),
                })
            }
        }
    }
}

fn metadata(state: LifecycleState) -> BroadcastMetadata {
    BroadcastMetadata {
        id: "1vOxwdPZolX".to_string(),
        media_key: "28_1299".to_string(),
        state,
        title: "late show".to_string(),
        creator_name: "Ana".to_string(),
        creator_screen_name: "ana_fm".to_string(),
        started_at_ms: Some(1_651_093_200_000),
        raw: serde_json::Value::Null,
    }
}

fn endpoints(dynamic: bool) -> StreamEndpoints {
    StreamEndpoints {
        dynamic_url: dynamic.then(|| DYNAMIC_URL.to_string()),
        master_url: "https://host.tv/hls/abc/master_playlist.m3u8".to_string(),
        chunk_playlist_url: "https://host.tv/hls/abc/playlist_16443.m3u8".to_string(),
        playlist_text: PLAYLIST_TEXT.to_string(),
    }
}

fn plan(base: &TempDir) -> CapturePlan {
    CapturePlan::new("space", base.path().join("out"), base.path().join("tmp"))
}

fn orchestrator(executor: Arc<dyn CommandExecutor>) -> CaptureOrchestrator {
    let config = CaptureSection {
        parallelism: 2,
        ..CaptureSection::default()
    };
    CaptureOrchestrator::new(config, Some(executor))
}

fn job_calls(calls: &[Vec<String>]) -> Vec<&Vec<String>> {
    calls
        .iter()
        .filter(|args| classify(args) != FakeStage::Probe)
        .collect()
}

#[tokio::test]
async fn ended_space_runs_one_job_from_the_local_playlist() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::succeed_all());
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let final_path = orchestrator
        .capture(&metadata(LifecycleState::Ended), &endpoints(false), &plan)
        .await
        .unwrap();

    assert_eq!(final_path, base.path().join("out").join("space.m4a"));
    assert!(final_path.exists());
    // The live-edge scratch artifact must never appear on this branch.
    assert!(!plan.live_edge_output().exists());

    let playlist = plan.scratch_playlist();
    assert_eq!(std::fs::read_to_string(&playlist).unwrap(), PLAYLIST_TEXT);

    let calls = muxer.recorded();
    let jobs = job_calls(&calls);
    assert_eq!(jobs.len(), 1);
    assert_eq!(source_arg(jobs[0]), playlist.to_string_lossy());
    assert!(jobs[0].contains(&"-protocol_whitelist".to_string()));
}

#[tokio::test]
async fn running_space_runs_two_parallel_jobs_then_one_concat() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::succeed_all());
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let final_path = orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap();
    assert!(final_path.exists());

    let calls = muxer.recorded();
    let jobs = job_calls(&calls);
    assert_eq!(jobs.len(), 3);

    let stages: Vec<FakeStage> = jobs.iter().map(|args| classify(args)).collect();
    assert_eq!(
        stages
            .iter()
            .filter(|stage| **stage == FakeStage::Historical)
            .count(),
        1
    );
    assert_eq!(
        stages
            .iter()
            .filter(|stage| **stage == FakeStage::LiveEdge)
            .count(),
        1
    );
    // The concat job is strictly sequential: always the last command.
    assert_eq!(*stages.last().unwrap(), FakeStage::Concat);
}

#[tokio::test]
async fn concat_input_order_is_history_then_live_edge() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::succeed_all());
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap();

    let calls = muxer.recorded();
    let concat = calls
        .iter()
        .find(|args| classify(args) == FakeStage::Concat)
        .expect("concat job ran");
    let expected = format!(
        "concat:{}|{}",
        plan.historical_output().display(),
        plan.live_edge_output().display()
    );
    assert_eq!(source_arg(concat), expected);
}

#[tokio::test]
async fn lost_live_edge_falls_back_to_history_only() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::new(|stage| match stage {
        FakeStage::LiveEdge => JobResponse::Fail("403 Forbidden"),
        _ => JobResponse::Succeed,
    }));
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let final_path = orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap();

    assert!(final_path.exists());
    let calls = muxer.recorded();
    assert!(calls
        .iter()
        .all(|args| classify(args) != FakeStage::Concat));
}

#[tokio::test(start_paused = true)]
async fn timed_out_live_edge_falls_back_to_history_only() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::new(|stage| match stage {
        FakeStage::LiveEdge => JobResponse::Hang,
        _ => JobResponse::Succeed,
    }));
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let final_path = orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap();

    assert!(final_path.exists());
    let calls = muxer.recorded();
    assert!(calls
        .iter()
        .all(|args| classify(args) != FakeStage::Concat));
}

#[tokio::test]
async fn failed_history_job_fails_the_whole_capture() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::new(|stage| match stage {
        FakeStage::Historical => JobResponse::Fail("invalid playlist"),
        _ => JobResponse::Succeed,
    }));
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let err = orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap_err();
    match err {
        CaptureError::JobFailed { stage, outcome } => {
            assert_eq!(stage, "historical");
            assert!(outcome.contains("invalid playlist"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!plan.final_output().exists());
}

#[tokio::test]
async fn concat_failure_is_fatal_and_leaves_no_partial_artifact() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::new(|stage| match stage {
        FakeStage::Concat => JobResponse::FailLeavingOutput("corrupt input"),
        _ => JobResponse::Succeed,
    }));
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let err = orchestrator
        .capture(&metadata(LifecycleState::Running), &endpoints(true), &plan)
        .await
        .unwrap_err();
    match err {
        CaptureError::JobFailed { stage, .. } => assert_eq!(stage, "concat"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!plan.final_output().exists());
}

#[tokio::test]
async fn missing_muxer_fails_before_any_capture_work() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::new(|_| JobResponse::NotFound));
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    let err = orchestrator
        .capture(&metadata(LifecycleState::Ended), &endpoints(false), &plan)
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::MuxerUnavailable { .. }));
    // Nothing ran and nothing was staged.
    assert!(muxer.recorded().is_empty());
    assert!(!plan.scratch_playlist().exists());
}

#[tokio::test]
async fn muxer_probe_runs_once_per_orchestrator() {
    let base = TempDir::new().unwrap();
    let muxer = Arc::new(ScriptedMuxer::succeed_all());
    let orchestrator = orchestrator(muxer.clone());
    let plan = plan(&base);

    orchestrator.ensure_muxer().await.unwrap();
    orchestrator
        .capture(&metadata(LifecycleState::Ended), &endpoints(false), &plan)
        .await
        .unwrap();

    let probes = muxer
        .recorded()
        .iter()
        .filter(|args| classify(args) == FakeStage::Probe)
        .count();
    assert_eq!(probes, 1);
}
