//! Job start polling and pod log streaming
//!
//! `await_start` blocks the invocation until the job reports an active pod,
//! reports a failure, or the timeout budget runs out. The three outcomes are
//! distinguishable because a caller may retry a timed-out wait but never a
//! failed job. Log streaming merges the follow-streams of every pod matching
//! a label selector, tagging each line with its source pod.

use std::time::{Duration, Instant};

use futures::stream::{BoxStream, SelectAll};
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client};
use tracing::info;

use crate::{Error, Result};

/// Fixed sleep between job status polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default budget for waiting on a job to start
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(600);

/// Outcome of a single status poll while waiting for a job to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPoll {
    /// The job has at least one active pod
    Started,
    /// The job reported failed pods; carries the failed count
    Failed(i32),
    /// Neither condition holds yet
    Pending,
}

/// Classify one poll of (active, failed) counters.
///
/// Failure wins over activity within the same poll: a job that reports both
/// has already burned pods, and the caller must see that as fatal rather
/// than as a successful start.
pub fn classify_start_poll(active: i32, failed: i32) -> StartPoll {
    if failed > 0 {
        StartPoll::Failed(failed)
    } else if active > 0 {
        StartPoll::Started
    } else {
        StartPoll::Pending
    }
}

/// Block until the job starts, fails, or the timeout elapses.
///
/// Polls every [`POLL_INTERVAL`]. Errors:
/// - [`Error::JobFailed`] if failed-count goes positive before an active pod
///   is seen (fatal, not retryable)
/// - [`Error::Timeout`] if the budget runs out first (the wait may be
///   retried)
pub async fn await_start(
    client: &Client,
    job_name: &str,
    namespace: &str,
    timeout: Duration,
) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let start = Instant::now();

    loop {
        let job = jobs.get(job_name).await?;
        let status = job.status.as_ref();
        let active = status.and_then(|s| s.active).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);

        match classify_start_poll(active, failed) {
            StartPoll::Started => {
                info!(job = %job_name, "job is running");
                return Ok(());
            }
            StartPoll::Failed(failed) => {
                return Err(Error::JobFailed {
                    job: job_name.to_string(),
                    failed,
                });
            }
            StartPoll::Pending => {}
        }

        if start.elapsed() >= timeout {
            return Err(Error::timeout(
                format!("job {} to start", job_name),
                timeout.as_secs(),
            ));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// One log line tagged with the pod it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Source pod name
    pub pod: String,
    /// The line, without its trailing newline
    pub line: String,
}

/// Merged log stream over every pod matching a selector
pub struct PodLogs {
    /// Names of the pods being observed
    pub pods: Vec<String>,
    /// Fan-in merge of per-pod line streams; ends when every underlying
    /// connection closes
    pub stream: SelectAll<BoxStream<'static, std::io::Result<LogLine>>>,
}

/// Open a merged log stream over all pods matching `selector`.
///
/// Returns `Ok(None)` when no pods match: an absent result, not an error,
/// since the pods may simply not be scheduled yet or already garbage
/// collected.
pub async fn stream_logs(
    client: &Client,
    namespace: &str,
    selector: &str,
    follow: bool,
    tail_lines: Option<i64>,
) -> Result<Option<PodLogs>> {
    let pods_api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = pods_api
        .list(&ListParams::default().labels(selector))
        .await?;

    let names: Vec<String> = pods
        .items
        .iter()
        .filter_map(|p| p.metadata.name.clone())
        .collect();
    if names.is_empty() {
        return Ok(None);
    }

    let mut streams = Vec::new();
    for pod_name in &names {
        let log_params = LogParams {
            follow,
            tail_lines,
            ..Default::default()
        };
        let reader = pods_api.log_stream(pod_name, &log_params).await?;
        let pod = pod_name.clone();
        let lines = reader.lines().map(move |result| {
            result.map(|line| LogLine {
                pod: pod.clone(),
                line,
            })
        });
        streams.push(lines.boxed());
    }

    Ok(Some(PodLogs {
        pods: names,
        stream: futures::stream::select_all(streams),
    }))
}
