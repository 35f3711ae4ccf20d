//! Runner-side client for the build-agent protocol: writes a request's
//! payload file(s) then its trigger, polls for the matching `.done`-class
//! marker, and surfaces the exit code (and, on failure, the log).

use crate::buildagent::protocol::{RequestKind, DEFAULT_TIMEOUT, POLL_INTERVAL};
use crate::error::{Error, Result};

use std::path::Path;
use tokio::fs;
use tokio::time::Instant;

pub struct JobOutcome {
    pub exit_code: i32,
    /// Populated only when `exit_code != 0`, so a successful job doesn't
    /// pay for reading a log nobody will look at.
    pub log: Option<String>,
}

/// Submits an image-build request: `tar_gz` is the build context, `dest` is
/// the destination image reference.
pub async fn submit_image_build(
    spool: &Path,
    job_id: &str,
    tar_gz: &[u8],
    dest: &str,
) -> Result<JobOutcome> {
    let kind = RequestKind::ImageBuild;
    fs::write(spool.join(format!("{job_id}.tar.gz")), tar_gz).await?;
    fs::write(spool.join(format!("{job_id}.dest")), dest).await?;
    submit_trigger_and_await(spool, kind, job_id).await
}

/// Submits a cluster-command request: `script` is shell run by the agent.
pub async fn submit_cluster_command(spool: &Path, job_id: &str, script: &str) -> Result<JobOutcome> {
    let kind = RequestKind::ClusterCommand;
    fs::write(spool.join(format!("{job_id}.sh")), script).await?;
    submit_trigger_and_await(spool, kind, job_id).await
}

/// Submits a manifest-apply request: `manifest_yaml` is applied with `kubectl`.
pub async fn submit_manifest_apply(
    spool: &Path,
    job_id: &str,
    manifest_yaml: &str,
) -> Result<JobOutcome> {
    let kind = RequestKind::ManifestApply;
    fs::write(spool.join(format!("{job_id}-dse.yaml")), manifest_yaml).await?;
    submit_trigger_and_await(spool, kind, job_id).await
}

async fn submit_trigger_and_await(spool: &Path, kind: RequestKind, job_id: &str) -> Result<JobOutcome> {
    // The trigger is written last: the agent only starts once every
    // payload file for this job is already on disk.
    fs::write(kind.trigger_path(spool, job_id), b"").await?;
    await_completion(spool, kind, job_id, DEFAULT_TIMEOUT).await
}

async fn await_completion(
    spool: &Path,
    kind: RequestKind,
    job_id: &str,
    timeout: std::time::Duration,
) -> Result<JobOutcome> {
    let deadline = Instant::now() + timeout;
    let done_path = kind.done_path(spool, job_id);
    loop {
        if fs::try_exists(&done_path).await? {
            break;
        }
        if Instant::now() >= deadline {
            return Err(Error::Protocol(format!(
                "build-agent job {job_id} did not complete within {}s",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let exit_code_raw = fs::read_to_string(kind.exitcode_path(spool, job_id)).await?;
    let exit_code: i32 = exit_code_raw.trim().parse().map_err(|_| {
        Error::Protocol(format!(
            "build-agent job {job_id} wrote a non-numeric exit code: {exit_code_raw:?}"
        ))
    })?;

    let log = if exit_code != 0 {
        Some(fs::read_to_string(kind.log_path(spool, job_id)).await?)
    } else {
        None
    };

    Ok(JobOutcome { exit_code, log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn image_build_round_trip_reports_success() {
        let dir = tempdir().unwrap();
        let spool = dir.path().to_owned();

        let submit_spool = spool.clone();
        let submit = tokio::spawn(async move {
            submit_image_build(&submit_spool, "job1", b"fake-tar-contents", "registry/app:latest").await
        });

        // Simulate the agent: wait for the trigger, then write a success response.
        let kind = RequestKind::ImageBuild;
        loop {
            if fs::try_exists(kind.trigger_path(&spool, "job1")).await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        fs::write(kind.log_path(&spool, "job1"), "built ok").await.unwrap();
        fs::write(kind.exitcode_path(&spool, "job1"), "0").await.unwrap();
        fs::write(kind.done_path(&spool, "job1"), b"").await.unwrap();

        let outcome = submit.await.unwrap().unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.log.is_none());
    }

    #[tokio::test]
    async fn nonzero_exit_code_surfaces_the_log() {
        let dir = tempdir().unwrap();
        let spool = dir.path().to_owned();
        let kind = RequestKind::ClusterCommand;

        let submit_spool = spool.clone();
        let submit =
            tokio::spawn(async move { submit_cluster_command(&submit_spool, "job2", "exit 1").await });

        loop {
            if fs::try_exists(kind.trigger_path(&spool, "job2")).await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        fs::write(kind.log_path(&spool, "job2"), "command failed").await.unwrap();
        fs::write(kind.exitcode_path(&spool, "job2"), "1").await.unwrap();
        fs::write(kind.done_path(&spool, "job2"), b"").await.unwrap();

        let outcome = submit.await.unwrap().unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.log.as_deref(), Some("command failed"));
    }
}
