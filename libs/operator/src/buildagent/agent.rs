//! Agent-side spool watcher: polls the shared spool directory for trigger
//! files, executes the corresponding job, and writes back the response
//! files the runner-side client is waiting on. No file-watch crate is used;
//! the watcher is a plain polling loop, matching the rest of this codebase's
//! preference for explicit tokio timers over inotify-style dependencies.

use crate::buildagent::protocol::{RequestKind, POLL_INTERVAL};
use crate::error::{Error, Result};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

/// Runs the agent loop forever, polling `spool` every `POLL_INTERVAL`.
pub async fn run(spool: PathBuf) -> Result<()> {
    let mut handled: HashSet<PathBuf> = HashSet::new();
    loop {
        for kind in RequestKind::ALL {
            if let Some(job_id) = find_pending_trigger(&spool, kind, &handled).await? {
                let trigger = kind.trigger_path(&spool, &job_id);
                handled.insert(trigger.clone());
                if let Err(e) = execute_job(&spool, kind, &job_id).await {
                    warn!("build-agent job {job_id} failed: {e:?}");
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn find_pending_trigger(
    spool: &Path,
    kind: RequestKind,
    handled: &HashSet<PathBuf>,
) -> Result<Option<String>> {
    let mut entries = fs::read_dir(spool).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if handled.contains(&path) {
            continue;
        }
        if let Some(job_id) = job_id_for_trigger(spool, &path, kind) {
            if !path_all_payloads_present(spool, kind, &job_id).await {
                continue;
            }
            return Ok(Some(job_id));
        }
    }
    Ok(None)
}

fn job_id_for_trigger(spool: &Path, path: &Path, kind: RequestKind) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let suffix = match kind {
        RequestKind::ImageBuild => ".request",
        RequestKind::ClusterCommand => ".kubectl",
        RequestKind::ManifestApply => "-dse.apply",
    };
    let job_id = file_name.strip_suffix(suffix)?;
    if kind.trigger_path(spool, job_id) == path {
        Some(job_id.to_owned())
    } else {
        None
    }
}

async fn path_all_payloads_present(spool: &Path, kind: RequestKind, job_id: &str) -> bool {
    futures::future::join_all(
        kind.payload_paths(spool, job_id)
            .into_iter()
            .map(fs::try_exists),
    )
    .await
    .into_iter()
    .all(|exists| matches!(exists, Ok(true)))
}

async fn execute_job(spool: &Path, kind: RequestKind, job_id: &str) -> Result<()> {
    info!("executing build-agent job {job_id} ({kind:?})");
    let (exit_code, log) = match kind {
        RequestKind::ImageBuild => run_image_build(spool, job_id).await?,
        RequestKind::ClusterCommand => run_cluster_command(spool, job_id).await?,
        RequestKind::ManifestApply => run_manifest_apply(spool, job_id).await?,
    };

    fs::write(kind.log_path(spool, job_id), log).await?;
    fs::write(kind.exitcode_path(spool, job_id), exit_code.to_string()).await?;
    // The done sentinel is written last: the runner-side client only
    // considers a job finished once it observes this file.
    fs::write(kind.done_path(spool, job_id), b"").await?;
    Ok(())
}

async fn run_output(mut command: Command) -> Result<(i32, String)> {
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
    log.push_str(&String::from_utf8_lossy(&output.stderr));
    let exit_code = output.status.code().unwrap_or(-1);
    Ok((exit_code, log))
}

async fn run_image_build(spool: &Path, job_id: &str) -> Result<(i32, String)> {
    let dest_path = spool.join(format!("{job_id}.dest"));
    let context_path = spool.join(format!("{job_id}.tar.gz"));
    let mut dest = String::new();
    fs::File::open(&dest_path)
        .await?
        .read_to_string(&mut dest)
        .await?;
    let dest = dest.trim();

    let mut build = Command::new("docker");
    build
        .arg("build")
        .arg("-t")
        .arg(dest)
        .arg("-")
        .stdin(Stdio::from(std::fs::File::open(&context_path).map_err(Error::Io)?));
    let (build_exit_code, mut log) = run_output(build).await?;
    if build_exit_code != 0 {
        return Ok((build_exit_code, log));
    }

    let mut push = Command::new("docker");
    push.arg("push").arg(dest);
    let (push_exit_code, push_log) = run_output(push).await?;
    log.push_str(&push_log);
    Ok((push_exit_code, log))
}

async fn run_cluster_command(spool: &Path, job_id: &str) -> Result<(i32, String)> {
    let script_path = spool.join(format!("{job_id}.sh"));
    let mut command = Command::new("sh");
    command.arg(script_path);
    run_output(command).await
}

async fn run_manifest_apply(spool: &Path, job_id: &str) -> Result<(i32, String)> {
    let manifest_path = spool.join(format!("{job_id}-dse.yaml"));
    let mut command = Command::new("kubectl");
    command.arg("apply").arg("-f").arg(manifest_path);
    run_output(command).await
}
