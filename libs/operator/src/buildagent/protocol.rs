//! Build-agent signal-file protocol (component D): a file-system contract
//! over a shared spool directory between the operator (the runner side,
//! writing requests) and a privileged build agent (executing them). Three
//! request kinds share the same job-id-prefixed naming scheme, each with
//! its own payload/trigger/response suffixes so a single spool directory
//! can be polled for all three without ambiguity.

use std::path::{Path, PathBuf};

/// The default time a runner-side client waits for a `.done`-class marker
/// before giving up.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// How often the agent-side watcher re-polls the spool directory.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    ImageBuild,
    ClusterCommand,
    ManifestApply,
}

fn spool_path(spool: &Path, job_id: &str, suffix: &str) -> PathBuf {
    spool.join(format!("{job_id}{suffix}"))
}

impl RequestKind {
    /// The trigger file whose appearance signals the agent to start. The
    /// agent must see every payload file fully written before this one, so
    /// the runner-side client always writes payload(s) first and the
    /// trigger last.
    pub fn trigger_path(&self, spool: &Path, job_id: &str) -> PathBuf {
        match self {
            RequestKind::ImageBuild => spool_path(spool, job_id, ".request"),
            RequestKind::ClusterCommand => spool_path(spool, job_id, ".kubectl"),
            RequestKind::ManifestApply => spool_path(spool, job_id, "-dse.apply"),
        }
    }

    /// Payload file(s) the trigger refers to.
    pub fn payload_paths(&self, spool: &Path, job_id: &str) -> Vec<PathBuf> {
        match self {
            RequestKind::ImageBuild => vec![
                spool_path(spool, job_id, ".tar.gz"),
                spool_path(spool, job_id, ".dest"),
            ],
            RequestKind::ClusterCommand => vec![spool_path(spool, job_id, ".sh")],
            RequestKind::ManifestApply => vec![spool_path(spool, job_id, "-dse.yaml")],
        }
    }

    pub fn done_path(&self, spool: &Path, job_id: &str) -> PathBuf {
        match self {
            RequestKind::ImageBuild => spool_path(spool, job_id, ".done"),
            RequestKind::ClusterCommand => spool_path(spool, job_id, ".kubectl-done"),
            RequestKind::ManifestApply => spool_path(spool, job_id, "-dse.apply-done"),
        }
    }

    pub fn exitcode_path(&self, spool: &Path, job_id: &str) -> PathBuf {
        match self {
            RequestKind::ImageBuild => spool_path(spool, job_id, ".exitcode"),
            RequestKind::ClusterCommand => spool_path(spool, job_id, ".kubectl-exitcode"),
            RequestKind::ManifestApply => spool_path(spool, job_id, "-dse.apply-exitcode"),
        }
    }

    pub fn log_path(&self, spool: &Path, job_id: &str) -> PathBuf {
        match self {
            RequestKind::ImageBuild => spool_path(spool, job_id, ".log"),
            RequestKind::ClusterCommand => spool_path(spool, job_id, ".kubectl-log"),
            RequestKind::ManifestApply => spool_path(spool, job_id, "-dse.apply-log"),
        }
    }

    /// All three kinds, used by the agent-side watcher to scan for any
    /// pending trigger on each poll tick.
    pub const ALL: [RequestKind; 3] = [
        RequestKind::ImageBuild,
        RequestKind::ClusterCommand,
        RequestKind::ManifestApply,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_build_suffixes_match_protocol() {
        let spool = Path::new("/spool");
        let kind = RequestKind::ImageBuild;
        assert_eq!(kind.trigger_path(spool, "job1"), spool.join("job1.request"));
        assert_eq!(kind.done_path(spool, "job1"), spool.join("job1.done"));
        assert_eq!(kind.exitcode_path(spool, "job1"), spool.join("job1.exitcode"));
        assert_eq!(kind.log_path(spool, "job1"), spool.join("job1.log"));
    }

    #[test]
    fn cluster_command_suffixes_match_protocol() {
        let spool = Path::new("/spool");
        let kind = RequestKind::ClusterCommand;
        assert_eq!(kind.trigger_path(spool, "job2"), spool.join("job2.kubectl"));
        assert_eq!(
            kind.done_path(spool, "job2"),
            spool.join("job2.kubectl-done")
        );
        assert_eq!(
            kind.exitcode_path(spool, "job2"),
            spool.join("job2.kubectl-exitcode")
        );
        assert_eq!(
            kind.log_path(spool, "job2"),
            spool.join("job2.kubectl-log")
        );
    }

    #[test]
    fn manifest_apply_suffixes_match_protocol() {
        let spool = Path::new("/spool");
        let kind = RequestKind::ManifestApply;
        assert_eq!(kind.trigger_path(spool, "job3"), spool.join("job3-dse.apply"));
        assert_eq!(
            kind.payload_paths(spool, "job3"),
            vec![spool.join("job3-dse.yaml")]
        );
        assert_eq!(
            kind.done_path(spool, "job3"),
            spool.join("job3-dse.apply-done")
        );
    }
}
