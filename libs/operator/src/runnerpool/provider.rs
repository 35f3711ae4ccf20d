//! Provider descriptor table for the runner-pool reconciler (component B):
//! the per-CI-provider facts needed to run a self-hosted runner sidecar,
//! mirroring how `registry::DependencyRegistry` tables component C's facts.

use crate::crd::runnerpool::CiProvider;

/// Static facts about one CI provider's self-hosted runner image and
/// registration contract.
pub struct ProviderDescriptor {
    /// Human-readable name surfaced in logs and the reset operation's
    /// output; never used in resource naming.
    pub display_name: &'static str,
    pub default_image: &'static str,
    pub default_base_url: &'static str,
    pub token_env_var_name: &'static str,
    pub repository_env_var_name: &'static str,
    /// Key under which the registration token lives in both the
    /// user-supplied secret (when its own `key` is unset) and the
    /// operator-owned secret the reconciler derives from it.
    pub default_token_key: &'static str,
    /// Name of the provider-wide token secret the reset operation deletes
    /// once every pool for this provider has been torn down.
    pub default_secret_name: &'static str,
    /// Value used to tag every resource a pool of this provider produces,
    /// so pools for different providers never collide on name alone.
    pub resource_label: &'static str,
}

pub fn descriptor(provider: CiProvider) -> ProviderDescriptor {
    match provider {
        CiProvider::GitHub => ProviderDescriptor {
            display_name: "GitHub Actions",
            default_image: "myoung34/github-runner:latest",
            default_base_url: "https://github.com",
            token_env_var_name: "RUNNER_TOKEN",
            repository_env_var_name: "REPO_URL",
            default_token_key: "token",
            default_secret_name: "github-runner-token",
            resource_label: "github",
        },
        CiProvider::Gitlab => ProviderDescriptor {
            display_name: "GitLab CI",
            default_image: "gitlab/gitlab-runner:latest",
            default_base_url: "https://gitlab.com",
            token_env_var_name: "CI_SERVER_TOKEN",
            repository_env_var_name: "CI_SERVER_URL",
            default_token_key: "token",
            default_secret_name: "gitlab-runner-token",
            resource_label: "gitlab",
        },
    }
}

/// DNS-safe, 63-character-bounded resource name derived from a free-form
/// developer handle: lowercased, non-alphanumeric runs collapsed to a
/// single hyphen, leading/trailing hyphens trimmed, then suffixed with
/// `-runner-pool` (truncating the handle portion, never the suffix, to fit).
pub fn sanitize_pool_name(developer_handle: &str) -> String {
    const SUFFIX: &str = "-runner-pool";
    const MAX_LEN: usize = 63;

    let mut slug = String::with_capacity(developer_handle.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen
    for ch in developer_handle.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }

    let max_slug_len = MAX_LEN - SUFFIX.len();
    if slug.len() > max_slug_len {
        slug.truncate(max_slug_len);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    format!("{slug}{SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_dotted_handle_sanitizes_to_hyphenated_pool_name() {
        assert_eq!(sanitize_pool_name("Ada.Lovelace"), "ada-lovelace-runner-pool");
    }

    #[test]
    fn collapses_runs_of_separators() {
        assert_eq!(sanitize_pool_name("a__b--c"), "a-b-c-runner-pool");
    }

    #[test]
    fn truncates_long_handles_without_trailing_hyphen() {
        let handle = "x".repeat(100);
        let name = sanitize_pool_name(&handle);
        assert!(name.len() <= 63);
        assert!(name.ends_with("-runner-pool"));
        assert!(!name[..name.len() - "-runner-pool".len()].ends_with('-'));
    }

    #[test]
    fn github_and_gitlab_have_distinct_descriptors() {
        assert_ne!(
            descriptor(CiProvider::GitHub).default_image,
            descriptor(CiProvider::Gitlab).default_image
        );
    }
}
