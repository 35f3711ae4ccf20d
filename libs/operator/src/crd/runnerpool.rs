//! `RunnerPool` custom resource (spec §3). Binds a pool of self-hosted CI
//! runners to a repository; the runner-pool reconciler (component B)
//! converges it to a runner deployment and a registration-token secret.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_replicas() -> i32 {
    1
}

/// The self-hosted CI provider a pool registers with. The reconciler looks
/// up a `ProviderDescriptor` (see `runnerpool::provider`) by this value;
/// an empty/default `ciProvider` field resolves to `GitHub`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab-case")]
pub enum CiProvider {
    #[default]
    GitHub,
    Gitlab,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenSecretRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// The `RunnerPool` custom resource.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.example.com",
    version = "v1alpha1",
    kind = "RunnerPool",
    plural = "runnerpools",
    singular = "runnerpool",
    shortname = "rp",
    namespaced,
    status = "RunnerPoolStatus",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.ciProvider"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyRunners"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPoolSpec {
    #[serde(default)]
    pub ci_provider: CiProvider,

    /// The developer's handle, preserved verbatim (used as a runner label
    /// and, sanitised, as the deployment-name component).
    pub developer_handle: String,

    /// `owner/repo` slug the runners register against.
    pub repository: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<TokenSecretRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub extra_labels: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPoolStatus {
    #[serde(default)]
    pub ready_runners: i32,
    #[serde(default)]
    pub runner_registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}
