//! `DevStagingEnvironment` custom resource (spec §3). One object expands
//! into an application workload, a service, an optional ingress, and one
//! deployment/service/secret triple per declared dependency.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_replicas() -> i32 {
    1
}

fn default_path() -> String {
    "/".to_owned()
}

fn default_initial_delay_seconds() -> u32 {
    5
}

fn default_period_seconds() -> u32 {
    10
}

/// The `DevStagingEnvironment` (DSE) custom resource. Declares an
/// application workload, its ingress surface, and its dependencies; the
/// environment reconciler (component A) converges cluster state to match.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "apps.example.com",
    version = "v1alpha1",
    kind = "DevStagingEnvironment",
    plural = "devstagingenvironments",
    singular = "devstagingenvironment",
    shortname = "dse",
    namespaced,
    status = "DevStagingEnvironmentStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type == 'Ready')].status"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DevStagingEnvironmentSpec {
    pub application: AppSpec,
    #[serde(default)]
    pub service: ServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

/// The application workload sub-block.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Fully-qualified container image reference.
    pub image: String,

    /// Container port the application listens on. Must be in 1..=65535;
    /// enforced by the CRD schema's range validation.
    #[schemars(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantities>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Health-check configuration. Unspecified (the field is `None` on
/// `AppSpec`) means no probes are attached at all. When present, exactly
/// one of `http`/`grpc` should be set, or `disabled` should be `true`; the
/// reconciler treats an `http` block with an empty path as `/healthz`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpHealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grpc: Option<GrpcHealthCheck>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: u32,
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrpcHealthCheck {
    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: u32,
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Defaults to the application port when unset; resolved during
    /// spec normalisation (see `resolve`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    #[serde(default)]
    pub kind: ServiceKind,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ServiceKind {
    #[default]
    ClusterIp,
    NodePort,
    LoadBalancer,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub path_type: PathType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<IngressTlsSpec>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum PathType {
    #[default]
    Prefix,
    Exact,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressTlsSpec {
    pub secret_name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// A single declared dependency. Resource names are deterministically
/// formed as `<dse-name>-<kind>`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependencySpec {
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,
}

/// The closed set of dependency kinds the registry (component C) knows how
/// to provision.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Postgres,
    Redis,
    Mysql,
    Mongodb,
    Rabbitmq,
    ObjectStore,
    Elasticsearch,
    Kafka,
    Nats,
    Memcached,
    Cassandra,
    Consul,
    Vault,
    Influxdb,
    Jaeger,
}

impl DependencyKind {
    /// The string used both as the CR-facing kebab-case tag and as the
    /// `<kind>` suffix in `<dse-name>-<kind>` resource names.
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Postgres => "postgres",
            DependencyKind::Redis => "redis",
            DependencyKind::Mysql => "mysql",
            DependencyKind::Mongodb => "mongodb",
            DependencyKind::Rabbitmq => "rabbitmq",
            DependencyKind::ObjectStore => "object-store",
            DependencyKind::Elasticsearch => "elasticsearch",
            DependencyKind::Kafka => "kafka",
            DependencyKind::Nats => "nats",
            DependencyKind::Memcached => "memcached",
            DependencyKind::Cassandra => "cassandra",
            DependencyKind::Consul => "consul",
            DependencyKind::Vault => "vault",
            DependencyKind::Influxdb => "influxdb",
            DependencyKind::Jaeger => "jaeger",
        }
    }

    /// The DNS-safe service name slug used in `<dse-name>-<slug>`. This
    /// matches `as_str()` for every kind except `object-store`, whose
    /// backing workload is MinIO; the registry's connection-URL templates
    /// (spec §4.C) address it as `<dse>-minio`, not `<dse>-object-store`.
    pub fn name_slug(&self) -> &'static str {
        match self {
            DependencyKind::ObjectStore => "minio",
            other => other.as_str(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DevStagingEnvironmentStatus {
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub deployment_ready: bool,
    #[serde(default)]
    pub service_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_ready: Option<bool>,
    #[serde(default)]
    pub dependencies_ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}
