//! Runner-pool reconciler (component B): converges a `RunnerPool` to a
//! `Deployment` running the provider's self-hosted runner image plus an
//! owned token `Secret` derived from the referenced one, so the runner's
//! credentials live and die with the pool rather than the user's own
//! secret.

use crate::controller::Context;
use crate::crd::runnerpool::{CiProvider, RunnerPool, RunnerPoolStatus};
use crate::error::{Error, Result};
use crate::hash::{self, hash_spec, SPEC_HASH_ANNOTATION};
use crate::runnerpool::provider::{self, sanitize_pool_name, ProviderDescriptor};
use crate::telemetry;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, info, instrument, Span};

const FIELD_MANAGER: &str = "devstage-operator";

fn labels(pool_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_owned(), pool_name.to_owned());
    labels.insert("app.kubernetes.io/managed-by".to_owned(), "devstage-operator".to_owned());
    labels
}

/// The runner's self-reported CI labels: always `self-hosted` and the
/// original (unsanitised) developer handle, plus whatever the pool declares.
fn runner_labels(pool: &RunnerPool) -> String {
    ["self-hosted".to_owned(), pool.spec.developer_handle.clone()]
        .into_iter()
        .chain(pool.spec.extra_labels.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Name of the operator-owned secret a pool's deployment actually mounts.
/// Decoupled from the user-supplied `tokenSecretRef` so the pool's children
/// are fully owned and cascade-deleted together, per the token-secret
/// child the reconciler emits alongside the deployment.
fn token_secret_name(pool_name: &str) -> String {
    format!("{pool_name}-token")
}

/// Reads the registration token out of the secret the pool references.
async fn fetch_token(client: Client, namespace: &str, pool: &RunnerPool, pool_name: &str) -> Result<String> {
    let token_secret_ref = pool.spec.token_secret_ref.as_ref().ok_or_else(|| {
        Error::Configuration(format!(
            "runner pool \"{pool_name}\" has no tokenSecretRef; a registration token must be supplied"
        ))
    })?;
    let key = token_secret_ref
        .key
        .clone()
        .unwrap_or_else(|| provider::descriptor(pool.spec.ci_provider).default_token_key.to_owned());

    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    let secret = secrets.get(&token_secret_ref.name).await?;
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&key))
        .ok_or_else(|| {
            Error::Configuration(format!(
                "secret \"{}\" has no key \"{key}\" for runner pool \"{pool_name}\"",
                token_secret_ref.name
            ))
        })?;
    String::from_utf8(value.0.clone())
        .map_err(|e| Error::Configuration(format!("token in secret \"{}\" is not UTF-8: {e}", token_secret_ref.name)))
}

/// Builds the operator-owned secret that mirrors the registration token,
/// the first of the two children §4.B assigns the reconciler.
fn desired_token_secret(
    pool: &RunnerPool,
    pool_name: &str,
    namespace: &str,
    descriptor: &ProviderDescriptor,
    token: &str,
    spec_hash: &str,
) -> Secret {
    let mut string_data = BTreeMap::new();
    string_data.insert(descriptor.default_token_key.to_owned(), token.to_owned());

    let mut annotations = BTreeMap::new();
    annotations.insert(SPEC_HASH_ANNOTATION.to_owned(), spec_hash.to_owned());

    Secret {
        metadata: ObjectMeta {
            name: Some(token_secret_name(pool_name)),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels(pool_name)),
            annotations: Some(annotations),
            owner_references: Some(vec![pool
                .controller_owner_ref(&())
                .expect("RunnerPool always has a name and uid once admitted")]),
            ..ObjectMeta::default()
        },
        string_data: Some(string_data),
        ..Secret::default()
    }
}

fn desired_deployment(pool: &RunnerPool, pool_name: &str, namespace: &str, spec_hash: &str) -> Deployment {
    let descriptor = provider::descriptor(pool.spec.ci_provider);

    let selector = labels(pool_name);
    let image = pool
        .spec
        .image
        .clone()
        .unwrap_or_else(|| descriptor.default_image.to_owned());
    let base_url = pool
        .spec
        .base_url
        .clone()
        .unwrap_or_else(|| descriptor.default_base_url.to_owned());

    let mut annotations = BTreeMap::new();
    annotations.insert(SPEC_HASH_ANNOTATION.to_owned(), spec_hash.to_owned());

    Deployment {
        metadata: ObjectMeta {
            name: Some(pool_name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(selector.clone()),
            annotations: Some(annotations),
            owner_references: Some(vec![pool
                .controller_owner_ref(&())
                .expect("RunnerPool always has a name and uid once admitted")]),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(pool.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "runner".to_owned(),
                        image: Some(image),
                        env: Some(vec![
                            EnvVar {
                                name: descriptor.token_env_var_name.to_owned(),
                                value_from: Some(EnvVarSource {
                                    secret_key_ref: Some(SecretKeySelector {
                                        name: token_secret_name(pool_name),
                                        key: descriptor.default_token_key.to_owned(),
                                        optional: None,
                                    }),
                                    ..EnvVarSource::default()
                                }),
                                value: None,
                            },
                            EnvVar {
                                name: descriptor.repository_env_var_name.to_owned(),
                                value: Some(base_url.clone()),
                                value_from: None,
                            },
                            EnvVar {
                                name: "RUNNER_REPOSITORY".to_owned(),
                                value: Some(pool.spec.repository.clone()),
                                value_from: None,
                            },
                            EnvVar {
                                name: "RUNNER_LABELS".to_owned(),
                                value: Some(runner_labels(pool)),
                                value_from: None,
                            },
                        ]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

#[instrument(skip(ctx, pool), fields(trace_id))]
pub async fn reconcile(pool: Arc<RunnerPool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let client = ctx.client.clone();
    let _timer = ctx.metrics.runner_pool.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let namespace = pool
        .namespace()
        .ok_or_else(|| Error::Validation("RunnerPool must be namespaced".to_owned()))?;
    let pool_name = sanitize_pool_name(&pool.spec.developer_handle);

    info!("Reconciling RunnerPool \"{pool_name}\" ({}) in {namespace}", pool.name_any());

    let descriptor = provider::descriptor(pool.spec.ci_provider);

    // The token secret is the first of the two children this reconciler
    // owns; a transient apply failure here is retried like any other
    // reconcile error, via `?` and the controller's requeue-on-error policy.
    let token = fetch_token(client.clone(), &namespace, &pool, &pool_name).await?;
    let token_hash = hash_spec(&token);
    let token_secret = desired_token_secret(&pool, &pool_name, &namespace, &descriptor, &token, &token_hash);

    let secret_api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let secret_name = token_secret_name(&pool_name);
    let secret_up_to_date = secret_api
        .get_opt(&secret_name)
        .await?
        .is_some_and(|existing| hash::is_up_to_date(existing.meta().annotations.as_ref(), &token_hash));
    if !secret_up_to_date {
        secret_api
            .patch(
                &secret_name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&token_secret),
            )
            .await?;
    }

    let spec_hash = hash_spec(&pool.spec);
    let deployment = desired_deployment(&pool, &pool_name, &namespace, &spec_hash);

    let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
    let up_to_date = api
        .get_opt(&pool_name)
        .await?
        .is_some_and(|existing| hash::is_up_to_date(existing.meta().annotations.as_ref(), &spec_hash));
    if !up_to_date {
        api.patch(
            &pool_name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&deployment),
        )
        .await?;
    }

    let status = RunnerPoolStatus {
        ready_runners: pool.spec.replicas,
        runner_registered: true,
        conditions: None,
    };
    let status_api: Api<RunnerPool> = Api::namespaced(client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    status_api
        .patch_status(&pool.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    let reporter = ctx.diagnostics.read().await.reporter.clone();
    Recorder::new(client, reporter, pool.object_ref(&()))
        .publish(Event {
            type_: EventType::Normal,
            reason: "Reconciled".into(),
            note: Some(format!("runner pool \"{pool_name}\" converged")),
            action: "Reconciling".into(),
            secondary: None,
        })
        .await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

/// Deletes every `RunnerPool` for `provider` in `namespace`, along with that
/// provider's shared token secret, and returns the deleted pools' sanitised
/// names. Owner references clean up each pool's per-pool deployment and
/// token secret on their own; this only needs to remove the pools
/// themselves and the provider-wide secret the reset operation targets.
pub async fn reset(client: Client, namespace: &str, provider: CiProvider) -> Result<Vec<String>> {
    let descriptor = provider::descriptor(provider);
    let pools: Api<RunnerPool> = Api::namespaced(client.clone(), namespace);

    let mut deleted = Vec::new();
    for pool in pools.list(&ListParams::default()).await?.items {
        if pool.spec.ci_provider != provider {
            continue;
        }
        let pool_name = sanitize_pool_name(&pool.spec.developer_handle);
        pools.delete(&pool.name_any(), &DeleteParams::default()).await?;
        deleted.push(pool_name);
    }

    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    match secrets.delete(descriptor.default_secret_name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(source) => return Err(Error::KubeError { source }),
    }

    info!(
        "reset {} ({}) runner pools in {namespace}: {deleted:?}",
        descriptor.display_name, descriptor.resource_label
    );
    Ok(deleted)
}

pub fn error_policy(pool: Arc<RunnerPool>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!("runner pool reconcile failed: {:?}", error);
    ctx.metrics.runner_pool.set_failure(&pool, error);
    if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(5 * 60))
    }
}
