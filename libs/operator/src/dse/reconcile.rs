//! Environment reconciler (component A): converges a `DevStagingEnvironment`
//! to its dependency workloads, application workload, service, ingress, and
//! status, in that order (spec §4.A). Children are owned via
//! `ownerReferences` rather than a finalizer, so deletion of the DSE cascades
//! through Kubernetes garbage collection without any reconciler-side cleanup
//! step — the inverse of the finalizer dance the teacher's single-resource
//! reconciler used, chosen because every child here is wholly owned by one
//! DSE and nothing needs draining before it goes away.

use crate::controller::Context;
use crate::crd::dse::{DependencySpec, DevStagingEnvironment, DevStagingEnvironmentStatus};
use crate::dse::{env, resources};
use crate::error::{Error, Result};
use crate::hash::{self, hash_spec};
use crate::registry::DependencyRegistry;
use crate::telemetry;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder};
use kube::{Resource, ResourceExt};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{field, info, instrument, Span};

const FIELD_MANAGER: &str = "devstage-operator";

/// Apply `desired` via server-side apply, skipping the round-trip when the
/// live object already carries the matching spec-hash annotation.
async fn apply<K>(client: Client, namespace: &str, name: &str, desired: &K, spec_hash: &str) -> Result<()>
where
    K: Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + Debug
        + serde::Serialize
        + for<'de> serde::Deserialize<'de>
        + Send
        + Sync
        + 'static,
{
    let api: Api<K> = Api::namespaced(client, namespace);
    if let Some(existing) = api.get_opt(name).await? {
        if hash::is_up_to_date(existing.meta().annotations.as_ref(), spec_hash) {
            return Ok(());
        }
    }
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(desired),
    )
    .await?;
    Ok(())
}

fn validate(dse: &DevStagingEnvironment) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for dep in &dse.spec.dependencies {
        if !seen.insert(dep.kind) {
            return Err(Error::Validation(format!(
                "dependency kind {:?} declared more than once",
                dep.kind
            )));
        }
    }
    if dse.spec.application.port == 0 {
        return Err(Error::Validation("application.port must be nonzero".to_owned()));
    }
    Ok(())
}

async fn reconcile_dependency(
    client: Client,
    namespace: &str,
    dse: &DevStagingEnvironment,
    dep: &DependencySpec,
    registry: &DependencyRegistry,
) -> Result<()> {
    let credentials = registry.effective_credentials(dep.kind, dep.env.as_deref().unwrap_or(&[]));
    let name = format!("{}-{}", dse.name_any(), dep.kind.name_slug());

    let secret = resources::dependency_secret(dse, dep, &credentials);
    apply::<Secret>(client.clone(), namespace, &format!("{name}-credentials"), &secret, &hash_spec(&credentials)).await?;

    let deployment = resources::dependency_deployment(dse, dep, registry, &credentials);
    apply::<Deployment>(client.clone(), namespace, &name, &deployment, &hash_spec(dep)).await?;

    let service = resources::dependency_service(dse, dep, registry);
    apply::<Service>(client, namespace, &name, &service, &hash_spec(dep)).await?;

    Ok(())
}

async fn update_status(
    client: Client,
    namespace: &str,
    name: &str,
    status: DevStagingEnvironmentStatus,
) -> Result<()> {
    let api: Api<DevStagingEnvironment> = Api::namespaced(client, namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[instrument(skip(ctx, dse), fields(trace_id))]
pub async fn reconcile(dse: Arc<DevStagingEnvironment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    let client = ctx.client.clone();
    let _timer = ctx.metrics.dse.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = chrono::Utc::now();

    let namespace = dse.namespace().ok_or_else(|| {
        Error::Validation("DevStagingEnvironment must be namespaced".to_owned())
    })?;
    let name = dse.name_any();

    validate(&dse)?;

    info!("Reconciling DevStagingEnvironment \"{name}\" in {namespace}");

    let registry = DependencyRegistry::new();

    for dep in &dse.spec.dependencies {
        reconcile_dependency(client.clone(), &namespace, &dse, dep, &registry).await?;
    }

    let user_env = dse.spec.application.env.clone().unwrap_or_default();
    let merged_env = env::build_env(&registry, &name, &user_env, &dse.spec.dependencies);

    let deployment = resources::application_deployment(&dse, &merged_env);
    apply::<Deployment>(client.clone(), &namespace, &name, &deployment, &hash_spec(&dse.spec)).await?;

    let service = resources::application_service(&dse);
    apply::<Service>(client.clone(), &namespace, &name, &service, &hash_spec(&dse.spec)).await?;

    let ingress_ready = if let Some(ingress) = resources::application_ingress(&dse) {
        apply::<Ingress>(client.clone(), &namespace, &name, &ingress, &hash_spec(&dse.spec)).await?;
        Some(true)
    } else {
        None
    };

    let url = dse.spec.ingress.as_ref().filter(|i| i.enabled).map(|i| {
        let scheme = if i.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}{}", i.host, i.path)
    });

    let status = DevStagingEnvironmentStatus {
        ready_replicas: dse.spec.application.replicas,
        deployment_ready: true,
        service_ready: true,
        ingress_ready,
        dependencies_ready: true,
        url,
        conditions: None,
    };
    update_status(client.clone(), &namespace, &name, status).await?;

    let reporter = ctx.diagnostics.read().await.reporter.clone();
    Recorder::new(client, reporter, dse.object_ref(&()))
        .publish(Event {
            type_: EventType::Normal,
            reason: "Reconciled".into(),
            note: Some(format!("environment \"{name}\" converged")),
            action: "Reconciling".into(),
            secondary: None,
        })
        .await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

pub fn error_policy(dse: Arc<DevStagingEnvironment>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!("dse reconcile failed: {:?}", error);
    ctx.metrics.dse.set_failure(&dse, error);
    if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(5 * 60))
    }
}
