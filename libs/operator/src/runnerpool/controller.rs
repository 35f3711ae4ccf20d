use crate::controller::State;
use crate::crd::runnerpool::RunnerPool;
use crate::runnerpool::reconcile::{error_policy, reconcile};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller::Controller, watcher::Config},
};
use tracing::{error, info, trace};

/// Runs the runner-pool controller until the process receives a shutdown
/// signal.
pub async fn run(state: State, client: Client) {
    let pools = Api::<RunnerPool>::all(client.clone());
    if let Err(e) = pools.list(&ListParams::default().limit(1)).await {
        error!("RunnerPool CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    trace!("Init RunnerPool controller");
    Controller::new(pools, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(Api::<Secret>::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
