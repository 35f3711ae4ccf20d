use crate::controller::State;
use crate::crd::dse::DevStagingEnvironment;
use crate::dse::reconcile::{error_policy, reconcile};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller::Controller, watcher::Config},
};
use tracing::{error, info, trace};

/// Runs the environment controller until the process receives a shutdown
/// signal. Watches `Deployment`/`Service`/`Ingress` owned by a DSE so child
/// drift (e.g. a manually-edited replica count) triggers a re-reconcile.
pub async fn run(state: State, client: Client) {
    let dses = Api::<DevStagingEnvironment>::all(client.clone());
    if let Err(e) = dses.list(&ListParams::default().limit(1)).await {
        error!("DevStagingEnvironment CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }
    trace!("Init DevStagingEnvironment controller");
    Controller::new(dses, Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(Api::<Service>::all(client.clone()), Config::default())
        .owns(Api::<Ingress>::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
