//! Mock-apiserver integration tests for the environment reconciler: drives
//! `dse::reconcile::reconcile` against a `tower_test` mock service instead
//! of a real cluster, asserting the exact sequence of API calls it issues.

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use devstage_operator::controller::{Context, Diagnostics};
    use devstage_operator::crd::dse::{AppSpec, DevStagingEnvironment, DevStagingEnvironmentSpec};
    use devstage_operator::dse::reconcile::reconcile;
    use devstage_operator::metrics::Metrics;

    use http::{Request, Response};
    use k8s_openapi::api::apps::v1::Deployment;
    use kube::{client::Body, Client, Resource, ResourceExt};

    fn test_dse() -> DevStagingEnvironment {
        let mut dse = DevStagingEnvironment::new(
            "test",
            DevStagingEnvironmentSpec {
                application: AppSpec {
                    image: "ghcr.io/example/app:latest".to_owned(),
                    port: 8080,
                    ..AppSpec::default()
                },
                ..Default::default()
            },
        );
        dse.meta_mut().namespace = Some("default".to_owned());
        dse
    }

    type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;

    struct ApiServerVerifier(ApiServerHandle);

    async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    impl ApiServerVerifier {
        /// A DSE with no dependencies: one GET+PATCH for the `Deployment`,
        /// one GET+PATCH for the `Service`, then a status patch.
        fn run_create_without_dependencies(self, dse: DevStagingEnvironment) -> tokio::task::JoinHandle<()> {
            tokio::spawn(async move {
                self.handle_get_then_apply::<Deployment>("deployments", &dse)
                    .await
                    .handle_get_then_apply_service(&dse)
                    .await
                    .handle_status_patch(&dse)
                    .await
                    .handle_event_publish()
                    .await;
            })
        }

        async fn handle_get_then_apply<K>(mut self, resource: &str, dse: &DevStagingEnvironment) -> Self
        where
            K: serde::de::DeserializeOwned,
        {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::GET);
            assert!(request
                .uri()
                .to_string()
                .contains(&format!("/apis/apps/v1/namespaces/default/{resource}/{}", dse.name_any())));
            send.send_response(Response::builder().status(404).body(Body::empty()).unwrap());

            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            let body = request.into_body().collect_bytes().await.unwrap();
            let _: serde_json::Value = serde_json::from_slice(&body).expect("patch body is json");
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
            self
        }

        async fn handle_get_then_apply_service(self, dse: &DevStagingEnvironment) -> Self {
            self.handle_get_then_apply::<k8s_openapi::api::core::v1::Service>("services", dse)
                .await
        }

        async fn handle_status_patch(mut self, dse: &DevStagingEnvironment) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::PATCH);
            assert!(request.uri().to_string().contains(&format!(
                "/apis/apps.example.com/v1alpha1/namespaces/default/devstagingenvironments/{}/status",
                dse.name_any()
            )));
            let body = request.into_body().collect_bytes().await.unwrap();
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
            self
        }

        /// The reconciler publishes a "Reconciled" event on the DSE once
        /// every child is converged.
        async fn handle_event_publish(mut self) -> Self {
            let (request, send) = self.0.next_request().await.expect("service not called");
            assert_eq!(request.method(), http::Method::POST);
            assert!(request.uri().to_string().contains("/events"));
            let body = request.into_body().collect_bytes().await.unwrap();
            send.send_response(Response::builder().status(201).body(Body::from(body)).unwrap());
            self
        }
    }

    fn test_context() -> (Arc<Context>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "default");
        let ctx = Context {
            client: mock_client,
            diagnostics: Arc::new(tokio::sync::RwLock::new(Diagnostics::default())),
            metrics: Arc::new(Metrics::default()),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }

    #[tokio::test]
    async fn reconcile_creates_deployment_and_service_for_bare_environment() {
        let dse = test_dse();
        let (ctx, verifier) = test_context();
        let mocksrv = verifier.run_create_without_dependencies(dse.clone());
        reconcile(Arc::new(dse), ctx).await.expect("reconciler succeeded");
        timeout_after_1s(mocksrv).await;
    }
}
