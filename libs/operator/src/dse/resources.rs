//! Desired-state builders for the child objects of a `DevStagingEnvironment`:
//! the application `Deployment`/`Service`/`Ingress`, and one
//! `Deployment`/`Service`/`Secret` triple per declared dependency. Every
//! builder stamps the owning DSE as a controller owner reference so
//! deletion cascades without a finalizer (spec §3's cascade-delete
//! invariant), following the same `ObjectMeta`-construction style as the
//! teacher's single-resource builder.

use crate::crd::dse::{
    AppSpec, DependencySpec, DevStagingEnvironment, EnvEntry, IngressSpec, PathType, ServiceKind,
    ServiceSpec,
};
use crate::hash::{hash_spec, SPEC_HASH_ANNOTATION};
use crate::registry::DependencyRegistry;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, GRPCAction, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, Secret, Service, ServicePort, ServiceSpec as CoreServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec as CoreIngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

fn labels(dse_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_owned(), component.to_owned());
    labels.insert("app.kubernetes.io/instance".to_owned(), dse_name.to_owned());
    labels.insert("app.kubernetes.io/managed-by".to_owned(), "devstage-operator".to_owned());
    labels
}

fn owner_meta(
    dse: &DevStagingEnvironment,
    name: String,
    namespace: String,
    component: &str,
    spec_hash: &str,
) -> ObjectMeta {
    let mut annotations = BTreeMap::new();
    annotations.insert(SPEC_HASH_ANNOTATION.to_owned(), spec_hash.to_owned());
    ObjectMeta {
        name: Some(name),
        namespace: Some(namespace),
        labels: Some(labels(&dse.name_any(), component)),
        annotations: Some(annotations),
        owner_references: Some(vec![dse
            .controller_owner_ref(&())
            .expect("DevStagingEnvironment always has a name and uid once admitted")]),
        ..ObjectMeta::default()
    }
}

fn to_env_vars(env: &[EnvEntry]) -> Vec<EnvVar> {
    env.iter()
        .map(|e| EnvVar {
            name: e.name.clone(),
            value: Some(e.value.clone()),
            value_from: None,
        })
        .collect()
}

fn to_resource_requirements(spec: &AppSpec) -> Option<ResourceRequirements> {
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    let resources = spec.resources.as_ref()?;
    let to_map = |q: &crate::crd::dse::ResourceQuantities| {
        let mut map = BTreeMap::new();
        if let Some(cpu) = &q.cpu {
            map.insert("cpu".to_owned(), Quantity(cpu.clone()));
        }
        if let Some(memory) = &q.memory {
            map.insert("memory".to_owned(), Quantity(memory.clone()));
        }
        map
    };
    Some(ResourceRequirements {
        requests: resources.requests.as_ref().map(to_map),
        limits: resources.limits.as_ref().map(to_map),
        claims: None,
    })
}

fn health_probe(spec: &AppSpec) -> Option<Probe> {
    let health_check = spec.health_check.as_ref()?;
    if health_check.disabled {
        return None;
    }
    if let Some(http) = &health_check.http {
        return Some(Probe {
            http_get: Some(k8s_openapi::api::core::v1::HTTPGetAction {
                path: Some(http.path.clone().unwrap_or_else(|| "/healthz".to_owned())),
                port: IntOrString::Int(http.port.unwrap_or(spec.port) as i32),
                ..Default::default()
            }),
            initial_delay_seconds: Some(http.initial_delay_seconds as i32),
            period_seconds: Some(http.period_seconds as i32),
            ..Default::default()
        });
    }
    if let Some(grpc) = &health_check.grpc {
        return Some(Probe {
            grpc: Some(GRPCAction {
                port: spec.port as i32,
                service: None,
            }),
            initial_delay_seconds: Some(grpc.initial_delay_seconds as i32),
            period_seconds: Some(grpc.period_seconds as i32),
            ..Default::default()
        });
    }
    None
}

/// The application `Deployment`, with the merged environment (`env::build_env`
/// output) supplied by the caller.
pub fn application_deployment(
    dse: &DevStagingEnvironment,
    env: &[EnvEntry],
) -> Deployment {
    let app = &dse.spec.application;
    let name = dse.name_any();
    let namespace = dse.namespace().unwrap_or_default();
    let selector = labels(&name, &name);
    let spec_hash = hash_spec(&dse.spec);

    Deployment {
        metadata: owner_meta(dse, name.clone(), namespace, &name, &spec_hash),
        spec: Some(DeploymentSpec {
            replicas: Some(app.replicas),
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
                        name: "application".to_owned(),
                        image: Some(app.image.clone()),
                        command: app.command.clone(),
                        args: app.args.clone(),
                        ports: Some(vec![ContainerPort {
                            container_port: app.port as i32,
                            ..ContainerPort::default()
                        }]),
                        env: Some(to_env_vars(env)),
                        resources: to_resource_requirements(app),
                        readiness_probe: health_probe(app),
                        liveness_probe: health_probe(app),
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

fn service_port_number(app: &AppSpec, service: &ServiceSpec) -> i32 {
    service.port.unwrap_or(app.port) as i32
}

/// The application `Service`. Defaults its port to the application's
/// container port when `service.port` is unset (spec §4.A defaulting rule).
pub fn application_service(dse: &DevStagingEnvironment) -> Service {
    let app = &dse.spec.application;
    let name = dse.name_any();
    let namespace = dse.namespace().unwrap_or_default();
    let selector = labels(&name, &name);
    let spec_hash = hash_spec(&dse.spec);

    let kind = match dse.spec.service.kind {
        ServiceKind::ClusterIp => "ClusterIP",
        ServiceKind::NodePort => "NodePort",
        ServiceKind::LoadBalancer => "LoadBalancer",
    };

    Service {
        metadata: owner_meta(dse, name.clone(), namespace, &name, &spec_hash),
        spec: Some(CoreServiceSpec {
            type_: Some(kind.to_owned()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port: service_port_number(app, &dse.spec.service),
                target_port: Some(IntOrString::Int(
                    dse.spec.service.target_port.unwrap_or(app.port) as i32,
                )),
                ..ServicePort::default()
            }]),
            ..CoreServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// The optional application `Ingress`, built only when `ingress.enabled`.
pub fn application_ingress(dse: &DevStagingEnvironment) -> Option<Ingress> {
    let ingress_spec: &IngressSpec = dse.spec.ingress.as_ref()?;
    if !ingress_spec.enabled {
        return None;
    }
    let name = dse.name_any();
    let namespace = dse.namespace().unwrap_or_default();
    let spec_hash = hash_spec(&dse.spec);
    let app = &dse.spec.application;

    let path_type = match ingress_spec.path_type {
        PathType::Prefix => "Prefix",
        PathType::Exact => "Exact",
    };

    let mut metadata = owner_meta(dse, name.clone(), namespace, &name, &spec_hash);
    if let Some(extra) = &ingress_spec.annotations {
        metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(extra.clone());
    }

    let backend_port = dse.spec.service.port.unwrap_or(app.port) as i32;

    Some(Ingress {
        metadata,
        spec: Some(CoreIngressSpec {
            ingress_class_name: ingress_spec.ingress_class_name.clone(),
            rules: Some(vec![IngressRule {
                host: Some(ingress_spec.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(ingress_spec.path.clone()),
                        path_type: path_type.to_owned(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(backend_port),
                                    name: None,
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
            }]),
            tls: ingress_spec.tls.as_ref().map(|tls| {
                vec![IngressTLS {
                    hosts: Some(tls.hosts.clone()),
                    secret_name: Some(tls.secret_name.clone()),
                }]
            }),
            ..CoreIngressSpec::default()
        }),
        ..Ingress::default()
    })
}

/// One dependency's backing `Deployment`.
pub fn dependency_deployment(
    dse: &DevStagingEnvironment,
    dep: &DependencySpec,
    registry: &DependencyRegistry,
    credentials: &BTreeMap<String, String>,
) -> Deployment {
    let entry = registry.entry(dep.kind);
    let dse_name = dse.name_any();
    let name = format!("{}-{}", dse_name, dep.kind.name_slug());
    let namespace = dse.namespace().unwrap_or_default();
    let selector = labels(&dse_name, &name);
    let port = dep.port.unwrap_or(entry.default_port);
    let image = entry.effective_image(dep.image.as_deref(), dep.version.as_deref());
    let spec_hash = hash_spec(dep);

    let env: Vec<EnvVar> = credentials
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            value_from: None,
        })
        .collect();

    Deployment {
        metadata: owner_meta(dse, name.clone(), namespace, &name, &spec_hash),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
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
                        name: dep.kind.name_slug().to_owned(),
                        image: Some(image),
                        ports: Some(vec![ContainerPort {
                            container_port: port as i32,
                            ..ContainerPort::default()
                        }]),
                        env: Some(env),
                        resources: dep.resources.as_ref().and_then(|r| {
                            to_resource_requirements(&AppSpec {
                                resources: Some(r.clone()),
                                ..AppSpec::default()
                            })
                        }),
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

/// One dependency's backing `Service`.
pub fn dependency_service(
    dse: &DevStagingEnvironment,
    dep: &DependencySpec,
    registry: &DependencyRegistry,
) -> Service {
    let entry = registry.entry(dep.kind);
    let dse_name = dse.name_any();
    let name = format!("{}-{}", dse_name, dep.kind.name_slug());
    let namespace = dse.namespace().unwrap_or_default();
    let selector = labels(&dse_name, &name);
    let port = dep.port.unwrap_or(entry.default_port) as i32;
    let spec_hash = hash_spec(dep);

    Service {
        metadata: owner_meta(dse, name.clone(), namespace, &name, &spec_hash),
        spec: Some(CoreServiceSpec {
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                ..ServicePort::default()
            }]),
            ..CoreServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// A dependency's credential `Secret`, carrying the effective (merged)
/// credential map so that an operator can inspect what was actually
/// provisioned without recomputing the default/override merge.
pub fn dependency_secret(
    dse: &DevStagingEnvironment,
    dep: &DependencySpec,
    credentials: &BTreeMap<String, String>,
) -> Secret {
    let dse_name = dse.name_any();
    let name = format!("{}-{}-credentials", dse_name, dep.kind.name_slug());
    let namespace = dse.namespace().unwrap_or_default();
    let spec_hash = hash_spec(credentials);

    let string_data = credentials.clone();

    Secret {
        metadata: owner_meta(dse, name.clone(), namespace, &name, &spec_hash),
        string_data: Some(string_data),
        ..Secret::default()
    }
}
