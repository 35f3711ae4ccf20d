use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use devstage_k8s_util::client::new_client_with_metrics;
use devstage_operator::buildagent::agent;
use devstage_operator::controller::State;
use devstage_operator::crd::dse::DevStagingEnvironment;
use devstage_operator::crd::runnerpool::{CiProvider, RunnerPool};
use devstage_operator::metrics::Metrics;
use devstage_operator::telemetry;
use devstage_operator::{dse, runnerpool};

use clap::{crate_authors, crate_description, crate_version, Parser};
use kube::{Config, CustomResourceExt};
use prometheus_client::registry::Registry;
use std::path::PathBuf;

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok()
        .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
        .body(c.metrics())
}

#[get("/health")]
async fn health(c: Data<State>, _req: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json(c.diagnostics().await)
}

#[derive(Parser, Debug)]
#[command(
    name = "devstage-operator",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Print the DevStagingEnvironment and RunnerPool CRD manifests as YAML
    /// and exit, instead of running the operator.
    #[arg(long)]
    crd: bool,

    /// Listen on given port.
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Spool directory for the build-agent signal-file protocol. When set,
    /// the agent-side watcher runs alongside the controllers.
    #[arg(long, env = "BUILD_AGENT_SPOOL_DIR")]
    build_agent_spool_dir: Option<PathBuf>,

    /// Delete every RunnerPool for `--ci-provider` in `--namespace`, plus
    /// that provider's shared token secret, print the deleted pool names,
    /// and exit instead of running the operator.
    #[arg(long)]
    reset_runner_pools: bool,

    /// CI provider targeted by `--reset-runner-pools`.
    #[arg(long, value_enum, default_value_t = CiProvider::GitHub)]
    ci_provider: CiProvider,

    /// Namespace targeted by `--reset-runner-pools`.
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    /// Example: "info,kube=debug,devstage_operator=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format.
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    if args.crd {
        print!("{}", serde_yaml::to_string(&DevStagingEnvironment::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&RunnerPool::crd())?);
        return Ok(());
    }

    if args.reset_runner_pools {
        let config = Config::infer().await?;
        let client = kube::Client::try_from(config)?;
        let deleted = runnerpool::reconcile::reset(client, &args.namespace, args.ci_provider).await?;
        println!("deleted {} runner pool(s): {deleted:?}", deleted.len());
        return Ok(());
    }

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let mut registry = Registry::with_prefix("devstage_operator");
    let config = Config::infer().await?;
    let client = new_client_with_metrics(config, &mut registry).await?;
    let metrics_instance = Metrics::new(&mut registry);
    let state = State::new(registry, metrics_instance);

    let dse_controller = dse::controller::run(state.clone(), client.clone());
    let runner_pool_controller = runnerpool::controller::run(state.clone(), client.clone());

    let build_agent = async {
        if let Some(spool) = args.build_agent_spool_dir.clone() {
            if let Err(e) = agent::run(spool).await {
                tracing::error!("build-agent watcher stopped: {e:?}");
            }
        } else {
            std::future::pending::<()>().await;
        }
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    // All runtimes implement graceful shutdown, so poll until the server is done.
    tokio::join!(dse_controller, runner_pool_controller, build_agent, server.run()).3?;
    Ok(())
}
