use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use flowforge_core::workflow::{OrchestrationContext, Persistence, Registry};
use flowforge_core::FlowForgeConfig;
use flowforge_runtime::fakes::{order_workflow_definition, register_order_handlers, RefundPaymentHandler};
use flowforge_runtime::{
    router, Dispatcher, GatewayState, InMemoryEventBus, InMemoryStateStore, PostgresEventBus,
    PostgresStateStore,
};

/// Runs the orchestrator: an HTTP gateway plus the dispatcher loop that
/// drives steps and compensations from the event bus.
#[derive(Parser, Debug)]
#[command(name = "flowforge", about = "Durable saga orchestrator")]
struct Args {
    /// Path to a TOML config file. Defaults left in place when absent.
    #[arg(long)]
    config: Option<String>,

    /// Run against in-process store/bus instead of Postgres, ignoring
    /// `database.url`. Useful for local smoke tests of the reference
    /// order workflow without standing up a database.
    #[arg(long)]
    in_memory: bool,
}

fn install_tracing(config: &FlowForgeConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(order_workflow_definition())
        .expect("reference order workflow type is registered exactly once at startup");
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FlowForgeConfig::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => FlowForgeConfig::default(),
    };

    install_tracing(&config);
    tracing::info!("flowforge starting");

    let registry = Arc::new(build_registry());
    let port = config.gateway.port;

    if args.in_memory || config.database.url.is_empty() {
        tracing::info!("running with in-memory store and event bus");
        let store = InMemoryStateStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();

        let persistence = Arc::new(Persistence::new(store));
        let ctx = OrchestrationContext::new(persistence, registry, bus);
        run(ctx, subscription, port).await
    } else {
        tracing::info!("connecting to Postgres");
        let pool = PgPoolOptions::new()
            .max_connections(config.database.pool_size)
            .connect(&config.database.url)
            .await
            .context("connecting to the state store database")?;

        let store = PostgresStateStore::new(pool.clone());
        store.ensure_schema().await.context("creating state store schema")?;

        let poll_interval = std::time::Duration::from_secs(config.dispatcher.poll_interval_secs);
        let bus = Arc::new(PostgresEventBus::with_config(
            pool,
            poll_interval,
            config.dispatcher.batch_size,
        ));
        bus.ensure_schema().await.context("creating event bus schema")?;

        let persistence = Arc::new(Persistence::new(store));
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        run(ctx, bus, port).await
    }
}

async fn run<S, B, Src>(ctx: OrchestrationContext<S, B>, source: Src, port: u16) -> Result<()>
where
    S: flowforge_core::StateStore + 'static,
    B: flowforge_core::EventBus + 'static,
    Src: flowforge_runtime::EventSource + 'static,
{
    let mut dispatcher = Dispatcher::new(ctx.clone(), source);
    register_order_handlers(&mut dispatcher, RefundPaymentHandler::new());

    let gateway_state = Arc::new(GatewayState::new(ctx));
    let app = router(gateway_state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding HTTP gateway to port {port}"))?;
    tracing::info!(port, "HTTP gateway listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let dispatcher_task = tokio::spawn(async move {
        if let Err(err) = dispatcher.run(shutdown_rx).await {
            tracing::error!(error = %err, "dispatcher loop exited with an error");
        }
    });

    let gateway_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "HTTP gateway exited with an error");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = dispatcher_task.await;
    gateway_task.abort();

    Ok(())
}
