use std::{process, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use veneer::{
    cache::{CacheStats, ClientConfig},
    client::Client,
    config::{self, Command, DemoArgs, Settings},
    infra::{error::InfraError, telemetry},
    upstream::memory::MemoryBackend,
};

const DEMO_TABLE: &str = "profiles";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "veneer failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "veneer failed");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        None | Some(Command::Config(_)) => print_config(&settings),
        Some(Command::Demo(args)) => run_demo(settings, args).await,
    }
}

fn print_config(settings: &Settings) -> Result<(), InfraError> {
    let config: ClientConfig = settings.client_config();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[derive(Debug, Serialize)]
struct DemoReport {
    config: ClientConfig,
    backend_selects: usize,
    backend_mutations: usize,
    cache: CacheStats,
}

async fn run_demo(settings: Settings, args: DemoArgs) -> Result<(), InfraError> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        DEMO_TABLE,
        [
            json!({ "id": 1, "name": "Ada", "role": "admin" }),
            json!({ "id": 2, "name": "Grace", "role": "member" }),
        ],
    );
    backend.set_latency(Duration::from_millis(args.latency_ms));

    let client = Client::new(backend.clone(), settings.client_config());

    for _ in 0..args.reads {
        client.from(DEMO_TABLE).select("*").await?;
    }
    info!(reads = args.reads, "demo reads complete");

    client
        .from(DEMO_TABLE)
        .update(json!({ "name": "Ada Lovelace" }))
        .eq("id", 1)
        .await?;
    client.from(DEMO_TABLE).select("*").await?;

    let report = DemoReport {
        config: client.config().clone(),
        backend_selects: backend.select_calls(),
        backend_mutations: backend.mutation_calls(),
        cache: client.cache_stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
