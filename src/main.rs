use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use gantry::{
    BackendRegistry, HttpClient, HttpClientAdapter, Pipeline, adapters, config, tracing_setup,
};
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[clap(short, long, default_value = "gantry.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config = config::load_config(&args.config).await?;

    tracing_setup::init_tracing_with_config(&config.log.level, config.log.json)?;

    // Standard W3C trace-context propagation for inbound extraction and
    // outbound injection; span/metric exporters are wired externally.
    global::set_text_map_propagator(TraceContextPropagator::new());

    let registry = Arc::new(BackendRegistry::from_config(&config.backends)?);
    tracing::info!(backends = registry.len(), "backend registry loaded");

    let client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new()?);
    let pipeline = Arc::new(Pipeline::assemble(registry, client, Vec::new()));

    adapters::http_server::serve(&config.listen_addr, pipeline).await
}
