use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dotenvy::dotenv;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::Tracer, Resource};
use sounds_bot::{run_forever, Bot, Configs, SlackClient, SoundStorage, ToolboxBuilder};
use tracing::info;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracer(otlp_endpoint: String) -> anyhow::Result<Tracer> {
    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otlp_endpoint);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config().with_resource(Resource::new(vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                "sounds-bot",
            )])),
        )
        .install_simple()
        .context("Failed to install opentelemetry pipeline")?;
    Ok(tracer)
}

fn init_tracing_subscriber(filter: EnvFilter, otlp_endpoint: Option<String>) -> anyhow::Result<()> {
    let otel_layer = match otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(endpoint)?)),
        None => None,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .with(otel_layer)
        .init();
    Ok(())
}

#[derive(Parser)]
#[clap(version, about)]
struct Opt {
    #[clap(long, env, value_parser, default_value = "config.json")]
    config_file: PathBuf,

    #[clap(long, env, value_parser, default_value = "sounds")]
    sound_dir: PathBuf,

    /// Upper bound for each editing or download run.
    #[clap(long, env, value_parser = humantime::parse_duration, default_value = "2m")]
    tool_timeout: Duration,

    #[clap(long, env)]
    otlp_endpoint: Option<String>,

    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let opt = Opt::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(opt.verbose.log_level_filter().to_string().to_lowercase())
    });
    init_tracing_subscriber(filter, opt.otlp_endpoint.clone())?;

    let configs = Configs::load_or_create(&opt.config_file)?;
    let client = SlackClient::new(
        configs
            .bot_token()
            .context("Set _token in the config file")?,
        configs
            .app_token()
            .context("Set _app_token in the config file")?,
    );

    let storage = SoundStorage::new(&opt.sound_dir);
    storage
        .ensure_dir()
        .with_context(|| format!("Failed to create {:?}", opt.sound_dir))?;
    let toolbox = ToolboxBuilder::default()
        .timeout(opt.tool_timeout)
        .build()?;

    let mut bot = Bot::new(configs, storage, toolbox);

    #[allow(clippy::redundant_pub_crate)]
    {
        tokio::select! {
            res = run_forever(&mut bot, &client) => res?,
            _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        }
    }

    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}
