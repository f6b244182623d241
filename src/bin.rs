//! Binary entry point for `intake-bot`.
//!
//! Parses the command line, sets up logging and tracing export, loads the
//! configuration and hands off to the library.

use clap::Parser;
use intake_bot::base::{config::Config, types::Void};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Intake-bot: routes a support channel's traffic to an automated triager.
///
/// Configuration can come from `config.toml` or `INTAKE_BOT_*` environment
/// variables. The bot watches one Slack channel, queues every new message,
/// thread reply, edit, deletion and @-mention, and marks handled messages
/// with a reaction so a restart can pick up where it left off.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the bot will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build()
        .tracer("intake-bot");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).init();

    let config = Config::load(args.config.as_deref())?;

    intake_bot::start(config).await
}
