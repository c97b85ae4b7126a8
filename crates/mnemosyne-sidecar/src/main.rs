//! Mnemosyne Sidecar - Entry point

use std::path::PathBuf;
use std::process::ExitCode;

use mnemosyne_config::{ConfigLoader, LogFormat, MnemosyneConfig, TelemetryConfigSection};
use mnemosyne_sidecar::{SidecarResult, SidecarServer};
use mnemosyne_telemetry::LogConfig;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "mnemosyne.toml";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("{} {}", mnemosyne_sidecar::NAME, mnemosyne_sidecar::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Mnemosyne Sidecar - idempotency caching reverse proxy

USAGE:
    mnemosyne-sidecar [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
                           [default: ./mnemosyne.toml if present]
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES (override the file; a .env file is loaded first):
    MNEMOSYNE__SERVER__LISTEN_ADDR          Listen address (default: 0.0.0.0:8080)
    MNEMOSYNE__UPSTREAM__URL                Upstream service URL
    MNEMOSYNE__UPSTREAM__TIMEOUT            Upstream timeout, e.g. 30s
    MNEMOSYNE__IDEMPOTENCY__HEADER_NAME     Key header (default: Idempotency-Key)
    MNEMOSYNE__IDEMPOTENCY__TTL             Record retention, e.g. 24h
    MNEMOSYNE__IDEMPOTENCY__BACKEND         memory | redis
    MNEMOSYNE__IDEMPOTENCY__REDIS_URL       Redis URL for the redis backend
    MNEMOSYNE__IDEMPOTENCY__ON_READ_ERROR   fail_open | fail_closed
    MNEMOSYNE__TELEMETRY__LOGGING__LEVEL    Log filter directive
    MNEMOSYNE__TELEMETRY__METRICS__ADDR     Prometheus scrape address

EXAMPLES:
    # Run with configuration file
    mnemosyne-sidecar --config /etc/mnemosyne/sidecar.toml

    # Run with environment variables
    MNEMOSYNE__UPSTREAM__URL=http://localhost:3000 mnemosyne-sidecar
"
    );
}

fn load_config(path: Option<PathBuf>) -> SidecarResult<MnemosyneConfig> {
    let loader = ConfigLoader::new().with_defaults().with_dotenv();
    let loader = match path {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    Ok(loader.with_env_prefix("MNEMOSYNE").load()?)
}

fn log_config(telemetry: &TelemetryConfigSection) -> LogConfig {
    let logging = &telemetry.logging;
    LogConfig {
        enabled: logging.enabled,
        level: logging.level.clone(),
        json_format: logging.format == LogFormat::Json,
        ansi: logging.ansi_enabled,
        file_line_info: logging.include_location,
        include_target: true,
    }
}

fn metrics_config(telemetry: &TelemetryConfigSection) -> mnemosyne_telemetry::MetricsConfig {
    mnemosyne_telemetry::MetricsConfig {
        enabled: telemetry.metrics.enabled,
        addr: telemetry.metrics.addr.clone(),
    }
}

async fn run(config: MnemosyneConfig) -> SidecarResult<()> {
    let store = mnemosyne_store::build_store(&config.idempotency).await?;
    let server = SidecarServer::bind(&config, store).await?;
    server.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging is configured from the file, so load errors go to stderr
    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = mnemosyne_telemetry::init_telemetry(
        &log_config(&config.telemetry),
        &metrics_config(&config.telemetry),
    ) {
        eprintln!("Failed to initialize telemetry: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = mnemosyne_sidecar::VERSION,
        service = %config.telemetry.service_name,
        environment = %config.telemetry.environment,
        "Starting Mnemosyne sidecar"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "sidecar failed");
            ExitCode::FAILURE
        }
    }
}
