//! Alertgate CLI
//!
//! Command-line interface for the Alertgate alert engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use alertgate::alerting::{prepare, render_notification, AlertEngine};
use alertgate::collaborators::{MemoryRegistry, MemoryRemoteCall, MemoryTextResolver};
use alertgate::config::{Config, ConfigProvider, LiveConfig};
use alertgate::models::{AlertEvent, AlertLevel, CounterSample, ObjectLifecycle, SubjectId, TraceCompleted};
use alertgate::transport::{ConfiguredTransport, Transport};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Alertgate - threshold alerting for monitoring events
#[derive(Parser)]
#[command(name = "alertgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ALERTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine on NDJSON events read from stdin
    Serve {
        /// Seconds between configuration reloads (0 disables)
        #[arg(long, default_value = "30", env = "ALERTGATE_RELOAD_SECS")]
        reload_secs: u64,
    },

    /// Print the effective configuration
    CheckConfig,

    /// Send a sample alert through the configured transport
    SendTest {
        /// Level of the sample alert (0: INFO .. 3: FATAL)
        #[arg(long, default_value = "1")]
        level: u8,
    },
}

/// One line of `serve` input
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum IngestRecord {
    Lifecycle(ObjectLifecycle),
    Trace(TraceCompleted),
    Counter(CounterSample),
    Alert {
        subject_id: SubjectId,
        level: AlertLevel,
        title: String,
        message: String,
        #[serde(default)]
        subject_type: Option<String>,
    },
    Inactive {
        subject_id: SubjectId,
    },
    Threads {
        subject_id: SubjectId,
        threads: Vec<String>,
    },
    Family {
        subject_type: String,
        family: String,
    },
    Service {
        id: i32,
        name: String,
    },
    ErrorText {
        id: i32,
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();

    // Load configuration
    let config_path = cli.config.clone().or_else(default_config_path);
    let live = match LiveConfig::from_file(config_path.as_deref()) {
        Ok(live) => Arc::new(live),
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_logging(&live.current(), cli.verbose);
    if let Some(path) = &config_path {
        info!(path = %path.display(), "Loaded configuration");
    }

    // Execute command
    let result = match cli.command {
        Commands::Serve { reload_secs } => run_serve(live, reload_secs).await,
        Commands::CheckConfig => run_check_config(&live.current(), cli.format),
        Commands::SendTest { level } => run_send_test(&live.current(), level).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "alertgate", "alertgate")
        .map(|dirs| dirs.config_dir().join("alertgate.toml"))
        .filter(|path| path.exists())
}

fn init_logging(config: &Config, verbose: bool) {
    let log_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_serve(live: Arc<LiveConfig>, reload_secs: u64) -> anyhow::Result<()> {
    let registry = Arc::new(MemoryRegistry::new());
    let texts = Arc::new(MemoryTextResolver::new());
    let remote = Arc::new(MemoryRemoteCall::new());
    let transport = Arc::new(ConfiguredTransport::new()?);

    let engine = AlertEngine::new(
        live.clone(),
        registry.clone(),
        texts.clone(),
        remote.clone(),
        transport,
    );
    let handle = engine.start()?;

    let reloader = (reload_secs > 0).then(|| {
        let live = live.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(reload_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = live.reload() {
                    warn!(error = %e, "Configuration reload failed, keeping previous");
                }
            }
        })
    });

    info!("Reading events from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IngestRecord>(&line) {
                    Ok(record) => ingest(&engine, &registry, &texts, &remote, record),
                    Err(e) => warn!(error = %e, "Skipping malformed event"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }

    if let Some(reloader) = reloader {
        reloader.abort();
    }
    handle.shutdown().await;
    Ok(())
}

fn ingest(
    engine: &AlertEngine,
    registry: &MemoryRegistry,
    texts: &MemoryTextResolver,
    remote: &MemoryRemoteCall,
    record: IngestRecord,
) {
    match record {
        IngestRecord::Lifecycle(mut event) => {
            let previous = registry.observe(&event);
            if event.was_alive_before.is_none() {
                event.was_alive_before = previous;
            }
            engine.on_object_lifecycle(&event);
        }
        IngestRecord::Trace(trace) => engine.on_trace_completed(&trace),
        IngestRecord::Counter(sample) => engine.on_counter_sample(&sample),
        IngestRecord::Alert {
            subject_id,
            level,
            title,
            message,
            subject_type,
        } => {
            let alert =
                AlertEvent::new(level, subject_id, title, message).with_subject_type(subject_type);
            engine.on_external_alert(alert);
        }
        IngestRecord::Inactive { subject_id } => registry.set_active(subject_id, false),
        IngestRecord::Threads {
            subject_id,
            threads,
        } => remote.set_threads(subject_id, threads),
        IngestRecord::Family {
            subject_type,
            family,
        } => registry.set_family(subject_type, family),
        IngestRecord::Service { id, name } => texts.insert_service(id, name),
        IngestRecord::ErrorText { id, text } => texts.insert_error(id, text),
    }
    debug!("Event ingested");
}

fn run_check_config(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            let alerting = &config.alerting;
            println!("Alerting");
            println!("  enabled:             {}", alerting.email_alert_enabled);
            println!("  min level:           {}", alerting.min_level());
            println!("  elapsed threshold:   {} ms", alerting.elapsed_time_threshold_ms);
            println!("  gc time threshold:   {}", alerting.gc_time_threshold_ms);
            println!("  thread threshold:    {}", alerting.thread_count_threshold);
            println!("  managed family:      {}", alerting.managed_runtime_family);
            println!("  dedup repeats:       {}", alerting.ignore_continuous_duplicates);
            println!("Transport");
            println!("  kind:                {:?}", config.email.transport);
            println!("  smtp:                {}:{}", config.email.smtp.host, config.email.smtp.port);
            println!("  to:                  {:?}", config.email.recipients());
            println!("  cc:                  {:?}", config.email.cc_recipients());
        }
    }
    Ok(())
}

async fn run_send_test(config: &Config, level: u8) -> anyhow::Result<()> {
    let event = AlertEvent::new(
        AlertLevel::from_code(level),
        SubjectId::from_name("alertgate"),
        "Test alert",
        "This is a test notification sent by alertgate send-test.",
    )
    .with_subject_type(Some("alertgate".to_string()));

    let alert = prepare(event, &MemoryRegistry::new());
    let notification = render_notification(&alert, config);
    let transport = ConfiguredTransport::new()?;

    tokio::time::timeout(
        config.email.send_timeout,
        transport.send(config, &notification),
    )
    .await
    .map_err(|_| anyhow::anyhow!("send timed out after {:?}", config.email.send_timeout))??;

    println!("Test alert sent to {:?}", notification.recipients);
    Ok(())
}
