//! JobRun CLI - run domain tasks from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jobrun_core::TaskPhase;
use jobrun_engine::{Engine, EngineConfig, ProviderRegistry, RawInput, TaskController};

mod manifest;
mod output;

use manifest::ManifestProvider;
use output::Reporter;

/// JobRun CLI - background job runner for back-office domains
#[derive(Parser)]
#[command(name = "jobrun")]
#[command(about = "Validate and run domain tasks", long_about = None)]
struct Cli {
    /// Domain configuration file (JSON). Built-in domains are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured domains and their input roles
    Domains,

    /// Validate files against a domain without running it
    Check {
        /// Domain name
        #[arg(short, long)]
        domain: String,

        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run a domain task on the given files
    Run {
        /// Domain name
        #[arg(short, long)]
        domain: String,

        /// Print progress and the final status as JSON lines
        #[arg(long)]
        json: bool,

        /// Status polling interval in milliseconds
        #[arg(long, default_value_t = 200)]
        poll_ms: u64,

        /// Pause of the demo provider after each input, in milliseconds
        #[arg(long, default_value_t = 0)]
        step_delay_ms: u64,

        /// Input files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    // Load config
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Domains => {
            list_domains(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { domain, files } => check(config, &domain, files),
        Commands::Run {
            domain,
            json,
            poll_ms,
            step_delay_ms,
            files,
        } => {
            run(
                config,
                &domain,
                files,
                Reporter::new(json),
                Duration::from_millis(poll_ms.max(10)),
                Duration::from_millis(step_delay_ms),
            )
            .await
        }
    }
}

fn list_domains(config: &EngineConfig) {
    println!("Domains ({}):", config.domains.len());
    for domain in &config.domains {
        println!(
            "  {} (min {} files, staging {}, results {})",
            domain.name,
            domain.min_inputs,
            domain.staging_dir().display(),
            domain.results_dir().display()
        );
        for rule in &domain.roles {
            let prefixes: Vec<String> = rule.prefixes.iter().map(|p| format!("'{p}'")).collect();
            println!(
                "    - {:<12} {:<8} {:<8} prefixes: {}",
                rule.role,
                if rule.required { "required" } else { "optional" },
                if rule.multiple { "multiple" } else { "single" },
                prefixes.join(", ")
            );
        }
    }
}

fn check(
    config: EngineConfig,
    domain: &str,
    files: Vec<PathBuf>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let engine = Engine::new(config, Arc::new(ProviderRegistry::new()))?;
    let controller = find_controller(&engine, domain)?;
    let inputs: Vec<RawInput> = files.into_iter().map(RawInput::from_path).collect();

    match controller.stager().validate(&inputs) {
        Ok(classification) => {
            println!("Inputs are valid for '{domain}':");
            for input in classification.processed_inputs() {
                println!("  {:<12} {}", input.role, input.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Inputs rejected: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(
    config: EngineConfig,
    domain: &str,
    files: Vec<PathBuf>,
    reporter: Reporter,
    poll: Duration,
    step_delay: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let providers = Arc::new(ProviderRegistry::new());
    for name in config.domains.iter().map(|d| d.name.clone()) {
        providers.register(name, Arc::new(ManifestProvider::new(step_delay)));
    }

    let engine = Engine::new(config, providers)?;
    let controller = find_controller(&engine, domain)?;
    let inputs: Vec<RawInput> = files.into_iter().map(RawInput::from_path).collect();

    let receipt = match controller.start(inputs).await {
        Ok(receipt) => receipt,
        Err(e) => {
            eprintln!("Start rejected: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    reporter.started(domain, receipt.task_id.as_str());

    let mut ticker = tokio::time::interval(poll);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last = (u8::MAX, String::new());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let view = controller.status_view();
                if !view.is_running {
                    break;
                }
                if (view.progress, &view.status) != (last.0, &last.1) {
                    reporter.progress(&view);
                    last = (view.progress, view.status.clone());
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                info!(domain, "Interrupted, requesting cancellation");
                reporter.cancel_requested(&controller.cancel().to_string());
            }
        }
    }

    engine.shutdown().await;

    let phase = controller.phase();
    reporter.finished(phase, &controller.status_view(), &controller.result());

    Ok(match phase {
        TaskPhase::Completed => ExitCode::SUCCESS,
        TaskPhase::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

fn find_controller(
    engine: &Engine,
    domain: &str,
) -> Result<Arc<TaskController>, Box<dyn std::error::Error>> {
    engine.controller(domain).ok_or_else(|| {
        let known: Vec<&str> = engine.domains().collect();
        format!("unknown domain '{}' (known: {})", domain, known.join(", ")).into()
    })
}
