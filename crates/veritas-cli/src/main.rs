//! `veritas` command line.
//!
//! Usage:
//!   veritas check "Claim text" --strategy fast    # offline verdict
//!   veritas check "Claim text" --json             # verdict as JSON
//!   veritas patterns "Claim text"                 # matched pattern rules
//!   veritas config --config veritas.yaml          # effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use veritas_core::patterns;
use veritas_core::{validate_verdict, Strategy, Verdict};
use veritas_runtime::{AnalyzeOptions, Engine, EngineConfig, Orchestrator};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(about = "Claim verification engine", version)]
struct Cli {
    /// YAML config file; without it, VERITAS_* environment overrides apply
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a claim offline (only the pattern rules are available)
    Check {
        claim: String,

        #[arg(short, long, default_value = "comprehensive")]
        strategy: Strategy,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which pattern rules match a claim
    Patterns { claim: String },

    /// Print the effective configuration as YAML
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Check {
            claim,
            strategy,
            json,
        } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let verdict = runtime.block_on(check(config, &claim, strategy))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                print_verdict(&verdict);
            }
        }
        Command::Patterns { claim } => print_patterns(&claim),
        Command::Config => print!("{}", config.to_yaml()?),
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => EngineConfig::from_env().context("invalid VERITAS_* environment override"),
    }
}

async fn check(config: EngineConfig, claim: &str, strategy: Strategy) -> Result<Verdict> {
    let engine = Arc::new(Engine::new(config)?);
    let orchestrator = Orchestrator::builder(engine).build()?;
    let verdict = orchestrator
        .analyze(claim, AnalyzeOptions::with_strategy(strategy))
        .await;

    if let Err(errors) = validate_verdict(&verdict) {
        tracing::warn!(errors = ?errors, "verdict failed schema validation");
    }
    Ok(verdict)
}

fn print_verdict(verdict: &Verdict) {
    println!("Classification: {}", verdict.classification);
    println!("Score:          {:.2}", verdict.overall_score);
    println!("Confidence:     {:.2}", verdict.overall_confidence);
    if let Some(message) = &verdict.message {
        println!("Note:           {}", message);
    }

    println!("\nEvidence:");
    for evidence in &verdict.evidences {
        let outcome = match (evidence.error, evidence.normalized_score()) {
            (Some(kind), _) => format!("failed ({})", kind),
            (None, Some(score)) => format!("score {:.2}", score),
            (None, None) => "no signal".to_string(),
        };
        let provider = evidence.provider_id.as_str();
        match &evidence.message {
            Some(message) => println!("  {:<10} {}  {}", provider, outcome, message),
            None => println!("  {:<10} {}", provider, outcome),
        }
    }
}

fn print_patterns(claim: &str) {
    let assessment = patterns::assess(claim);
    if !assessment.has_signal() {
        println!("No pattern signals.");
        return;
    }

    for signal in &assessment.signals {
        let excerpt = claim.get(signal.start..signal.end).unwrap_or_default();
        println!("  {:?} {:<20} {:?}", signal.kind, signal.name, excerpt);
    }
    if let (Some(score), Some(confidence)) = (assessment.score, assessment.confidence) {
        println!("\nScore: {:.2}  Confidence: {:.2}", score, confidence);
    }
}
