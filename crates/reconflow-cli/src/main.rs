use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use reconflow_core::{
    load_target, render_context_summary, render_enablement, render_run_report, ArtifactLayout,
    GlobalConfig, Orchestrator, OutputFormat, ReportContext, RuleSet, Target,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "reconflow",
    author,
    version,
    about = "Recon pipeline orchestrator and report context builder"
)]
struct Cli {
    /// Global configuration file (tool paths, API providers)
    #[arg(
        long = "config",
        value_name = "FILE",
        default_value = "config/config.yml",
        global = true
    )]
    config: PathBuf,

    /// Directory holding `<target>.yml` files
    #[arg(
        long = "targets-dir",
        value_name = "DIR",
        default_value = "config/targets",
        global = true
    )]
    targets_dir: PathBuf,

    /// Root of the per-target artifact tree
    #[arg(
        long = "data-dir",
        value_name = "DIR",
        default_value = "data",
        global = true
    )]
    data_dir: PathBuf,

    /// Emit JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every enabled stage, then build the report context
    Run {
        #[arg(long)]
        target: String,
    },
    /// Build the report context from existing artifacts only
    Report {
        #[arg(long)]
        target: String,
    },
    /// Show which stages the configuration enables
    Stages {
        #[arg(long)]
        target: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    match &cli.command {
        Commands::Run { target } => run(&cli, target, format).await?,
        Commands::Report { target } => report(&cli, target, format)?,
        Commands::Stages { target } => stages(&cli, target, format)?,
    }
    Ok(())
}

async fn run(cli: &Cli, identity: &str, format: OutputFormat) -> Result<()> {
    let config = load_global(&cli.config)?;
    let identity = identity.trim();
    let target = load_target(&cli.targets_dir, identity)?;
    let layout = ArtifactLayout::new(&cli.data_dir, identity);

    if format == OutputFormat::Human {
        println!("{} Running pipeline for {}", "[*]".cyan(), target.name.bold());
    }
    let run_report = Orchestrator::new(Arc::new(config), target.clone(), layout.clone())
        .run()
        .await;
    let context = build_context(&layout, &target)?;

    match format {
        OutputFormat::Human => {
            print!("{}", render_run_report(&run_report, format)?);
            println!();
            print_summary(&context, &layout)?;
        }
        OutputFormat::Json => {
            let stages: serde_json::Value =
                serde_json::from_str(&render_run_report(&run_report, format)?)?;
            let summary: serde_json::Value =
                serde_json::from_str(&render_context_summary(&context, format)?)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "run": stages,
                    "summary": summary,
                }))?
            );
        }
    }
    Ok(())
}

fn report(cli: &Cli, identity: &str, format: OutputFormat) -> Result<()> {
    let identity = identity.trim();
    let target = load_target(&cli.targets_dir, identity)?;
    let layout = ArtifactLayout::new(&cli.data_dir, identity);
    let context = build_context(&layout, &target)?;
    match format {
        OutputFormat::Human => print_summary(&context, &layout)?,
        OutputFormat::Json => println!("{}", render_context_summary(&context, format)?),
    }
    Ok(())
}

fn stages(cli: &Cli, identity: &str, format: OutputFormat) -> Result<()> {
    let config = load_global(&cli.config)?;
    let target = load_target(&cli.targets_dir, identity)?;
    if format == OutputFormat::Human {
        println!("Stages for {}:", target.name.bold());
    }
    println!("{}", render_enablement(&config, format)?.trim_end());
    Ok(())
}

fn load_global(path: &Path) -> Result<GlobalConfig> {
    let config = GlobalConfig::load(path)?;
    info!(path = %path.display(), "loaded global configuration");
    Ok(config)
}

fn build_context(layout: &ArtifactLayout, target: &Target) -> Result<ReportContext> {
    let context =
        ReportContext::from_artifacts(layout, target, &RuleSet::default(), SystemTime::now())?;
    let path = context
        .write(layout)
        .with_context(|| format!("failed to save report context for {}", target.name))?;
    info!(path = %path.display(), "report context written");
    Ok(context)
}

fn print_summary(context: &ReportContext, layout: &ArtifactLayout) -> Result<()> {
    print!("{}", render_context_summary(context, OutputFormat::Human)?);
    println!(
        "\n{} Report context saved under {}",
        "[+]".green(),
        layout.target_dir().display()
    );
    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
