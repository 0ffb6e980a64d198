use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;

use unfurl::{config::ConvertConfig, converter::Converter, discovery::ScriptSource};

/// Convert a single-file Django script into a full Django project
#[derive(Debug, Parser)]
#[command(name = "unfurl", version, about)]
struct Cli {
    /// The script to convert
    script: PathBuf,

    /// Directory to build the project in; must not exist yet
    dest: PathBuf,

    /// Django project name
    #[arg(short, long)]
    name: Option<String>,

    /// App name; defaults to the script filename
    #[arg(long)]
    app_name: Option<String>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let script = ScriptSource::load(&cli.script)
        .with_context(|| format!("could not load script {}", cli.script.display()))?;
    let config = ConvertConfig::load_from_dir(script.dir())
        .with_context(|| format!("could not load {}", unfurl::config::CONFIG_FILE))?;

    let project_name = cli
        .name
        .or(config.project_name)
        .unwrap_or_else(|| "project".to_string());
    let app_name = cli.app_name.or(config.app_name);

    let mut converter = Converter::new(
        script,
        &cli.dest,
        &project_name,
        app_name.as_deref().map(str::trim).filter(|name| !name.is_empty()),
    )
    .context("could not analyse script")?;
    converter
        .build()
        .with_context(|| format!("conversion failed, partial output in {}", cli.dest.display()))?;

    info!(
        "converted {} into {}",
        cli.script.display(),
        cli.dest.join(&project_name).display()
    );
    Ok(())
}
