use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use yourgpt_sdk::bootstrap::bootstrap_snippet;
use yourgpt_sdk::env::Document;
use yourgpt_sdk::loader::{ensure_root_container, insert_script_tag, insert_stylesheet_tag};
use yourgpt_sdk::{SdkConfig, VERSION};

#[derive(Parser, Debug)]
#[command(name = "yourgpt-sdk", version = VERSION)]
#[command(about = "Embed the YourGPT chatbot widget into HTML pages")]
struct Args {
    /// SDK config file (TOML); falls back to YOURGPT_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the inline bootstrap script
    Snippet,
    /// Add the widget container, stylesheet and script to a page and print it
    Inject {
        /// HTML page to rewrite
        #[arg(long)]
        input: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    config.validate().context("invalid SDK config")?;

    match args.command {
        Command::Snippet => println!("{}", bootstrap_snippet(&config)),
        Command::Inject { input } => {
            let html = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("failed to read {}", input.display()))?;
            println!("{}", inject(&html, &config)?);
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SdkConfig> {
    match path {
        Some(path) => SdkConfig::load(path),
        None => SdkConfig::from_env(),
    }
}

fn inject(html: &str, config: &SdkConfig) -> anyhow::Result<String> {
    let document = Document::parse(html);
    let root = ensure_root_container(&document)?;
    let css = insert_stylesheet_tag(&document, &config.stylesheet_url())?;
    let js = insert_script_tag(&document, &config.script_url())?;
    tracing::info!(root, css, js, "widget assets injected");
    Ok(document.to_html())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
