//! Command line entry point rehosting one HTML document into a local bundle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use offline_rehoster::config::RehostConfig;
use offline_rehoster::emit;
use offline_rehoster::engine::Rehoster;
use offline_rehoster::fetch::ReqwestTransport;
use offline_rehoster::html;

/// Rewrite a document so its external assets are served from a local bundle.
#[derive(Debug, Parser)]
#[command(name = "offline_rehoster", version, about)]
struct Cli {
  /// HTML document to rehost.
  input: PathBuf,
  /// Directory the offline bundle is written to.
  #[arg(long, default_value = "offline-bundle")]
  out_dir: PathBuf,
  /// Configuration file overriding the `rehost.config.json` discovery.
  #[arg(long)]
  config: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt().with_target(false).init();
  let cli = Cli::parse();

  let config = match &cli.config {
    Some(path) => RehostConfig::from_path(path)
      .with_context(|| format!("failed to load configuration from {}", path.display()))?,
    None => RehostConfig::discover(Path::new(".")),
  };

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to start async runtime")?;
  runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: RehostConfig) -> Result<()> {
  let document = fs::read_to_string(&cli.input)
    .with_context(|| format!("failed to read {}", cli.input.display()))?;

  let transport = ReqwestTransport::new(&config.user_agent)?;
  let engine = Rehoster::new(Arc::new(transport), &config);

  let rewritten = html::rewrite_document(&engine, &document)?;
  let files = engine.registry().materialize_all().await?;

  fs::create_dir_all(&cli.out_dir)
    .with_context(|| format!("failed to create {}", cli.out_dir.display()))?;
  let manifest = emit::write_bundle(&files, &cli.out_dir, &config)?;
  emit::write_manifest(&manifest, &cli.out_dir, &config)?;

  let document_name = cli
    .input
    .file_name()
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("index.html"));
  let document_path = cli.out_dir.join(document_name);
  fs::write(&document_path, rewritten)
    .with_context(|| format!("failed to write {}", document_path.display()))?;

  info!(
    files = files.len(),
    out_dir = %cli.out_dir.display(),
    "rehosted document"
  );
  Ok(())
}
