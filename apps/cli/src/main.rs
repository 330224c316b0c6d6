use mk_core::Engine;
use mk_core_heavy_lifting::MemoryRepository;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod context;
mod domains;

use context::{Context, OutputFormat};
use domains::{
	config::ConfigCmd,
	generate::GenerateArgs,
	library::{DuplicatesArgs, ScanArgs},
};

#[derive(Parser, Debug)]
#[command(name = "mediakeep", about = "Scans media libraries and generates their artifacts")]
struct Cli {
	/// Directory holding the configuration and, by default, the generated artifacts
	#[arg(long, default_value = ".mediakeep")]
	data_dir: PathBuf,

	/// Output format
	#[arg(long, value_enum, default_value = "human")]
	format: OutputFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Scan the libraries, generating artifacts for new and changed files
	Scan(ScanArgs),
	/// Generate artifacts for every scene and image, or the selected ones
	Generate(GenerateArgs),
	/// Remove files that vanished or are now excluded, along with their artifacts
	Clean {
		/// Only report what would be removed
		#[arg(long)]
		dry_run: bool,
	},
	/// Rename video artifacts after the naming algorithm changed
	MigrateHash,
	/// Find near-identical videos through their perceptual hashes
	Duplicates(DuplicatesArgs),
	/// Configuration operations
	#[command(subcommand)]
	Config(ConfigCmd),
}

async fn run(ctx: &Context, command: Commands) -> Result<()> {
	match command {
		Commands::Scan(args) => domains::library::scan(ctx, args).await,
		Commands::Generate(args) => domains::generate::run(ctx, args).await,
		Commands::Clean { dry_run } => domains::library::clean(ctx, dry_run).await,
		Commands::MigrateHash => domains::library::migrate_hash(ctx).await,
		Commands::Duplicates(args) => domains::library::duplicates(ctx, args).await,
		Commands::Config(cmd) => domains::config::run(ctx, cmd).await,
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(fmt::layer().with_writer(std::io::stderr))
		.init();

	let cli = Cli::parse();

	let engine = Arc::new(Engine::new(&cli.data_dir, Arc::new(MemoryRepository::new())).await?);
	let ctx = Context::new(Arc::clone(&engine), cli.format);

	let res = tokio::select! {
		res = run(&ctx, cli.command) => res,
		_ = signal::ctrl_c() => {
			warn!("Interrupted, cancelling jobs;");
			engine.cancel_all().await?;
			Ok(())
		}
	};

	engine.shutdown().await;
	info!("Bye;");

	res
}

#[cfg(test)]
mod tests {
	use super::*;

	use clap::CommandFactory;

	#[test]
	fn arguments_are_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn scan_takes_paths_and_artifacts() {
		let cli = Cli::parse_from(["mediakeep", "scan", "/media/a", "--covers", "--phashes"]);

		let Commands::Scan(args) = cli.command else {
			panic!("expected a scan");
		};
		assert_eq!(args.paths, vec![PathBuf::from("/media/a")]);
		assert!(args.artifacts.covers && args.artifacts.phashes);
		assert!(!args.artifacts.previews);
	}

	#[test]
	fn duplicates_accept_a_negative_duration_diff() {
		let cli = Cli::parse_from([
			"mediakeep",
			"duplicates",
			"--distance",
			"4",
			"--duration-diff",
			"-1",
		]);

		let Commands::Duplicates(args) = cli.command else {
			panic!("expected duplicates");
		};
		assert_eq!(args.distance, 4);
		assert!(args.duration_diff < 0.0);
	}
}
