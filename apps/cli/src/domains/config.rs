use crate::context::Context;

use mk_core::EngineConfig;
use mk_core_heavy_lifting::Library;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
	/// Print the configuration
	Show,
	/// Add a library root
	AddLibrary {
		path: PathBuf,
		/// Skip videos under this root
		#[arg(long)]
		exclude_video: bool,
		/// Skip images and archives under this root
		#[arg(long)]
		exclude_image: bool,
	},
	/// Remove a library root
	RemoveLibrary { path: PathBuf },
	/// Where generated artifacts go, relative paths are resolved against the data directory
	SetGeneratedPath { path: PathBuf },
	/// Workers per task queue, 0 for one per CPU
	SetParallelTasks { count: usize },
}

pub async fn run(ctx: &Context, cmd: ConfigCmd) -> Result<()> {
	match cmd {
		ConfigCmd::Show => {}
		ConfigCmd::AddLibrary {
			path,
			exclude_video,
			exclude_image,
		} => {
			if ctx.engine.config().libraries.iter().any(|l| l.path == path) {
				bail!("'{}' is already a library", path.display());
			}

			ctx.engine
				.update_config(|config| {
					config.libraries.push(Library {
						exclude_video,
						exclude_image,
						..Library::new(path)
					});
				})
				.await?;
		}
		ConfigCmd::RemoveLibrary { path } => {
			if !ctx.engine.config().libraries.iter().any(|l| l.path == path) {
				bail!("'{}' is not a library", path.display());
			}

			ctx.engine
				.update_config(|config| config.libraries.retain(|l| l.path != path))
				.await?;
		}
		ConfigCmd::SetGeneratedPath { path } => {
			ctx.engine
				.update_config(|config| config.generated_path = path)
				.await?;
		}
		ConfigCmd::SetParallelTasks { count } => {
			ctx.engine
				.update_config(|config| config.parallel_tasks = count)
				.await?;
		}
	}

	ctx.print(&ctx.engine.config(), |config: &EngineConfig| {
		println!("file: {}", EngineConfig::path(ctx.engine.data_dir()).display());
		println!("libraries:");
		for library in &config.libraries {
			println!(
				"  {}{}{}",
				library.path.display(),
				if library.exclude_video { " (no videos)" } else { "" },
				if library.exclude_image { " (no images)" } else { "" },
			);
		}
		println!(
			"generated: {}",
			config.generated_dir(ctx.engine.data_dir()).display()
		);
		println!("parallel tasks: {}", config.parallel_tasks);
		println!("naming: {:?}", config.naming_algorithm);
		println!("ffmpeg: {}", config.ffmpeg_path.display());
	})
}
