use crate::context::Context;

use mk_core_heavy_lifting::{
	jobs::{CleanOutput, MigrateHashOutput, ScanOutput},
	model::SceneId,
	repository::Reader,
	GenerateOptions, ScanInput,
};

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::generate::ArtifactArgs;

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
	/// Sub-paths of the libraries to scan, every library when none
	pub paths: Vec<PathBuf>,
	/// Artifacts generated for new and changed files
	#[command(flatten)]
	pub artifacts: ArtifactArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DuplicatesArgs {
	/// Maximum perceptual hash distance, in bits
	#[arg(long, default_value_t = 0)]
	pub distance: u32,
	/// Maximum duration difference in seconds, negative to ignore durations
	#[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
	pub duration_diff: f64,
}

pub async fn scan(ctx: &Context, args: ScanArgs) -> Result<()> {
	let input = ScanInput {
		paths: args.paths,
		generate: GenerateOptions::from(&args.artifacts),
		min_mod_time: None,
	};

	let output = ctx.finish(ctx.engine.scan(input).await?).await?;

	ctx.print(&output, |o: &ScanOutput| {
		let scan = &o.scan;
		println!(
			"walked {}, created {}, updated {}, unchanged {}, rejected {}",
			scan.walked, scan.created, scan.updated, scan.unchanged, scan.rejected
		);
		println!(
			"captions {}, generation tasks {} ({} completed)",
			scan.captions, scan.tasks_queued, o.generation.completed
		);
		if !o.removed_galleries.is_empty() {
			println!("removed {} empty galleries", o.removed_galleries.len());
		}
		for error in &scan.non_critical_errors {
			println!("  {error}");
		}
		for error in &o.generation.errors {
			println!("  {error}");
		}
	})
}

pub async fn clean(ctx: &Context, dry_run: bool) -> Result<()> {
	ctx.load_library().await?;

	let output = ctx.finish(ctx.engine.clean(dry_run).await?).await?;

	ctx.print(&output, |o: &CleanOutput| {
		let verb = if o.dry_run { "would remove" } else { "removed" };
		for path in &o.removed_files {
			println!("{verb} {}", path.display());
		}
		for path in &o.removed_folders {
			println!("{verb} folder {}", path.display());
		}
		println!(
			"{verb} {} files, {} folders, {} galleries and {} artifacts",
			o.removed_files.len(),
			o.removed_folders.len(),
			o.removed_galleries.len(),
			o.removed_artifacts
		);
		for error in &o.non_critical_errors {
			println!("  {error}");
		}
	})
}

pub async fn migrate_hash(ctx: &Context) -> Result<()> {
	ctx.load_library().await?;

	let output = ctx.finish(ctx.engine.migrate_hash().await?).await?;

	ctx.print(&output, |o: &MigrateHashOutput| {
		println!("renamed {} artifacts, skipped {} videos", o.renamed, o.skipped);
		for error in &o.non_critical_errors {
			println!("  {error}");
		}
	})
}

#[derive(Serialize)]
struct DuplicateScene {
	scene_id: SceneId,
	path: Option<PathBuf>,
}

#[derive(Serialize)]
struct Duplicates {
	groups: Vec<Vec<DuplicateScene>>,
}

async fn describe(ctx: &Context, scene_id: SceneId) -> Result<DuplicateScene> {
	let repository = ctx.engine.repository();

	let file_id = repository
		.find_scene(scene_id)
		.await?
		.and_then(|scene| scene.primary_file_id());
	let path = match file_id {
		Some(id) => repository.find_file(id).await?.map(|file| file.path),
		None => None,
	};

	Ok(DuplicateScene { scene_id, path })
}

/// Hashes every video missing a perceptual hash, then groups the near-identical ones
pub async fn duplicates(ctx: &Context, args: DuplicatesArgs) -> Result<()> {
	let input = ScanInput {
		generate: GenerateOptions {
			phashes: true,
			..Default::default()
		},
		..Default::default()
	};
	ctx.finish(ctx.engine.scan(input).await?).await?;

	let mut groups = Vec::new();
	for group in ctx
		.engine
		.find_duplicates(args.distance, args.duration_diff)
		.await?
	{
		let mut scenes = Vec::with_capacity(group.len());
		for scene_id in group {
			scenes.push(describe(ctx, scene_id).await?);
		}
		groups.push(scenes);
	}

	ctx.print(&Duplicates { groups }, |o| {
		if o.groups.is_empty() {
			println!("No duplicates found");
		}
		for (i, group) in o.groups.iter().enumerate() {
			println!("group {}:", i + 1);
			for scene in group {
				match &scene.path {
					Some(path) => println!("  scene {} {}", scene.scene_id, path.display()),
					None => println!("  scene {}", scene.scene_id),
				}
			}
		}
	})
}
