use crate::context::Context;

use mk_core::GenerateRequest;
use mk_core_heavy_lifting::{
	jobs::{GenerateOutput, GenerateSelection},
	model::{ImageId, SceneId},
	GenerateOptions,
};

use anyhow::Result;
use clap::Args;

/// Artifacts to produce
#[derive(Args, Debug, Clone, Default)]
pub struct ArtifactArgs {
	/// Every artifact kind
	#[arg(long)]
	pub all: bool,
	#[arg(long)]
	pub covers: bool,
	/// Video previews
	#[arg(long)]
	pub previews: bool,
	/// Animated webp previews, along with the video ones
	#[arg(long)]
	pub image_previews: bool,
	/// Scrubber sprites and their vtt
	#[arg(long)]
	pub sprites: bool,
	/// Perceptual hashes used to find duplicates
	#[arg(long)]
	pub phashes: bool,
	/// Heatmaps of interactive scenes
	#[arg(long)]
	pub heatmaps: bool,
	/// Clip previews of animated images
	#[arg(long)]
	pub clip_previews: bool,
	/// Thumbnails of large images
	#[arg(long)]
	pub thumbnails: bool,
	#[arg(long)]
	pub transcodes: bool,
}

impl From<&ArtifactArgs> for GenerateOptions {
	fn from(args: &ArtifactArgs) -> Self {
		Self {
			covers: args.all || args.covers,
			previews: args.all || args.previews,
			image_previews: args.all || args.image_previews,
			sprites: args.all || args.sprites,
			phashes: args.all || args.phashes,
			interactive_heatmaps: args.all || args.heatmaps,
			clip_previews: args.all || args.clip_previews,
			thumbnails: args.all || args.thumbnails,
			transcodes: args.all || args.transcodes,
		}
	}
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
	#[command(flatten)]
	pub artifacts: ArtifactArgs,
	/// Only these scenes, along with any `--image`
	#[arg(long = "scene")]
	pub scenes: Vec<SceneId>,
	/// Only these images, along with any `--scene`
	#[arg(long = "image")]
	pub images: Vec<ImageId>,
	/// Regenerate artifacts that already exist
	#[arg(long)]
	pub overwrite: bool,
	/// Transcode even videos that can be streamed as they are
	#[arg(long)]
	pub force_transcodes: bool,
}

impl GenerateArgs {
	fn to_request(&self) -> GenerateRequest {
		let selection = (!self.scenes.is_empty() || !self.images.is_empty()).then(|| {
			GenerateSelection {
				scene_ids: self.scenes.clone(),
				image_ids: self.images.clone(),
			}
		});

		GenerateRequest {
			options: GenerateOptions::from(&self.artifacts),
			selection,
			overwrite: self.overwrite,
			force_transcodes: self.force_transcodes,
		}
	}
}

pub async fn run(ctx: &Context, args: GenerateArgs) -> Result<()> {
	let request = args.to_request();
	if !request.options.any() {
		anyhow::bail!("nothing to generate, pass at least one artifact flag or --all");
	}

	ctx.load_library().await?;

	let output = ctx.finish(ctx.engine.generate(request).await?).await?;

	ctx.print(&output, |o: &GenerateOutput| {
		for (artifact, count) in &o.queued {
			println!("{artifact}: {count} queued");
		}
		println!(
			"completed {}, not required {}, canceled {}, failed {}",
			o.generation.completed,
			o.generation.not_required,
			o.generation.canceled,
			o.generation.errors.len()
		);
		for error in &o.generation.errors {
			println!("  {error}");
		}
		for error in &o.non_critical_errors {
			println!("  {error}");
		}
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn all_enables_every_artifact() {
		let options = GenerateOptions::from(&ArtifactArgs {
			all: true,
			..Default::default()
		});

		assert!(options.covers && options.previews && options.sprites && options.phashes);
		assert!(options.interactive_heatmaps && options.clip_previews && options.transcodes);
		assert!(options.thumbnails && options.image_previews);
	}

	#[test]
	fn selection_only_when_ids_are_given() {
		let args = GenerateArgs {
			artifacts: ArtifactArgs {
				covers: true,
				..Default::default()
			},
			scenes: Vec::new(),
			images: Vec::new(),
			overwrite: false,
			force_transcodes: false,
		};
		assert_eq!(args.to_request().selection, None);

		let args = GenerateArgs {
			scenes: vec![3],
			..args
		};
		assert_eq!(
			args.to_request().selection,
			Some(GenerateSelection {
				scene_ids: vec![3],
				image_ids: Vec::new(),
			})
		);
	}
}
