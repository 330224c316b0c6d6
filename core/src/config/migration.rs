use super::ConfigError;

/// Versioned configuration that can bring itself up to date
pub trait Migrate {
	fn current_version(&self) -> u32;

	fn target_version() -> u32
	where
		Self: Sized;

	/// Applies every migration step from the current version up to the target one, versions newer
	/// than the target are rejected
	fn migrate(&mut self) -> Result<(), ConfigError>;
}
