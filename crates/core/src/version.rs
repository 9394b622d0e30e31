use std::fmt;

/// BuildInfo reports build-time metadata for the running binary.
#[derive(serde::Serialize, Clone, Debug)]
pub struct BuildInfo {
	pub version: &'static str,
	pub rust_version: &'static str,
}

impl BuildInfo {
	pub fn new() -> Self {
		BuildInfo {
			version: option_env!("AIGW_BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION")),
			rust_version: option_env!("AIGW_RUSTC_VERSION").unwrap_or("unknown"),
		}
	}
}

impl Default for BuildInfo {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BuildInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"version: {}, rust: {}",
			self.version, self.rust_version
		)
	}
}
