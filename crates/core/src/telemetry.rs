use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, reload};

static LOG_HANDLE: OnceCell<LogHandle> = OnceCell::new();

type LogHandle = reload::Handle<EnvFilter, Registry>;

/// setup_logging installs the global tracing subscriber. The filter can be
/// changed at runtime through [`set_level`].
pub fn setup_logging() {
	let filter = default_filter();
	let (filter_layer, reload_handle) = reload::Layer::new(filter);
	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_target(true)
		.with_writer(std::io::stderr);
	tracing_subscriber::registry()
		.with(filter_layer)
		.with(fmt_layer)
		.init();
	let _ = LOG_HANDLE.set(reload_handle);
}

fn default_filter() -> EnvFilter {
	let default = env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_string());
	EnvFilter::try_new(default).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// set_level updates the active filter, e.g. `set_level("debug")` or a full
/// env-filter directive set.
pub fn set_level(filter: &str) -> anyhow::Result<()> {
	let Some(handle) = LOG_HANDLE.get() else {
		anyhow::bail!("logging is not initialized");
	};
	let new_filter = EnvFilter::try_new(filter)?;
	handle.reload(new_filter)?;
	Ok(())
}
