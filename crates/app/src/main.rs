use std::path::PathBuf;
use std::sync::Arc;

use aigateway::filterapi;
use aigw_core::prelude::*;
use aigw_core::{readiness, signal, telemetry, version};
use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
#[command(disable_version_flag = true)]
struct Args {
	/// Use config from bytes
	#[arg(short, long, value_name = "config")]
	config: Option<String>,

	/// Use config from file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	#[arg(long, value_name = "validate-only")]
	validate_only: bool,

	/// Print version (as a simple version string)
	#[arg(short = 'V', value_name = "version")]
	version_short: bool,

	/// Print version (as JSON)
	#[arg(long = "version")]
	version_long: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
	/// Extension server bind address in the form "ip:port".
	extension_addr: Option<String>,
	/// Max receive message size for the extension server, in bytes.
	extension_max_receive_message_size: Option<usize>,
	/// Path of the unix socket the translator listens on.
	extproc_uds_path: Option<PathBuf>,
	/// Logging filter directives (env-filter syntax).
	logging: Option<String>,
	/// Per-backend filter configuration.
	#[serde(default)]
	backends: Vec<filterapi::Backend>,
}

#[derive(Debug)]
struct Config {
	extension_addr: SocketAddr,
	extension_max_receive_message_size: usize,
	extproc_uds_path: PathBuf,
	filter: filterapi::Config,
}

fn parse_config(contents: &str) -> anyhow::Result<Config> {
	let raw: RawConfig = aigateway::serdes::yamlviajson::from_str(contents)?;
	if let Some(filter) = &raw.logging {
		telemetry::set_level(filter)?;
	}
	let extension_addr = raw
		.extension_addr
		.as_deref()
		.unwrap_or(aigw_xds::server::DEFAULT_ADDRESS)
		.parse()
		.context("invalid extensionAddr")?;
	Ok(Config {
		extension_addr,
		extension_max_receive_message_size: raw
			.extension_max_receive_message_size
			.unwrap_or(aigw_xds::server::DEFAULT_MAX_RECEIVE_MESSAGE_SIZE),
		extproc_uds_path: raw
			.extproc_uds_path
			.unwrap_or_else(|| PathBuf::from("/var/run/aigateway/extproc.sock")),
		filter: filterapi::Config {
			backends: raw.backends,
		},
	})
}

fn main() -> anyhow::Result<()> {
	telemetry::setup_logging();

	let Args {
		config,
		file,
		validate_only,
		version_short,
		version_long,
	} = Args::parse();

	if version_short {
		println!("{}", version::BuildInfo::new().version);
		return Ok(());
	}
	if version_long {
		println!("{}", version::BuildInfo::new());
		return Ok(());
	}

	let contents = match (config, file) {
		(Some(_), Some(_)) => anyhow::bail!("only one of --config or --file"),
		(Some(config), None) => config,
		(None, Some(file)) => fs_err::read_to_string(&file)?,
		(None, None) => "{}".to_string(),
	};

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.expect("failed to build tokio runtime")
		.block_on(async move {
			let config = parse_config(&contents)?;
			if validate_only {
				println!("configuration is valid");
				return Ok(());
			}
			run(config).await
		})
}

async fn run(config: Config) -> anyhow::Result<()> {
	info!("starting {}", version::BuildInfo::new());

	let ready = readiness::Ready::new();
	let shutdown = signal::Shutdown::new();

	let store = Arc::new(aigw_xds::store::RouteStore::new());
	let filter = Arc::new(filterapi::ConfigSnapshot::new(config.filter));
	if filter.is_empty() {
		warn!("no backends configured; all requests will pass through untranslated");
	}

	let (ext_tx, ext_rx) = tokio::sync::oneshot::channel::<()>();
	let (proc_tx, proc_rx) = tokio::sync::oneshot::channel::<()>();

	let ext_task = ready.register_task("extension server");
	let uds_path = config.extproc_uds_path.display().to_string();
	let extension = tokio::spawn({
		let store = store.clone();
		async move {
			aigw_xds::server::serve(
				config.extension_addr,
				store,
				uds_path,
				config.extension_max_receive_message_size,
				async move {
					let _ = ext_rx.await;
				},
			)
			.await
		}
	});
	drop(ext_task);

	let proc_task = ready.register_task("external processor");
	let extproc = tokio::spawn({
		let filter = filter.clone();
		let path = config.extproc_uds_path.clone();
		async move {
			aigateway::extproc::serve_uds(&path, filter, async move {
				let _ = proc_rx.await;
			})
			.await
		}
	});
	drop(proc_task);

	shutdown.wait().await;
	info!("shutting down");
	let _ = ext_tx.send(());
	let _ = proc_tx.send(());
	extension.await??;
	extproc.await??;
	Ok(())
}
