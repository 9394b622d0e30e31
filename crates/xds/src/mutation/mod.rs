//! Snapshot mutation.
//!
//! Each hook receives resources the host proxy already translated and owns
//! them for the duration of the call. Every mutation detects prior
//! application of its own output (by filter name, cluster name, or metadata
//! key) and no-ops, because the host proxy may invoke a hook multiple times
//! for the same snapshot.

use prost::Name;
use prost_types::Any;

use crate::*;

pub mod clusters;
pub mod inference;
pub mod mcp;
pub mod vhost;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
	#[error("cluster name {0:?} does not match httproute/<ns>/<name>/rule/<idx>")]
	ClusterName(Strng),
	#[error("no AIGatewayRoute {namespace}/{name} in the snapshot")]
	RouteNotFound { namespace: Strng, name: Strng },
	#[error("failed to decode {type_url}: {message}")]
	Decode { type_url: String, message: String },
	#[error("malformed extension resource: {0}")]
	ExtensionResource(String),
}

/// The `httproute/<ns>/<name>/rule/<idx>` naming convention for
/// gateway-owned clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRuleRef {
	pub namespace: Strng,
	pub name: Strng,
	pub rule_index: usize,
}

impl RouteRuleRef {
	pub fn parse(cluster_name: &str) -> Option<RouteRuleRef> {
		let rest = cluster_name.strip_prefix("httproute/")?;
		let mut parts = rest.split('/');
		let namespace = parts.next()?;
		let name = parts.next()?;
		if parts.next()? != "rule" {
			return None;
		}
		let rule_index = parts.next()?.parse().ok()?;
		if parts.next().is_some() {
			return None;
		}
		Some(RouteRuleRef {
			namespace: strng::new(namespace),
			name: strng::new(name),
			rule_index,
		})
	}

	/// The canonical per-endpoint backend name stored in filter metadata.
	pub fn backend_name(&self, backend: &str, ref_index: usize) -> String {
		format!(
			"{}/{}/route/{}/rule/{}/ref/{}",
			self.namespace, backend, self.name, self.rule_index, ref_index
		)
	}
}

/// How the endpoint-picker ext_proc filter should receive bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
	#[default]
	Buffered,
	Streamed,
	Duplex,
}

impl BodyMode {
	fn as_str(&self) -> &'static str {
		match self {
			BodyMode::Buffered => "Buffered",
			BodyMode::Streamed => "Streamed",
			BodyMode::Duplex => "Duplex",
		}
	}

	fn parse(s: &str) -> Option<BodyMode> {
		match s {
			"Buffered" => Some(BodyMode::Buffered),
			"Streamed" => Some(BodyMode::Streamed),
			"Duplex" => Some(BodyMode::Duplex),
			_ => None,
		}
	}
}

/// An inference pool, carried through the host proxy's metadata plane as a
/// slash-separated tuple so it survives round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencePoolRef {
	pub namespace: Strng,
	pub name: Strng,
	pub epp_service: Strng,
	pub port: u16,
	pub body_mode: BodyMode,
	pub allow_mode_override: bool,
}

impl InferencePoolRef {
	pub fn encode(&self) -> String {
		format!(
			"{}/{}/{}/{}/{}/{}",
			self.namespace,
			self.name,
			self.epp_service,
			self.port,
			self.body_mode.as_str(),
			self.allow_mode_override
		)
	}

	/// Decode the tuple. A host proxy that strips trailing fields leaves the
	/// body mode and override flag at their defaults.
	pub fn decode(s: &str) -> Option<InferencePoolRef> {
		let mut parts = s.split('/');
		let namespace = strng::new(parts.next()?);
		let name = strng::new(parts.next()?);
		let epp_service = strng::new(parts.next()?);
		let port = parts.next()?.parse().ok()?;
		let body_mode = parts
			.next()
			.and_then(BodyMode::parse)
			.unwrap_or_default();
		let allow_mode_override = parts
			.next()
			.and_then(|v| v.parse().ok())
			.unwrap_or_default();
		Some(InferencePoolRef {
			namespace,
			name,
			epp_service,
			port,
			body_mode,
			allow_mode_override,
		})
	}

	pub fn cluster_name(&self) -> String {
		crate::names::endpoint_picker_cluster(&self.name, &self.namespace)
	}

	pub fn filter_name(&self) -> String {
		crate::names::endpoint_picker_filter(&self.name, &self.namespace)
	}

	/// The in-cluster DNS name of the endpoint-picker service.
	pub fn service_authority(&self) -> String {
		format!("{}.{}.svc.cluster.local", self.epp_service, self.namespace)
	}
}

/// The InferencePool object shape as attached by the host proxy in
/// extension resources (JSON encoded Kubernetes object).
pub fn parse_inference_pool(unstructured: &[u8]) -> Result<InferencePoolRef, ConfigurationError> {
	#[derive(serde::Deserialize)]
	#[serde(rename_all = "camelCase")]
	struct Unstructured {
		#[serde(default)]
		kind: String,
		metadata: Meta,
		#[serde(default)]
		spec: Spec,
	}
	#[derive(serde::Deserialize)]
	struct Meta {
		name: String,
		#[serde(default)]
		namespace: String,
	}
	#[derive(serde::Deserialize, Default)]
	#[serde(rename_all = "camelCase")]
	struct Spec {
		#[serde(default)]
		extension_ref: Option<ExtensionRef>,
	}
	#[derive(serde::Deserialize)]
	#[serde(rename_all = "camelCase")]
	struct ExtensionRef {
		name: String,
		#[serde(default)]
		port_number: Option<u16>,
	}

	let obj: Unstructured = serde_json::from_slice(unstructured)
		.map_err(|e| ConfigurationError::ExtensionResource(e.to_string()))?;
	if obj.kind != "InferencePool" {
		return Err(ConfigurationError::ExtensionResource(format!(
			"unexpected kind {:?}",
			obj.kind
		)));
	}
	let ext = obj.spec.extension_ref.ok_or_else(|| {
		ConfigurationError::ExtensionResource("missing spec.extensionRef".to_string())
	})?;
	Ok(InferencePoolRef {
		namespace: strng::new(&obj.metadata.namespace),
		name: strng::new(&obj.metadata.name),
		epp_service: strng::new(&ext.name),
		port: ext.port_number.unwrap_or(9002),
		body_mode: BodyMode::default(),
		allow_mode_override: false,
	})
}

/// pack wraps a message into an Any. Marshal failures indicate a programmer
/// bug and abort the process.
pub(crate) fn pack<M: prost::Message + Name>(msg: &M) -> Any {
	Any::from_msg(msg).expect("protobuf marshal cannot fail")
}

/// unpack decodes an Any, surfacing failures as configuration errors so the
/// caller can log and skip instead of failing the whole push.
pub(crate) fn unpack<M: prost::Message + Name + Default>(
	any: &Any,
) -> Result<M, ConfigurationError> {
	any.to_msg().map_err(|e| ConfigurationError::Decode {
		type_url: any.type_url.clone(),
		message: e.to_string(),
	})
}

pub(crate) fn duration(seconds: i64) -> prost_types::Duration {
	prost_types::Duration { seconds, nanos: 0 }
}
