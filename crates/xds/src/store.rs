//! A read-only snapshot of the controller's AIGatewayRoute objects.
//!
//! The controller subsystem replaces the snapshot wholesale on reconcile; the
//! extension hooks read it lock-free. The hooks never mutate it.

use std::collections::HashMap;

use arc_swap::ArcSwap;

use crate::*;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AIGatewayRoute {
	pub namespace: Strng,
	pub name: Strng,
	#[serde(default)]
	pub rules: Vec<RouteRule>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
	#[serde(default)]
	pub backend_refs: Vec<BackendRef>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
	pub name: Strng,
	#[serde(default)]
	pub priority: u32,
}

#[derive(Debug, Default)]
pub struct RouteStore {
	routes: ArcSwap<HashMap<Strng, Arc<AIGatewayRoute>>>,
}

impl RouteStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the snapshot. Called by the controller on reconcile.
	pub fn replace(&self, routes: Vec<AIGatewayRoute>) {
		let map = routes
			.into_iter()
			.map(|r| (strng::format!("{}/{}", r.namespace, r.name), Arc::new(r)))
			.collect();
		self.routes.store(Arc::new(map));
	}

	pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<AIGatewayRoute>> {
		self
			.routes
			.load()
			.get(&strng::format!("{namespace}/{name}"))
			.cloned()
	}
}
