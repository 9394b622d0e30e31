use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

/// Ready tracks whether the process is ready.
#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		Ready(Default::default())
	}

	/// register_task allows a caller to add a dependency to be marked "ready".
	pub fn register_task(&self, name: &str) -> BlockReady {
		self.0.lock().unwrap().insert(name.to_string());
		BlockReady {
			parent: self.to_owned(),
			name: name.to_string(),
		}
	}

	pub fn pending(&self) -> HashSet<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn is_ready(&self) -> bool {
		self.0.lock().unwrap().is_empty()
	}
}

/// BlockReady blocks readiness until it is dropped.
pub struct BlockReady {
	parent: Ready,
	name: String,
}

impl BlockReady {
	pub fn subtask(&self, name: &str) -> BlockReady {
		self.parent.register_task(name)
	}
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		let removed = pending.remove(&self.name);
		debug_assert!(removed); // It is a bug to somehow remove something twice
		let left = pending.len();
		if left == 0 {
			info!("Task '{}' complete, marking server ready", self.name);
		} else {
			info!(
				"Task '{}' complete, still awaiting {left} tasks",
				self.name
			);
		}
	}
}
