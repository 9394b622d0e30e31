use crate::llm::LLMTokenUsage;

/// How a provider reports token usage across a streaming response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageMode {
	/// Each report carries the latest totals; the newest observation wins
	/// (Anthropic message_delta is cumulative per its docs).
	Cumulative,
	/// Each report is a per-chunk increment to be summed (Vertex).
	Additive,
}

/// Aggregator folds per-chunk usage observations into the final
/// [`LLMTokenUsage`] record, dispatching on the provider's mode tag rather
/// than attempting to detect the semantics at runtime.
#[derive(Debug, Clone)]
pub struct Aggregator {
	mode: UsageMode,
	usage: LLMTokenUsage,
	observed: bool,
}

impl Aggregator {
	pub fn new(mode: UsageMode) -> Self {
		Aggregator {
			mode,
			usage: LLMTokenUsage::default(),
			observed: false,
		}
	}

	pub fn observe(&mut self, u: LLMTokenUsage) {
		self.observed = true;
		match self.mode {
			UsageMode::Cumulative => self.usage = u,
			UsageMode::Additive => {
				self.usage.input_tokens += u.input_tokens;
				self.usage.output_tokens += u.output_tokens;
				self.usage.total_tokens += u.total_tokens;
				self.usage.cached_input_tokens += u.cached_input_tokens;
			},
		}
	}

	pub fn observed(&self) -> bool {
		self.observed
	}

	pub fn total(&self) -> LLMTokenUsage {
		self.usage
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cumulative_keeps_latest() {
		let mut agg = Aggregator::new(UsageMode::Cumulative);
		agg.observe(LLMTokenUsage::from_totals(10, 1));
		agg.observe(LLMTokenUsage::from_totals(10, 7));
		assert_eq!(agg.total(), LLMTokenUsage::from_totals(10, 7));
	}

	#[test]
	fn additive_sums() {
		let mut agg = Aggregator::new(UsageMode::Additive);
		agg.observe(LLMTokenUsage {
			input_tokens: 5,
			output_tokens: 1,
			total_tokens: 6,
			cached_input_tokens: 0,
		});
		agg.observe(LLMTokenUsage {
			input_tokens: 0,
			output_tokens: 2,
			total_tokens: 2,
			cached_input_tokens: 1,
		});
		let total = agg.total();
		assert_eq!(total.input_tokens, 5);
		assert_eq!(total.output_tokens, 3);
		assert_eq!(total.total_tokens, 8);
		assert_eq!(total.cached_input_tokens, 1);
	}

	#[test]
	fn unobserved_is_zero() {
		let agg = Aggregator::new(UsageMode::Cumulative);
		assert!(!agg.observed());
		assert_eq!(agg.total(), LLMTokenUsage::default());
	}
}
