//! Recall Competition
//!
//! Turns the current context into a distribution over the next recall outcome:
//! stop, or recall one of the items not yet recalled.
//!
//! 1. Cue the feature layer with context through both cf matrices
//! 2. Read each remaining item's support from the feature net input
//! 3. Exponentiate: `strength_i = exp(2·support_i / T)` (Howard & Kahana 2002)
//! 4. Exclude items already recalled
//! 5. Stop probability from the stop rule (forced to 1 once every item is out)
//! 6. `P(item i) = (1 − P(stop)) · strength_i / Σ strength_j`
//!
//! Index 0 of the outcome vector is STOP; index `k ≥ 1` recalls the item at
//! list position `k − 1`. The same distribution is sampled during generation
//! and scored during prediction.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CmrError, Result};
use crate::network::Network;
use crate::patterns::PatternStore;

// ============================================================================
// Stop Rule
// ============================================================================

/// Recall termination rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopRule {
	/// Constant `X1` at every attempt.
	Fixed,
	/// `X1 · e^(X2·(attempt − 1))`, clipped to [0, 1].
	#[default]
	Exponential,
}

/// Probability of stopping at a 1-indexed recall attempt.
///
/// Always within `[0, 1]` when `Ok`.
///
/// # Errors
///
/// Returns [`CmrError::InvalidValue`] if `X1` or `X2` is NaN or infinite.
pub fn stop_probability(rule: StopRule, x1: f64, x2: f64, attempt: usize) -> Result<f64> {
	for (name, value) in [("X1", x1), ("X2", x2)] {
		if !value.is_finite() {
			return Err(CmrError::InvalidValue {
				name: name.to_string(),
				value,
			});
		}
	}
	let raw = match rule {
		StopRule::Fixed => x1,
		StopRule::Exponential => {
			#[allow(clippy::cast_precision_loss)]
			let offset = attempt.saturating_sub(1) as f64;
			let raw = x1 * (x2 * offset).exp();
			// Only a zero intercept times an overflowed growth term lands here
			if raw.is_nan() {
				0.0
			} else {
				raw
			}
		}
	};
	Ok(raw.clamp(0.0, 1.0))
}

// ============================================================================
// Competition
// ============================================================================

/// What to do when the remaining candidates have no usable strength.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroSupport {
	/// Fail with [`CmrError::DegenerateCompetition`].
	#[default]
	Reject,
	/// Give every remaining candidate equal strength.
	Uniform,
}

/// Scalar settings for one competition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompetitionParams {
	/// Temperature `T` (> 0)
	pub temperature: f64,
	/// Termination rule
	pub stop_rule: StopRule,
	/// `X1`
	pub x1: f64,
	/// `X2`
	pub x2: f64,
	/// Zero-strength policy
	pub zero_support: ZeroSupport,
}

/// Classic exponentiated strength `exp(2·support / T)`.
#[inline]
#[must_use]
pub fn raw_strength(support: f64, temperature: f64) -> f64 {
	(2.0 * support / temperature).exp()
}

/// Strengths for the available candidates (zero for excluded ones).
///
/// Exponents are taken relative to the strongest available candidate. Ratios
/// between strengths match [`raw_strength`] exactly, but large `support / T`
/// no longer overflows.
///
/// # Errors
///
/// - [`CmrError::NonPositiveTemperature`] if `temperature <= 0` or NaN
/// - [`CmrError::DimensionMismatch`] if `supports` and `available` differ in length
pub fn competition_strengths(
	supports: &[f64],
	available: &[bool],
	temperature: f64,
) -> Result<Vec<f64>> {
	if temperature.is_nan() || temperature <= 0.0 {
		return Err(CmrError::NonPositiveTemperature(temperature));
	}
	if supports.len() != available.len() {
		return Err(CmrError::DimensionMismatch {
			expected: supports.len(),
			found: available.len(),
		});
	}

	let peak = supports
		.iter()
		.zip(available)
		.filter(|&(_, &open)| open)
		.map(|(&s, _)| s)
		.fold(f64::NEG_INFINITY, f64::max);

	Ok(supports
		.iter()
		.zip(available)
		.map(|(&s, &open)| {
			if open {
				(2.0 * (s - peak) / temperature).exp()
			} else {
				0.0
			}
		})
		.collect())
}

/// Probability distribution over recall outcomes.
#[derive(Clone, Debug, PartialEq)]
pub struct OutcomeDistribution {
	probabilities: Vec<f64>,
}

/// A single recall outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
	/// Recall terminates.
	Stop,
	/// Recall the item at this 0-indexed list position.
	Recall(usize),
}

impl Outcome {
	/// Index into the outcome vector (0 = stop).
	#[must_use]
	pub const fn index(self) -> usize {
		match self {
			Self::Stop => 0,
			Self::Recall(position) => position + 1,
		}
	}

	/// Outcome for an index into the outcome vector.
	#[must_use]
	pub const fn from_index(index: usize) -> Self {
		match index {
			0 => Self::Stop,
			k => Self::Recall(k - 1),
		}
	}
}

impl OutcomeDistribution {
	/// Build a distribution from item supports.
	///
	/// `recalled[k]` marks list position `k` as already recalled; `attempt` is
	/// the 1-indexed recall attempt.
	///
	/// # Errors
	///
	/// - [`CmrError::NonPositiveTemperature`] for `T <= 0`
	/// - [`CmrError::DegenerateCompetition`] when remaining strengths sum to
	///   zero or are not finite and the policy is [`ZeroSupport::Reject`]
	/// - [`CmrError::DimensionMismatch`] if `supports` and `recalled` differ in length
	pub fn from_supports(
		supports: &[f64],
		recalled: &[bool],
		attempt: usize,
		params: &CompetitionParams,
	) -> Result<Self> {
		if supports.len() != recalled.len() {
			return Err(CmrError::DimensionMismatch {
				expected: supports.len(),
				found: recalled.len(),
			});
		}
		if params.temperature.is_nan() || params.temperature <= 0.0 {
			return Err(CmrError::NonPositiveTemperature(params.temperature));
		}

		let n = supports.len();
		let mut probabilities = vec![0.0; n + 1];

		let available: Vec<bool> = recalled.iter().map(|r| !r).collect();
		if !available.iter().any(|&a| a) {
			probabilities[0] = 1.0;
			return Ok(Self { probabilities });
		}

		let stop = stop_probability(params.stop_rule, params.x1, params.x2, attempt)?;
		probabilities[0] = stop;
		if stop >= 1.0 {
			return Ok(Self { probabilities });
		}

		let mut strengths = competition_strengths(supports, &available, params.temperature)?;
		let mut total: f64 = strengths.iter().sum();
		if !total.is_finite() || total <= 0.0 {
			match params.zero_support {
				ZeroSupport::Reject => {
					return Err(CmrError::DegenerateCompetition { attempt, total });
				}
				ZeroSupport::Uniform => {
					for (s, &open) in strengths.iter_mut().zip(&available) {
						*s = if open { 1.0 } else { 0.0 };
					}
					total = strengths.iter().sum();
				}
			}
		}

		let scale = (1.0 - stop) / total;
		for (p, s) in probabilities[1..].iter_mut().zip(&strengths) {
			*p = s * scale;
		}
		Ok(Self { probabilities })
	}

	/// Outcome probabilities; index 0 is stop.
	#[must_use]
	pub fn probabilities(&self) -> &[f64] {
		&self.probabilities
	}

	/// Number of list positions covered.
	#[must_use]
	pub fn list_length(&self) -> usize {
		self.probabilities.len() - 1
	}

	/// Probability of stopping.
	#[must_use]
	pub fn stop(&self) -> f64 {
		self.probabilities[0]
	}

	/// Probability of an outcome, if it is in range.
	#[must_use]
	pub fn probability(&self, outcome: Outcome) -> Option<f64> {
		self.probabilities.get(outcome.index()).copied()
	}

	/// Natural log of an outcome's probability.
	///
	/// An impossible outcome scores `-inf`; that is a valid result, not an error.
	///
	/// # Errors
	///
	/// Returns [`CmrError::IndexOutOfRange`] for a list position past the list.
	pub fn log_probability(&self, outcome: Outcome) -> Result<f64> {
		self.probability(outcome)
			.map(f64::ln)
			.ok_or(CmrError::IndexOutOfRange {
				index: outcome.index(),
				len: self.probabilities.len(),
			})
	}

	/// Pick an outcome by inverse CDF from a uniform draw in `[0, 1)`.
	///
	/// Zero-probability outcomes are never returned.
	#[must_use]
	pub fn select(&self, u: f64) -> Outcome {
		let mut cumulative = 0.0;
		let mut last_possible = 0;
		for (index, &p) in self.probabilities.iter().enumerate() {
			if p <= 0.0 {
				continue;
			}
			cumulative += p;
			last_possible = index;
			if u < cumulative {
				return Outcome::from_index(index);
			}
		}
		// Rounding left the cumulative sum a hair under u.
		Outcome::from_index(last_possible)
	}

	/// Sample an outcome, consuming exactly one uniform draw from `rng`.
	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Outcome {
		self.select(rng.gen::<f64>())
	}
}

/// Distribution over the next recall outcome for the current network state.
///
/// `study` holds the pool indices of the list in presentation order and
/// `recalled[k]` marks list position `k` as already recalled.
///
/// # Errors
///
/// Propagates cueing, support and competition errors (see
/// [`OutcomeDistribution::from_supports`]).
pub fn compute_outcome_distribution(
	network: &mut Network,
	patterns: &PatternStore,
	study: &[usize],
	recalled: &[bool],
	attempt: usize,
	params: &CompetitionParams,
) -> Result<OutcomeDistribution> {
	let input = network.cue_features()?;
	let supports = study
		.iter()
		.map(|&item| patterns.support(item, input))
		.collect::<Result<Vec<f64>>>()?;
	OutcomeDistribution::from_supports(&supports, recalled, attempt, params)
}
