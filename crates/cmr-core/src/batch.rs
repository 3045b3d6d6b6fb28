//! Batch Evaluation
//!
//! Trials are independent: each owns its network, and the only shared state is
//! the read-only pattern store and pre-experimental weights. Batches run on the
//! rayon pool with one task per trial.
//!
//! A [`CancellationToken`] stops new trials from starting. A trial that already
//! started runs to completion, and a trial that never started is counted as
//! skipped, so aggregates only ever contain whole trials.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::CmrError;
use crate::events::Trial;
use crate::model::{Cmr, Likelihood};
use crate::params::BaseParameters;

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag that stops a batch from starting further trials.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
	/// Token that has not been cancelled.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Stop starting new trials.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	/// Check if cancellation was requested.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

// ============================================================================
// Results
// ============================================================================

/// A trial that failed inside a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialFailure {
	/// Position of the trial in the batch input
	pub index: usize,
	/// Subject identifier
	pub subject: usize,
	/// List identifier
	pub list: usize,
	/// What went wrong
	pub error: CmrError,
}

/// Aggregate likelihood for one subject over its completed trials.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubjectLikelihood {
	/// Subject identifier
	pub subject: usize,
	/// Summed log-likelihood
	pub log_likelihood: f64,
	/// Scored events
	pub n: usize,
	/// Completed trials
	pub trials: usize,
}

/// Outcome of scoring a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchLikelihood {
	/// Per-subject aggregates, ordered by subject
	pub subjects: Vec<SubjectLikelihood>,
	/// Trials that failed
	pub failures: Vec<TrialFailure>,
	/// Trials never started because of cancellation
	pub skipped: usize,
}

impl BatchLikelihood {
	/// Sum over every subject.
	#[must_use]
	pub fn total(&self) -> Likelihood {
		self.subjects
			.iter()
			.map(|s| Likelihood {
				log_likelihood: s.log_likelihood,
				n: s.n,
			})
			.sum()
	}

	/// Check if every trial completed.
	#[must_use]
	pub fn is_complete(&self) -> bool {
		self.failures.is_empty() && self.skipped == 0
	}
}

/// Outcome of generating a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchGeneration {
	/// Generated trials in input order
	pub trials: Vec<Trial>,
	/// Templates that failed
	pub failures: Vec<TrialFailure>,
	/// Templates never started because of cancellation
	pub skipped: usize,
}

enum TrialOutcome<T> {
	Done(T),
	Failed(CmrError),
	Skipped,
}

fn run_trials<T, F>(trials: &[Trial], cancel: &CancellationToken, run: F) -> Vec<TrialOutcome<T>>
where
	T: Send,
	F: Fn(usize, &Trial) -> crate::error::Result<T> + Sync,
{
	trials
		.par_iter()
		.enumerate()
		.map(|(index, trial)| {
			if cancel.is_cancelled() {
				return TrialOutcome::Skipped;
			}
			match run(index, trial) {
				Ok(value) => TrialOutcome::Done(value),
				Err(error) => {
					warn!(index, subject = trial.subject, list = trial.list, %error, "Trial failed");
					TrialOutcome::Failed(error)
				}
			}
		})
		.collect()
}

fn failure(index: usize, trial: &Trial, error: CmrError) -> TrialFailure {
	TrialFailure {
		index,
		subject: trial.subject,
		list: trial.list,
		error,
	}
}

// ============================================================================
// Entry Points
// ============================================================================

/// Seed for the trial at `index` in a batch seeded with `base_seed`.
#[inline]
#[must_use]
pub const fn trial_seed(base_seed: u64, index: usize) -> u64 {
	base_seed.wrapping_add(index as u64)
}

/// Score every trial in parallel and aggregate per subject.
#[instrument(skip_all, fields(trials = trials.len()))]
pub fn predict_trials(
	model: &Cmr,
	base: &BaseParameters,
	trials: &[Trial],
	cancel: &CancellationToken,
) -> BatchLikelihood {
	let pre = model.pre_experimental(base);
	let outcomes = run_trials(trials, cancel, |_, trial| model.predict_trial(base, &pre, trial));

	let mut subjects: BTreeMap<usize, SubjectLikelihood> = BTreeMap::new();
	let mut result = BatchLikelihood::default();
	for ((index, trial), outcome) in trials.iter().enumerate().zip(outcomes) {
		match outcome {
			TrialOutcome::Done(likelihood) => {
				let entry = subjects.entry(trial.subject).or_insert(SubjectLikelihood {
					subject: trial.subject,
					log_likelihood: 0.0,
					n: 0,
					trials: 0,
				});
				entry.log_likelihood += likelihood.log_likelihood;
				entry.n += likelihood.n;
				entry.trials += 1;
			}
			TrialOutcome::Failed(error) => result.failures.push(failure(index, trial, error)),
			TrialOutcome::Skipped => result.skipped += 1,
		}
	}
	result.subjects = subjects.into_values().collect();

	debug!(
		subjects = result.subjects.len(),
		failures = result.failures.len(),
		skipped = result.skipped,
		"Scored batch"
	);
	result
}

/// Generate a recall sequence for every template in parallel.
///
/// The trial at `index` draws from its own generator seeded with
/// [`trial_seed`]`(base_seed, index)`, so results do not depend on scheduling.
#[instrument(skip_all, fields(templates = templates.len(), base_seed = base_seed))]
pub fn generate_trials(
	model: &Cmr,
	base: &BaseParameters,
	templates: &[Trial],
	base_seed: u64,
	cancel: &CancellationToken,
) -> BatchGeneration {
	let pre = model.pre_experimental(base);
	let outcomes = run_trials(templates, cancel, |index, template| {
		let mut rng = StdRng::seed_from_u64(trial_seed(base_seed, index));
		model.generate_trial(base, &pre, template, &mut rng)
	});

	let mut result = BatchGeneration::default();
	for ((index, template), outcome) in templates.iter().enumerate().zip(outcomes) {
		match outcome {
			TrialOutcome::Done(trial) => result.trials.push(trial),
			TrialOutcome::Failed(error) => result.failures.push(failure(index, template, error)),
			TrialOutcome::Skipped => result.skipped += 1,
		}
	}

	debug!(
		generated = result.trials.len(),
		failures = result.failures.len(),
		skipped = result.skipped,
		"Generated batch"
	);
	result
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
	use super::*;
	use crate::model::ModelConfig;
	use crate::params::{CmrParameters, ParameterDef};
	use crate::patterns::PatternStore;

	fn base() -> BaseParameters {
		BaseParameters::from_values(CmrParameters {
			b_enc: 0.7,
			b_rec: 0.5,
			b_start: 0.0,
			p1: 8.0,
			p2: 1.0,
			t: 0.35,
			x1: 0.001,
			x2: 0.5,
			d_fc: 3.0,
			d_cf: 1.0,
			l_fc: 1.0,
			l_cf: 1.0,
		})
	}

	fn model() -> Cmr {
		Cmr::new(
			Arc::new(PatternStore::localist(6)),
			ParameterDef::new(),
			ModelConfig::default(),
		)
	}

	fn templates() -> Vec<Trial> {
		(0..3)
			.flat_map(|subject| (0..4).map(move |list| Trial::new(subject, list, vec![0, 1, 2, 3, 4, 5])))
			.collect()
	}

	#[test]
	fn test_generation_independent_of_scheduling() {
		let cmr = model();
		let first = generate_trials(&cmr, &base(), &templates(), 17, &CancellationToken::new());
		let second = generate_trials(&cmr, &base(), &templates(), 17, &CancellationToken::new());
		assert!(first.failures.is_empty());
		assert_eq!(first.trials.len(), 12);
		assert_eq!(first, second);
	}

	#[test]
	fn test_trial_seed_matches_sequential_generation() {
		let cmr = model();
		let base = base();
		let templates = templates();
		let batch = generate_trials(&cmr, &base, &templates, 3, &CancellationToken::new());

		let pre = cmr.pre_experimental(&base);
		let mut rng = StdRng::seed_from_u64(trial_seed(3, 5));
		let single = cmr.generate_trial(&base, &pre, &templates[5], &mut rng).unwrap();
		assert_eq!(batch.trials[5], single);
	}

	#[test]
	fn test_predict_aggregates_per_subject() {
		let cmr = model();
		let generated = generate_trials(&cmr, &base(), &templates(), 1, &CancellationToken::new());
		let scored = predict_trials(&cmr, &base(), &generated.trials, &CancellationToken::new());
		assert!(scored.is_complete());
		assert_eq!(scored.subjects.len(), 3);
		assert!(scored.subjects.iter().all(|s| s.trials == 4));

		let expected: usize = generated.trials.iter().map(|t| t.recalls.len() + 1).sum();
		assert_eq!(scored.total().n, expected);
		assert!(scored.total().log_likelihood.is_finite());
	}

	#[test]
	fn test_failures_reported_separately() {
		let cmr = model();
		let mut trials = templates();
		trials[2].recalls = vec![0, 0];
		let scored = predict_trials(&cmr, &base(), &trials, &CancellationToken::new());
		assert_eq!(scored.failures.len(), 1);
		assert_eq!(scored.failures[0].index, 2);
		assert_eq!(scored.failures[0].error, CmrError::RepeatedRecall(0));
		// Subject 0 keeps its three good trials
		assert_eq!(scored.subjects[0].trials, 3);
	}

	#[test]
	fn test_cancelled_batch_starts_nothing() {
		let cmr = model();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let scored = predict_trials(&cmr, &base(), &templates(), &cancel);
		assert_eq!(scored.skipped, 12);
		assert!(scored.subjects.is_empty());
		assert_eq!(scored.total(), Likelihood::default());
	}
}
