//! Trial Driver
//!
//! One trial runs in two strictly ordered phases:
//!
//! ```text
//! study:   start unit (β = 1)
//!          for each item i:  f ← item,  c ← integrate(fc_pre·f, B_enc)
//!                            fc_exp += Lfc · c ⊗ f
//!                            cf_exp += primacy(i) · f ⊗ c
//! recall:  c ← integrate(fc_pre·start, B_start)
//!          loop:             distribution over {STOP, remaining items}
//!                            pick (generate) or look up (predict) an outcome
//!                            STOP → done
//!                            item → f ← item,  c ← integrate((fc_pre + fc_exp)·f, B_rec)
//! ```
//!
//! Generation and prediction both drive the same [`RecallSession`], so the
//! transition applied after a recall is identical in both modes. That is what
//! makes the log-likelihood of generated data peak at the generating
//! parameters.

use std::ops::AddAssign;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, instrument, trace};

use crate::batch::{predict_trials, CancellationToken};
use crate::competition::{
	compute_outcome_distribution, CompetitionParams, Outcome, OutcomeDistribution, StopRule,
	ZeroSupport,
};
use crate::error::{CmrError, Result};
use crate::events::Trial;
use crate::network::{cf_learning_rate, ContextDrive, Network, PreExperimental, PrimacyScaling};
use crate::params::{BaseParameters, ParameterDef, Phase};
use crate::patterns::PatternStore;

// ============================================================================
// Configuration
// ============================================================================

/// Model variant selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
	/// Recall termination rule
	pub stop_rule: StopRule,
	/// How primacy combines with `Lcf`
	pub primacy: PrimacyScaling,
	/// What to do when remaining candidates have no usable strength
	pub zero_support: ZeroSupport,
	/// Whether the terminal stop counts as a scored event in `n`
	pub count_termination: bool,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self {
			stop_rule: StopRule::Exponential,
			primacy: PrimacyScaling::Multiplicative,
			zero_support: ZeroSupport::Reject,
			count_termination: true,
		}
	}
}

/// Log-likelihood and the number of scored events behind it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Likelihood {
	/// Sum of per-event log-probabilities (may be `-inf`)
	pub log_likelihood: f64,
	/// Scored events
	pub n: usize,
}

impl AddAssign for Likelihood {
	fn add_assign(&mut self, other: Self) {
		self.log_likelihood += other.log_likelihood;
		self.n += other.n;
	}
}

impl std::iter::Sum for Likelihood {
	fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
		iter.fold(Self::default(), |mut acc, l| {
			acc += l;
			acc
		})
	}
}

// ============================================================================
// Model
// ============================================================================

/// A configured model: item pool, parameter definition and variant flags.
#[derive(Clone, Debug)]
pub struct Cmr {
	patterns: Arc<PatternStore>,
	def: ParameterDef,
	config: ModelConfig,
}

impl Cmr {
	/// Create a model.
	#[must_use]
	pub const fn new(patterns: Arc<PatternStore>, def: ParameterDef, config: ModelConfig) -> Self {
		Self {
			patterns,
			def,
			config,
		}
	}

	/// Item pool.
	#[must_use]
	pub const fn patterns(&self) -> &Arc<PatternStore> {
		&self.patterns
	}

	/// Parameter definition.
	#[must_use]
	pub const fn definition(&self) -> &ParameterDef {
		&self.def
	}

	/// Variant flags.
	#[must_use]
	pub const fn config(&self) -> &ModelConfig {
		&self.config
	}

	/// Pre-experimental weights for one evaluation, shared by all its trials.
	#[must_use]
	pub fn pre_experimental(&self, base: &BaseParameters) -> Arc<PreExperimental> {
		Arc::new(PreExperimental::scaled_identity(
			self.patterns.feature_dim(),
			base.values.d_fc,
			base.values.d_cf,
		))
	}

	/// Simulate recall for `template`'s study list.
	///
	/// The returned trial copies `template` (identifiers and covariates) with
	/// `recalls` replaced by the generated sequence. Recall event `k` reads
	/// `template.recall_covariates[k - 1]` for its dynamic overrides.
	///
	/// # Errors
	///
	/// Configuration errors for a bad study list, numerical errors from the
	/// network or competition, and [`CmrError::UndefinedReference`] for a
	/// covariate an override needs but the template lacks.
	#[instrument(skip_all, fields(subject = template.subject, list = template.list))]
	pub fn generate_trial<R: Rng + ?Sized>(
		&self,
		base: &BaseParameters,
		pre: &Arc<PreExperimental>,
		template: &Trial,
		rng: &mut R,
	) -> Result<Trial> {
		let mut session = RecallSession::begin(self, base, pre, template)?;
		loop {
			let distribution = session.outcome_distribution()?;
			let outcome = distribution.sample(rng);
			trace!(attempt = session.attempt(), ?outcome, stop = distribution.stop(), "Sampled outcome");
			session.advance(outcome)?;
			if outcome == Outcome::Stop {
				break;
			}
		}

		let recalls = session.recalled_items();
		debug!(recalls = recalls.len(), "Generated trial");
		Ok(Trial {
			recalls,
			..template.clone()
		})
	}

	/// Log-likelihood of the observed recalls in `trial`, plus the implicit stop.
	///
	/// An observed outcome the model gives zero probability scores `-inf`
	/// inside `Ok`; only contract and numerical failures are errors.
	///
	/// # Errors
	///
	/// - [`CmrError::NotStudied`] for a recall of an item not on the list
	/// - [`CmrError::RepeatedRecall`] for a repeated recall
	/// - configuration and numerical errors as in [`Self::generate_trial`]
	#[instrument(skip_all, fields(subject = trial.subject, list = trial.list))]
	pub fn predict_trial(
		&self,
		base: &BaseParameters,
		pre: &Arc<PreExperimental>,
		trial: &Trial,
	) -> Result<Likelihood> {
		let mut session = RecallSession::begin(self, base, pre, trial)?;
		let mut log_likelihood = 0.0;

		for &item in &trial.recalls {
			let position = trial
				.study
				.iter()
				.position(|&s| s == item)
				.ok_or(CmrError::NotStudied(item))?;
			let outcome = Outcome::Recall(position);
			let distribution = session.outcome_distribution()?;
			let log_p = distribution.log_probability(outcome)?;
			trace!(attempt = session.attempt(), item, log_p, "Scored recall");
			log_likelihood += log_p;
			session.advance(outcome)?;
		}

		let distribution = session.outcome_distribution()?;
		log_likelihood += distribution.log_probability(Outcome::Stop)?;
		session.advance(Outcome::Stop)?;

		let n = trial.recalls.len() + usize::from(self.config.count_termination);
		debug!(log_likelihood, n, "Scored trial");
		Ok(Likelihood { log_likelihood, n })
	}

	/// Total log-likelihood of `trials` under a free-parameter candidate.
	///
	/// This is the objective an external optimizer calls: the candidate is
	/// spliced into the fixed values (in free-parameter declaration order),
	/// then every trial is scored in parallel.
	///
	/// # Errors
	///
	/// - [`CmrError::FreeParameterCount`] or [`CmrError::OutOfBounds`] for a bad candidate
	/// - the first trial failure otherwise, so a failed evaluation is never
	///   mistaken for a very unlikely one
	#[instrument(skip_all, fields(trials = trials.len()))]
	pub fn evaluate_candidate(&self, candidate: &[f64], trials: &[Trial]) -> Result<Likelihood> {
		let base = self.def.splice(candidate)?;
		let batch = predict_trials(self, &base, trials, &CancellationToken::new());
		let total = batch.total();
		if let Some(failure) = batch.failures.into_iter().next() {
			return Err(failure.error);
		}
		debug!(?candidate, log_likelihood = total.log_likelihood, n = total.n, "Evaluated candidate");
		Ok(total)
	}

	fn competition_params(&self, base: &BaseParameters) -> CompetitionParams {
		CompetitionParams {
			temperature: base.values.t,
			stop_rule: self.config.stop_rule,
			x1: base.values.x1,
			x2: base.values.x2,
			zero_support: self.config.zero_support,
		}
	}

	fn check_study_list(&self, study: &[usize]) -> Result<()> {
		if study.is_empty() {
			return Err(CmrError::EmptyStudyList);
		}
		let mut seen: SmallVec<[bool; 64]> = SmallVec::from_elem(false, self.patterns.len());
		for &item in study {
			self.patterns.check_item(item)?;
			if std::mem::replace(&mut seen[item], true) {
				return Err(CmrError::DuplicateStudyItem(item));
			}
		}
		Ok(())
	}
}

// ============================================================================
// Recall Session
// ============================================================================

/// The study + recall state machine for one trial.
///
/// [`Self::begin`] runs the study phase and the start-of-recall
/// reinstatement. After that, alternate [`Self::outcome_distribution`] and
/// [`Self::advance`] until a stop is applied.
pub struct RecallSession<'a> {
	model: &'a Cmr,
	base: &'a BaseParameters,
	trial: &'a Trial,
	network: Network,
	competition: CompetitionParams,
	recalled: SmallVec<[bool; 32]>,
	order: SmallVec<[usize; 32]>,
	attempt: usize,
	stopped: bool,
}

impl<'a> RecallSession<'a> {
	/// Study `trial.study` on a fresh network and prepare for recall.
	///
	/// # Errors
	///
	/// - [`CmrError::EmptyStudyList`], [`CmrError::DuplicateStudyItem`] or
	///   [`CmrError::IndexOutOfRange`] for a bad study list
	/// - [`CmrError::DimensionMismatch`] if `pre` does not fit the pool
	/// - numerical and dynamic-parameter errors from the study phase
	pub fn begin(
		model: &'a Cmr,
		base: &'a BaseParameters,
		pre: &Arc<PreExperimental>,
		trial: &'a Trial,
	) -> Result<Self> {
		base.values.check_finite()?;
		model.check_study_list(&trial.study)?;
		let dim = model.patterns.feature_dim();
		if pre.dim() != dim {
			return Err(CmrError::DimensionMismatch {
				expected: dim,
				found: pre.dim(),
			});
		}

		let mut network = Network::new(Arc::clone(pre));
		let start = model.patterns.start_unit();

		// Pre-list context is fully replaced by the start state.
		network.present_unit(start)?;
		let _ = network.drive_context(ContextDrive::PreExperimental, 1.0)?;

		let dynamic_study = model.def.has_dynamic(Phase::Study);
		for (i, &item) in trial.study.iter().enumerate() {
			let params = if dynamic_study {
				model
					.def
					.resolve(Phase::Study, base, trial.study_covariates_at(i))?
			} else {
				base.values
			};
			network.present(model.patterns.feature_vector(item)?)?;
			let _ = network.drive_context(ContextDrive::PreExperimental, params.b_enc)?;
			let l_cf = cf_learning_rate(model.config.primacy, params.l_cf, params.p1, params.p2, i + 1);
			network.learn(params.l_fc, l_cf)?;
		}

		if base.values.b_start > 0.0 {
			network.present_unit(start)?;
			let _ = network.drive_context(ContextDrive::PreExperimental, base.values.b_start)?;
		}

		let n = trial.study.len();
		Ok(Self {
			model,
			base,
			trial,
			network,
			competition: model.competition_params(base),
			recalled: SmallVec::from_elem(false, n),
			order: SmallVec::new(),
			attempt: 1,
			stopped: false,
		})
	}

	/// 1-indexed number of the next recall attempt.
	#[must_use]
	pub const fn attempt(&self) -> usize {
		self.attempt
	}

	/// Whether a stop has been applied.
	#[must_use]
	pub const fn is_finished(&self) -> bool {
		self.stopped
	}

	/// Current network state.
	#[must_use]
	pub const fn network(&self) -> &Network {
		&self.network
	}

	/// Recalled pool indices in output order.
	#[must_use]
	pub fn recalled_items(&self) -> Vec<usize> {
		self.order.iter().map(|&p| self.trial.study[p]).collect()
	}

	/// Distribution over the next outcome.
	///
	/// # Errors
	///
	/// [`CmrError::RecallExhausted`] after a stop; otherwise competition errors.
	pub fn outcome_distribution(&mut self) -> Result<OutcomeDistribution> {
		if self.stopped {
			return Err(CmrError::RecallExhausted {
				attempt: self.attempt,
			});
		}
		compute_outcome_distribution(
			&mut self.network,
			&self.model.patterns,
			&self.trial.study,
			&self.recalled,
			self.attempt,
			&self.competition,
		)
	}

	/// Apply an outcome: stop ends the session, a recall reactivates the item.
	///
	/// Recall event `k` resolves recall-phase overrides against the trial's
	/// `recall_covariates[k - 1]` and drifts context with the resulting `B_rec`.
	///
	/// # Errors
	///
	/// - [`CmrError::RecallExhausted`] after a stop
	/// - [`CmrError::IndexOutOfRange`] for a position past the list
	/// - [`CmrError::RepeatedRecall`] for a position already recalled
	/// - dynamic-parameter and numerical errors from reactivation
	pub fn advance(&mut self, outcome: Outcome) -> Result<()> {
		if self.stopped {
			return Err(CmrError::RecallExhausted {
				attempt: self.attempt,
			});
		}

		match outcome {
			Outcome::Stop => self.stopped = true,
			Outcome::Recall(position) => {
				let item = *self
					.trial
					.study
					.get(position)
					.ok_or(CmrError::IndexOutOfRange {
						index: position,
						len: self.trial.study.len(),
					})?;
				if std::mem::replace(&mut self.recalled[position], true) {
					return Err(CmrError::RepeatedRecall(item));
				}
				self.order.push(position);

				let params = self.model.def.resolve(
					Phase::Recall,
					self.base,
					self.trial.recall_covariates_at(self.attempt - 1),
				)?;
				self.network
					.present(self.model.patterns.feature_vector(item)?)?;
				let _ = self.network.drive_context(ContextDrive::Full, params.b_rec)?;
			}
		}
		self.attempt += 1;
		Ok(())
	}
}
