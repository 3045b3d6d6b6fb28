//! # CMR Core
//!
//! The Context Maintenance and Retrieval model of human free recall, as a
//! simulator (generate recall sequences from parameters) and a scorer (the
//! log-likelihood of observed recall sequences under parameters).
//!
//! ## Why One State Machine?
//!
//! Parameter recovery only works if scoring replays *exactly* the transitions
//! generation performed. Both modes therefore drive the same
//! [`RecallSession`]: compute the outcome distribution, pick or look up an
//! outcome, apply it. Nothing else touches context during recall.
//!
//! ## Core Concepts
//!
//! ### Context Drift
//!
//! Context `c` is a unit vector. New input `n` (normalised) blends in with a
//! drift rate β without ever leaving the unit sphere:
//!
//! ```text
//! ρ  = sqrt(1 + β²((c·n)² − 1)) − β(c·n)
//! c' = ρc + βn
//! ```
//!
//! ### Associations
//!
//! Two pairs of matrices link the feature layer `f` and context layer `c`.
//! Pre-experimental ones (`Dfc·I`, `Dcf·I`) are fixed; experimental ones start
//! at zero and grow by Hebbian outer products during study, with a primacy
//! boost on context-to-feature learning:
//!
//! ```text
//! Lcf · (1 + P1·e^(−P2(i−1)))
//! ```
//!
//! ### Recall Competition
//!
//! Context cues every remaining item; supports become strengths
//! `exp(2·support / T)`. The stop rule takes its share first, the remaining
//! items split the rest in proportion to strength.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cmr_core::{
//!     BaseParameters, Cmr, CmrParameters, ModelConfig, ParameterDef, PatternStore, Trial,
//! };
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! # fn main() -> Result<(), cmr_core::CmrError> {
//! let model = Cmr::new(
//!     Arc::new(PatternStore::localist(5)),
//!     ParameterDef::new(),
//!     ModelConfig::default(),
//! );
//! let base = BaseParameters::from_values(CmrParameters {
//!     b_enc: 0.7, b_rec: 0.5, b_start: 0.0,
//!     p1: 8.0, p2: 1.0, t: 0.35,
//!     x1: 0.001, x2: 0.5,
//!     d_fc: 3.0, d_cf: 1.0, l_fc: 1.0, l_cf: 1.0,
//! });
//! let pre = model.pre_experimental(&base);
//!
//! let template = Trial::new(0, 0, vec![0, 1, 2, 3, 4]);
//! let mut rng = StdRng::seed_from_u64(42);
//! let trial = model.generate_trial(&base, &pre, &template, &mut rng)?;
//!
//! let scored = model.predict_trial(&base, &pre, &trial)?;
//! assert!(scored.log_likelihood <= 0.0);
//! assert_eq!(scored.n, trial.recalls.len() + 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## References
//!
//! - Howard, M. W., & Kahana, M. J. (2002). *A distributed representation of
//!   temporal context* - TCM
//! - Polyn, S. M., Norman, K. A., & Kahana, M. J. (2009). *A context
//!   maintenance and retrieval model of organizational processes in free recall*
//! - Morton, N. W., & Polyn, S. M. (2016). *A predictive framework for
//!   evaluating models of semantic organization in free recall*

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod competition;
pub mod error;
pub mod events;
pub mod expr;
pub mod model;
pub mod network;
pub mod params;
pub mod patterns;

pub use batch::{
	generate_trials, predict_trials, trial_seed, BatchGeneration, BatchLikelihood,
	CancellationToken, SubjectLikelihood, TrialFailure,
};
pub use competition::{
	compute_outcome_distribution, stop_probability, CompetitionParams, Outcome,
	OutcomeDistribution, StopRule, ZeroSupport,
};
pub use error::{CmrError, Result};
pub use events::{group_trials, scramble_covariate, Covariates, EventRecord, Trial, TrialType};
pub use expr::Expr;
pub use model::{Cmr, Likelihood, ModelConfig, RecallSession};
pub use network::{
	activate_unit, cf_learning_rate, hebbian_update, integrate, primacy_multiplier, project,
	ContextDrive, Network, PreExperimental, PrimacyScaling,
};
pub use params::{
	BaseParameters, Bounds, CmrParameters, ParamName, ParameterDef, ParameterSpec, Phase,
};
pub use patterns::{PatternKind, PatternStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
