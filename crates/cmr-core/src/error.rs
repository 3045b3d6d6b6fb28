//! Error types for model construction, simulation and scoring.

use crate::params::Phase;

/// Errors that can occur while configuring, simulating or scoring a model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CmrError {
	// ------------------------------------------------------------------
	// Configuration
	// ------------------------------------------------------------------
	/// Parameter name is not one the model recognises.
	#[error("Unknown parameter: {0}")]
	UnknownParameter(String),

	/// Parameter name registered in more than one partition.
	#[error("Parameter {0} is declared in more than one partition")]
	DuplicateParameter(String),

	/// A required parameter has no value.
	#[error("Missing value for parameter {0}")]
	MissingParameter(String),

	/// Free-parameter interval is empty or not finite.
	#[error("Invalid bounds for {name}: [{low}, {high}]")]
	InvalidBounds {
		/// Parameter name
		name: String,
		/// Lower bound
		low: f64,
		/// Upper bound
		high: f64,
	},

	/// Parameter value is NaN or infinite.
	#[error("Value for {name} must be finite, got {value}")]
	InvalidValue {
		/// Parameter name
		name: String,
		/// Offending value
		value: f64,
	},

	/// A dynamic expression references a name that is not defined.
	#[error("Undefined name `{name}` in {phase} expression for {target}")]
	UndefinedReference {
		/// The name that failed to resolve
		name: String,
		/// Parameter the expression computes
		target: String,
		/// Phase the expression is registered against
		phase: Phase,
	},

	/// Parameter cannot take a per-event override in this phase.
	#[error("{name} cannot be overridden per {phase} event")]
	StaticParameter {
		/// Parameter name
		name: String,
		/// Phase the override was registered against
		phase: Phase,
	},

	/// Expression text could not be parsed.
	#[error("Invalid expression at offset {offset}: {reason}")]
	ExpressionSyntax {
		/// Byte offset of the failure
		offset: usize,
		/// What went wrong
		reason: String,
	},

	/// Vector or matrix sizes do not agree.
	#[error("Dimension mismatch: expected {expected}, found {found}")]
	DimensionMismatch {
		/// Expected dimensionality
		expected: usize,
		/// Dimensionality supplied
		found: usize,
	},

	/// Item patterns are not linearly independent.
	#[error("Item patterns are linearly dependent (rank {rank} < {items})")]
	LinearlyDependentPatterns {
		/// Numerical rank of the pattern matrix
		rank: usize,
		/// Number of items
		items: usize,
	},

	/// The same item appears twice on a study list.
	#[error("Item {0} appears more than once on the study list")]
	DuplicateStudyItem(usize),

	/// Study list has no items.
	#[error("Study list is empty")]
	EmptyStudyList,

	// ------------------------------------------------------------------
	// Numerical domain
	// ------------------------------------------------------------------
	/// Net input to context has zero norm and cannot be normalised.
	#[error("Degenerate input: net input has zero norm")]
	DegenerateInput,

	/// Competition temperature must be strictly positive.
	#[error("Temperature must be positive, got {0}")]
	NonPositiveTemperature(f64),

	/// Competition strengths of the remaining items sum to zero (or are not finite).
	#[error("Degenerate competition at recall attempt {attempt}: strengths sum to {total}")]
	DegenerateCompetition {
		/// 1-indexed recall attempt
		attempt: usize,
		/// Sum of strengths over remaining candidates
		total: f64,
	},

	/// Drift rate outside [0, 1].
	#[error("Drift rate must lie in [0, 1], got {0}")]
	InvalidDriftRate(f64),

	// ------------------------------------------------------------------
	// Bounds / data contract
	// ------------------------------------------------------------------
	/// Unit or item index outside the valid range.
	#[error("Index {index} out of range for size {len}")]
	IndexOutOfRange {
		/// Requested index
		index: usize,
		/// Valid size
		len: usize,
	},

	/// Recall attempted after the trial terminated or all items were exhausted.
	#[error("No recall attempts remain (attempt {attempt})")]
	RecallExhausted {
		/// 1-indexed attempt that was requested
		attempt: usize,
	},

	/// Observed recall repeats an item already recalled in this trial.
	#[error("Item {0} was already recalled in this trial")]
	RepeatedRecall(usize),

	/// Observed recall names an item that was not on the study list.
	#[error("Item {0} was not on the study list")]
	NotStudied(usize),

	/// Event records do not describe a well-formed trial.
	#[error("Invalid event records for subject {subject}, list {list}: {reason}")]
	InvalidRecord {
		/// Subject identifier
		subject: usize,
		/// List identifier
		list: usize,
		/// What is wrong
		reason: String,
	},

	// ------------------------------------------------------------------
	// Optimizer boundary
	// ------------------------------------------------------------------
	/// Candidate value outside the declared interval.
	#[error("Value {value} for {name} is outside [{low}, {high}]")]
	OutOfBounds {
		/// Parameter name
		name: String,
		/// Proposed value
		value: f64,
		/// Lower bound
		low: f64,
		/// Upper bound
		high: f64,
	},

	/// Candidate vector length differs from the number of free parameters.
	#[error("Expected {expected} free parameter values, got {found}")]
	FreeParameterCount {
		/// Number of declared free parameters
		expected: usize,
		/// Length of the candidate vector
		found: usize,
	},
}

impl CmrError {
	/// Check if this error comes from an invalid model or parameter setup.
	#[must_use]
	pub const fn is_configuration(&self) -> bool {
		matches!(
			self,
			Self::UnknownParameter(_)
				| Self::DuplicateParameter(_)
				| Self::MissingParameter(_)
				| Self::InvalidBounds { .. }
				| Self::InvalidValue { .. }
				| Self::UndefinedReference { .. }
				| Self::StaticParameter { .. }
				| Self::ExpressionSyntax { .. }
				| Self::DimensionMismatch { .. }
				| Self::LinearlyDependentPatterns { .. }
				| Self::DuplicateStudyItem(_)
				| Self::EmptyStudyList
		)
	}

	/// Check if this error is a numerical-domain failure within a trial.
	#[must_use]
	pub const fn is_numerical(&self) -> bool {
		matches!(
			self,
			Self::DegenerateInput
				| Self::NonPositiveTemperature(_)
				| Self::DegenerateCompetition { .. }
				| Self::InvalidDriftRate(_)
		)
	}

	/// Check if this error is a caller or data contract violation.
	#[must_use]
	pub const fn is_bounds(&self) -> bool {
		matches!(
			self,
			Self::IndexOutOfRange { .. }
				| Self::RecallExhausted { .. }
				| Self::RepeatedRecall(_)
				| Self::NotStudied(_)
				| Self::InvalidRecord { .. }
				| Self::OutOfBounds { .. }
				| Self::FreeParameterCount { .. }
		)
	}
}

/// Result type alias for model operations.
pub type Result<T> = std::result::Result<T, CmrError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classification_is_exclusive() {
		let errors = [
			CmrError::UnknownParameter("Q".into()),
			CmrError::InvalidValue { name: "X1".into(), value: f64::NAN },
			CmrError::DegenerateInput,
			CmrError::NonPositiveTemperature(0.0),
			CmrError::RepeatedRecall(3),
			CmrError::FreeParameterCount { expected: 2, found: 1 },
		];
		for err in &errors {
			let classes = [err.is_configuration(), err.is_numerical(), err.is_bounds()];
			assert_eq!(classes.iter().filter(|c| **c).count(), 1, "{err}");
		}
	}

	#[test]
	fn test_display_mentions_values() {
		let err = CmrError::IndexOutOfRange { index: 7, len: 6 };
		assert_eq!(err.to_string(), "Index 7 out of range for size 6");
	}
}
