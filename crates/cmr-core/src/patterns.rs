//! Pattern Store
//!
//! Immutable feature vectors for a fixed item pool. Every trial, subject and
//! parameter evaluation reads from the same store, so it is built once and
//! shared behind an `Arc`.
//!
//! The feature layer of a network built from a store has one extra unit
//! appended after the pattern dimensions: the start-of-list unit. With a
//! localist pool of `n` items the start unit is index `n`, one past the last
//! item, which is where the context is anchored before the first study event.

use nalgebra::{DMatrix, DVector};

use crate::error::{CmrError, Result};

/// Tolerance used when checking patterns for linear independence.
const RANK_EPSILON: f64 = 1e-10;

/// How item vectors are laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
	/// One-hot codes: item `i` activates feature unit `i` only.
	Localist,
	/// Arbitrary linearly independent vectors.
	Distributed,
}

/// Immutable mapping from item index to feature vector.
#[derive(Clone, Debug)]
pub struct PatternStore {
	labels: Vec<String>,
	vectors: Vec<DVector<f64>>,
	pattern_dim: usize,
	kind: PatternKind,
}

impl PatternStore {
	/// Create a localist pool of `pool_size` orthonormal items.
	///
	/// Items are labelled with their index.
	#[must_use]
	pub fn localist(pool_size: usize) -> Self {
		Self::localist_labeled((0..pool_size).map(|i| i.to_string()).collect())
	}

	/// Create a localist pool with one item per label.
	#[must_use]
	pub fn localist_labeled(labels: Vec<String>) -> Self {
		let n = labels.len();
		let vectors = (0..n)
			.map(|i| DVector::from_fn(n, |row, _| if row == i { 1.0 } else { 0.0 }))
			.collect();
		Self {
			labels,
			vectors,
			pattern_dim: n,
			kind: PatternKind::Localist,
		}
	}

	/// Create a pool from explicit vectors.
	///
	/// # Errors
	///
	/// Returns [`CmrError::DimensionMismatch`] if labels and vectors differ in
	/// count or vectors differ in length, and
	/// [`CmrError::LinearlyDependentPatterns`] if the vectors are not linearly
	/// independent (which also rejects zero vectors).
	pub fn from_vectors(labels: Vec<String>, vectors: Vec<Vec<f64>>) -> Result<Self> {
		if labels.len() != vectors.len() {
			return Err(CmrError::DimensionMismatch {
				expected: labels.len(),
				found: vectors.len(),
			});
		}
		let pattern_dim = vectors.first().map_or(0, Vec::len);
		if let Some(bad) = vectors.iter().find(|v| v.len() != pattern_dim) {
			return Err(CmrError::DimensionMismatch {
				expected: pattern_dim,
				found: bad.len(),
			});
		}

		let vectors: Vec<DVector<f64>> = vectors.into_iter().map(DVector::from_vec).collect();
		if !vectors.is_empty() {
			let stacked = DMatrix::from_columns(&vectors);
			let rank = stacked.rank(RANK_EPSILON);
			if rank < vectors.len() {
				return Err(CmrError::LinearlyDependentPatterns {
					rank,
					items: vectors.len(),
				});
			}
		}

		Ok(Self {
			labels,
			vectors,
			pattern_dim,
			kind: PatternKind::Distributed,
		})
	}

	/// Number of items in the pool.
	#[must_use]
	pub fn len(&self) -> usize {
		self.vectors.len()
	}

	/// Whether the pool has no items.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.vectors.is_empty()
	}

	/// Layout of the item vectors.
	#[must_use]
	pub const fn kind(&self) -> PatternKind {
		self.kind
	}

	/// Length of an item pattern.
	#[must_use]
	pub const fn pattern_dim(&self) -> usize {
		self.pattern_dim
	}

	/// Size of the feature (and context) layer: pattern dimensions plus the start unit.
	#[must_use]
	pub const fn feature_dim(&self) -> usize {
		self.pattern_dim + 1
	}

	/// Index of the start-of-list unit.
	#[must_use]
	pub const fn start_unit(&self) -> usize {
		self.pattern_dim
	}

	/// Label of an item, if it exists.
	#[must_use]
	pub fn label(&self, item: usize) -> Option<&str> {
		self.labels.get(item).map(String::as_str)
	}

	/// Look up an item index by label.
	#[must_use]
	pub fn index_of(&self, label: &str) -> Option<usize> {
		self.labels.iter().position(|l| l == label)
	}

	/// Check that an item index is in the pool.
	///
	/// # Errors
	///
	/// Returns [`CmrError::IndexOutOfRange`] if it is not.
	pub fn check_item(&self, item: usize) -> Result<()> {
		if item < self.vectors.len() {
			Ok(())
		} else {
			Err(CmrError::IndexOutOfRange {
				index: item,
				len: self.vectors.len(),
			})
		}
	}

	/// Feature-layer activation for an item (pattern padded with the start unit).
	///
	/// # Errors
	///
	/// Returns [`CmrError::IndexOutOfRange`] for an unknown item.
	pub fn feature_vector(&self, item: usize) -> Result<DVector<f64>> {
		self.check_item(item)?;
		let pattern = &self.vectors[item];
		Ok(DVector::from_fn(self.feature_dim(), |row, _| {
			if row < self.pattern_dim {
				pattern[row]
			} else {
				0.0
			}
		}))
	}

	/// Support for an item given feature-layer net input.
	///
	/// This is the projection of the net input onto the item's pattern; for
	/// localist codes it is simply the item's own unit.
	///
	/// # Errors
	///
	/// Returns [`CmrError::IndexOutOfRange`] for an unknown item and
	/// [`CmrError::DimensionMismatch`] if `net_input` is not feature-sized.
	pub fn support(&self, item: usize, net_input: &DVector<f64>) -> Result<f64> {
		self.check_item(item)?;
		if net_input.len() != self.feature_dim() {
			return Err(CmrError::DimensionMismatch {
				expected: self.feature_dim(),
				found: net_input.len(),
			});
		}
		Ok(match self.kind {
			PatternKind::Localist => net_input[item],
			PatternKind::Distributed => self.vectors[item]
				.iter()
				.zip(net_input.iter())
				.map(|(p, x)| p * x)
				.sum(),
		})
	}
}
