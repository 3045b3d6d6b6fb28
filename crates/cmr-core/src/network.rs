//! Associative Network
//!
//! Two layers, feature (f) and context (c), joined by four matrices:
//!
//! ```text
//!            fc_pre + fc_exp
//!     f  ───────────────────▶  c
//!        ◀───────────────────
//!            cf_pre + cf_exp
//! ```
//!
//! Pre-experimental matrices are fixed scaled identities, shared read-only
//! between every trial of an evaluation. Experimental matrices start at zero
//! and accumulate Hebbian outer products during one trial.
//!
//! Context drifts by the norm-preserving update
//!
//! ```text
//! ρ  = sqrt(1 + β²((c·n)² − 1)) − β(c·n)
//! c' = ρc + βn
//! ```
//!
//! where `n` is the normalised net input. `c'` is unit length whenever `c` is.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{CmrError, Result};

// ============================================================================
// Primitive operations
// ============================================================================

/// One-hot activation of `index` in a layer of `dim` units.
///
/// # Errors
///
/// Returns [`CmrError::IndexOutOfRange`] if `index >= dim`.
pub fn activate_unit(index: usize, dim: usize) -> Result<DVector<f64>> {
	if index >= dim {
		return Err(CmrError::IndexOutOfRange { index, len: dim });
	}
	let mut v = DVector::zeros(dim);
	v[index] = 1.0;
	Ok(v)
}

/// Add `matrix · source` into `accumulator`.
///
/// Several projections onto the same layer sum, so callers clear the
/// accumulator once per step and then project every contributing matrix.
///
/// # Errors
///
/// Returns [`CmrError::DimensionMismatch`] if shapes disagree.
pub fn project(
	matrix: &DMatrix<f64>,
	source: &DVector<f64>,
	accumulator: &mut DVector<f64>,
) -> Result<()> {
	if matrix.ncols() != source.len() {
		return Err(CmrError::DimensionMismatch {
			expected: matrix.ncols(),
			found: source.len(),
		});
	}
	if matrix.nrows() != accumulator.len() {
		return Err(CmrError::DimensionMismatch {
			expected: matrix.nrows(),
			found: accumulator.len(),
		});
	}
	accumulator.gemv(1.0, matrix, source, 1.0);
	Ok(())
}

/// Blend normalised net input into context.
///
/// Returns the new context. For a unit-length `context` and `beta` in
/// `[0, 1]` the result is unit length.
///
/// # Errors
///
/// - [`CmrError::InvalidDriftRate`] if `beta` is outside `[0, 1]`
/// - [`CmrError::DegenerateInput`] if `net_input` has zero (or non-finite) norm
/// - [`CmrError::DimensionMismatch`] if the vectors differ in length
pub fn integrate(context: &DVector<f64>, net_input: &DVector<f64>, beta: f64) -> Result<DVector<f64>> {
	if !(0.0..=1.0).contains(&beta) {
		return Err(CmrError::InvalidDriftRate(beta));
	}
	if context.len() != net_input.len() {
		return Err(CmrError::DimensionMismatch {
			expected: context.len(),
			found: net_input.len(),
		});
	}

	let norm = net_input.norm();
	if norm <= 0.0 || !norm.is_finite() {
		return Err(CmrError::DegenerateInput);
	}
	let incoming = net_input / norm;

	let dot = context.dot(&incoming);
	// Rounding can push the radicand a hair below zero at β = 1, c·n = 0.
	let radicand = (beta * beta).mul_add(dot.mul_add(dot, -1.0), 1.0).max(0.0);
	let rho = radicand.sqrt() - beta * dot;

	Ok(context * rho + incoming * beta)
}

/// Add `rate · (to ⊗ from)` to `matrix`.
///
/// Entries are never decayed or bounded.
///
/// # Errors
///
/// Returns [`CmrError::DimensionMismatch`] if shapes disagree.
pub fn hebbian_update(
	matrix: &mut DMatrix<f64>,
	to: &DVector<f64>,
	from: &DVector<f64>,
	rate: f64,
) -> Result<()> {
	if matrix.nrows() != to.len() {
		return Err(CmrError::DimensionMismatch {
			expected: matrix.nrows(),
			found: to.len(),
		});
	}
	if matrix.ncols() != from.len() {
		return Err(CmrError::DimensionMismatch {
			expected: matrix.ncols(),
			found: from.len(),
		});
	}
	matrix.ger(rate, to, from, 1.0);
	Ok(())
}

// ============================================================================
// Learning Rates
// ============================================================================

/// How the primacy gradient combines with the cf learning rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimacyScaling {
	/// `Lcf · (1 + P1·e^(−P2(i−1)))` (Morton & Polyn 2016)
	#[default]
	Multiplicative,
	/// `Lcf + (1 + P1·e^(−P2(i−1)))`
	Additive,
}

/// Primacy gradient `1 + P1·e^(−P2(i−1))` for 1-indexed serial position `i`.
///
/// Strictly decreasing in position for `P1, P2 > 0`; exactly 1 when `P1 = 0`.
#[inline]
#[must_use]
pub fn primacy_multiplier(p1: f64, p2: f64, serial_position: usize) -> f64 {
	#[allow(clippy::cast_precision_loss)]
	let lag = serial_position.saturating_sub(1) as f64;
	p1.mul_add((-p2 * lag).exp(), 1.0)
}

/// Context-to-feature learning rate at a serial position.
#[inline]
#[must_use]
pub fn cf_learning_rate(
	scaling: PrimacyScaling,
	l_cf: f64,
	p1: f64,
	p2: f64,
	serial_position: usize,
) -> f64 {
	let primacy = primacy_multiplier(p1, p2, serial_position);
	match scaling {
		PrimacyScaling::Multiplicative => l_cf * primacy,
		PrimacyScaling::Additive => l_cf + primacy,
	}
}

// ============================================================================
// Network
// ============================================================================

/// Fixed pre-experimental associations.
#[derive(Clone, Debug)]
pub struct PreExperimental {
	fc: DMatrix<f64>,
	cf: DMatrix<f64>,
}

impl PreExperimental {
	/// Scaled identities `Dfc·I` and `Dcf·I` over `dim` units.
	#[must_use]
	pub fn scaled_identity(dim: usize, d_fc: f64, d_cf: f64) -> Self {
		Self {
			fc: DMatrix::identity(dim, dim) * d_fc,
			cf: DMatrix::identity(dim, dim) * d_cf,
		}
	}

	/// Layer size.
	#[must_use]
	pub fn dim(&self) -> usize {
		self.fc.nrows()
	}

	/// Feature-to-context matrix.
	#[must_use]
	pub const fn fc(&self) -> &DMatrix<f64> {
		&self.fc
	}

	/// Context-to-feature matrix.
	#[must_use]
	pub const fn cf(&self) -> &DMatrix<f64> {
		&self.cf
	}
}

/// Which feature-to-context matrices drive a context update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextDrive {
	/// Pre-experimental only (study presentations, start-of-list unit).
	PreExperimental,
	/// Pre-experimental plus experimental (reactivation of a recalled item).
	Full,
}

/// Per-trial network state.
///
/// Owned by exactly one trial; the pre-experimental weights are shared.
#[derive(Clone, Debug)]
pub struct Network {
	pre: Arc<PreExperimental>,
	fc_exp: DMatrix<f64>,
	cf_exp: DMatrix<f64>,
	context: DVector<f64>,
	features: DVector<f64>,
	context_input: DVector<f64>,
	feature_input: DVector<f64>,
}

impl Network {
	/// Fresh network: zero context, zero experimental weights.
	#[must_use]
	pub fn new(pre: Arc<PreExperimental>) -> Self {
		let dim = pre.dim();
		Self {
			pre,
			fc_exp: DMatrix::zeros(dim, dim),
			cf_exp: DMatrix::zeros(dim, dim),
			context: DVector::zeros(dim),
			features: DVector::zeros(dim),
			context_input: DVector::zeros(dim),
			feature_input: DVector::zeros(dim),
		}
	}

	/// Layer size.
	#[must_use]
	pub fn dim(&self) -> usize {
		self.context.len()
	}

	/// Current context state.
	#[must_use]
	pub const fn context(&self) -> &DVector<f64> {
		&self.context
	}

	/// Current feature-layer activation.
	#[must_use]
	pub const fn features(&self) -> &DVector<f64> {
		&self.features
	}

	/// Feature-layer net input from the last [`Network::cue_features`].
	#[must_use]
	pub const fn feature_input(&self) -> &DVector<f64> {
		&self.feature_input
	}

	/// Learned feature-to-context weights.
	#[must_use]
	pub const fn fc_exp(&self) -> &DMatrix<f64> {
		&self.fc_exp
	}

	/// Learned context-to-feature weights.
	#[must_use]
	pub const fn cf_exp(&self) -> &DMatrix<f64> {
		&self.cf_exp
	}

	/// Set the feature-layer activation.
	///
	/// # Errors
	///
	/// Returns [`CmrError::DimensionMismatch`] if `activation` is not layer-sized.
	pub fn present(&mut self, activation: DVector<f64>) -> Result<()> {
		if activation.len() != self.dim() {
			return Err(CmrError::DimensionMismatch {
				expected: self.dim(),
				found: activation.len(),
			});
		}
		self.features = activation;
		Ok(())
	}

	/// Activate a single feature unit.
	///
	/// # Errors
	///
	/// Returns [`CmrError::IndexOutOfRange`] for an index past the layer.
	pub fn present_unit(&mut self, index: usize) -> Result<()> {
		self.features = activate_unit(index, self.dim())?;
		Ok(())
	}

	/// Integrate arbitrary net input into context.
	///
	/// # Errors
	///
	/// See [`integrate`].
	pub fn integrate_context(&mut self, net_input: &DVector<f64>, beta: f64) -> Result<&DVector<f64>> {
		self.context = integrate(&self.context, net_input, beta)?;
		Ok(&self.context)
	}

	/// Project the current features into context and integrate.
	///
	/// # Errors
	///
	/// See [`integrate`]; a feature vector with no support in the selected
	/// matrices yields [`CmrError::DegenerateInput`].
	pub fn drive_context(&mut self, drive: ContextDrive, beta: f64) -> Result<&DVector<f64>> {
		self.context_input.fill(0.0);
		project(self.pre.fc(), &self.features, &mut self.context_input)?;
		if drive == ContextDrive::Full {
			project(&self.fc_exp, &self.features, &mut self.context_input)?;
		}
		self.context = integrate(&self.context, &self.context_input, beta)?;
		Ok(&self.context)
	}

	/// Hebbian learning between current features and context.
	///
	/// `fc_exp += l_fc · (c ⊗ f)` and `cf_exp += l_cf · (f ⊗ c)`.
	///
	/// # Errors
	///
	/// Propagates [`hebbian_update`] shape errors.
	pub fn learn(&mut self, l_fc: f64, l_cf: f64) -> Result<()> {
		hebbian_update(&mut self.fc_exp, &self.context, &self.features, l_fc)?;
		hebbian_update(&mut self.cf_exp, &self.features, &self.context, l_cf)?;
		Ok(())
	}

	/// Project context back to the feature layer through both cf matrices.
	///
	/// # Errors
	///
	/// Propagates [`project`] shape errors.
	pub fn cue_features(&mut self) -> Result<&DVector<f64>> {
		self.feature_input.fill(0.0);
		project(self.pre.cf(), &self.context, &mut self.feature_input)?;
		project(&self.cf_exp, &self.context, &mut self.feature_input)?;
		Ok(&self.feature_input)
	}
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
	use super::*;

	fn unit(dim: usize, index: usize) -> DVector<f64> {
		activate_unit(index, dim).unwrap()
	}

	#[test]
	fn test_activate_unit_out_of_range() {
		assert_eq!(
			activate_unit(4, 4),
			Err(CmrError::IndexOutOfRange { index: 4, len: 4 })
		);
	}

	#[test]
	fn test_project_accumulates() {
		let m = DMatrix::identity(3, 3) * 2.0;
		let mut acc = DVector::from_element(3, 1.0);
		project(&m, &unit(3, 1), &mut acc).unwrap();
		project(&m, &unit(3, 1), &mut acc).unwrap();
		assert_eq!(acc, DVector::from_vec(vec![1.0, 5.0, 1.0]));
	}

	#[test]
	fn test_integrate_full_overwrite() {
		let context = DVector::zeros(4);
		let input = DVector::from_vec(vec![0.0, 3.0, 0.0, 4.0]);
		let next = integrate(&context, &input, 1.0).unwrap();
		assert!((next - DVector::from_vec(vec![0.0, 0.6, 0.0, 0.8])).norm() < 1e-12);
	}

	#[test]
	fn test_integrate_zero_beta_is_identity() {
		let context = unit(3, 0);
		let next = integrate(&context, &unit(3, 2), 0.0).unwrap();
		assert_eq!(next, context);
	}

	#[test]
	fn test_integrate_preserves_norm() {
		let context = unit(3, 0);
		for beta in [0.1, 0.5, 0.9, 1.0] {
			let input = DVector::from_vec(vec![0.3, -2.0, 1.5]);
			let next = integrate(&context, &input, beta).unwrap();
			assert!((next.norm() - 1.0).abs() < 1e-12, "beta={beta}");
		}
	}

	#[test]
	fn test_integrate_orthogonal_input() {
		// c·n = 0 gives ρ = sqrt(1 − β²)
		let next = integrate(&unit(2, 0), &unit(2, 1), 0.6).unwrap();
		assert!((next[0] - 0.8).abs() < 1e-12);
		assert!((next[1] - 0.6).abs() < 1e-12);
	}

	#[test]
	fn test_integrate_rejects_zero_input() {
		let result = integrate(&unit(3, 0), &DVector::zeros(3), 0.5);
		assert_eq!(result, Err(CmrError::DegenerateInput));
	}

	#[test]
	fn test_integrate_rejects_bad_beta() {
		assert_eq!(
			integrate(&unit(3, 0), &unit(3, 1), 1.5),
			Err(CmrError::InvalidDriftRate(1.5))
		);
		assert!(integrate(&unit(3, 0), &unit(3, 1), f64::NAN).is_err());
	}

	#[test]
	fn test_hebbian_outer_product() {
		let mut m = DMatrix::zeros(2, 3);
		let to = DVector::from_vec(vec![1.0, 2.0]);
		let from = DVector::from_vec(vec![0.0, 1.0, 3.0]);
		hebbian_update(&mut m, &to, &from, 0.5).unwrap();
		assert_eq!(m[(1, 2)], 3.0);
		assert_eq!(m[(0, 1)], 0.5);
		assert_eq!(m[(0, 0)], 0.0);

		// Unbounded accumulation
		hebbian_update(&mut m, &to, &from, 0.5).unwrap();
		assert_eq!(m[(1, 2)], 6.0);
	}

	#[test]
	fn test_hebbian_shape_mismatch() {
		let mut m = DMatrix::zeros(2, 3);
		let result = hebbian_update(&mut m, &DVector::zeros(3), &DVector::zeros(3), 1.0);
		assert!(matches!(result, Err(CmrError::DimensionMismatch { .. })));
	}

	#[test]
	fn test_primacy_multiplier() {
		assert_eq!(primacy_multiplier(8.0, 1.0, 1), 9.0);
		assert!((primacy_multiplier(8.0, 1.0, 2) - (1.0 + 8.0 * (-1.0f64).exp())).abs() < 1e-12);
		assert_eq!(primacy_multiplier(0.0, 1.0, 7), 1.0);
	}

	#[test]
	fn test_cf_learning_rate_variants() {
		let mult = cf_learning_rate(PrimacyScaling::Multiplicative, 2.0, 3.0, 1.0, 1);
		let add = cf_learning_rate(PrimacyScaling::Additive, 2.0, 3.0, 1.0, 1);
		assert_eq!(mult, 8.0);
		assert_eq!(add, 6.0);
	}

	#[test]
	fn test_network_study_step() {
		let pre = Arc::new(PreExperimental::scaled_identity(3, 3.0, 1.0));
		let mut net = Network::new(pre);

		// Start-of-list context
		net.present_unit(2).unwrap();
		net.drive_context(ContextDrive::PreExperimental, 1.0).unwrap();
		assert_eq!(net.context(), &unit(3, 2));

		net.present_unit(0).unwrap();
		net.drive_context(ContextDrive::PreExperimental, 0.6).unwrap();
		assert!((net.context().norm() - 1.0).abs() < 1e-12);
		net.learn(1.0, 2.0).unwrap();

		// fc_exp column 0 holds the context, cf_exp row 0 holds it at twice the rate
		assert!((net.fc_exp().column(0) - net.context()).norm() < 1e-12);
		assert!((net.cf_exp().row(0).transpose() - net.context() * 2.0).norm() < 1e-12);

		// Cueing with that context favours item 0 over item 1
		let cue = net.cue_features().unwrap().clone();
		assert!(cue[0] > cue[1]);
	}

	#[test]
	fn test_drive_context_without_support_fails() {
		let pre = Arc::new(PreExperimental::scaled_identity(3, 0.0, 1.0));
		let mut net = Network::new(pre);
		net.present_unit(1).unwrap();
		assert_eq!(
			net.drive_context(ContextDrive::PreExperimental, 1.0),
			Err(CmrError::DegenerateInput)
		);
	}
}
