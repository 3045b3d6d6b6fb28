//! Parameter Resolution
//!
//! Parameters live in three disjoint partitions:
//!
//! - **fixed**: constant scalars
//! - **free**: scalars an optimizer searches, each with a closed interval
//! - **auxiliary**: extra named scalars (e.g. `neural_scaling`) that only
//!   dynamic expressions read; an auxiliary name is declared first, then given
//!   a fixed value or free bounds like any other parameter
//!
//! On top of those, a **dynamic** override recomputes one model parameter per
//! event from an [`Expr`] over parameter values and the event's covariates.
//! Overrides registered for [`Phase::Study`] apply to that study presentation;
//! overrides for [`Phase::Recall`] apply to the reactivation that recall
//! event triggers.
//!
//! ```text
//! splice(candidate)          -> BaseParameters   (once per evaluation)
//! resolve(phase, base, cov)  -> CmrParameters    (once per event)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CmrError, Result};
use crate::events::Covariates;
use crate::expr::{EvalError, Expr, Scope};

// ============================================================================
// Names
// ============================================================================

/// Update phase a dynamic override is registered against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
	/// Study presentations
	Study,
	/// Recall events
	Recall,
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Study => "study",
			Self::Recall => "recall",
		})
	}
}

/// A model parameter the network and competition consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamName {
	/// Encoding drift rate
	BEnc,
	/// Recall drift rate
	BRec,
	/// Start-of-list reinstatement before recall
	BStart,
	/// Primacy magnitude
	P1,
	/// Primacy decay
	P2,
	/// Competition temperature
	T,
	/// Stop-rule intercept
	X1,
	/// Stop-rule growth
	X2,
	/// Pre-experimental fc scale
	Dfc,
	/// Pre-experimental cf scale
	Dcf,
	/// fc learning rate
	Lfc,
	/// cf learning rate
	Lcf,
}

impl ParamName {
	/// Every recognised name.
	pub const ALL: [Self; 12] = [
		Self::BEnc,
		Self::BRec,
		Self::BStart,
		Self::P1,
		Self::P2,
		Self::T,
		Self::X1,
		Self::X2,
		Self::Dfc,
		Self::Dcf,
		Self::Lfc,
		Self::Lcf,
	];

	/// Conventional name.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::BEnc => "B_enc",
			Self::BRec => "B_rec",
			Self::BStart => "B_start",
			Self::P1 => "P1",
			Self::P2 => "P2",
			Self::T => "T",
			Self::X1 => "X1",
			Self::X2 => "X2",
			Self::Dfc => "Dfc",
			Self::Dcf => "Dcf",
			Self::Lfc => "Lfc",
			Self::Lcf => "Lcf",
		}
	}

	/// Look up a conventional name.
	#[must_use]
	pub fn from_name(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|p| p.as_str() == name)
	}

	/// Check if the parameter may be overridden per event in `phase`.
	///
	/// Study events drive encoding and learning; recall events drive the
	/// reactivation drift. `Dfc` and `Dcf` shape the pre-experimental weights
	/// once per evaluation, and the competition reads its base values.
	#[must_use]
	pub const fn is_dynamic_in(self, phase: Phase) -> bool {
		match phase {
			Phase::Study => matches!(self, Self::BEnc | Self::P1 | Self::P2 | Self::Lfc | Self::Lcf),
			Phase::Recall => matches!(self, Self::BRec),
		}
	}

	/// Value used when the name is not declared.
	#[must_use]
	pub const fn default_value(self) -> Option<f64> {
		match self {
			Self::BStart => Some(0.0),
			Self::Lfc | Self::Lcf => Some(1.0),
			_ => None,
		}
	}
}

impl fmt::Display for ParamName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

// ============================================================================
// Concrete Values
// ============================================================================

/// Concrete scalars for one event.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CmrParameters {
	/// Encoding drift rate
	#[serde(rename = "B_enc")]
	pub b_enc: f64,
	/// Recall drift rate
	#[serde(rename = "B_rec")]
	pub b_rec: f64,
	/// Start-of-list reinstatement before recall
	#[serde(rename = "B_start", default)]
	pub b_start: f64,
	/// Primacy magnitude
	#[serde(rename = "P1")]
	pub p1: f64,
	/// Primacy decay
	#[serde(rename = "P2")]
	pub p2: f64,
	/// Competition temperature
	#[serde(rename = "T")]
	pub t: f64,
	/// Stop-rule intercept
	#[serde(rename = "X1")]
	pub x1: f64,
	/// Stop-rule growth
	#[serde(rename = "X2")]
	pub x2: f64,
	/// Pre-experimental fc scale
	#[serde(rename = "Dfc")]
	pub d_fc: f64,
	/// Pre-experimental cf scale
	#[serde(rename = "Dcf")]
	pub d_cf: f64,
	/// fc learning rate
	#[serde(rename = "Lfc", default = "unit_rate")]
	pub l_fc: f64,
	/// cf learning rate
	#[serde(rename = "Lcf", default = "unit_rate")]
	pub l_cf: f64,
}

const fn unit_rate() -> f64 {
	1.0
}

impl CmrParameters {
	/// Value by name.
	#[must_use]
	pub const fn get(&self, name: ParamName) -> f64 {
		match name {
			ParamName::BEnc => self.b_enc,
			ParamName::BRec => self.b_rec,
			ParamName::BStart => self.b_start,
			ParamName::P1 => self.p1,
			ParamName::P2 => self.p2,
			ParamName::T => self.t,
			ParamName::X1 => self.x1,
			ParamName::X2 => self.x2,
			ParamName::Dfc => self.d_fc,
			ParamName::Dcf => self.d_cf,
			ParamName::Lfc => self.l_fc,
			ParamName::Lcf => self.l_cf,
		}
	}

	/// Overwrite a value by name.
	pub fn set(&mut self, name: ParamName, value: f64) {
		let slot = match name {
			ParamName::BEnc => &mut self.b_enc,
			ParamName::BRec => &mut self.b_rec,
			ParamName::BStart => &mut self.b_start,
			ParamName::P1 => &mut self.p1,
			ParamName::P2 => &mut self.p2,
			ParamName::T => &mut self.t,
			ParamName::X1 => &mut self.x1,
			ParamName::X2 => &mut self.x2,
			ParamName::Dfc => &mut self.d_fc,
			ParamName::Dcf => &mut self.d_cf,
			ParamName::Lfc => &mut self.l_fc,
			ParamName::Lcf => &mut self.l_cf,
		};
		*slot = value;
	}

	/// Check that every value is finite.
	///
	/// # Errors
	///
	/// [`CmrError::InvalidValue`] naming the first NaN or infinite value.
	pub fn check_finite(&self) -> Result<()> {
		match ParamName::ALL.into_iter().find(|&p| !self.get(p).is_finite()) {
			Some(name) => Err(CmrError::InvalidValue {
				name: name.as_str().to_string(),
				value: self.get(name),
			}),
			None => Ok(()),
		}
	}

	/// Copy with one value replaced.
	#[must_use]
	pub fn with(mut self, name: ParamName, value: f64) -> Self {
		self.set(name, value);
		self
	}
}

/// Spliced values for one evaluation: model parameters plus auxiliaries.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseParameters {
	/// Model parameters before any dynamic override
	pub values: CmrParameters,
	/// Auxiliary scalars by name
	pub auxiliary: BTreeMap<String, f64>,
}

impl BaseParameters {
	/// Base values with no auxiliaries.
	#[must_use]
	pub const fn from_values(values: CmrParameters) -> Self {
		Self {
			values,
			auxiliary: BTreeMap::new(),
		}
	}
}

// ============================================================================
// Definition
// ============================================================================

/// Closed interval for a free parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
	/// Lower bound (inclusive)
	pub low: f64,
	/// Upper bound (inclusive)
	pub high: f64,
}

impl Bounds {
	/// Check if a value lies in the interval.
	#[must_use]
	pub fn contains(&self, value: f64) -> bool {
		(self.low..=self.high).contains(&value)
	}
}

/// A free parameter in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct FreeParameter {
	/// Parameter or auxiliary name
	pub name: String,
	/// Search interval
	pub bounds: Bounds,
}

/// A dynamic override.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicParameter {
	/// Parameter recomputed per event
	pub target: ParamName,
	/// Expression producing the value
	pub expr: Expr,
}

/// Validated parameter partitions.
///
/// Build with the `set_*`/`declare_*` methods (or from a [`ParameterSpec`]).
/// Covariates and auxiliaries must be declared before a dynamic expression
/// that reads them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterDef {
	fixed: BTreeMap<String, f64>,
	free: Vec<FreeParameter>,
	auxiliary: BTreeSet<String>,
	covariates: Vec<String>,
	dynamic: BTreeMap<Phase, Vec<DynamicParameter>>,
}

impl ParameterDef {
	/// Empty definition.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn is_known(&self, name: &str) -> bool {
		ParamName::from_name(name).is_some() || self.auxiliary.contains(name)
	}

	fn is_assigned(&self, name: &str) -> bool {
		self.fixed.contains_key(name) || self.free.iter().any(|p| p.name == name)
	}

	fn check_assignable(&self, name: &str) -> Result<()> {
		if !self.is_known(name) {
			return Err(CmrError::UnknownParameter(name.to_string()));
		}
		if self.is_assigned(name) {
			return Err(CmrError::DuplicateParameter(name.to_string()));
		}
		Ok(())
	}

	fn check_new_name(&self, name: &str) -> Result<()> {
		if ParamName::from_name(name).is_some()
			|| self.auxiliary.contains(name)
			|| self.covariates.iter().any(|c| c == name)
		{
			return Err(CmrError::DuplicateParameter(name.to_string()));
		}
		Ok(())
	}

	/// Declare an auxiliary scalar name.
	///
	/// # Errors
	///
	/// [`CmrError::DuplicateParameter`] if the name is already a model
	/// parameter, auxiliary or covariate.
	pub fn declare_auxiliary(&mut self, name: &str) -> Result<()> {
		self.check_new_name(name)?;
		let _ = self.auxiliary.insert(name.to_string());
		Ok(())
	}

	/// Declare a per-event covariate name.
	///
	/// # Errors
	///
	/// [`CmrError::DuplicateParameter`] if the name is already a model
	/// parameter, auxiliary or covariate.
	pub fn declare_covariate(&mut self, name: &str) -> Result<()> {
		self.check_new_name(name)?;
		self.covariates.push(name.to_string());
		Ok(())
	}

	/// Fix a parameter to a constant.
	///
	/// # Errors
	///
	/// [`CmrError::UnknownParameter`] for an unrecognised name,
	/// [`CmrError::DuplicateParameter`] if it is already fixed or free,
	/// [`CmrError::InvalidValue`] for NaN or infinity.
	pub fn set_fixed(&mut self, name: &str, value: f64) -> Result<()> {
		self.check_assignable(name)?;
		if !value.is_finite() {
			return Err(CmrError::InvalidValue {
				name: name.to_string(),
				value,
			});
		}
		let _ = self.fixed.insert(name.to_string(), value);
		Ok(())
	}

	/// Mark a parameter as free within `[low, high]`.
	///
	/// # Errors
	///
	/// As [`Self::set_fixed`], plus [`CmrError::InvalidBounds`] if the
	/// interval is empty or not finite.
	pub fn set_free(&mut self, name: &str, low: f64, high: f64) -> Result<()> {
		self.check_assignable(name)?;
		if !(low.is_finite() && high.is_finite() && low <= high) {
			return Err(CmrError::InvalidBounds {
				name: name.to_string(),
				low,
				high,
			});
		}
		self.free.push(FreeParameter {
			name: name.to_string(),
			bounds: Bounds { low, high },
		});
		Ok(())
	}

	/// Register a dynamic override for `target` in `phase`.
	///
	/// # Errors
	///
	/// - [`CmrError::UnknownParameter`] if `target` is not a model parameter
	/// - [`CmrError::StaticParameter`] if `target` cannot vary per event in `phase`
	/// - [`CmrError::DuplicateParameter`] if `target` already has an override in `phase`
	/// - [`CmrError::ExpressionSyntax`] if the text does not parse
	/// - [`CmrError::UndefinedReference`] if the expression names something
	///   that is neither a parameter, an auxiliary nor a declared covariate
	pub fn set_dynamic(&mut self, phase: Phase, target: &str, expression: &str) -> Result<()> {
		let name =
			ParamName::from_name(target).ok_or_else(|| CmrError::UnknownParameter(target.to_string()))?;
		if !name.is_dynamic_in(phase) {
			return Err(CmrError::StaticParameter {
				name: target.to_string(),
				phase,
			});
		}
		if self.dynamic(phase).iter().any(|d| d.target == name) {
			return Err(CmrError::DuplicateParameter(target.to_string()));
		}

		let expr = Expr::parse(expression)?.with_covariates(&self.covariates);
		if let Some(undefined) = expr.param_refs().into_iter().find(|r| {
			ParamName::from_name(r).is_none() && !self.auxiliary.contains(*r)
		}) {
			return Err(CmrError::UndefinedReference {
				name: undefined.to_string(),
				target: target.to_string(),
				phase,
			});
		}

		self.dynamic
			.entry(phase)
			.or_default()
			.push(DynamicParameter { target: name, expr });
		Ok(())
	}

	/// Free parameters in declaration order.
	#[must_use]
	pub fn free(&self) -> &[FreeParameter] {
		&self.free
	}

	/// Declared covariate names.
	#[must_use]
	pub fn covariates(&self) -> &[String] {
		&self.covariates
	}

	/// Overrides registered for a phase.
	#[must_use]
	pub fn dynamic(&self, phase: Phase) -> &[DynamicParameter] {
		self.dynamic.get(&phase).map(Vec::as_slice).unwrap_or_default()
	}

	/// Check if any override is registered for a phase.
	#[must_use]
	pub fn has_dynamic(&self, phase: Phase) -> bool {
		!self.dynamic(phase).is_empty()
	}

	/// Combine fixed values and a candidate vector for the free parameters.
	///
	/// `candidate[i]` is the value of the i-th free parameter in declaration
	/// order. Undeclared `B_start`, `Lfc` and `Lcf` take their defaults.
	///
	/// # Errors
	///
	/// - [`CmrError::FreeParameterCount`] if the lengths differ
	/// - [`CmrError::InvalidValue`] for a NaN or infinite value
	/// - [`CmrError::OutOfBounds`] for a value outside its interval
	/// - [`CmrError::MissingParameter`] for a required name with no value
	pub fn splice(&self, candidate: &[f64]) -> Result<BaseParameters> {
		if candidate.len() != self.free.len() {
			return Err(CmrError::FreeParameterCount {
				expected: self.free.len(),
				found: candidate.len(),
			});
		}

		let mut values: BTreeMap<&str, f64> =
			self.fixed.iter().map(|(k, &v)| (k.as_str(), v)).collect();
		for (param, &value) in self.free.iter().zip(candidate) {
			if !value.is_finite() {
				return Err(CmrError::InvalidValue {
					name: param.name.clone(),
					value,
				});
			}
			if !param.bounds.contains(value) {
				return Err(CmrError::OutOfBounds {
					name: param.name.clone(),
					value,
					low: param.bounds.low,
					high: param.bounds.high,
				});
			}
			let _ = values.insert(param.name.as_str(), value);
		}

		let lookup = |name: ParamName| {
			values
				.get(name.as_str())
				.copied()
				.or_else(|| name.default_value())
				.ok_or_else(|| CmrError::MissingParameter(name.as_str().to_string()))
		};
		let model = CmrParameters {
			b_enc: lookup(ParamName::BEnc)?,
			b_rec: lookup(ParamName::BRec)?,
			b_start: lookup(ParamName::BStart)?,
			p1: lookup(ParamName::P1)?,
			p2: lookup(ParamName::P2)?,
			t: lookup(ParamName::T)?,
			x1: lookup(ParamName::X1)?,
			x2: lookup(ParamName::X2)?,
			d_fc: lookup(ParamName::Dfc)?,
			d_cf: lookup(ParamName::Dcf)?,
			l_fc: lookup(ParamName::Lfc)?,
			l_cf: lookup(ParamName::Lcf)?,
		};

		let auxiliary = self
			.auxiliary
			.iter()
			.map(|name| {
				values
					.get(name.as_str())
					.map(|&v| (name.clone(), v))
					.ok_or_else(|| CmrError::MissingParameter(name.clone()))
			})
			.collect::<Result<BTreeMap<String, f64>>>()?;

		Ok(BaseParameters {
			values: model,
			auxiliary,
		})
	}

	/// Concrete parameters for one event.
	///
	/// Every override registered for `phase` is evaluated against the base
	/// values (not against each other) and the event's covariates.
	///
	/// # Errors
	///
	/// - [`CmrError::UndefinedReference`] if an expression reads a covariate
	///   the event does not carry (or an auxiliary the base lacks)
	/// - [`CmrError::InvalidValue`] if an expression evaluates to NaN or infinity
	/// - [`CmrError::ExpressionSyntax`] for a hand-built call with the wrong arity
	pub fn resolve(
		&self,
		phase: Phase,
		base: &BaseParameters,
		covariates: &Covariates,
	) -> Result<CmrParameters> {
		let mut resolved = base.values;
		let scope = EventScope { base, covariates };
		for dynamic in self.dynamic(phase) {
			let value = dynamic
				.expr
				.eval(&scope)
				.map_err(|error| match error {
					EvalError::Unresolved(name) => CmrError::UndefinedReference {
						name,
						target: dynamic.target.as_str().to_string(),
						phase,
					},
					EvalError::Arity {
						function,
						expected,
						found,
					} => CmrError::ExpressionSyntax {
						offset: 0,
						reason: format!("{function} takes {expected} arguments, got {found}"),
					},
				})?;
			if !value.is_finite() {
				return Err(CmrError::InvalidValue {
					name: dynamic.target.as_str().to_string(),
					value,
				});
			}
			resolved.set(dynamic.target, value);
		}
		Ok(resolved)
	}
}

struct EventScope<'a> {
	base: &'a BaseParameters,
	covariates: &'a Covariates,
}

impl Scope for EventScope<'_> {
	fn param(&self, name: &str) -> Option<f64> {
		ParamName::from_name(name)
			.map(|p| self.base.values.get(p))
			.or_else(|| self.base.auxiliary.get(name).copied())
	}

	fn covariate(&self, name: &str) -> Option<f64> {
		self.covariates.get(name)
	}
}

// ============================================================================
// Serialized Shape
// ============================================================================

/// Serializable parameter input.
///
/// ```json
/// {
///   "fixed": {"B_enc": 0.7, "neural_scaling": 0.2},
///   "free": {"B_rec": [0.0, 1.0]},
///   "auxiliary": ["neural_scaling"],
///   "covariates": ["hcmp"],
///   "dynamic": {"recall": {"B_rec": "clip(B_rec + hcmp * neural_scaling, 0, 1)"}}
/// }
/// ```
///
/// Free parameters take the map's (alphabetical) order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterSpec {
	/// Fixed values
	pub fixed: BTreeMap<String, f64>,
	/// Free bounds as `[low, high]`
	pub free: BTreeMap<String, [f64; 2]>,
	/// Auxiliary scalar names
	pub auxiliary: Vec<String>,
	/// Per-event covariate names
	pub covariates: Vec<String>,
	/// Expression text by phase and target
	pub dynamic: BTreeMap<Phase, BTreeMap<String, String>>,
}

impl TryFrom<ParameterSpec> for ParameterDef {
	type Error = CmrError;

	fn try_from(spec: ParameterSpec) -> Result<Self> {
		let mut def = Self::new();
		for name in &spec.auxiliary {
			def.declare_auxiliary(name)?;
		}
		for name in &spec.covariates {
			def.declare_covariate(name)?;
		}
		for (name, &value) in &spec.fixed {
			def.set_fixed(name, value)?;
		}
		for (name, &[low, high]) in &spec.free {
			def.set_free(name, low, high)?;
		}
		for (&phase, overrides) in &spec.dynamic {
			for (target, text) in overrides {
				def.set_dynamic(phase, target, text)?;
			}
		}
		Ok(def)
	}
}
