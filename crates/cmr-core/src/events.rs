//! Study and Recall Events
//!
//! A [`Trial`] is one subject × list: the study sequence, the recall sequence
//! and the per-event covariates that dynamic parameters read. Trials convert
//! to flat [`EventRecord`] rows for analysis and back again for scoring.
//!
//! Recall covariates are indexed by output position. Entry `k` belongs to the
//! `k+1`-th recall event; the entry after the last recall belongs to the stop
//! event. A generation template may carry one entry per possible recall (one
//! per studied item), matching dummy recall rows prepared ahead of time.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CmrError, Result};
use crate::params::Phase;
use crate::patterns::PatternStore;

// ============================================================================
// Covariates
// ============================================================================

/// Named external values attached to one event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Covariates(BTreeMap<String, f64>);

impl Covariates {
	/// No covariates.
	#[must_use]
	pub const fn new() -> Self {
		Self(BTreeMap::new())
	}

	/// Value of a covariate, if present.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<f64> {
		self.0.get(name).copied()
	}

	/// Set a covariate, returning the previous value.
	pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
		self.0.insert(name.into(), value)
	}

	/// Number of covariates.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether there are none.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterate in name order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
		self.0.iter().map(|(k, &v)| (k.as_str(), v))
	}
}

impl<K: Into<String>> FromIterator<(K, f64)> for Covariates {
	fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
	}
}

static NO_COVARIATES: Covariates = Covariates::new();

// ============================================================================
// Trial
// ============================================================================

/// One subject × list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trial {
	/// Subject identifier
	pub subject: usize,
	/// List identifier within the subject
	pub list: usize,
	/// Pool indices in presentation order
	pub study: Vec<usize>,
	/// Pool indices in output order (no stop marker)
	pub recalls: Vec<usize>,
	/// Covariates per study position
	#[serde(default)]
	pub study_covariates: Vec<Covariates>,
	/// Covariates per output position
	#[serde(default)]
	pub recall_covariates: Vec<Covariates>,
}

impl Trial {
	/// Trial with no recalls and no covariates.
	#[must_use]
	pub fn new(subject: usize, list: usize, study: Vec<usize>) -> Self {
		Self {
			subject,
			list,
			study,
			..Self::default()
		}
	}

	/// Covariates of the study event at 0-indexed `position`.
	#[must_use]
	pub fn study_covariates_at(&self, position: usize) -> &Covariates {
		self.study_covariates.get(position).unwrap_or(&NO_COVARIATES)
	}

	/// Covariates of the recall event at 0-indexed output position.
	#[must_use]
	pub fn recall_covariates_at(&self, output: usize) -> &Covariates {
		self.recall_covariates.get(output).unwrap_or(&NO_COVARIATES)
	}

	/// Covariates for one phase.
	#[must_use]
	pub fn covariates(&self, phase: Phase) -> &[Covariates] {
		match phase {
			Phase::Study => &self.study_covariates,
			Phase::Recall => &self.recall_covariates,
		}
	}

	fn covariates_mut(&mut self, phase: Phase) -> &mut Vec<Covariates> {
		match phase {
			Phase::Study => &mut self.study_covariates,
			Phase::Recall => &mut self.recall_covariates,
		}
	}

	/// Flatten into study rows, recall rows and a terminal stop row.
	#[must_use]
	pub fn to_records(&self, patterns: &PatternStore) -> Vec<EventRecord> {
		let label = |item: usize| patterns.label(item).map(str::to_string);
		let study = self
			.study
			.iter()
			.enumerate()
			.map(|(i, &item)| EventRecord {
				subject: self.subject,
				list: self.list,
				trial_type: TrialType::Study,
				position: i + 1,
				item_index: Some(item),
				item_label: label(item),
				covariates: self.study_covariates_at(i).clone(),
			});
		let recall = self
			.recalls
			.iter()
			.map(|&item| Some(item))
			.chain(std::iter::once(None))
			.enumerate()
			.map(|(k, item)| EventRecord {
				subject: self.subject,
				list: self.list,
				trial_type: TrialType::Recall,
				position: k + 1,
				item_index: item,
				item_label: item.and_then(label),
				covariates: self.recall_covariates_at(k).clone(),
			});
		study.chain(recall).collect()
	}
}

// ============================================================================
// Records
// ============================================================================

/// Row kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialType {
	/// Study presentation
	Study,
	/// Recall event (including the terminal stop)
	Recall,
}

/// One flat event row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
	/// Subject identifier
	#[serde(rename = "subject_id")]
	pub subject: usize,
	/// List identifier
	#[serde(rename = "list_id")]
	pub list: usize,
	/// Study or recall
	pub trial_type: TrialType,
	/// 1-indexed serial (study) or output (recall) position
	pub position: usize,
	/// Pool index; `None` marks the stop event
	pub item_index: Option<usize>,
	/// Item label, when the pool has one
	pub item_label: Option<String>,
	/// Auxiliary per-event columns
	#[serde(flatten)]
	pub covariates: Covariates,
}

impl EventRecord {
	/// Check if this is the terminal stop row.
	#[must_use]
	pub const fn is_stop(&self) -> bool {
		matches!(self.trial_type, TrialType::Recall) && self.item_index.is_none()
	}
}

/// Group rows into trials, ordered by first appearance of each subject × list.
///
/// Rows within a trial may come in any order; positions must run 1..=n with
/// no gaps. A stop row is optional but, if present, must be the last recall.
///
/// # Errors
///
/// Returns [`CmrError::InvalidRecord`] for duplicate or missing positions, a
/// study row without an item, or a recall after the stop row.
pub fn group_trials(records: &[EventRecord]) -> Result<Vec<Trial>> {
	let mut order: Vec<(usize, usize)> = Vec::new();
	let mut grouped: BTreeMap<(usize, usize), Vec<&EventRecord>> = BTreeMap::new();
	for record in records {
		let key = (record.subject, record.list);
		let rows = grouped.entry(key).or_insert_with(|| {
			order.push(key);
			Vec::new()
		});
		rows.push(record);
	}

	order
		.into_iter()
		.map(|(subject, list)| {
			let rows = grouped.remove(&(subject, list)).unwrap_or_default();
			build_trial(subject, list, &rows)
		})
		.collect()
}

fn build_trial(subject: usize, list: usize, rows: &[&EventRecord]) -> Result<Trial> {
	let invalid = |reason: String| CmrError::InvalidRecord {
		subject,
		list,
		reason,
	};

	let study_rows = phase_rows(rows, TrialType::Study).map_err(invalid)?;
	let recall_rows = phase_rows(rows, TrialType::Recall).map_err(invalid)?;

	let mut trial = Trial::new(subject, list, Vec::with_capacity(study_rows.len()));
	for row in study_rows {
		let item = row
			.item_index
			.ok_or_else(|| invalid(format!("study position {} has no item", row.position)))?;
		trial.study.push(item);
		trial.study_covariates.push(row.covariates.clone());
	}

	let mut stopped = false;
	for row in recall_rows {
		if stopped {
			return Err(invalid(format!("recall at position {} follows the stop", row.position)));
		}
		match row.item_index {
			Some(item) => trial.recalls.push(item),
			None => stopped = true,
		}
		trial.recall_covariates.push(row.covariates.clone());
	}

	// Drop empty covariate columns so grouped and hand-built trials compare equal.
	if trial.study_covariates.iter().all(Covariates::is_empty) {
		trial.study_covariates.clear();
	}
	if trial.recall_covariates.iter().all(Covariates::is_empty) {
		trial.recall_covariates.clear();
	}
	Ok(trial)
}

fn phase_rows<'a>(
	rows: &[&'a EventRecord],
	kind: TrialType,
) -> std::result::Result<Vec<&'a EventRecord>, String> {
	let mut phase: Vec<&EventRecord> = rows
		.iter()
		.copied()
		.filter(|r| r.trial_type == kind)
		.collect();
	phase.sort_by_key(|r| r.position);
	for (i, r) in phase.iter().enumerate() {
		if r.position != i + 1 {
			return Err(format!(
				"{kind:?} positions are not 1..={} (found {})",
				phase.len(),
				r.position
			));
		}
	}
	Ok(phase)
}

// ============================================================================
// Permutation Replicates
// ============================================================================

/// Shuffle one covariate's values across every event of a phase in `trials`.
///
/// Values are gathered in trial and event order, permuted with `rng`, and
/// written back to the same slots, so the marginal distribution is kept
/// while its pairing with behavior is broken. Returns how many values moved.
pub fn scramble_covariate<R: Rng + ?Sized>(
	trials: &mut [Trial],
	phase: Phase,
	name: &str,
	rng: &mut R,
) -> usize {
	let mut values: Vec<f64> = trials
		.iter()
		.flat_map(|t| t.covariates(phase).iter().filter_map(|c| c.get(name)))
		.collect();
	values.shuffle(rng);

	let mut shuffled = values.iter().copied();
	for trial in trials.iter_mut() {
		for covariates in trial.covariates_mut(phase).iter_mut() {
			if covariates.get(name).is_some() {
				if let Some(value) = shuffled.next() {
					let _ = covariates.insert(name, value);
				}
			}
		}
	}
	values.len()
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn sample_trial() -> Trial {
		Trial {
			subject: 3,
			list: 1,
			study: vec![0, 1, 2],
			recalls: vec![2, 0],
			study_covariates: Vec::new(),
			recall_covariates: vec![
				Covariates::from_iter([("hcmp", 0.5)]),
				Covariates::from_iter([("hcmp", -1.0)]),
				Covariates::from_iter([("hcmp", 2.0)]),
			],
		}
	}

	#[test]
	fn test_records_include_stop_row() {
		let patterns = PatternStore::localist(3);
		let records = sample_trial().to_records(&patterns);
		assert_eq!(records.len(), 6);
		let stop = &records[5];
		assert!(stop.is_stop());
		assert_eq!(stop.position, 3);
		assert_eq!(stop.covariates.get("hcmp"), Some(2.0));
		assert_eq!(records[3].item_label.as_deref(), Some("2"));
	}

	#[test]
	fn test_records_group_back_into_trial() {
		let patterns = PatternStore::localist(3);
		let mut records = sample_trial().to_records(&patterns);
		records.reverse();
		let trials = group_trials(&records).unwrap();
		assert_eq!(trials, vec![sample_trial()]);
	}

	#[test]
	fn test_group_keeps_first_appearance_order() {
		let patterns = PatternStore::localist(3);
		let mut second = Trial::new(0, 0, vec![1]);
		second.recalls.push(1);
		let mut records = sample_trial().to_records(&patterns);
		records.extend(second.to_records(&patterns));
		let trials = group_trials(&records).unwrap();
		assert_eq!(trials[0].subject, 3);
		assert_eq!(trials[1], second);
	}

	#[test]
	fn test_group_rejects_gaps_and_late_recalls() {
		let patterns = PatternStore::localist(3);
		let mut records = sample_trial().to_records(&patterns);
		let _ = records.remove(1);
		assert!(matches!(group_trials(&records), Err(CmrError::InvalidRecord { .. })));

		let mut records = sample_trial().to_records(&patterns);
		// Move the stop row ahead of the last recall
		records[4].item_index = None;
		records[5].item_index = Some(1);
		assert!(matches!(group_trials(&records), Err(CmrError::InvalidRecord { .. })));
	}

	#[test]
	fn test_record_json_shape() {
		let patterns = PatternStore::localist(3);
		let records = sample_trial().to_records(&patterns);
		let value = serde_json::to_value(&records[3]).unwrap();
		assert_eq!(value["subject_id"], 3);
		assert_eq!(value["trial_type"], "recall");
		assert_eq!(value["hcmp"], 0.5);
		let back: EventRecord = serde_json::from_value(value).unwrap();
		assert_eq!(back, records[3]);
	}

	#[test]
	fn test_scramble_preserves_values() {
		let mut trials = vec![sample_trial(), sample_trial()];
		let moved = scramble_covariate(&mut trials, Phase::Recall, "hcmp", &mut StdRng::seed_from_u64(11));
		assert_eq!(moved, 6);

		let mut after: Vec<f64> = trials
			.iter()
			.flat_map(|t| t.recall_covariates.iter().filter_map(|c| c.get("hcmp")))
			.collect();
		after.sort_by(f64::total_cmp);
		assert_eq!(after, vec![-1.0, -1.0, 0.5, 0.5, 2.0, 2.0]);
		assert_eq!(trials[0].recalls, vec![2, 0]);
	}

	#[test]
	fn test_scramble_is_seeded() {
		let run = |seed| {
			let mut trials = vec![sample_trial(), sample_trial(), sample_trial()];
			let _ = scramble_covariate(&mut trials, Phase::Recall, "hcmp", &mut StdRng::seed_from_u64(seed));
			trials
		};
		assert_eq!(run(5), run(5));
	}
}
