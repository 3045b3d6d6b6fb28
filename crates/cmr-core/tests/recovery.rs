//! Scenario tests: generating data and scoring it back.
//!
//! The core check is parameter recovery. Data generated under one setting must
//! score best under that same setting, which only holds if generation and
//! prediction replay identical transitions.

#![allow(missing_docs)]
#![allow(clippy::float_cmp)]

use std::collections::HashSet;
use std::sync::Arc;

use cmr_core::{
	generate_trials, group_trials, predict_trials, scramble_covariate, BaseParameters,
	CancellationToken, Cmr, CmrParameters, Covariates, ModelConfig, ParamName, ParameterDef,
	ParameterSpec, PatternStore, Phase, Trial,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn scenario() -> CmrParameters {
	CmrParameters {
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
	}
}

fn localist_model(pool: usize) -> Cmr {
	Cmr::new(
		Arc::new(PatternStore::localist(pool)),
		ParameterDef::new(),
		ModelConfig::default(),
	)
}

/// `subjects × lists` templates, each studying the whole pool in a shuffled order.
fn experiment(pool: usize, subjects: usize, lists: usize, seed: u64) -> Vec<Trial> {
	use rand::seq::SliceRandom;
	let mut rng = StdRng::seed_from_u64(seed);
	let mut templates = Vec::with_capacity(subjects * lists);
	for subject in 0..subjects {
		for list in 0..lists {
			let mut study: Vec<usize> = (0..pool).collect();
			study.shuffle(&mut rng);
			templates.push(Trial::new(subject, list, study));
		}
	}
	templates
}

fn score(model: &Cmr, params: CmrParameters, trials: &[Trial]) -> f64 {
	let scored = predict_trials(
		model,
		&BaseParameters::from_values(params),
		trials,
		&CancellationToken::new(),
	);
	assert!(scored.is_complete(), "failures: {:?}", scored.failures);
	scored.total().log_likelihood
}

#[test]
fn test_end_to_end_scenario() {
	let cmr = localist_model(5);
	let base = BaseParameters::from_values(scenario());
	let pre = cmr.pre_experimental(&base);
	let template = Trial::new(0, 0, vec![0, 1, 2, 3, 4]);

	let mut rng = StdRng::seed_from_u64(42);
	let generated = cmr.generate_trial(&base, &pre, &template, &mut rng).unwrap();
	assert!(generated.recalls.len() <= 5);
	let unique: HashSet<usize> = generated.recalls.iter().copied().collect();
	assert_eq!(unique.len(), generated.recalls.len());

	let scored = cmr.predict_trial(&base, &pre, &generated).unwrap();
	assert!(scored.log_likelihood.is_finite());
	assert!(scored.log_likelihood <= 0.0);
	assert_eq!(scored.n, generated.recalls.len() + 1);

	// Same trial, no drift after recall; the pre-experimental weights are unchanged
	let frozen_base = BaseParameters::from_values(scenario().with(ParamName::BRec, 0.0));
	let frozen = cmr.predict_trial(&frozen_base, &pre, &generated).unwrap();
	assert!(
		frozen.log_likelihood < scored.log_likelihood,
		"B_rec = 0: {}, B_rec = 0.5: {}",
		frozen.log_likelihood,
		scored.log_likelihood
	);
}

#[test]
fn test_zero_recall_drift_scores_lower() {
	let cmr = localist_model(5);
	let templates = experiment(5, 10, 10, 7);
	let generated = generate_trials(
		&cmr,
		&BaseParameters::from_values(scenario()),
		&templates,
		2016,
		&CancellationToken::new(),
	);
	assert!(generated.failures.is_empty());

	let truth = score(&cmr, scenario(), &generated.trials);
	let frozen = score(&cmr, scenario().with(ParamName::BRec, 0.0), &generated.trials);
	assert!(frozen < truth, "B_rec = 0: {frozen}, B_rec = 0.5: {truth}");
}

#[test]
fn test_recall_drift_sweep_peaks_at_generating_value() {
	let cmr = localist_model(10);
	let templates = experiment(10, 40, 30, 11);
	let generated = generate_trials(
		&cmr,
		&BaseParameters::from_values(scenario()),
		&templates,
		99,
		&CancellationToken::new(),
	);
	assert!(generated.failures.is_empty());

	let sweep: Vec<(f64, f64)> = (0..=10)
		.map(|step| {
			let b_rec = f64::from(step) / 10.0;
			let ll = score(&cmr, scenario().with(ParamName::BRec, b_rec), &generated.trials);
			(b_rec, ll)
		})
		.collect();
	let best = sweep
		.iter()
		.copied()
		.max_by(|a, b| a.1.total_cmp(&b.1))
		.unwrap();
	assert!((best.0 - 0.5).abs() < 1e-9, "sweep: {sweep:?}");
}

#[test]
fn test_free_parameter_objective_matches_direct_scoring() {
	let spec: ParameterSpec = serde_json::from_str(
		r#"{
			"fixed": {"B_enc": 0.7, "P1": 8, "P2": 1, "T": 0.35, "X1": 0.001,
				"X2": 0.5, "Dfc": 3, "Dcf": 1},
			"free": {"B_rec": [0.0, 1.0]}
		}"#,
	)
	.unwrap();
	let def = ParameterDef::try_from(spec).unwrap();
	let cmr = Cmr::new(
		Arc::new(PatternStore::localist(6)),
		def,
		ModelConfig::default(),
	);

	let templates = experiment(6, 2, 5, 3);
	let generated = generate_trials(
		&cmr,
		&BaseParameters::from_values(scenario()),
		&templates,
		5,
		&CancellationToken::new(),
	);

	for b_rec in [0.2, 0.5, 0.9] {
		let objective = cmr.evaluate_candidate(&[b_rec], &generated.trials).unwrap();
		let direct = score(&cmr, scenario().with(ParamName::BRec, b_rec), &generated.trials);
		assert!((objective.log_likelihood - direct).abs() < 1e-9);
	}
}

#[test]
fn test_records_round_trip_preserves_likelihood() {
	let cmr = localist_model(6);
	let base = BaseParameters::from_values(scenario());
	let templates = experiment(6, 3, 4, 21);
	let generated = generate_trials(&cmr, &base, &templates, 8, &CancellationToken::new());

	let records: Vec<_> = generated
		.trials
		.iter()
		.flat_map(|t| t.to_records(cmr.patterns()))
		.collect();
	let regrouped = group_trials(&records).unwrap();
	assert_eq!(regrouped, generated.trials);

	let json = serde_json::to_string(&records).unwrap();
	let parsed: Vec<cmr_core::EventRecord> = serde_json::from_str(&json).unwrap();
	assert_eq!(group_trials(&parsed).unwrap(), generated.trials);
}

#[test]
fn test_rotated_patterns_match_localist_likelihood() {
	// An orthonormal rotation of one-hot codes changes nothing observable.
	let (sin, cos) = 0.3f64.sin_cos();
	let rotated = PatternStore::from_vectors(
		vec!["a".into(), "b".into(), "c".into()],
		vec![
			vec![cos, sin, 0.0],
			vec![-sin, cos, 0.0],
			vec![0.0, 0.0, 1.0],
		],
	)
	.unwrap();
	let distributed = Cmr::new(Arc::new(rotated), ParameterDef::new(), ModelConfig::default());
	let localist = localist_model(3);

	let base = BaseParameters::from_values(scenario());
	let mut trial = Trial::new(0, 0, vec![2, 0, 1]);
	trial.recalls = vec![1, 2, 0];

	let a = localist
		.predict_trial(&base, &localist.pre_experimental(&base), &trial)
		.unwrap();
	let b = distributed
		.predict_trial(&base, &distributed.pre_experimental(&base), &trial)
		.unwrap();
	assert!((a.log_likelihood - b.log_likelihood).abs() < 1e-9);
}

#[test]
fn test_matching_covariates_beat_scrambled_ones() {
	let mut def = ParameterDef::new();
	def.declare_auxiliary("neural_scaling").unwrap();
	def.declare_covariate("hcmp").unwrap();
	for name in ParamName::ALL {
		def.set_fixed(name.as_str(), scenario().get(name)).unwrap();
	}
	def.set_fixed("neural_scaling", 0.5).unwrap();
	def.set_dynamic(Phase::Recall, "B_rec", "clip(B_rec + hcmp * neural_scaling, 0, 1)")
		.unwrap();
	let cmr = Cmr::new(Arc::new(PatternStore::localist(8)), def, ModelConfig::default());
	let base = cmr.definition().splice(&[]).unwrap();

	// One synthetic signal value per possible recall event
	let mut signal = StdRng::seed_from_u64(4);
	let templates: Vec<Trial> = experiment(8, 20, 30, 17)
		.into_iter()
		.map(|mut t| {
			t.recall_covariates = (0..=t.study.len())
				.map(|_| Covariates::from_iter([("hcmp", signal.gen_range(-1.0..1.0))]))
				.collect();
			t
		})
		.collect();

	let generated = generate_trials(&cmr, &base, &templates, 31, &CancellationToken::new());
	assert!(generated.failures.is_empty());

	let matched = predict_trials(&cmr, &base, &generated.trials, &CancellationToken::new());
	let mut scrambled_trials = generated.trials.clone();
	let moved = scramble_covariate(
		&mut scrambled_trials,
		Phase::Recall,
		"hcmp",
		&mut StdRng::seed_from_u64(5),
	);
	assert_eq!(moved, 600 * 9);
	let scrambled = predict_trials(&cmr, &base, &scrambled_trials, &CancellationToken::new());

	assert!(matched.is_complete() && scrambled.is_complete());
	assert!(
		matched.total().log_likelihood > scrambled.total().log_likelihood,
		"matched {} vs scrambled {}",
		matched.total().log_likelihood,
		scrambled.total().log_likelihood
	);
}

#[test]
fn test_cancelled_generation_keeps_started_trials_whole() {
	let cmr = localist_model(5);
	let templates = experiment(5, 2, 5, 1);
	let cancel = CancellationToken::new();
	cancel.cancel();
	let generated = generate_trials(
		&cmr,
		&BaseParameters::from_values(scenario()),
		&templates,
		0,
		&cancel,
	);
	assert_eq!(generated.skipped, templates.len());
	assert!(generated.trials.is_empty());
}
