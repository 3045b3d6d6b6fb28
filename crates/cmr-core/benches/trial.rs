//! Benchmarks for whole trials and batches
//!
//! Tests end-to-end performance with:
//! - Single-trial generation and scoring at various list lengths
//! - Batch scoring over many trials on the rayon pool
//! - Scoring with a per-event recall override

#![allow(clippy::expect_used)] // Fine in benchmarks

use std::sync::Arc;

use cmr_core::{
	generate_trials, predict_trials, BaseParameters, CancellationToken, Cmr, CmrParameters,
	Covariates, ModelConfig, ParamName, ParameterDef, PatternStore, Phase, Trial,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn values() -> CmrParameters {
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

fn model(pool: usize, def: ParameterDef) -> Cmr {
	Cmr::new(Arc::new(PatternStore::localist(pool)), def, ModelConfig::default())
}

/// Shuffled full-pool study lists
fn templates(pool: usize, count: usize) -> Vec<Trial> {
	let mut rng = StdRng::seed_from_u64(7);
	(0..count)
		.map(|list| {
			let mut study: Vec<usize> = (0..pool).collect();
			study.shuffle(&mut rng);
			Trial::new(list % 10, list, study)
		})
		.collect()
}

fn bench_single_trial(c: &mut Criterion) {
	let mut group = c.benchmark_group("trial_single");
	let base = BaseParameters::from_values(values());

	for list_length in &[8, 16, 24, 40] {
		let cmr = model(*list_length, ParameterDef::new());
		let pre = cmr.pre_experimental(&base);
		let template = templates(*list_length, 1).pop().expect("template");
		let mut rng = StdRng::seed_from_u64(1);
		let observed = cmr
			.generate_trial(&base, &pre, &template, &mut rng)
			.expect("generate");

		let _ = group.throughput(Throughput::Elements(*list_length as u64));
		let _ = group.bench_with_input(
			BenchmarkId::new("generate", list_length),
			list_length,
			|bench, _| {
				let mut rng = StdRng::seed_from_u64(2);
				bench.iter(|| cmr.generate_trial(&base, &pre, black_box(&template), &mut rng));
			},
		);
		let _ = group.bench_with_input(
			BenchmarkId::new("predict", list_length),
			list_length,
			|bench, _| {
				bench.iter(|| cmr.predict_trial(&base, &pre, black_box(&observed)));
			},
		);
	}

	group.finish();
}

fn bench_batch(c: &mut Criterion) {
	let mut group = c.benchmark_group("trial_batch");
	let base = BaseParameters::from_values(values());
	let cmr = model(16, ParameterDef::new());

	for trial_count in &[100, 500, 2000] {
		let generated =
			generate_trials(&cmr, &base, &templates(16, *trial_count), 3, &CancellationToken::new());

		let _ = group.throughput(Throughput::Elements(*trial_count as u64));
		let _ = group.bench_with_input(
			BenchmarkId::new("trials", trial_count),
			trial_count,
			|bench, _| {
				bench.iter(|| {
					predict_trials(
						&cmr,
						&base,
						black_box(&generated.trials),
						&CancellationToken::new(),
					)
				});
			},
		);
	}

	group.finish();
}

fn bench_dynamic_recall(c: &mut Criterion) {
	let mut group = c.benchmark_group("trial_dynamic");

	let mut def = ParameterDef::new();
	def.declare_auxiliary("neural_scaling").expect("declare");
	def.declare_covariate("hcmp").expect("declare");
	for name in ParamName::ALL {
		def.set_fixed(name.as_str(), values().get(name)).expect("fixed");
	}
	def.set_fixed("neural_scaling", 0.5).expect("fixed");
	def.set_dynamic(Phase::Recall, "B_rec", "clip(B_rec + hcmp * neural_scaling, 0, 1)")
		.expect("dynamic");
	let cmr = model(16, def);
	let base = cmr.definition().splice(&[]).expect("splice");

	let mut rng = StdRng::seed_from_u64(11);
	let with_signal: Vec<Trial> = templates(16, 500)
		.into_iter()
		.map(|mut t| {
			t.recall_covariates = (0..=t.study.len())
				.map(|_| Covariates::from_iter([("hcmp", rng.gen_range(-1.0..1.0))]))
				.collect();
			t
		})
		.collect();
	let generated = generate_trials(&cmr, &base, &with_signal, 5, &CancellationToken::new());

	let _ = group.throughput(Throughput::Elements(generated.trials.len() as u64));
	let _ = group.bench_function("predict_500", |bench| {
		bench.iter(|| {
			predict_trials(
				&cmr,
				&base,
				black_box(&generated.trials),
				&CancellationToken::new(),
			)
		});
	});

	group.finish();
}

criterion_group!(benches, bench_single_trial, bench_batch, bench_dynamic_recall);
criterion_main!(benches);
