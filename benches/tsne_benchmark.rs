use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::distr::{Distribution, Uniform};
use rand::{rngs::StdRng, SeedableRng};
use single_tsne::dimred::tsne::distance::squared_euclidean;
use single_tsne::dimred::tsne::perplexity::{calibrate, SearchParams};
use single_tsne::TSNE;
use std::time::Duration;

#[derive(Clone)]
pub struct TsneBenchConfig {
    seed: u64,
    matrix_sizes: Vec<(usize, usize)>,
    perplexity: f64,
    iterations: usize,
    measurement_time: u64,
    sample_size: usize,
}

impl Default for TsneBenchConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            matrix_sizes: vec![(100, 50), (500, 50), (1000, 50)],
            perplexity: 30.0,
            iterations: 100,
            measurement_time: 10,
            sample_size: 10,
        }
    }
}

fn create_test_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let value_dist = Uniform::try_from(-1.0..1.0).unwrap();
    Array2::from_shape_simple_fn((rows, cols), || value_dist.sample(&mut rng))
}

fn configure_group<'a, M: Measurement>(
    c: &'a mut Criterion<M>,
    name: &str,
    config: &TsneBenchConfig,
) -> BenchmarkGroup<'a, M> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(config.measurement_time));
    group.sample_size(config.sample_size);
    group
}

pub fn bench_affinities(c: &mut Criterion) {
    let config = TsneBenchConfig::default();
    let mut group = configure_group(c, "TSNE_Affinities", &config);
    let params = SearchParams::default();

    for &(rows, cols) in config.matrix_sizes.iter() {
        let seed = config.seed + (rows * cols) as u64;
        let matrix = create_test_matrix(rows, cols, seed);
        let distances = squared_euclidean(matrix.view()).unwrap();

        group.bench_with_input(
            BenchmarkId::new("distances", format!("{}x{}", rows, cols)),
            &(rows, cols),
            |b, _| {
                b.iter(|| squared_euclidean(matrix.view()).unwrap());
            },
        );

        group.bench_with_input(
            BenchmarkId::new("calibrate", format!("{}x{}", rows, cols)),
            &(rows, cols),
            |b, _| {
                b.iter(|| calibrate(distances.view(), config.perplexity, &params).unwrap());
            },
        );
    }
    group.finish();
}

pub fn bench_fit(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let config = TsneBenchConfig::default();
    let mut group = configure_group(c, "TSNE_Fit", &config);
    let tsne = TSNE::new(config.perplexity, true);

    for &(rows, cols) in config.matrix_sizes.iter() {
        let seed = config.seed + (rows * cols) as u64;
        let matrix = create_test_matrix(rows, cols, seed);
        let learning_rate = tsne.stable_learning_rate(rows);

        group.bench_with_input(
            BenchmarkId::new("fit", format!("{}x{}_it{}", rows, cols, config.iterations)),
            &(rows, cols),
            |b, _| {
                b.iter(|| {
                    tsne.fit(matrix.view(), config.iterations, 2, learning_rate)
                        .unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(tsne_benches, bench_affinities, bench_fit);
criterion_main!(tsne_benches);
