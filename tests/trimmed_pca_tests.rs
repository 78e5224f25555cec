// End-to-end scenarios for the trimmed Grassmann averaging engine.

use approx::assert_abs_diff_eq;
use grassmann_pca::{TrimmedGrassmannConfig, TrimmedGrassmannPca};
use ndarray::{Array1, Array2, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Uniform data in [-1000, 1000]^dimension, optionally stretched per axis.
fn generate_uniform_data(
    num_samples: usize,
    dimension: usize,
    axis_scales: Option<&[f64]>,
    seed: u64,
) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((num_samples, dimension), |(_, d)| {
        let scale = axis_scales.map_or(1.0, |scales| scales[d]);
        rng.gen_range(-1000.0..1000.0) * scale
    })
}

fn engine(alpha: f64, workers: usize) -> TrimmedGrassmannPca {
    let mut engine = TrimmedGrassmannPca::new(alpha).unwrap();
    engine.set_worker_count(workers).unwrap();
    engine
}

fn assert_orthonormal(eigenvectors: ArrayView2<'_, f64>, tolerance: f64) {
    let num_components = eigenvectors.ncols();
    for i in 0..num_components {
        let e_i = eigenvectors.column(i);
        assert_abs_diff_eq!(e_i.dot(&e_i), 1.0, epsilon = tolerance);
        for j in (i + 1)..num_components {
            let e_j = eigenvectors.column(j);
            assert_abs_diff_eq!(e_i.dot(&e_j), 0.0, epsilon = tolerance);
        }
    }
}

#[test]
fn basis_is_orthonormal_on_uniform_data_with_many_workers() {
    let data = generate_uniform_data(500, 5, None, 42);
    let output = engine(0.1, 7)
        .batch_process(200, 5, data.view(), None)
        .unwrap();

    assert_eq!(output.num_components_computed, 5);
    assert_orthonormal(output.eigenvectors.view(), 1e-6);
}

#[test]
fn one_worker_runs_are_bit_identical() {
    let data = generate_uniform_data(200, 4, None, 7);
    let engine = engine(0.1, 1);

    let first = engine.batch_process(100, 2, data.view(), None).unwrap();
    let second = engine.batch_process(100, 2, data.view(), None).unwrap();

    assert_eq!(first.eigenvectors, second.eigenvectors);
    assert_eq!(first.projected_data, second.projected_data);
}

#[test]
fn dominant_component_is_stable_under_small_trimming() {
    // Stretch the first axis so the data has a clear dominant direction.
    let scales = [5.0, 1.0, 1.0, 1.0, 1.0];
    let data = generate_uniform_data(1000, 5, Some(&scales), 17);

    let untrimmed = engine(0.0, 4)
        .batch_process(200, 1, data.view(), None)
        .unwrap();
    let trimmed = engine(0.1, 4)
        .batch_process(200, 1, data.view(), None)
        .unwrap();

    let alignment = untrimmed
        .eigenvectors
        .column(0)
        .dot(&trimmed.eigenvectors.column(0))
        .abs();
    assert!(
        alignment > 0.95,
        "dominant eigenvector moved under 10% trimming: |<e0, e0'>| = {}",
        alignment
    );
}

#[test]
fn trimming_recovers_a_line_buried_in_gross_outliers() {
    let dimension = 10;
    let num_inliers = 900;
    let num_outliers = 100;
    let mut rng = ChaCha8Rng::seed_from_u64(2718);

    let inv_sqrt_d = 1.0 / (dimension as f64).sqrt();
    let line_direction = Array1::from_elem(dimension, inv_sqrt_d);
    let outlier_direction =
        Array1::from_shape_fn(dimension, |d| if d % 2 == 0 { inv_sqrt_d } else { -inv_sqrt_d });

    let mut data = Array2::zeros((num_inliers + num_outliers, dimension));
    for i in 0..num_inliers {
        let t = rng.gen_range(-1000.0..1000.0);
        for d in 0..dimension {
            data[[i, d]] = t * line_direction[d] + rng.gen_range(-1e-3..1e-3);
        }
    }
    for j in 0..num_outliers {
        let magnitude = if j % 2 == 0 { 1e5 } else { -1e5 };
        for d in 0..dimension {
            data[[num_inliers + j, d]] =
                magnitude * outlier_direction[d] + rng.gen_range(-1.0..1.0);
        }
    }

    let trimmed = engine(0.3, 4)
        .batch_process(100, 1, data.view(), None)
        .unwrap();
    let trimmed_alignment = trimmed.eigenvectors.column(0).dot(&line_direction).abs();
    assert!(
        trimmed_alignment > 0.99,
        "trimmed recovery failed: |<e0, u>| = {}",
        trimmed_alignment
    );

    let untrimmed = engine(0.0, 4)
        .batch_process(100, 1, data.view(), None)
        .unwrap();
    let untrimmed_alignment = untrimmed.eigenvectors.column(0).dot(&line_direction).abs();
    assert!(
        untrimmed_alignment < 0.5,
        "outliers should dominate the untrimmed average: |<e0, u>| = {}",
        untrimmed_alignment
    );
}

#[test]
fn results_are_invariant_to_the_worker_count() {
    let scales: Vec<f64> = (0..8).map(|d| (d + 1) as f64).collect();
    let data = generate_uniform_data(500, 8, Some(&scales), 23);
    let guess: Vec<Array1<f64>> = (0..2)
        .map(|c| Array1::from_shape_fn(8, |d| if d == c { 1.0 } else { 0.0 }))
        .collect();

    let serial = engine(0.1, 1)
        .batch_process(200, 2, data.view(), Some(&guess))
        .unwrap();
    let parallel = engine(0.1, 4)
        .batch_process(200, 2, data.view(), Some(&guess))
        .unwrap();

    for component in 0..2 {
        let alignment = serial
            .eigenvectors
            .column(component)
            .dot(&parallel.eigenvectors.column(component))
            .abs();
        assert!(
            alignment > 1.0 - 1e-6,
            "component {} differs across worker counts: |<a, b>| = {}",
            component,
            alignment
        );
    }
}

#[test]
fn many_more_chunks_than_workers_matches_the_serial_baseline() {
    let scales: Vec<f64> = (0..12).map(|d| (d + 1) as f64).collect();
    let data = generate_uniform_data(2000, 12, Some(&scales), 31);

    // K = 20 <= chunk size 64, so the chunk cap stands and 8 workers see
    // 32 chunks per phase.
    let run = |workers: usize| {
        let mut engine = engine(0.02, workers);
        engine.set_max_chunk_size(64).unwrap();
        engine.batch_process(60, 3, data.view(), None).unwrap()
    };

    let baseline = run(1);
    let stressed = run(8);

    assert_orthonormal(stressed.eigenvectors.view(), 1e-6);
    for component in 0..3 {
        let alignment = baseline
            .eigenvectors
            .column(component)
            .dot(&stressed.eigenvectors.column(component))
            .abs();
        assert!(
            alignment > 1.0 - 1e-4,
            "component {} diverged under chunked dispatch: |<a, b>| = {}",
            component,
            alignment
        );
    }
}

#[test]
fn zero_trimming_reproduces_the_plain_grassmann_average() {
    let data = generate_uniform_data(50, 3, None, 5);
    let guess = vec![Array1::from(vec![1.0, 0.0, 0.0])];
    let max_iterations = 100;
    let tolerance = 1e-9;

    let engine = TrimmedGrassmannPca::with_config(TrimmedGrassmannConfig {
        trimming_fraction: 0.0,
        convergence_tolerance: tolerance,
        ..TrimmedGrassmannConfig::default()
    })
    .unwrap();
    let output = engine
        .batch_process(max_iterations, 1, data.view(), Some(&guess))
        .unwrap();

    // Plain Grassmann average: every sign-aligned sample contributes on
    // every axis, bounds never trim anything.
    let mut mu = guess[0].clone();
    let mut previous = mu.clone();
    let mut iterations = 0;
    loop {
        let mut sum = Array1::<f64>::zeros(3);
        for row in data.rows() {
            let sign = row.dot(&mu) >= 0.0;
            for d in 0..3 {
                sum[d] += if sign { row[d] } else { -row[d] };
            }
        }
        for d in 0..3 {
            mu[d] = sum[d] / data.nrows() as f64;
        }
        let norm = mu.dot(&mu).sqrt();
        mu.mapv_inplace(|x| x / norm);

        iterations += 1;
        let difference = &previous - &mu;
        let distance = difference.dot(&difference).sqrt();
        previous.assign(&mu);
        if distance <= tolerance || iterations >= max_iterations {
            break;
        }
    }

    for d in 0..3 {
        assert_abs_diff_eq!(output.eigenvectors.column(0)[d], mu[d], epsilon = 1e-12);
    }
}

#[test]
fn projected_data_has_no_component_along_extracted_directions() {
    let data = generate_uniform_data(300, 6, None, 11);
    let output = engine(0.1, 3)
        .batch_process(150, 3, data.view(), None)
        .unwrap();

    // Deflation runs after every component except the last.
    for component in 0..2 {
        let e = output.eigenvectors.column(component);
        for row in output.projected_data.rows() {
            assert_abs_diff_eq!(row.dot(&e), 0.0, epsilon = 1e-6);
        }
    }
}
