//! Initial sample generation around a base design.
//!
//! Samples are built in priority order: the guess itself, one step of an
//! eighth of the range along each axis, the opposite step along each axis,
//! and finally a seeded Latin hypercube over a quarter-range box around the
//! guess. Every sample lies inside the parameter bounds.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Seed of the space-filling stage, fixed so runs are reproducible.
pub const SAMPLE_SEED: u64 = 0;

/// Fraction of a parameter's range used for axis steps.
const STEP_FRACTION: f64 = 1.0 / 8.0;

/// Build `n_desired` starting points from `guess` within `bounds`.
pub fn initial_sample(guess: &[f64], bounds: &[(f64, f64)], n_desired: usize) -> Vec<Vec<f64>> {
    if n_desired == 0 {
        return Vec::new();
    }

    let x0: Vec<f64> = guess
        .iter()
        .zip(bounds)
        .map(|(&x, &(min, max))| x.clamp(min, max))
        .collect();
    let steps: Vec<f64> = bounds
        .iter()
        .map(|&(min, max)| (max - min) * STEP_FRACTION)
        .collect();

    let mut vertices = vec![x0.clone()];
    if vertices.len() >= n_desired {
        return vertices;
    }

    // One step along each axis, away from the upper bound if needed
    for (i, &(_, max)) in bounds.iter().enumerate() {
        let mut vertex = x0.clone();
        if vertex[i] + steps[i] <= max {
            vertex[i] += steps[i];
        } else {
            vertex[i] -= steps[i];
        }
        vertices.push(vertex);
    }
    if vertices.len() >= n_desired {
        vertices.truncate(n_desired);
        return vertices;
    }

    // The other direction, where it is new and in bounds
    for (i, &(min, _)) in bounds.iter().enumerate() {
        if x0[i] - steps[i] >= min {
            let mut vertex = x0.clone();
            vertex[i] -= steps[i];
            if !vertices.contains(&vertex) {
                vertices.push(vertex);
            }
        }
    }
    if vertices.len() >= n_desired {
        vertices.truncate(n_desired);
        return vertices;
    }

    let (lower, upper) = sampling_box(&x0, bounds, &steps);
    for point in latin_hypercube(x0.len(), n_desired - vertices.len(), SAMPLE_SEED) {
        let vertex = point
            .iter()
            .enumerate()
            .map(|(i, &u)| (lower[i] + u * (upper[i] - lower[i])).clamp(bounds[i].0, bounds[i].1))
            .collect();
        vertices.push(vertex);
    }
    vertices
}

/// Quarter-range box centred on the guess, shifted to stay inside the bounds.
fn sampling_box(x0: &[f64], bounds: &[(f64, f64)], steps: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut lower = Vec::with_capacity(x0.len());
    let mut upper = Vec::with_capacity(x0.len());
    for (i, &(min, max)) in bounds.iter().enumerate() {
        let width = 2.0 * steps[i];
        if x0[i] - steps[i] < min {
            lower.push(min);
            upper.push(min + width);
        } else if x0[i] + steps[i] > max {
            lower.push(max - width);
            upper.push(max);
        } else {
            lower.push(x0[i] - steps[i]);
            upper.push(x0[i] + steps[i]);
        }
    }
    (lower, upper)
}

/// `count` points in the unit hypercube, one per stratum along every axis.
fn latin_hypercube(dims: usize, count: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = vec![vec![0.0; dims]; count];
    let mut strata: Vec<usize> = (0..count).collect();

    for d in 0..dims {
        strata.shuffle(&mut rng);
        for (point, &stratum) in points.iter_mut().zip(&strata) {
            let jitter: f64 = rng.gen_range(0.0..1.0);
            point[d] = (stratum as f64 + jitter) / count as f64;
        }
    }
    points
}
