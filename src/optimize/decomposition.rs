//! Decomposition of a multi-objective problem into scalar sub-problems:
//! weight grids, weight neighbourhoods and Tchebycheff scalarization.

/// Weight used in place of a zero weight component.
const ZERO_WEIGHT: f64 = 1e-4;

/// The population size does not match any uniform weight grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Population size {size} has no uniform weight grid for {n_obj} objectives \
     (nearest sizes: {lower} and {upper})"
)]
pub struct GridError {
    pub size: usize,
    pub n_obj: usize,
    pub lower: usize,
    pub upper: usize,
}

/// Uniformly spaced weight vectors on the unit simplex, one per population
/// slot.
///
/// For `M` objectives and `H` divisions the grid holds `C(H + M - 1, M - 1)`
/// vectors, so only matching population sizes are accepted. Two objectives
/// fit any size from 2 up (`H = size - 1`); a single objective gets `[1.0]`
/// for every slot.
pub fn weight_grid(size: usize, n_obj: usize) -> Result<Vec<Vec<f64>>, GridError> {
    match n_obj {
        0 => Err(GridError {
            size,
            n_obj,
            lower: 0,
            upper: 0,
        }),
        1 => Ok(vec![vec![1.0]; size]),
        _ => {
            let mut h = 1;
            let mut lower = 0;
            let mut count = grid_size(h, n_obj);
            while count < size {
                lower = count;
                h += 1;
                count = grid_size(h, n_obj);
            }
            if count != size {
                return Err(GridError {
                    size,
                    n_obj,
                    lower,
                    upper: count,
                });
            }
            Ok(simplex_lattice(n_obj, h))
        }
    }
}

/// Number of weight vectors for `h` divisions and `n_obj` objectives.
pub fn grid_size(h: usize, n_obj: usize) -> usize {
    binomial(h + n_obj - 1, n_obj - 1)
}

fn binomial(n: usize, k: usize) -> usize {
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result * (n - i) as u128 / (i + 1) as u128;
        if result > usize::MAX as u128 {
            return usize::MAX;
        }
    }
    result as usize
}

fn simplex_lattice(n_obj: usize, h: usize) -> Vec<Vec<f64>> {
    fn fill(n_obj: usize, h: usize, left: usize, current: &mut Vec<f64>, out: &mut Vec<Vec<f64>>) {
        if current.len() + 1 == n_obj {
            current.push(left as f64 / h as f64);
            out.push(current.clone());
            current.pop();
            return;
        }
        for k in 0..=left {
            current.push(k as f64 / h as f64);
            fill(n_obj, h, left - k, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    fill(n_obj, h, h, &mut Vec::with_capacity(n_obj), &mut out);
    out
}

/// Indices of the `t` weight vectors closest to each weight vector
/// (Euclidean distance), nearest first. Ties keep index order, so every
/// vector is its own first neighbour.
pub fn neighbourhoods(weights: &[Vec<f64>], t: usize) -> Vec<Vec<usize>> {
    let t = t.min(weights.len());
    weights
        .iter()
        .map(|w| {
            let mut order: Vec<(f64, usize)> = weights
                .iter()
                .enumerate()
                .map(|(j, v)| (distance(w, v), j))
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            order.into_iter().take(t).map(|(_, j)| j).collect()
        })
        .collect()
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Tchebycheff scalarization `max_k w_k * |f_k - z_k|`.
pub fn tchebycheff(f: &[f64], weight: &[f64], ideal: &[f64]) -> f64 {
    f.iter()
        .zip(weight)
        .zip(ideal)
        .map(|((fk, &wk), zk)| {
            let wk = if wk == 0.0 { ZERO_WEIGHT } else { wk };
            wk * (fk - zk).abs()
        })
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Component-wise minimum of a set of objective vectors.
pub fn ideal_point(fitness: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = fitness.first() else {
        return Vec::new();
    };
    let mut ideal = first.clone();
    for f in &fitness[1..] {
        for (z, v) in ideal.iter_mut().zip(f) {
            if *v < *z {
                *z = *v;
            }
        }
    }
    ideal
}

/// Lower the ideal point to include `f`.
pub fn update_ideal(ideal: &mut [f64], f: &[f64]) {
    for (z, v) in ideal.iter_mut().zip(f) {
        if *v < *z {
            *z = *v;
        }
    }
}
