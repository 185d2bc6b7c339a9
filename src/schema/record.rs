//! Archived evaluation records.

use serde::{Deserialize, Serialize};

/// Per-dimension `(min, max)` search bounds.
pub type Bounds = Vec<(f64, f64)>;

/// One successfully evaluated candidate.
///
/// Records are appended to the archive once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptiRecord<D, R> {
    /// Free variables the design was created from.
    pub x: Vec<f64>,
    /// The created design.
    pub design: D,
    /// Evaluation results (after any configured transform).
    pub full_results: R,
    /// Objective vector, lower is better.
    pub objs: Vec<f64>,
}

/// Borrowed view of a record, serialized identically to [`OptiRecord`].
#[derive(Serialize)]
pub(crate) struct OptiRecordRef<'a, D, R> {
    pub x: &'a [f64],
    pub design: &'a D,
    pub full_results: &'a R,
    pub objs: &'a [f64],
}

/// Check that every component of `x` lies within `bounds`.
pub fn within_bounds(x: &[f64], bounds: &[(f64, f64)]) -> bool {
    x.len() == bounds.len()
        && x
            .iter()
            .zip(bounds)
            .all(|(v, (lo, hi))| *v >= *lo && *v <= *hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrowed_record_matches_owned() {
        let owned = OptiRecord {
            x: vec![0.2, 0.3],
            design: "d".to_string(),
            full_results: 5u32,
            objs: vec![-0.5],
        };
        let borrowed = OptiRecordRef {
            x: &owned.x,
            design: &owned.design,
            full_results: &owned.full_results,
            objs: &owned.objs,
        };
        let a = serde_json::to_string(&owned).unwrap();
        let b = serde_json::to_string(&borrowed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_within_bounds() {
        let bounds = vec![(0.0, 1.0), (-1.0, 1.0)];
        assert!(within_bounds(&[0.0, 1.0], &bounds));
        assert!(!within_bounds(&[1.1, 0.0], &bounds));
        assert!(!within_bounds(&[0.5], &bounds));
    }
}
