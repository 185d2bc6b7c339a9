//! Non-dominated sorting of objective vectors (lower is better).

use rayon::prelude::*;

/// Whether `a` Pareto-dominates `b`: no worse in every objective and
/// strictly better in at least one.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Fast non-dominated sorting.
///
/// Returns the fronts as lists of indices into `points`, front 0 first.
/// Indices within a front are ascending.
pub fn non_dominated_fronts(points: &[Vec<f64>]) -> Vec<Vec<usize>> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }

    // For each point: the points it dominates and how many dominate it.
    let relations: Vec<(Vec<usize>, usize)> = (0..n)
        .into_par_iter()
        .map(|p| {
            let mut dominated = Vec::new();
            let mut count = 0usize;
            for q in 0..n {
                if p == q {
                    continue;
                }
                if dominates(&points[p], &points[q]) {
                    dominated.push(q);
                } else if dominates(&points[q], &points[p]) {
                    count += 1;
                }
            }
            (dominated, count)
        })
        .collect();

    let mut counts: Vec<usize> = relations.iter().map(|(_, c)| *c).collect();
    let mut current: Vec<usize> = (0..n).filter(|&p| counts[p] == 0).collect();
    let mut fronts = Vec::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &p in &current {
            for &q in &relations[p].0 {
                counts[q] -= 1;
                if counts[q] == 0 {
                    next.push(q);
                }
            }
        }
        next.sort_unstable();
        fronts.push(current);
        current = next;
    }

    fronts
}

/// Mask of points on the first (rank-0) front.
pub fn pareto_mask(points: &[Vec<f64>]) -> Vec<bool> {
    let mut mask = vec![false; points.len()];
    if let Some(front) = non_dominated_fronts(points).into_iter().next() {
        for i in front {
            mask[i] = true;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dominates() {
        assert!(dominates(&[1.0, 1.0], &[1.0, 2.0]));
        assert!(!dominates(&[1.0, 2.0], &[1.0, 2.0]));
        assert!(!dominates(&[0.0, 3.0], &[1.0, 2.0]));
    }

    #[test]
    fn test_first_front() {
        let points = vec![
            vec![1.0, 5.0],
            vec![5.0, 1.0],
            vec![3.0, 3.0],
            vec![4.0, 4.0],
        ];
        let fronts = non_dominated_fronts(&points);
        assert_eq!(fronts[0], vec![0, 1, 2]);
        assert_eq!(fronts[1], vec![3]);
        assert_eq!(pareto_mask(&points), vec![true, true, true, false]);
    }

    #[test]
    fn test_duplicates_share_front() {
        let points = vec![vec![2.0, 2.0], vec![2.0, 2.0], vec![3.0, 3.0]];
        let fronts = non_dominated_fronts(&points);
        assert_eq!(fronts, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_empty() {
        assert!(non_dominated_fronts(&[]).is_empty());
        assert!(pareto_mask(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_fronts_partition_and_first_front_undominated(
            points in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 2), 1..40)
        ) {
            let fronts = non_dominated_fronts(&points);
            let total: usize = fronts.iter().map(|f| f.len()).sum();
            prop_assert_eq!(total, points.len());

            for &i in &fronts[0] {
                for q in &points {
                    prop_assert!(!dominates(q, &points[i]));
                }
            }
        }
    }
}
