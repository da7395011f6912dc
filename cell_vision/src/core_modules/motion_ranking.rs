// THEORY:
// `motion_ranking` decides which mixture components are the most "restless".
// Each component carries an eigenvector per frame describing how it relates to
// every other component. When that relationship shifts from one frame to the
// next, the vector moves; summing the Euclidean length of every step over the
// whole video gives the component's cumulative motion score.
//
// Components are then ordered by descending score. The sort is stable, so equal
// scores keep ascending component order and the ranking is fully deterministic.
// Scores for separate components are independent and are accumulated in parallel;
// each individual sum still runs over frames in order.

use crate::core_modules::mixture::{ComponentId, EigenSeries};
use rayon::prelude::*;

/// One component and its cumulative eigenvector displacement.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ComponentRank {
    pub component: ComponentId,
    pub score: f64,
}

/// Total distance travelled by each component's eigenvector, indexed by component.
/// A single-frame series has no steps and scores every component zero.
pub fn cumulative_motion(eigen: &EigenSeries) -> Vec<f64> {
    let frames = eigen.frame_count();
    (0..eigen.component_count())
        .into_par_iter()
        .map(|component| {
            (1..frames)
                .map(|frame| {
                    let previous = eigen.vector(frame - 1, component);
                    let current = eigen.vector(frame, component);
                    previous
                        .iter()
                        .zip(current.iter())
                        .map(|(a, b)| (b - a).powi(2))
                        .sum::<f64>()
                        .sqrt()
                })
                .sum::<f64>()
        })
        .collect()
}

/// Every component, most motion first. Ties keep ascending component order.
pub fn rank_components(eigen: &EigenSeries) -> Vec<ComponentRank> {
    let mut ranks: Vec<ComponentRank> = cumulative_motion(eigen)
        .into_iter()
        .enumerate()
        .map(|(index, score)| ComponentRank {
            component: ComponentId::new(index),
            score,
        })
        .collect();
    ranks.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, array};

    fn order(ranks: &[ComponentRank]) -> Vec<usize> {
        ranks.iter().map(|r| r.component.index()).collect()
    }

    #[test]
    fn scores_sum_euclidean_steps() {
        // Component 0 moves (0,0) -> (3,4) -> (3,4): one step of length 5.
        // Component 1 moves (0,0) -> (1,0) -> (1,1): two unit steps.
        let vectors = array![
            [[0.0, 0.0], [0.0, 0.0]],
            [[3.0, 4.0], [1.0, 0.0]],
            [[3.0, 4.0], [1.0, 1.0]],
        ];
        let eigen = EigenSeries::new(vectors).unwrap();
        let scores = cumulative_motion(&eigen);
        assert_relative_eq!(scores[0], 5.0);
        assert_relative_eq!(scores[1], 2.0);
    }

    #[test]
    fn ranking_is_descending_by_score() {
        let vectors = array![
            [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
            [[1.0, 0.0, 0.0], [0.0, 9.0, 0.0], [0.0, 0.0, 4.0]],
        ];
        let ranks = rank_components(&EigenSeries::new(vectors).unwrap());
        assert_eq!(order(&ranks), vec![1, 2, 0]);
        assert_relative_eq!(ranks[0].score, 9.0);
        assert_relative_eq!(ranks[2].score, 1.0);
    }

    #[test]
    fn ties_keep_ascending_component_order() {
        let vectors = array![
            [[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]],
            [[0.0, 2.0, 0.0], [5.0, 0.0, 0.0], [0.0, 0.0, 2.0]],
        ];
        let ranks = rank_components(&EigenSeries::new(vectors).unwrap());
        assert_eq!(order(&ranks), vec![1, 0, 2]);
    }

    #[test]
    fn single_frame_scores_zero_in_index_order() {
        let eigen = EigenSeries::new(Array3::from_elem((1, 4, 4), 0.7)).unwrap();
        let ranks = rank_components(&eigen);
        assert_eq!(order(&ranks), vec![0, 1, 2, 3]);
        assert!(ranks.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn ranking_is_a_permutation_of_all_components() {
        let mut vectors = Array3::<f64>::zeros((5, 7, 7));
        for ((frame, component, k), v) in vectors.indexed_iter_mut() {
            *v = ((frame * 31 + component * 17 + k * 7) % 11) as f64;
        }
        let ranks = rank_components(&EigenSeries::new(vectors).unwrap());
        let mut seen = order(&ranks);
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
        assert!(ranks.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn empty_component_set_ranks_nothing() {
        let eigen = EigenSeries::new(Array3::<f64>::zeros((3, 0, 0))).unwrap();
        assert!(rank_components(&eigen).is_empty());
    }
}
