// THEORY:
// The `region_selector` picks which ranked components will actually be boxed.
// Highly ranked components often sit on top of each other, and stacking outlines
// on the same patch of cell tells the viewer nothing new. The selector therefore
// walks the ranking from the top and admits a component only if its first-frame
// box stays clear of every box admitted before it.
//
// Acceptance depends on every earlier decision, so the walk is strictly
// sequential. Its order is part of the output: when two candidates collide, the
// one ranked higher wins.

use crate::core_modules::mixture::{ComponentId, MixtureSeries};
use crate::core_modules::overlap::overlaps;
use crate::core_modules::region_geometry::{BoundingBox, FrameSize, compute_boundary};
use tracing::debug;

/// Frame on which candidate regions are compared.
const SELECTION_FRAME: usize = 0;

/// Walks `ranked` in order and returns the first `k` components whose frame-0
/// boxes do not overlap any previously accepted box.
///
/// The result never holds more than `k` entries and may hold fewer when overlaps
/// exhaust the candidates. `k == 0` and an empty series both select nothing.
pub fn select_regions<I>(
    mixture: &MixtureSeries,
    frame_size: FrameSize,
    ranked: I,
    k: usize,
    std_threshold: f64,
) -> Vec<ComponentId>
where
    I: IntoIterator<Item = ComponentId>,
{
    if k == 0 || mixture.frame_count() == 0 {
        return Vec::new();
    }

    let mut accepted: Vec<(ComponentId, BoundingBox)> = Vec::with_capacity(k);
    for component in ranked {
        let candidate = compute_boundary(mixture, frame_size, SELECTION_FRAME, component, std_threshold);
        if let Some((blocker, _)) = accepted.iter().find(|(_, b)| overlaps(&candidate, b)) {
            debug!(
                component = component.index(),
                blocked_by = blocker.index(),
                "region rejected: overlaps an accepted region"
            );
            continue;
        }
        accepted.push((component, candidate));
        if accepted.len() == k {
            break;
        }
    }

    accepted.into_iter().map(|(component, _)| component).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    const FRAME: FrameSize = FrameSize {
        width: 64,
        height: 64,
    };

    /// One-frame mixture with the given `(row, col)` means and a shared variance.
    fn mixture(centres: &[(f64, f64)], variance: f64) -> MixtureSeries {
        let m = centres.len();
        let mut means = Array3::<f64>::zeros((1, m, 2));
        let mut covars = Array4::<f64>::zeros((1, m, 2, 2));
        for (j, &(row, col)) in centres.iter().enumerate() {
            means[[0, j, 0]] = row;
            means[[0, j, 1]] = col;
            covars[[0, j, 0, 0]] = variance;
            covars[[0, j, 1, 1]] = variance;
        }
        MixtureSeries::new(means, covars).unwrap()
    }

    fn ids(indices: &[usize]) -> Vec<ComponentId> {
        indices.iter().copied().map(ComponentId::new).collect()
    }

    #[test]
    fn keeps_ranked_order_of_non_overlapping_regions() {
        let mix = mixture(&[(10.0, 10.0), (40.0, 40.0), (10.0, 50.0)], 1.0);
        let picked = select_regions(&mix, FRAME, ids(&[2, 0, 1]), 3, 3.0);
        assert_eq!(picked, ids(&[2, 0, 1]));
    }

    #[test]
    fn overlapping_candidate_loses_to_the_higher_ranked_one() {
        // 0 and 1 collide; 1 is ranked first so 0 is dropped.
        let mix = mixture(&[(20.0, 20.0), (22.0, 22.0), (50.0, 50.0)], 1.0);
        let picked = select_regions(&mix, FRAME, ids(&[1, 0, 2]), 3, 3.0);
        assert_eq!(picked, ids(&[1, 2]));
    }

    #[test]
    fn stops_after_k_acceptances() {
        let mix = mixture(&[(10.0, 10.0), (40.0, 40.0), (10.0, 50.0)], 1.0);
        let picked = select_regions(&mix, FRAME, ids(&[0, 1, 2]), 2, 3.0);
        assert_eq!(picked, ids(&[0, 1]));
    }

    #[test]
    fn zero_k_selects_nothing() {
        let mix = mixture(&[(10.0, 10.0)], 1.0);
        assert!(select_regions(&mix, FRAME, ids(&[0]), 0, 3.0).is_empty());
    }

    #[test]
    fn exhausted_candidates_return_fewer_than_k() {
        let mix = mixture(&[(30.0, 30.0), (31.0, 31.0), (32.0, 32.0)], 4.0);
        let picked = select_regions(&mix, FRAME, ids(&[0, 1, 2]), 3, 3.0);
        assert_eq!(picked, ids(&[0]));
    }

    #[test]
    fn nested_region_is_rejected() {
        // 1 sits wholly inside 0; none of 0's corners touch 1.
        let mut mix_means = Array3::<f64>::zeros((1, 2, 2));
        let mut covars = Array4::<f64>::zeros((1, 2, 2, 2));
        mix_means[[0, 0, 0]] = 32.0;
        mix_means[[0, 0, 1]] = 32.0;
        mix_means[[0, 1, 0]] = 32.0;
        mix_means[[0, 1, 1]] = 32.0;
        covars[[0, 0, 0, 0]] = 25.0;
        covars[[0, 0, 1, 1]] = 25.0;
        covars[[0, 1, 0, 0]] = 1.0;
        covars[[0, 1, 1, 1]] = 1.0;
        let mix = MixtureSeries::new(mix_means, covars).unwrap();
        let picked = select_regions(&mix, FRAME, ids(&[0, 1]), 2, 3.0);
        assert_eq!(picked, ids(&[0]));
    }

    #[test]
    fn selection_is_deterministic_and_pairwise_disjoint() {
        let centres: Vec<(f64, f64)> = (0..12)
            .map(|i| ((i * 7 % 60) as f64, (i * 13 % 60) as f64))
            .collect();
        let mix = mixture(&centres, 2.0);
        let ranking = ids(&[5, 3, 11, 0, 8, 1, 9, 2, 10, 4, 7, 6]);

        let first = select_regions(&mix, FRAME, ranking.clone(), 6, 3.0);
        let second = select_regions(&mix, FRAME, ranking, 6, 3.0);
        assert_eq!(first, second);
        assert!(first.len() <= 6);

        let boxes: Vec<BoundingBox> = first
            .iter()
            .map(|&c| compute_boundary(&mix, FRAME, 0, c, 3.0))
            .collect();
        for (i, a) in boxes.iter().enumerate() {
            for b in &boxes[i + 1..] {
                assert!(!overlaps(a, b));
            }
        }
    }

    #[test]
    fn empty_series_selects_nothing() {
        let mix = MixtureSeries::new(Array3::zeros((0, 0, 2)), Array4::zeros((0, 0, 2, 2))).unwrap();
        assert!(select_regions(&mix, FRAME, Vec::new(), 3, 3.0).is_empty());
    }
}
