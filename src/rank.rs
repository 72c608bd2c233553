use tracing::warn;

use crate::models::{BucketCounts, GroupScore, Tier, TierCutoffs};

/// Orders scores from highest to lowest. Equal scores end up in no particular
/// order, which can move an entity across a tier boundary.
pub fn sort_descending(scores: &mut [GroupScore]) {
    scores.sort_unstable_by(|a, b| b.score.total_cmp(&a.score));
}

/// Converts the percentage cutoffs into entity counts, truncating.
pub fn bucket_counts(total: usize, cutoffs: &TierCutoffs) -> BucketCounts {
    let count = |pct: u32| total * pct as usize / 100;

    BucketCounts {
        high: count(cutoffs.high),
        mid: count(cutoffs.mid),
        low: count(cutoffs.low),
    }
}

/// Tier for the entity at `rank` (0 = best).
///
/// The ranges are `[0, high)` top, `[high, high + mid)` mid and everything
/// after that baseline, so the low bucket and any remainder share a tier.
pub fn tier_for_rank(rank: usize, buckets: &BucketCounts) -> Tier {
    if rank < buckets.high {
        Tier::Top
    } else if rank < buckets.high + buckets.mid {
        Tier::Mid
    } else {
        Tier::Baseline
    }
}

/// Sorts `scores` and assigns each entity a tier by its rank.
///
/// Non-finite scores cannot be ranked and are dropped. Returns the bucket
/// sizes used together with the ranked entities, best first.
pub fn assign_tiers(
    mut scores: Vec<GroupScore>,
    cutoffs: &TierCutoffs,
) -> (BucketCounts, Vec<(GroupScore, Tier)>) {
    scores.retain(|score| {
        let finite = score.score.is_finite();

        if !finite {
            warn!(entity = %score.entity_id, score = score.score, "dropping unrankable score");
        }

        finite
    });

    sort_descending(&mut scores);
    let buckets = bucket_counts(scores.len(), cutoffs);

    let ranked = scores
        .into_iter()
        .enumerate()
        .map(|(rank, score)| (score, tier_for_rank(rank, &buckets)))
        .collect();

    (buckets, ranked)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn scores(values: &[f64]) -> Vec<GroupScore> {
        values
            .iter()
            .map(|&score| GroupScore {
                entity_id: Uuid::new_v4(),
                score,
            })
            .collect()
    }

    fn cutoffs(high: u32, mid: u32, low: u32) -> TierCutoffs {
        TierCutoffs { high, mid, low }
    }

    #[test]
    fn ten_entities_split_two_three_five() {
        let input = scores(&[55.0, 91.0, 12.0, 78.0, 64.0, 33.0, 80.0, 47.0, 99.0, 20.0]);
        let (buckets, ranked) = assign_tiers(input, &cutoffs(20, 30, 30));

        assert_eq!(buckets, BucketCounts { high: 2, mid: 3, low: 3 });

        let count = |tier| ranked.iter().filter(|(_, t)| *t == tier).count();
        assert_eq!(count(Tier::Top), 2);
        assert_eq!(count(Tier::Mid), 3);
        assert_eq!(count(Tier::Baseline), 5);

        let top: Vec<f64> = ranked
            .iter()
            .filter(|(_, t)| *t == Tier::Top)
            .map(|(s, _)| s.score)
            .collect();
        assert_eq!(top, vec![99.0, 91.0]);
    }

    #[test]
    fn tiers_never_increase_down_the_ranking() {
        let input = scores(&[3.5, 9.0, 1.0, 7.25, 4.0, 8.0, 2.0]);
        let (_, ranked) = assign_tiers(input, &cutoffs(30, 30, 40));

        for pair in ranked.windows(2) {
            assert!(pair[0].0.score >= pair[1].0.score);
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn empty_input_assigns_nothing() {
        let (buckets, ranked) = assign_tiers(Vec::new(), &cutoffs(20, 30, 50));

        assert_eq!(buckets, BucketCounts::default());
        assert!(ranked.is_empty());
    }

    #[test]
    fn counts_truncate() {
        let buckets = bucket_counts(3, &cutoffs(40, 40, 20));
        assert_eq!(buckets, BucketCounts { high: 1, mid: 1, low: 0 });

        let buckets = bucket_counts(4, &cutoffs(20, 20, 60));
        assert_eq!(buckets, BucketCounts { high: 0, mid: 0, low: 2 });
    }

    #[test]
    fn oversized_cutoffs_clamp_to_population() {
        let input = scores(&[1.0, 2.0, 3.0]);
        let (_, ranked) = assign_tiers(input, &cutoffs(100, 100, 100));

        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|(_, tier)| *tier == Tier::Top));
    }

    #[test]
    fn non_finite_scores_are_dropped() {
        let input = scores(&[f64::NAN, 4.0, f64::INFINITY, 2.0]);
        let (_, ranked) = assign_tiers(input, &cutoffs(50, 50, 0));

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0.score, 4.0);
        assert_eq!(ranked[0].1, Tier::Top);
        assert_eq!(ranked[1].1, Tier::Mid);
    }
}
