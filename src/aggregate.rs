use std::collections::BTreeMap;

/// Averages raw scores per entity.
///
/// An entity only appears in the output if at least one score was given for
/// it, so a group nobody scored never yields a `NaN` average.
pub fn average_per_entity<K, I>(scores: I) -> BTreeMap<K, f64>
where
    K: Ord,
    I: IntoIterator<Item = (K, i32)>,
{
    let mut totals: BTreeMap<K, (i64, usize)> = BTreeMap::new();

    for (entity, score) in scores {
        let entry = totals.entry(entity).or_insert((0, 0));
        entry.0 += i64::from(score);
        entry.1 += 1;
    }

    totals
        .into_iter()
        .map(|(entity, (total, count))| (entity, total as f64 / count as f64))
        .collect()
}

/// Blends `(value, weight_percent)` parts into `sum(value * weight) / 100`.
///
/// Weights are not required to add up to 100.
pub fn weighted_composite(parts: &[(f64, f64)]) -> f64 {
    parts.iter().map(|(value, weight)| value * weight).sum::<f64>() / 100.0
}
