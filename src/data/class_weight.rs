use std::collections::BTreeMap;

/// Balanced class weights, `n_samples / (n_classes * count)` for every class present
pub fn balanced_class_weights(labels: &[usize]) -> BTreeMap<usize, f32> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_default() += 1;
    }
    let n_classes = counts.len() as f64;
    let n_samples = labels.len() as f64;
    counts
        .into_iter()
        .map(|(label, count)| (label, (n_samples / (n_classes * count as f64)) as f32))
        .collect()
}
