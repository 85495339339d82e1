use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Two disjoint partitions of one labelled set
#[derive(Debug, Clone)]
pub struct Split {
    pub x_train: Array2<f32>,
    pub y_train: Vec<usize>,
    pub x_test: Array2<f32>,
    pub y_test: Vec<usize>,
}

/// Holds out exactly `test_size` rows chosen by a seeded shuffle
pub fn train_test_split(x: &Array2<f32>, y: &[usize], test_size: usize, seed: u64) -> Result<Split> {
    let n = x.nrows();
    if y.len() != n {
        return Err(Error::Shape(format!("{n} rows but {} labels", y.len())));
    }
    if test_size == 0 || test_size >= n {
        return Err(Error::InvalidSplit(format!(
            "cannot hold out {test_size} of {n} rows"
        )));
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = permutation.split_at(test_size);

    Ok(Split {
        x_train: x.select(Axis(0), train_idx),
        y_train: train_idx.iter().map(|&i| y[i]).collect(),
        x_test: x.select(Axis(0), test_idx),
        y_test: test_idx.iter().map(|&i| y[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_split_sizes_and_disjointness() {
        let x = Array2::from_shape_fn((10, 2), |(r, _)| r as f32);
        let y: Vec<usize> = (0..10).collect();
        let split = train_test_split(&x, &y, 3, 42).unwrap();
        assert_eq!(split.x_test.nrows(), 3);
        assert_eq!(split.x_train.nrows(), 7);

        let train: BTreeSet<usize> = split.y_train.iter().copied().collect();
        let test: BTreeSet<usize> = split.y_test.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), 10);
        // rows stay aligned with their labels
        for (row, label) in split.x_train.axis_iter(Axis(0)).zip(&split.y_train) {
            assert_eq!(row[0] as usize, *label);
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let x = Array2::from_shape_fn((20, 1), |(r, _)| r as f32);
        let y: Vec<usize> = (0..20).collect();
        let a = train_test_split(&x, &y, 5, 7).unwrap();
        let b = train_test_split(&x, &y, 5, 7).unwrap();
        assert_eq!(a.y_test, b.y_test);
    }

    #[test]
    fn test_rejects_oversized_holdout() {
        let x = Array2::zeros((5, 1));
        let y = vec![0; 5];
        assert!(matches!(train_test_split(&x, &y, 5, 0), Err(Error::InvalidSplit(_))));
    }
}
