use std::ops::Range;

use rand::seq::SliceRandom;
use rand::Rng;

/// Shuffle `0..rows` and cut it into full batches; the trailing partial batch is dropped.
pub fn shuffled_batches<R: Rng + ?Sized>(rows: usize, batch_size: usize, rng: &mut R) -> Vec<Vec<i64>> {
    let mut indices: Vec<i64> = (0..rows as i64).collect();
    indices.shuffle(rng);
    indices
        .chunks_exact(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// In-order full batches over `0..rows`; the trailing partial batch is dropped.
pub fn sequential_batches(rows: usize, batch_size: usize) -> Vec<Vec<i64>> {
    (0..rows / batch_size)
        .map(|b| {
            let begin = (b * batch_size) as i64;
            (begin..begin + batch_size as i64).collect()
        })
        .collect()
}

/// In-order batches covering every row; the last one shrinks to fit the remainder.
pub fn inference_batches(rows: usize, batch_size: usize) -> Vec<Range<usize>> {
    (0..rows)
        .step_by(batch_size)
        .map(|begin| begin..(begin + batch_size).min(rows))
        .collect()
}
