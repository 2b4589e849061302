use super::BitDepth;

/// Shannon entropy (bits) of the integer histogram of `values` over `[0, levels)`.
///
/// Values are binned at `round(v)`. Non-finite and out-of-range values are skipped.
pub(crate) fn stack_entropy(values: &[f64], bit_depth: BitDepth) -> f64 {
    let levels = bit_depth.levels();
    let mut histogram = vec![0u64; levels];
    let mut skipped = 0usize;

    for &value in values {
        let bin = value.round();
        if value.is_finite() && bin >= 0.0 && bin < levels as f64 {
            histogram[bin as usize] += 1;
            continue;
        }
        if skipped == 0 {
            tracing::warn!(
                "Value {} outside the {} histogram range, skipping",
                value,
                bit_depth
            );
        }
        skipped += 1;
    }

    if skipped > 0 {
        tracing::debug!("Skipped {} of {} values in entropy histogram", skipped, values.len());
    }

    histogram_entropy(&histogram)
}

fn histogram_entropy(histogram: &[u64]) -> f64 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}
