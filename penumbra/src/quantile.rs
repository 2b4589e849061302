//! Robust estimate of the stack's underlying intensity distribution.

use crate::parallel::parallel_chunked;
use crate::stack::SortedStack;

/// Pixels in the central `q_percent` window of `area` pixels, as `(start, len)`.
pub(crate) fn central_window(area: usize, q_percent: f64) -> (usize, usize) {
    let len = ((q_percent * area as f64).round() as usize).clamp(1, area.max(1));
    ((area - len) / 2, len)
}

/// Q: per depth slice, the mean over the pixels whose mean intensity lies in the central
/// `q_percent` of all pixel means.
///
/// Ranking by spatial brightness keeps saturated and dead regions out of the estimate.
pub(crate) fn estimate_q(stack: &SortedStack, q_percent: f64) -> Vec<f64> {
    let depth = stack.depth();
    let area = stack.size().pixel_count();

    let mut means = vec![0.0; area];
    parallel_chunked(&mut means, |pixel| {
        stack.profile(pixel).iter().sum::<f64>() / depth as f64
    });

    let mut order: Vec<usize> = (0..area).collect();
    order.sort_by(|&a, &b| means[a].total_cmp(&means[b]));

    let (start, len) = central_window(area, q_percent);
    let selected = &order[start..start + len];

    let mut q = vec![0.0; depth];
    for &pixel in selected {
        q.iter_mut()
            .zip(stack.profile(pixel))
            .for_each(|(acc, &v)| *acc += v);
    }
    q.iter_mut().for_each(|v| *v /= len as f64);

    tracing::debug!(
        "Q from {} of {} pixels, range [{:.3}, {:.3}]",
        len,
        area,
        q.first().copied().unwrap_or(0.0),
        q.last().copied().unwrap_or(0.0)
    );
    q
}
