/// Width of the ramp inside each limit.
pub(crate) const BARRIER_RATE: f64 = 0.001;

/// Weight of the barrier in the full energy.
pub(crate) const BARRIER_WEIGHT: f64 = 1e6;

/// Quadratic wall keeping `x` inside `[min + rate, max - rate]`.
///
/// Returns `(energy, derivative)`. The energy is zero inside the interval and grows as
/// `((x - edge) / rate)^2` beyond either edge.
pub(crate) fn barrier(x: f64, min: f64, max: f64, rate: f64) -> (f64, f64) {
    let low = min + rate;
    let high = max - rate;
    let rate_sq = rate * rate;

    if x <= low {
        let d = x - low;
        (d * d / rate_sq, 2.0 * d / rate_sq)
    } else if x < high {
        (0.0, 0.0)
    } else {
        let d = x - high;
        (d * d / rate_sq, 2.0 * d / rate_sq)
    }
}
