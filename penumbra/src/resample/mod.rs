//! Separable image resampling with clamped edges.
//!
//! Each axis gets its own table of source indices and normalized weights; the 2D resize is a
//! horizontal pass followed by a vertical pass. Downsampling with the cubic kernel widens the
//! kernel by `1 / scale` so it low-pass filters instead of aliasing.

use common::Buffer2;

use crate::parallel::for_each_row;
use crate::stack::ImageSize;

#[cfg(feature = "bench")]
pub mod bench;

/// Interpolation kernel used by [`resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleKernel {
    /// Catmull-Rom family cubic, support radius 2. Antialiased when shrinking.
    #[default]
    Cubic,
    /// Triangle kernel, support radius 1. Never widened.
    Bilinear,
}

impl ResampleKernel {
    #[inline]
    fn width(self) -> f64 {
        match self {
            Self::Cubic => 4.0,
            Self::Bilinear => 2.0,
        }
    }

    #[inline]
    fn value(self, x: f64) -> f64 {
        match self {
            Self::Cubic => cubic_kernel(x),
            Self::Bilinear => triangle_kernel(x),
        }
    }

    #[inline]
    fn antialias(self) -> bool {
        matches!(self, Self::Cubic)
    }
}

/// Cubic convolution kernel with a = -0.5.
#[inline]
pub fn cubic_kernel(x: f64) -> f64 {
    let ax = x.abs();
    let ax2 = ax * ax;
    let ax3 = ax2 * ax;
    if ax <= 1.0 {
        1.5 * ax3 - 2.5 * ax2 + 1.0
    } else if ax <= 2.0 {
        -0.5 * ax3 + 2.5 * ax2 - 4.0 * ax + 2.0
    } else {
        0.0
    }
}

#[inline]
pub fn triangle_kernel(x: f64) -> f64 {
    (1.0 - x.abs()).max(0.0)
}

/// Per-axis contribution table: output sample `j` reads
/// `indices[j * taps + p]` with weight `weights[j * taps + p]`.
#[derive(Debug, Clone)]
struct AxisWeights {
    taps: usize,
    indices: Vec<usize>,
    weights: Vec<f64>,
}

impl AxisWeights {
    fn new(src_len: usize, dst_len: usize, scale: f64, kernel: ResampleKernel) -> Self {
        assert!(src_len > 0, "source axis must not be empty");

        let (kernel_width, kernel_scale) = if scale < 1.0 && kernel.antialias() {
            (kernel.width() / scale, scale)
        } else {
            (kernel.width(), 1.0)
        };
        let taps = kernel_width.ceil() as usize + 2;
        let last = (src_len - 1) as f64;

        let mut indices = Vec::with_capacity(dst_len * taps);
        let mut weights = Vec::with_capacity(dst_len * taps);

        for j in 0..dst_len {
            // 1-based output coordinate mapped into 1-based input space
            let u = (j + 1) as f64 / scale + 0.5 * (1.0 - 1.0 / scale);
            let left = (u - kernel_width / 2.0).floor();

            let start = weights.len();
            for p in 0..taps {
                let idx = left + p as f64;
                weights.push(kernel_scale * kernel.value(kernel_scale * (u - idx)));
                indices.push((idx - 1.0).clamp(0.0, last) as usize);
            }

            let sum: f64 = weights[start..].iter().sum();
            if sum != 0.0 {
                weights[start..].iter_mut().for_each(|w| *w /= sum);
            }
        }

        Self {
            taps,
            indices,
            weights,
        }
    }

    #[inline]
    fn sample(&self, j: usize) -> (&[usize], &[f64]) {
        let range = j * self.taps..(j + 1) * self.taps;
        (&self.indices[range.clone()], &self.weights[range])
    }
}

fn resize_separable(
    src: &[f64],
    from: ImageSize,
    to: ImageSize,
    scale_x: f64,
    scale_y: f64,
    kernel: ResampleKernel,
) -> Vec<f64> {
    assert_eq!(src.len(), from.pixel_count(), "source length mismatch");
    if to.pixel_count() == 0 {
        return Vec::new();
    }

    let cols = AxisWeights::new(from.width, to.width, scale_x, kernel);
    let rows = AxisWeights::new(from.height, to.height, scale_y, kernel);

    // horizontal pass: to.width x from.height
    let mut horizontal = vec![0.0; to.width * from.height];
    for_each_row(&mut horizontal, to.width, |y, out| {
        let src_row = &src[y * from.width..(y + 1) * from.width];
        for (x, value) in out.iter_mut().enumerate() {
            let (idx, w) = cols.sample(x);
            *value = idx.iter().zip(w).map(|(&i, &w)| w * src_row[i]).sum();
        }
    });

    // vertical pass: to.width x to.height
    let mut output = vec![0.0; to.pixel_count()];
    for_each_row(&mut output, to.width, |y, out| {
        let (idx, w) = rows.sample(y);
        for (&i, &w) in idx.iter().zip(w) {
            let src_row = &horizontal[i * to.width..(i + 1) * to.width];
            for (o, &s) in out.iter_mut().zip(src_row) {
                *o += w * s;
            }
        }
    });

    output
}

/// Resizes a row-major plane of `from` dimensions to `to` dimensions.
pub(crate) fn resize_values(
    src: &[f64],
    from: ImageSize,
    to: ImageSize,
    kernel: ResampleKernel,
) -> Vec<f64> {
    let scale_x = to.width as f64 / from.width as f64;
    let scale_y = to.height as f64 / from.height as f64;
    resize_separable(src, from, to, scale_x, scale_y, kernel)
}

/// Resizes a row-major plane by `factor`; output sides are `round(side * factor)`.
pub(crate) fn resize_values_by_factor(
    src: &[f64],
    from: ImageSize,
    factor: f64,
    kernel: ResampleKernel,
) -> (ImageSize, Vec<f64>) {
    let to = from.scaled_by(factor);
    let values = resize_separable(src, from, to, factor, factor, kernel);
    (to, values)
}

/// Resizes `src` to `width x height`.
pub fn resize(src: &Buffer2<f64>, width: usize, height: usize, kernel: ResampleKernel) -> Buffer2<f64> {
    let to = ImageSize::new(width, height);
    let values = resize_values(src.pixels(), ImageSize::of(src), to, kernel);
    Buffer2::new(width, height, values)
}

/// Resizes `src` by a uniform scale factor.
pub fn resize_by_factor(src: &Buffer2<f64>, factor: f64, kernel: ResampleKernel) -> Buffer2<f64> {
    let (to, values) = resize_values_by_factor(src.pixels(), ImageSize::of(src), factor, kernel);
    Buffer2::new(to.width, to.height, values)
}
