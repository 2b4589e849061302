//! Scale-normalized Laplacian-of-Gaussian filter bank used to regularize the gain surface.
//!
//! Filtering is correlation over a mirror-padded plane (half-sample symmetric: index `-1`
//! reads `0`, index `n` reads `n - 1`). The adjoint is the full convolution of the response
//! folded back through the same mirror map.

use crate::parallel::for_each_row;
use crate::stack::ImageSize;

/// Plane side length per additional regularization octave.
const PIXELS_PER_SCALE: usize = 50;

/// Square kernel of odd side `2 * radius + 1`, row-major.
#[derive(Debug, Clone)]
pub(crate) struct LogKernel {
    pub sigma: f64,
    pub radius: usize,
    pub weights: Vec<f64>,
}

impl LogKernel {
    /// `sigma^2 * (h1 - mean(h1))` with `h1 = g * (r^2 - 2 sigma^2) / sigma^4` and `g` the
    /// unit-sum Gaussian on a `6 * ceil(sigma) + 1` grid.
    pub fn new(sigma: f64) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive");

        let radius = 3 * sigma.ceil() as usize;
        let side = 2 * radius + 1;
        let sigma_sq = sigma * sigma;

        let mut gaussian = Vec::with_capacity(side * side);
        for j in 0..side {
            for i in 0..side {
                let dx = i as f64 - radius as f64;
                let dy = j as f64 - radius as f64;
                gaussian.push((-(dx * dx + dy * dy) / (2.0 * sigma_sq)).exp());
            }
        }
        let sum: f64 = gaussian.iter().sum();

        let mut weights: Vec<f64> = gaussian
            .iter()
            .enumerate()
            .map(|(k, g)| {
                let dx = (k % side) as f64 - radius as f64;
                let dy = (k / side) as f64 - radius as f64;
                g / sum * (dx * dx + dy * dy - 2.0 * sigma_sq) / (sigma_sq * sigma_sq)
            })
            .collect();

        let mean = weights.iter().sum::<f64>() / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = sigma_sq * (*w - mean));

        Self {
            sigma,
            radius,
            weights,
        }
    }

    #[inline]
    pub fn side(&self) -> usize {
        2 * self.radius + 1
    }
}

/// Half-sample symmetric reflection of `i` into `[0, n)`.
#[inline]
pub(crate) fn mirror(i: isize, n: usize) -> usize {
    let n = n as isize;
    let m = i.rem_euclid(2 * n);
    (if m < n { m } else { 2 * n - 1 - m }) as usize
}

/// Filters at `sigma = 2^-1 .. 2^k`, `k = max(1, floor(log2(floor(max(w, h) / 50))))`.
#[derive(Debug, Clone)]
pub(crate) struct LogFilterBank {
    size: ImageSize,
    kernels: Vec<LogKernel>,
}

impl LogFilterBank {
    pub fn new(size: ImageSize) -> Self {
        let octaves = size.width.max(size.height) / PIXELS_PER_SCALE;
        let max_exponent = if octaves == 0 {
            1
        } else {
            (octaves.ilog2() as i32).max(1)
        };

        let kernels = (-1..=max_exponent)
            .map(|e| LogKernel::new(2f64.powi(e)))
            .collect();
        Self { size, kernels }
    }

    pub fn kernels(&self) -> &[LogKernel] {
        &self.kernels
    }

    #[inline]
    pub fn scale_count(&self) -> usize {
        self.kernels.len()
    }

    /// `L v` for one kernel.
    pub fn apply(&self, kernel: &LogKernel, v: &[f64]) -> Vec<f64> {
        let ImageSize { width, height } = self.size;
        assert_eq!(v.len(), width * height);

        let radius = kernel.radius;
        let side = kernel.side();
        let padded_width = width + 2 * radius;
        let padded = self.mirror_pad(v, radius);

        let mut out = vec![0.0; width * height];
        for_each_row(&mut out, width, |y, row| {
            for (x, value) in row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for j in 0..side {
                    let src = &padded[(y + j) * padded_width + x..][..side];
                    let k = &kernel.weights[j * side..(j + 1) * side];
                    acc += k.iter().zip(src).map(|(a, b)| a * b).sum::<f64>();
                }
                *value = acc;
            }
        });
        out
    }

    /// `L^T u` for one kernel.
    pub fn adjoint(&self, kernel: &LogKernel, u: &[f64]) -> Vec<f64> {
        let ImageSize { width, height } = self.size;
        assert_eq!(u.len(), width * height);

        let radius = kernel.radius;
        let side = kernel.side();
        let padded_width = width + 2 * radius;
        let padded_height = height + 2 * radius;

        // Full convolution: padded[a, b] = sum_{i,j} k[i, j] * u[a - i, b - j].
        let mut padded = vec![0.0; padded_width * padded_height];
        for_each_row(&mut padded, padded_width, |b, row| {
            let j_lo = b.saturating_sub(height - 1);
            let j_hi = b.min(side - 1);
            for (a, value) in row.iter_mut().enumerate() {
                let i_lo = a.saturating_sub(width - 1);
                let i_hi = a.min(side - 1);
                if i_lo > i_hi {
                    continue;
                }
                let mut acc = 0.0;
                for j in j_lo..=j_hi {
                    let u_row = &u[(b - j) * width..(b - j + 1) * width];
                    let k_row = &kernel.weights[j * side..(j + 1) * side];
                    for i in i_lo..=i_hi {
                        acc += k_row[i] * u_row[a - i];
                    }
                }
                *value = acc;
            }
        });

        // Fold the padding back onto the pixels it mirrors.
        let mut out = vec![0.0; width * height];
        for b in 0..padded_height {
            let y = mirror(b as isize - radius as isize, height);
            for a in 0..padded_width {
                let x = mirror(a as isize - radius as isize, width);
                out[y * width + x] += padded[b * padded_width + a];
            }
        }
        out
    }

    /// Regularization energy `sum_s |L_s v|^2 / S`; adds its gradient, scaled by `weight`,
    /// into `grad`. Returns the unweighted energy.
    pub fn energy_and_gradient(&self, v: &[f64], grad: &mut [f64], weight: f64) -> f64 {
        let scales = self.scale_count() as f64;
        let scale = weight * 2.0 / scales;
        let mut energy = 0.0;
        for kernel in &self.kernels {
            let response = self.apply(kernel, v);
            energy += response.iter().map(|r| r * r).sum::<f64>();
            let back = self.adjoint(kernel, &response);
            grad.iter_mut()
                .zip(&back)
                .for_each(|(g, &value)| *g += scale * value);
        }
        energy / scales
    }

    fn mirror_pad(&self, v: &[f64], radius: usize) -> Vec<f64> {
        let ImageSize { width, height } = self.size;
        let padded_width = width + 2 * radius;
        let padded_height = height + 2 * radius;
        let mut padded = Vec::with_capacity(padded_width * padded_height);
        for b in 0..padded_height {
            let y = mirror(b as isize - radius as isize, height);
            let row = &v[y * width..(y + 1) * width];
            padded.extend(
                (0..padded_width).map(|a| row[mirror(a as isize - radius as isize, width)]),
            );
        }
        padded
    }
}
