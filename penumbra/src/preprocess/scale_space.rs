//! Scale-space blending of sparse stacks.
//!
//! A stack with few planes relative to its entropy does not sample each pixel's intensity
//! distribution densely enough. Halved copies of the stack (octaves), upsampled back to the
//! working size, lend each pixel its neighbourhood's samples.

use rayon::prelude::*;

use crate::resample::{self, ResampleKernel};
use crate::stack::{ImageSize, ImageStack};

/// `N_required = a * exp(b * H) + c`.
const REQUIRED_IMAGES_A: f64 = 7.838e6;
const REQUIRED_IMAGES_B: f64 = -1.948;
const REQUIRED_IMAGES_C: f64 = 20.0;

/// Planes needed to sample a stack of the given entropy without spatial help.
pub(crate) fn required_image_count(entropy: f64) -> f64 {
    REQUIRED_IMAGES_A * (REQUIRED_IMAGES_B * entropy).exp() + REQUIRED_IMAGES_C
}

/// Blend strength: 1 with no images, falling linearly to 0 at `required` images.
pub(crate) fn blend_strength(num_images: usize, required: f64) -> f64 {
    if (num_images as f64) < required {
        (1.0 - num_images as f64 / required).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Number of octaves, the working size included, produced by halving until a side reaches 1.
pub(crate) fn octave_count(size: ImageSize) -> usize {
    let mut size = size;
    let mut count = 1;
    while size.width > 1 && size.height > 1 {
        size = size.scaled_by(0.5);
        count += 1;
    }
    count
}

/// Replaces `stack` by its first `ceil(alpha * octaves)` octaves, each upsampled to the
/// working size and concatenated along depth. Returns the stack and the octaves used.
pub(crate) fn scale_space_blend(stack: ImageStack, alpha: f64) -> (ImageStack, usize) {
    let size = stack.size();
    let octaves = octave_count(size);
    let max_octave = ((alpha.clamp(0.0, 1.0) * octaves as f64).ceil() as usize).max(1);

    if max_octave <= 1 {
        tracing::info!("Scale-space resampling not applied (alpha = {:.3})", alpha);
        return (stack, 1);
    }

    tracing::info!(
        "Applying scale-space resampling over {} of {} octaves",
        max_octave,
        octaves
    );

    let depth = stack.depth();
    let mut data = Vec::with_capacity(size.pixel_count() * depth * max_octave);
    data.extend_from_slice(stack.values());

    let mut level_size = size;
    let mut level: Vec<Vec<f64>> = stack.planes().map(<[f64]>::to_vec).collect();
    for octave in 1..max_octave {
        let halved: Vec<(ImageSize, Vec<f64>)> = level
            .par_iter()
            .map(|plane| {
                resample::resize_values_by_factor(plane, level_size, 0.5, ResampleKernel::Cubic)
            })
            .collect();
        level_size = halved.first().map_or(level_size, |(s, _)| *s);
        level = halved.into_iter().map(|(_, values)| values).collect();
        tracing::debug!("Octave 1/{} size {}", 1 << octave, level_size);

        let upsampled: Vec<Vec<f64>> = level
            .par_iter()
            .map(|plane| resample::resize_values(plane, level_size, size, ResampleKernel::Cubic))
            .collect();
        upsampled.iter().for_each(|plane| data.extend_from_slice(plane));
    }

    (ImageStack::new(size, data), max_octave)
}
