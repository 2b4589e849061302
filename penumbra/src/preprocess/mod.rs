//! Stack preprocessing.
//!
//! Runs once per stack, in order:
//! 1. bit depth inference (histogram range)
//! 2. entropy measurement and scale-space blending when too few planes carry the information
//! 3. per-pixel sort across depth and compression to at most `number_of_quantiles` slices

mod entropy;
mod scale_space;


use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::config::Parameters;
use crate::stack::{ImageStack, SortedStack};

pub(crate) use entropy::stack_entropy;
pub(crate) use scale_space::{blend_strength, octave_count, required_image_count, scale_space_blend};

/// Intensity range assumed for the entropy histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    #[strum(serialize = "8-bit")]
    Eight,
    #[strum(serialize = "12-bit")]
    Twelve,
    #[strum(serialize = "16-bit")]
    Sixteen,
}

impl BitDepth {
    /// Number of histogram bins, `2^bits`.
    #[inline]
    pub fn levels(self) -> usize {
        1 << self.bits()
    }

    #[inline]
    pub fn bits(self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Twelve => 12,
            BitDepth::Sixteen => 16,
        }
    }

    /// Smallest bracket that holds `max_intensity`.
    pub fn from_max_intensity(max_intensity: f64) -> Self {
        if max_intensity > 4096.0 {
            BitDepth::Sixteen
        } else if max_intensity > 256.0 {
            BitDepth::Twelve
        } else {
            BitDepth::Eight
        }
    }
}

/// What preprocessing observed and decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessReport {
    pub bit_depth: BitDepth,
    pub entropy: f64,
    /// Planes needed for the observed entropy without spatial help.
    pub required_images: f64,
    /// Scale-space blend strength in `[0, 1]`.
    pub alpha: f64,
    /// Octaves whose planes make up the stack; 1 means no blending.
    pub octaves_blended: usize,
    /// Depth after blending, before compression.
    pub expanded_depth: usize,
    pub depth: usize,
}

/// Turns a working-resolution stack into the sorted, compressed stack the fit consumes.
pub(crate) fn preprocess(stack: ImageStack, params: &Parameters) -> (SortedStack, PreprocessReport) {
    let max_intensity = stack.max_value();
    let bit_depth = params
        .bit_depth
        .unwrap_or_else(|| BitDepth::from_max_intensity(max_intensity));
    tracing::info!(
        "Histogram range {} ({} levels), max intensity {:.1}",
        bit_depth,
        bit_depth.levels(),
        max_intensity
    );

    let entropy = stack_entropy(stack.values(), bit_depth);
    let required_images = required_image_count(entropy);
    let alpha = blend_strength(params.num_images, required_images);
    tracing::info!(
        "Stack entropy {:.4}, {} images provided, {:.0} required, blend strength {:.3}",
        entropy,
        params.num_images,
        required_images,
        alpha
    );

    let (stack, octaves_blended) = scale_space_blend(stack, alpha);
    let expanded_depth = stack.depth();

    let sorted = sort_profiles(&stack);
    let compressed = compress_quantiles(&sorted, params.number_of_quantiles);
    tracing::info!(
        "Sorted stack depth {} compressed to {}",
        expanded_depth,
        compressed.depth()
    );

    let report = PreprocessReport {
        bit_depth,
        entropy,
        required_images,
        alpha,
        octaves_blended,
        expanded_depth,
        depth: compressed.depth(),
    };
    (compressed, report)
}

/// Gathers each pixel's values across depth and sorts them ascending.
pub(crate) fn sort_profiles(stack: &ImageStack) -> SortedStack {
    let size = stack.size();
    let depth = stack.depth();
    let area = size.pixel_count();
    let values = stack.values();

    let mut profiles = vec![0.0; area * depth];
    profiles
        .par_chunks_mut(depth)
        .enumerate()
        .for_each(|(pixel, profile)| {
            for (z, value) in profile.iter_mut().enumerate() {
                *value = values[z * area + pixel];
            }
            profile.sort_unstable_by(f64::total_cmp);
        });

    SortedStack::from_sorted_profiles(size, depth, profiles)
}

/// Replaces contiguous rank ranges by their mean so the depth is at most `quantiles`.
///
/// Range `i` covers ranks `round(Z*i/nq)..round(Z*(i+1)/nq)`. Each mean is clamped into its range
/// so rounding cannot break the ordering.
pub(crate) fn compress_quantiles(stack: &SortedStack, quantiles: usize) -> SortedStack {
    let depth = stack.depth();
    if depth <= quantiles {
        return stack.clone();
    }

    let bounds: Vec<usize> = (0..=quantiles)
        .map(|i| (depth as f64 * i as f64 / quantiles as f64).round() as usize)
        .collect();

    let size = stack.size();
    let mut profiles = vec![0.0; size.pixel_count() * quantiles];
    profiles
        .par_chunks_mut(quantiles)
        .zip(stack.values().par_chunks(depth))
        .for_each(|(out, profile)| {
            for (i, value) in out.iter_mut().enumerate() {
                let range = &profile[bounds[i]..bounds[i + 1]];
                let mean = range.iter().sum::<f64>() / range.len() as f64;
                *value = mean.clamp(range[0], range[range.len() - 1]);
            }
        });

    SortedStack::from_sorted_profiles(size, quantiles, profiles)
}
