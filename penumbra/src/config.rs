//! Model estimation configuration.
//!
//! [`ModelConfig`] is what callers fill in (or load from YAML/JSON). Optional fields left unset
//! are resolved against the loaded stack into [`Parameters`], which the pipeline consumes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::error::{Error, Result};
use crate::optimizer::LbfgsConfig;
use crate::preprocess::BitDepth;
use crate::stack::ImageSize;

/// Fraction of pixels, centred on the median brightness, averaged into Q.
pub const DEFAULT_Q_PERCENT: f64 = 0.25;
/// log10 of the zero-light term weight.
pub const DEFAULT_LAMBDA_ZERO: f64 = 0.5;
pub const DEFAULT_MAX_ITERATIONS: usize = 500;
pub const DEFAULT_TARGET_NUM_PIXELS: usize = 9400;
pub const DEFAULT_NUMBER_OF_QUANTILES: usize = 200;

/// Image count at and above which the regularization weight stops decreasing.
const LAMBDA_VREG_IMAGE_LIMIT: usize = 200;
const LAMBDA_VREG_MAX: f64 = 9.5;
const LAMBDA_VREG_STABLE: f64 = 6.0;

/// How a corrected plane is mapped back into intensity space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// `((I - z) / v) * mean(v) + mean(z)`: keeps the original zero-light level.
    #[default]
    #[strum(serialize = "zero-light preserved")]
    ZeroLightPreserved,
    /// `((I - z) / v) * mean(v)`: removes zero-light, keeps the intensity scale.
    #[strum(serialize = "dynamic range corrected")]
    DynamicRangeCorrected,
    /// `(I - z) / v`
    #[strum(serialize = "direct")]
    Direct,
}

/// Source of the physical bounds placed on the zero-light point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ZLimitStrategy {
    /// `[0, stack minimum]`.
    #[default]
    Derived,
    /// User supplied bounds.
    Fixed { min: f64, max: f64 },
    /// 0.1 and 99.9 percentiles of the per-pixel minimum over all raw planes.
    Percentile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// log10 weight of the spatial regularization. Derived from the image count when unset.
    pub lambda_vreg: Option<f64>,
    /// log10 weight of the zero-light term.
    pub lambda_zero: Option<f64>,
    pub q_percent: Option<f64>,
    pub max_iterations: Option<usize>,
    pub z_limits: ZLimitStrategy,
    /// Pixel count the planes are shrunk to before fitting.
    pub target_num_pixels: usize,
    /// Upper bound on the depth of the compressed stack.
    pub number_of_quantiles: usize,
    /// Forces the histogram range instead of estimating it from the data.
    pub bit_depth: Option<BitDepth>,
    pub max_function_evals: usize,
    pub progress_tolerance: f64,
    pub optimality_tolerance: f64,
    pub corrections: usize,
    pub correction_mode: CorrectionMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let lbfgs = LbfgsConfig::default();
        Self {
            lambda_vreg: None,
            lambda_zero: None,
            q_percent: None,
            max_iterations: None,
            z_limits: ZLimitStrategy::Derived,
            target_num_pixels: DEFAULT_TARGET_NUM_PIXELS,
            number_of_quantiles: DEFAULT_NUMBER_OF_QUANTILES,
            bit_depth: None,
            max_function_evals: lbfgs.max_function_evals,
            progress_tolerance: lbfgs.progress_tolerance,
            optimality_tolerance: lbfgs.optimality_tolerance,
            corrections: lbfgs.corrections,
            correction_mode: CorrectionMode::default(),
        }
    }
}

impl ModelConfig {
    /// Loads a YAML or JSON configuration (chosen by extension) and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = common::serde::load_from_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        common::serde::save_to_file(self, path.as_ref())?;
        Ok(())
    }

    /// Rejects contradictory settings. Runs before any plane is read.
    pub fn validate(&self) -> Result<()> {
        if let ZLimitStrategy::Fixed { min, max } = self.z_limits {
            if !min.is_finite() || !max.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "zero-light limits must be finite, got [{min}, {max}]"
                )));
            }
            if max < min {
                return Err(Error::InvalidZLimits { min, max });
            }
        }
        if let Some(q) = self.q_percent {
            if !(q > 0.0 && q <= 1.0) {
                return Err(Error::InvalidConfig(format!(
                    "q_percent must be in (0, 1], got {q}"
                )));
            }
        }
        if self.max_iterations == Some(0) {
            return Err(Error::InvalidConfig(
                "max_iterations must be positive".to_string(),
            ));
        }
        if self.max_function_evals == 0 {
            return Err(Error::InvalidConfig(
                "max_function_evals must be positive".to_string(),
            ));
        }
        if self.target_num_pixels == 0 {
            return Err(Error::InvalidConfig(
                "target_num_pixels must be positive".to_string(),
            ));
        }
        if self.number_of_quantiles == 0 {
            return Err(Error::InvalidConfig(
                "number_of_quantiles must be positive".to_string(),
            ));
        }
        if self.corrections == 0 {
            return Err(Error::InvalidConfig(
                "corrections must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_lambda_vreg(mut self, log10_weight: f64) -> Self {
        assert!(log10_weight.is_finite(), "lambda_vreg must be finite");
        self.lambda_vreg = Some(log10_weight);
        self
    }

    pub fn with_lambda_zero(mut self, log10_weight: f64) -> Self {
        assert!(log10_weight.is_finite(), "lambda_zero must be finite");
        self.lambda_zero = Some(log10_weight);
        self
    }

    pub fn with_q_percent(mut self, q_percent: f64) -> Self {
        assert!(
            q_percent > 0.0 && q_percent <= 1.0,
            "q_percent must be in (0, 1]"
        );
        self.q_percent = Some(q_percent);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        assert!(max_iterations > 0, "max_iterations must be positive");
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_max_function_evals(mut self, max_function_evals: usize) -> Self {
        assert!(max_function_evals > 0, "max_function_evals must be positive");
        self.max_function_evals = max_function_evals;
        self
    }

    pub fn with_z_limits(mut self, z_limits: ZLimitStrategy) -> Self {
        self.z_limits = z_limits;
        self
    }

    pub fn with_target_num_pixels(mut self, target_num_pixels: usize) -> Self {
        assert!(target_num_pixels > 0, "target_num_pixels must be positive");
        self.target_num_pixels = target_num_pixels;
        self
    }

    pub fn with_bit_depth(mut self, bit_depth: BitDepth) -> Self {
        self.bit_depth = Some(bit_depth);
        self
    }

    pub fn with_correction_mode(mut self, mode: CorrectionMode) -> Self {
        self.correction_mode = mode;
        self
    }

    /// Working resolution for planes of `image_size`.
    pub fn working_size(&self, image_size: ImageSize) -> ImageSize {
        image_size.scaled_to_area(self.target_num_pixels)
    }

    /// Fills every unset field with its default for a stack of `num_images` planes.
    pub fn resolve(&self, image_size: ImageSize, num_images: usize) -> Parameters {
        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        Parameters {
            lambda_vreg: self
                .lambda_vreg
                .unwrap_or_else(|| lambda_vreg_for_image_count(num_images)),
            lambda_zero: self.lambda_zero.unwrap_or(DEFAULT_LAMBDA_ZERO),
            q_percent: self.q_percent.unwrap_or(DEFAULT_Q_PERCENT),
            image_size,
            working_size: self.working_size(image_size),
            number_of_quantiles: self.number_of_quantiles,
            num_images,
            bit_depth: self.bit_depth,
            z_limits: self.z_limits,
            optimizer: LbfgsConfig {
                max_iterations,
                max_function_evals: self.max_function_evals,
                progress_tolerance: self.progress_tolerance,
                optimality_tolerance: self.optimality_tolerance,
                corrections: self.corrections,
                ..LbfgsConfig::default()
            },
        }
    }
}

/// log10 regularization weight: falls linearly from 9.5 with no images to 6 at 200 images.
pub fn lambda_vreg_for_image_count(num_images: usize) -> f64 {
    if num_images < LAMBDA_VREG_IMAGE_LIMIT {
        LAMBDA_VREG_MAX
            + (LAMBDA_VREG_STABLE - LAMBDA_VREG_MAX) / LAMBDA_VREG_IMAGE_LIMIT as f64
                * num_images as f64
    } else {
        LAMBDA_VREG_STABLE
    }
}

/// Fully resolved settings for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// log10 weight.
    pub lambda_vreg: f64,
    /// log10 weight.
    pub lambda_zero: f64,
    pub q_percent: f64,
    pub image_size: ImageSize,
    pub working_size: ImageSize,
    pub number_of_quantiles: usize,
    /// Planes provided by the source, before any scale-space expansion.
    pub num_images: usize,
    pub bit_depth: Option<BitDepth>,
    pub z_limits: ZLimitStrategy,
    pub optimizer: LbfgsConfig,
}

impl Parameters {
    #[inline]
    pub fn lambda_vreg_weight(&self) -> f64 {
        10f64.powf(self.lambda_vreg)
    }

    #[inline]
    pub fn lambda_zero_weight(&self) -> f64 {
        10f64.powf(self.lambda_zero)
    }
}
