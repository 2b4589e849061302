//! Penumbra - retrospective illumination correction for microscopy image stacks.
//!
//! Estimates a per-pixel gain surface `v` and zero-light surface `z` from a stack of
//! same-sized images of varied content, without a calibration image:
//! - Stack preprocessing (entropy, scale-space resampling, per-pixel sorting, quantile compression)
//! - Robust intensity distribution estimation
//! - Four-term energy with analytic gradients, minimized by L-BFGS with a strong Wolfe line search
//! - Correction of arbitrary planes with the fitted model
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use penumbra::{Corrector, MemoryPlanes, ModelConfig, build_model};
//!
//! let source = MemoryPlanes::new(planes)?;
//! let config = ModelConfig::default();
//! let fitted = build_model(&source, &config)?;
//!
//! let corrector = Corrector::new(&fitted.model, config.correction_mode);
//! let corrected = corrector.correct(&raw_plane)?;
//! fitted.model.save("model.yaml")?;
//! ```

mod config;
mod correction;
pub(crate) mod energy;
mod error;
pub(crate) mod math;
mod model;
pub(crate) mod optimizer;
pub(crate) mod parallel;
pub(crate) mod preprocess;
pub(crate) mod quantile;
pub mod resample;
mod stack;

#[cfg(any(test, feature = "bench"))]
pub mod testing;

#[cfg(feature = "bench")]
pub mod bench;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{CorrectionMode, ModelConfig, Parameters, ZLimitStrategy};
pub use error::{Error, Result};

// ============================================================================
// Stack input
// ============================================================================

pub use preprocess::BitDepth;
pub use stack::{ImageSize, MemoryPlanes, PlaneSource};

// ============================================================================
// Model estimation
// ============================================================================

pub use model::{
    FitDiagnostics, FittedModel, ModelDescriptor, PhaseReport, ZLimits, build_model,
};
pub use optimizer::Termination;

// ============================================================================
// Correction
// ============================================================================

pub use correction::Corrector;
