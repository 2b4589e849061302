//! Applies a fitted model to individual planes.

use common::Buffer2;

use crate::config::CorrectionMode;
use crate::error::{Error, Result};
use crate::model::ModelDescriptor;
use crate::parallel::for_each_row;
use crate::stack::ImageSize;

/// Corrects planes against one model. Surface means are computed once.
#[derive(Debug, Clone)]
pub struct Corrector<'a> {
    model: &'a ModelDescriptor,
    mode: CorrectionMode,
    mean_v: f64,
    mean_z: f64,
}

impl<'a> Corrector<'a> {
    pub fn new(model: &'a ModelDescriptor, mode: CorrectionMode) -> Self {
        let mean_v = model.mean_v();
        let mean_z = model.mean_z();
        tracing::debug!(
            "Corrector ({}): mean v {:.4}, mean z {:.3}",
            mode,
            mean_v,
            mean_z
        );
        Self {
            model,
            mode,
            mean_v,
            mean_z,
        }
    }

    #[inline]
    pub fn mode(&self) -> CorrectionMode {
        self.mode
    }

    #[inline]
    pub fn mean_v(&self) -> f64 {
        self.mean_v
    }

    #[inline]
    pub fn mean_z(&self) -> f64 {
        self.mean_z
    }

    /// Corrected copy of `plane`, which must match the model's image size.
    ///
    /// A zero gain yields a non-finite pixel.
    pub fn correct(&self, plane: &Buffer2<f64>) -> Result<Buffer2<f64>> {
        let expected = self.model.image_size;
        let actual = ImageSize::of(plane);
        if actual != expected {
            return Err(Error::PlaneSizeMismatch { expected, actual });
        }

        let (scale, offset) = match self.mode {
            CorrectionMode::ZeroLightPreserved => (self.mean_v, self.mean_z),
            CorrectionMode::DynamicRangeCorrected => (self.mean_v, 0.0),
            CorrectionMode::Direct => (1.0, 0.0),
        };

        let width = expected.width;
        let v = self.model.v.pixels();
        let z = self.model.z.pixels();
        let mut output = plane.clone().into_vec();
        for_each_row(&mut output, width, |y, row| {
            let start = y * width;
            let gains = &v[start..start + width];
            let zeros = &z[start..start + width];
            for ((value, &gain), &zero) in row.iter_mut().zip(gains).zip(zeros) {
                *value = (*value - zero) / gain * scale + offset;
            }
        });

        Ok(Buffer2::new(expected.width, expected.height, output))
    }
}
