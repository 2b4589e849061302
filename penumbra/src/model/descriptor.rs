use std::path::Path;

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stack::ImageSize;

/// Fitted illumination model: gain `v` and zero-light `z` at full and working resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub image_size: ImageSize,
    pub working_size: ImageSize,
    pub v: Buffer2<f64>,
    pub z: Buffer2<f64>,
    pub v_small: Buffer2<f64>,
    pub z_small: Buffer2<f64>,
}

impl ModelDescriptor {
    /// Checks every surface against its recorded size.
    pub fn validate(&self) -> Result<()> {
        let surfaces = [
            ("v", &self.v, self.image_size),
            ("z", &self.z, self.image_size),
            ("v_small", &self.v_small, self.working_size),
            ("z_small", &self.z_small, self.working_size),
        ];
        for (name, surface, expected) in surfaces {
            if !surface.is_consistent() {
                return Err(Error::InvalidModel(format!(
                    "{name} holds {} values for {}x{}",
                    surface.pixels().len(),
                    surface.width(),
                    surface.height()
                )));
            }
            let actual = ImageSize::of(surface);
            if actual != expected {
                return Err(Error::InvalidModel(format!(
                    "{name} is {actual}, expected {expected}"
                )));
            }
        }
        Ok(())
    }

    /// Mean gain over the full-resolution surface.
    pub fn mean_v(&self) -> f64 {
        self.v.mean()
    }

    /// Mean zero-light level over the full-resolution surface.
    pub fn mean_z(&self) -> f64 {
        self.z.mean()
    }

    /// Writes the descriptor as YAML or JSON, chosen by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        common::serde::save_to_file(self, path)?;
        tracing::info!("Saved {} model to {}", self.image_size, path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let model: Self = common::serde::load_from_file(path.as_ref())?;
        model.validate()?;
        Ok(model)
    }
}
