//! Stack containers and the plane-source seam.

use std::fmt;

use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resample::{self, ResampleKernel};

/// Plane dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: usize,
    pub height: usize,
}

impl ImageSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn of<T>(buffer: &Buffer2<T>) -> Self {
        Self::new(buffer.width(), buffer.height())
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Rejects a size with no pixels.
    pub fn ensure_not_empty(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::EmptyPlane(*self));
        }
        Ok(())
    }

    /// Size whose area is close to `target_pixels` with the same aspect ratio.
    pub fn scaled_to_area(&self, target_pixels: usize) -> Self {
        let scale = (target_pixels as f64 / self.pixel_count() as f64).sqrt();
        Self::new(
            ((self.width as f64 * scale).round() as usize).max(1),
            ((self.height as f64 * scale).round() as usize).max(1),
        )
    }

    /// Size after scaling both sides by `factor` and rounding.
    pub fn scaled_by(&self, factor: f64) -> Self {
        Self::new(
            (self.width as f64 * factor).round() as usize,
            (self.height as f64 * factor).round() as usize,
        )
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Supplier of equally sized floating-point planes.
///
/// Decoding of file formats lives behind this trait; the engine only sees pixels.
pub trait PlaneSource {
    /// Dimensions every plane must have.
    fn image_size(&self) -> ImageSize;

    fn plane_count(&self) -> usize;

    /// Bits per sample of the underlying data, when the source knows it.
    fn native_bit_depth(&self) -> Option<u32> {
        None
    }

    fn load_plane(&self, index: usize) -> Result<Buffer2<f64>>;
}

/// Planes already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryPlanes {
    planes: Vec<Buffer2<f64>>,
    native_bit_depth: Option<u32>,
}

impl MemoryPlanes {
    /// Wraps `planes`, rejecting an empty list or planes of differing size.
    pub fn new(planes: Vec<Buffer2<f64>>) -> Result<Self> {
        let first = planes.first().ok_or(Error::EmptyStack)?;
        let expected = ImageSize::of(first);
        expected.ensure_not_empty()?;
        for (index, plane) in planes.iter().enumerate() {
            let actual = ImageSize::of(plane);
            if actual != expected {
                return Err(Error::DimensionMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(Self {
            planes,
            native_bit_depth: None,
        })
    }

    pub fn with_native_bit_depth(mut self, bits: u32) -> Self {
        self.native_bit_depth = Some(bits);
        self
    }
}

impl PlaneSource for MemoryPlanes {
    fn image_size(&self) -> ImageSize {
        ImageSize::of(&self.planes[0])
    }

    fn plane_count(&self) -> usize {
        self.planes.len()
    }

    fn native_bit_depth(&self) -> Option<u32> {
        self.native_bit_depth
    }

    fn load_plane(&self, index: usize) -> Result<Buffer2<f64>> {
        self.planes
            .get(index)
            .cloned()
            .ok_or_else(|| Error::PlaneSource {
                index,
                message: format!("only {} planes available", self.planes.len()),
            })
    }
}

/// Plane-major stack: plane `z` occupies `data[z * area..(z + 1) * area]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStack {
    size: ImageSize,
    depth: usize,
    data: Vec<f64>,
}

impl ImageStack {
    pub fn new(size: ImageSize, data: Vec<f64>) -> Self {
        let area = size.pixel_count();
        assert!(area > 0, "stack planes must not be empty");
        assert_eq!(data.len() % area, 0, "data length must be a multiple of the plane area");
        Self {
            size,
            depth: data.len() / area,
            data,
        }
    }

    pub fn from_planes(planes: &[Buffer2<f64>]) -> Self {
        let size = ImageSize::of(&planes[0]);
        let mut data = Vec::with_capacity(size.pixel_count() * planes.len());
        for plane in planes {
            assert_eq!(ImageSize::of(plane), size, "plane size mismatch");
            data.extend_from_slice(plane.pixels());
        }
        Self::new(size, data)
    }

    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn plane(&self, z: usize) -> &[f64] {
        let area = self.size.pixel_count();
        &self.data[z * area..(z + 1) * area]
    }

    pub fn planes(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.size.pixel_count())
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Largest finite value, or 0 for a stack with no finite values.
    pub fn max_value(&self) -> f64 {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0_f64, f64::max)
    }
}

/// Working-resolution stack together with what the loader observed at full resolution.
#[derive(Debug, Clone)]
pub struct LoadedStack {
    pub stack: ImageStack,
    pub image_size: ImageSize,
    /// Per-pixel minimum over all raw planes, at full resolution.
    pub min_image: Buffer2<f64>,
    pub plane_count: usize,
}

/// Reads every plane from `source`, validates its size and shrinks it to `working_size`.
pub fn load_stack<S: PlaneSource + ?Sized>(
    source: &S,
    working_size: ImageSize,
) -> Result<LoadedStack> {
    let plane_count = source.plane_count();
    if plane_count == 0 {
        return Err(Error::EmptyStack);
    }
    let image_size = source.image_size();
    image_size.ensure_not_empty()?;
    working_size.ensure_not_empty()?;

    tracing::info!(
        "Loading {} planes of {} (native depth {:?} bits), working size {}",
        plane_count,
        image_size,
        source.native_bit_depth(),
        working_size
    );

    let mut data = Vec::with_capacity(working_size.pixel_count() * plane_count);
    let mut min_image: Option<Buffer2<f64>> = None;

    for index in 0..plane_count {
        let mut plane = source.load_plane(index)?;
        let actual = ImageSize::of(&plane);
        if actual != image_size {
            return Err(Error::DimensionMismatch {
                index,
                expected: image_size,
                actual,
            });
        }

        let replaced = replace_non_finite(&mut plane, index)?;
        if replaced > 0 {
            tracing::warn!(
                "Plane {}: replaced {} non-finite pixels with the plane mean",
                index,
                replaced
            );
        }

        match min_image.as_mut() {
            Some(min) => min
                .iter_mut()
                .zip(plane.iter())
                .for_each(|(m, &v)| *m = m.min(v)),
            None => min_image = Some(plane.clone()),
        }

        let resized = resample::resize_values(
            plane.pixels(),
            image_size,
            working_size,
            ResampleKernel::Cubic,
        );
        data.extend_from_slice(&resized);
    }

    let min_image = min_image.ok_or(Error::EmptyStack)?;
    tracing::debug!("Minimum image mean: {:.3}", min_image.mean());

    Ok(LoadedStack {
        stack: ImageStack::new(working_size, data),
        image_size,
        min_image,
        plane_count,
    })
}

/// Overwrites NaN and infinite pixels with the mean of the finite ones. Returns how many
/// pixels were replaced.
fn replace_non_finite(plane: &mut Buffer2<f64>, index: usize) -> Result<usize> {
    let (sum, finite) = plane
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
    let replaced = plane.pixels().len() - finite;
    if replaced == 0 {
        return Ok(0);
    }
    if finite == 0 {
        return Err(Error::NoFinitePixels { index });
    }

    let fill = sum / finite as f64;
    plane
        .iter_mut()
        .filter(|v| !v.is_finite())
        .for_each(|v| *v = fill);
    Ok(replaced)
}

/// Pixel-major stack whose per-pixel profiles are sorted ascending.
///
/// Pixel `p` owns `profiles[p * depth..(p + 1) * depth]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedStack {
    size: ImageSize,
    depth: usize,
    profiles: Vec<f64>,
}

impl SortedStack {
    /// Caller guarantees each profile is non-decreasing.
    pub(crate) fn from_sorted_profiles(size: ImageSize, depth: usize, profiles: Vec<f64>) -> Self {
        assert_eq!(profiles.len(), size.pixel_count() * depth);
        debug_assert!(
            profiles
                .chunks_exact(depth.max(1))
                .all(|p| p.windows(2).all(|w| w[0] <= w[1]))
        );
        Self {
            size,
            depth,
            profiles,
        }
    }

    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn profile(&self, pixel: usize) -> &[f64] {
        &self.profiles[pixel * self.depth..(pixel + 1) * self.depth]
    }

    pub fn profiles(&self) -> std::slice::ChunksExact<'_, f64> {
        self.profiles.chunks_exact(self.depth)
    }

    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.profiles
    }

    /// Smallest value in the stack, i.e. the minimum of the first slice.
    pub fn min_value(&self) -> f64 {
        self.profiles()
            .map(|p| p[0])
            .fold(f64::INFINITY, f64::min)
    }

    /// Subtracts `shifts[p]` from every value of pixel `p`. Order is preserved.
    pub(crate) fn shifted(&self, shifts: &[f64]) -> Self {
        assert_eq!(shifts.len(), self.size.pixel_count());
        let mut profiles = self.profiles.clone();
        for (profile, &shift) in profiles.chunks_exact_mut(self.depth).zip(shifts) {
            profile.iter_mut().for_each(|v| *v -= shift);
        }
        Self {
            size: self.size,
            depth: self.depth,
            profiles,
        }
    }
}
