use crate::enums::Orientation;
use crate::structure_set::BoundingBox;

use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// Intensity volume sampled on a regular grid in patient coordinates.
///
/// `data` is indexed (z, y, x); `x`, `y` and `z` hold the physical position
/// (mm) of every sample along each axis, `z` in ascending order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub modality: String,
}

impl Volume {
    pub fn new(
        data: Array3<f32>,
        (x, y, z): (Vec<f64>, Vec<f64>, Vec<f64>),
        modality: impl Into<String>,
    ) -> Self {
        debug_assert_eq!(data.dim(), (z.len(), y.len(), x.len()));
        Self {
            data,
            x,
            y,
            z,
            modality: modality.into(),
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Sample spacing (dx, dy, dz), 1.0 along axes with a single sample
    pub fn spacing(&self) -> (f64, f64, f64) {
        (
            axis_spacing(&self.x).unwrap_or(1.0),
            axis_spacing(&self.y).unwrap_or(1.0),
            axis_spacing(&self.z).unwrap_or(1.0),
        )
    }

    /// Physical position of the first voxel (x, y, z)
    pub fn origin(&self) -> (f64, f64, f64) {
        let first = |axis: &[f64]| axis.first().copied().unwrap_or(0.0);
        (first(&self.x), first(&self.y), first(&self.z))
    }

    /// Sub-volume covering `bbox` padded by `margin` mm on every side.
    ///
    /// Physical extrema are turned into indices with floor on the low side
    /// and ceil on the high side, so the ROI is never clipped; indices are
    /// clamped to the volume. Returns `None` if the box misses the volume.
    pub fn crop_to_box(&self, bbox: &BoundingBox, margin: f64) -> Option<Volume> {
        let padded = bbox.padded(margin);
        let (x0, x1) = index_range(&self.x, padded.min_x, padded.max_x)?;
        let (y0, y1) = index_range(&self.y, padded.min_y, padded.max_y)?;
        let (z0, z1) = index_range(&self.z, padded.min_z, padded.max_z)?;

        Some(Volume {
            data: self.data.slice(s![z0..=z1, y0..=y1, x0..=x1]).to_owned(),
            x: self.x[x0..=x1].to_vec(),
            y: self.y[y0..=y1].to_vec(),
            z: self.z[z0..=z1].to_vec(),
            modality: self.modality.clone(),
        })
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Render a slice as 8 bit grayscale, windowed to the slice's own range
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        Self::slice_to_image(&slice)
    }

    fn slice_to_image(slice: &ArrayView2<'_, f32>) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (height, width) = slice.dim();
        let (min, max) = slice
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = if max > min { max - min } else { 1.0 };

        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| Self::normalize_to_u8(v, min, range))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    #[inline]
    fn normalize_to_u8(value: f32, min: f32, range: f32) -> u8 {
        ((value - min) / range * 255.0).clamp(0.0, 255.0) as u8
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}

pub(crate) fn axis_spacing(axis: &[f64]) -> Option<f64> {
    match axis {
        [first, second, ..] if second != first => Some(second - first),
        _ => None,
    }
}

/// Index of the sample nearest to `value`
pub(crate) fn nearest_index(axis: &[f64], value: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
        .map(|(i, _)| i)
}

/// Inclusive index range of `axis` covering [min, max], clamped to the axis
fn index_range(axis: &[f64], min: f64, max: f64) -> Option<(usize, usize)> {
    let last = axis.len().checked_sub(1)?;
    let Some(step) = axis_spacing(axis) else {
        let inside = min <= axis[0] && axis[0] <= max;
        return inside.then_some((0, 0));
    };

    let a = (min - axis[0]) / step;
    let b = (max - axis[0]) / step;
    // a negative step swaps which end is low
    let (lo, hi) = if step > 0.0 { (a, b) } else { (b, a) };
    let start = lo.floor();
    let stop = hi.ceil();

    if stop < 0.0 || start > last as f64 {
        return None;
    }
    Some((start.max(0.0) as usize, (stop as usize).min(last)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(origin: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| origin + step * i as f64).collect()
    }

    fn ramp(nz: usize, ny: usize, nx: usize) -> Volume {
        let data = Array3::from_shape_fn((nz, ny, nx), |(k, j, i)| (k * 100 + j * 10 + i) as f32);
        Volume::new(
            data,
            (axis(-10.0, 2.0, nx), axis(0.0, 1.0, ny), axis(5.0, 3.0, nz)),
            "CT",
        )
    }

    #[test]
    fn spacing_and_origin_follow_axes() {
        let volume = ramp(4, 3, 5);
        assert_eq!(volume.spacing(), (2.0, 1.0, 3.0));
        assert_eq!(volume.origin(), (-10.0, 0.0, 5.0));
    }

    #[test]
    fn crop_rounds_outward() {
        let volume = ramp(6, 10, 10);
        let bbox = BoundingBox {
            max_x: -4.5,
            min_x: -7.0,
            max_y: 4.2,
            min_y: 2.5,
            max_z: 11.0,
            min_z: 8.0,
        };

        let cropped = volume.crop_to_box(&bbox, 0.0).unwrap();

        // x: floor(1.5)=1 .. ceil(2.75)=3, y: 2 .. 5, z: 1 .. 2
        assert_eq!(cropped.x, vec![-8.0, -6.0, -4.0]);
        assert_eq!(cropped.y, vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(cropped.z, vec![8.0, 11.0]);
        assert_eq!(cropped.dim(), (2, 4, 3));
        assert_eq!(cropped.data[[0, 0, 0]], volume.data[[1, 2, 1]]);
    }

    #[test]
    fn crop_margin_is_clamped_to_volume() {
        let volume = ramp(3, 4, 4);
        let mut bbox = BoundingBox::default();
        bbox.include([-8.0, 1.0, 8.0]);

        let cropped = volume.crop_to_box(&bbox, 100.0).unwrap();
        assert_eq!(cropped.dim(), volume.dim());
    }

    #[test]
    fn crop_outside_volume_is_none() {
        let volume = ramp(3, 4, 4);
        let mut bbox = BoundingBox::default();
        bbox.include([500.0, 500.0, 500.0]);

        assert!(volume.crop_to_box(&bbox, 1.0).is_none());
    }

    #[test]
    fn nearest_index_picks_closest_sample() {
        let z = axis(0.0, 2.5, 5);
        assert_eq!(nearest_index(&z, 4.0), Some(2));
        assert_eq!(nearest_index(&z, -100.0), Some(0));
        assert_eq!(nearest_index(&[], 1.0), None);
    }

    #[test]
    fn slices_are_bounds_checked() {
        let volume = ramp(2, 3, 4);
        assert_eq!(
            volume
                .get_slice_from_axis(2, &Orientation::Sagittal)
                .unwrap()
                .dim(),
            (2, 3)
        );
        assert!(volume.get_slice_from_axis(2, &Orientation::Axial).is_none());
        assert!(volume.get_image_from_axis(3, Orientation::Coronal).is_none());
    }

    #[test]
    fn preview_spans_full_gray_range() {
        let volume = ramp(2, 3, 4);
        let image = volume.get_image_from_axis(1, Orientation::Axial).unwrap();

        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(3, 2).0[0], 255);
    }
}
