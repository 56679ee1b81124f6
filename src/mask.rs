//! Rasterisation of RTSTRUCT contours onto the grid of a loaded volume.

use crate::structure_set::{Point3, RoiContour};
use crate::volume::{Volume, nearest_index};

use ndarray::{Array3, ArrayViewMut2, s};

pub const MASK_MODALITY: &str = "MASK";

/// Binary mask (0.0 / 1.0) of `rois` on the grid of `volume`.
///
/// Each contour lands on the axial slice nearest to its z coordinate; its
/// vertices snap to the nearest x/y samples and the polygon interior,
/// boundary included, is filled. Contours on the same slice are merged.
pub fn generate_mask(volume: &Volume, rois: &[RoiContour]) -> Volume {
    let mut data = Array3::<f32>::zeros(volume.dim());

    for contour in rois.iter().flat_map(|roi| &roi.slices) {
        let Some(&[_, _, z]) = contour.first() else {
            continue;
        };
        let Some(k) = nearest_index(&volume.z, z) else {
            continue;
        };

        let vertices = to_index_space(volume, contour);
        fill_polygon(&mut data.slice_mut(s![k, .., ..]), &vertices);
    }

    Volume::new(
        data,
        (volume.x.clone(), volume.y.clone(), volume.z.clone()),
        MASK_MODALITY,
    )
}

/// (row, column) index of every vertex
fn to_index_space(volume: &Volume, contour: &[Point3]) -> Vec<(f64, f64)> {
    contour
        .iter()
        .filter_map(|&[x, y, _]| {
            let column = nearest_index(&volume.x, x)?;
            let row = nearest_index(&volume.y, y)?;
            Some((row as f64, column as f64))
        })
        .collect()
}

/// Set every pixel whose centre lies inside or on the polygon to 1
fn fill_polygon(slice: &mut ArrayViewMut2<'_, f32>, vertices: &[(f64, f64)]) {
    let (height, width) = slice.dim();
    if vertices.is_empty() || height == 0 || width == 0 {
        return;
    }

    let (min_r, max_r, min_c, max_c) = vertices.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
        |(r0, r1, c0, c1), &(r, c)| (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
    );
    let rows = (min_r.max(0.0) as usize)..=(max_r as usize).min(height - 1);
    let columns = (min_c.max(0.0) as usize)..=(max_c as usize).min(width - 1);

    for row in rows {
        for column in columns.clone() {
            let point = (row as f64, column as f64);
            if on_boundary(point, vertices) || contains(point, vertices) {
                slice[[row, column]] = 1.0;
            }
        }
    }
}

/// Even-odd rule
fn contains((r, c): (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (ri, ci) = vertices[i];
        let (rj, cj) = vertices[j];
        if (ri > r) != (rj > r) && c < (cj - ci) * (r - ri) / (rj - ri) + ci {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn on_boundary((r, c): (f64, f64), vertices: &[(f64, f64)]) -> bool {
    let n = vertices.len();
    (0..n).any(|i| {
        let (r0, c0) = vertices[i];
        let (r1, c1) = vertices[(i + 1) % n];
        let cross = (r1 - r0) * (c - c0) - (c1 - c0) * (r - r0);
        cross.abs() < 1e-9
            && r >= r0.min(r1)
            && r <= r0.max(r1)
            && c >= c0.min(c1)
            && c <= c0.max(c1)
    })
}
