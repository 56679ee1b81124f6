use crate::enums::{Orientation, OutputFormat};
use crate::volume::Volume;

use nifti::NiftiHeader;
use nifti::writer::WriterOptions;
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Unknown placeholder {{{0}}} in file name template")]
    UnknownPlaceholder(String),

    #[error("Unclosed placeholder in file name template {0:?}")]
    UnclosedPlaceholder(String),

    #[error("Volume has no slices")]
    EmptyVolume,
}

/// Expand `{name}` placeholders of a file name template
pub fn render_template(template: &str, values: &[(&str, &str)]) -> Result<String, ExportError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| ExportError::UnclosedPlaceholder(template.to_string()))?;
        let key = &after[..close];
        let value = values
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
            .ok_or_else(|| ExportError::UnknownPlaceholder(key.to_string()))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Write `volume` as `<dir>/<stem>.<ext>`, creating `dir` if needed
pub fn write_volume(
    volume: &Volume,
    dir: &Path,
    stem: &str,
    format: OutputFormat,
) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}.{}", format.extension()));
    match format {
        OutputFormat::Nifti => write_nifti(volume, &path)?,
        OutputFormat::MetaImage => write_metaimage(volume, &path)?,
    }
    log::info!("Saved {} volume in {}", volume.modality, path.display());
    Ok(path)
}

/// NIfTI-1 with an sform mapping voxels to RAS millimetres. DICOM patient
/// coordinates are LPS, hence the flipped x and y rows.
pub fn write_nifti(volume: &Volume, path: &Path) -> Result<(), ExportError> {
    let (dx, dy, dz) = volume.spacing();
    let (x0, y0, z0) = volume.origin();

    let mut header = NiftiHeader::default();
    header.pixdim[1] = dx as f32;
    header.pixdim[2] = dy as f32;
    header.pixdim[3] = dz as f32;
    header.sform_code = 1;
    header.qform_code = 0;
    header.srow_x = [-dx as f32, 0.0, 0.0, -x0 as f32];
    header.srow_y = [0.0, -dy as f32, 0.0, -y0 as f32];
    header.srow_z = [0.0, 0.0, dz as f32, z0 as f32];

    // NIfTI indexes (i, j, k) = (x, y, z)
    let data = volume.data.view().reversed_axes();
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&data)?;
    Ok(())
}

/// MetaImage with inline data (`.mha`), in LPS like the DICOM input
pub fn write_metaimage(volume: &Volume, path: &Path) -> Result<(), ExportError> {
    let (nz, ny, nx) = volume.dim();
    let (dx, dy, dz) = volume.spacing();
    let (x0, y0, z0) = volume.origin();

    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "ObjectType = Image")?;
    writeln!(writer, "NDims = 3")?;
    writeln!(writer, "BinaryData = True")?;
    writeln!(writer, "BinaryDataByteOrderMSB = False")?;
    writeln!(writer, "CompressedData = False")?;
    writeln!(writer, "TransformMatrix = 1 0 0 0 1 0 0 0 1")?;
    writeln!(writer, "Offset = {x0} {y0} {z0}")?;
    writeln!(writer, "CenterOfRotation = 0 0 0")?;
    writeln!(writer, "AnatomicalOrientation = RAI")?;
    writeln!(writer, "ElementSpacing = {dx} {dy} {dz}")?;
    writeln!(writer, "DimSize = {nx} {ny} {nz}")?;
    writeln!(writer, "ElementType = MET_FLOAT")?;
    writeln!(writer, "ElementDataFile = LOCAL")?;

    // x varies fastest, which is the logical order of a (z, y, x) array
    for value in volume.data.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Save the middle axial slice as `<dir>/<stem>.png`
pub fn write_preview(volume: &Volume, dir: &Path, stem: &str) -> Result<PathBuf, ExportError> {
    let image = volume
        .get_image_from_axis(volume.dim().0 / 2, Orientation::Axial)
        .ok_or(ExportError::EmptyVolume)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}.png"));
    image.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
    use tempfile::TempDir;

    fn volume() -> Volume {
        let data = Array3::from_shape_fn((2, 3, 4), |(k, j, i)| (k * 100 + j * 10 + i) as f32);
        Volume::new(
            data,
            (
                vec![-10.0, -8.0, -6.0, -4.0],
                vec![20.0, 22.0, 24.0],
                vec![1.0, 4.0],
            ),
            "CT",
        )
    }

    #[test]
    fn template_placeholders_are_expanded() {
        let name = render_template(
            "coreg_{patient}_{modality}",
            &[("patient", "HN-001"), ("modality", "PT")],
        )
        .unwrap();
        assert_eq!(name, "coreg_HN-001_PT");
        assert_eq!(render_template("plain", &[]).unwrap(), "plain");
    }

    #[test]
    fn template_rejects_unknown_or_unclosed_placeholders() {
        assert!(matches!(
            render_template("{study}", &[("patient", "x")]),
            Err(ExportError::UnknownPlaceholder(key)) if key == "study"
        ));
        assert!(matches!(
            render_template("{patient", &[("patient", "x")]),
            Err(ExportError::UnclosedPlaceholder(_))
        ));
    }

    #[test]
    fn nifti_keeps_geometry_and_values() {
        let temp_dir = TempDir::new().unwrap();
        let volume = volume();

        let path = write_volume(&volume, temp_dir.path(), "ct", OutputFormat::Nifti).unwrap();
        assert_eq!(path, temp_dir.path().join("ct.nii"));

        let object = ReaderOptions::new().read_file(&path).unwrap();
        let header = object.header().clone();
        assert_eq!(&header.dim[..4], &[3, 4, 3, 2]);
        assert_eq!(&header.pixdim[1..4], &[2.0, 2.0, 3.0]);
        assert_eq!(header.srow_z, [0.0, 0.0, 3.0, 1.0]);

        let data = object.into_volume().into_ndarray::<f32>().unwrap();
        assert_eq!(data.shape(), &[4, 3, 2]);
        assert_eq!(data[[3, 2, 1]], volume.data[[1, 2, 3]]);
        assert_eq!(data[[1, 0, 0]], volume.data[[0, 0, 1]]);
    }

    #[test]
    fn metaimage_header_and_payload() {
        let temp_dir = TempDir::new().unwrap();
        let volume = volume();

        let path = write_volume(&volume, temp_dir.path(), "pt", OutputFormat::MetaImage).unwrap();
        let bytes = fs::read(&path).unwrap();

        let marker = b"ElementDataFile = LOCAL\n";
        let split = bytes
            .windows(marker.len())
            .position(|w| w == marker)
            .unwrap()
            + marker.len();
        let header = String::from_utf8_lossy(&bytes[..split]);
        assert!(header.contains("DimSize = 4 3 2"));
        assert!(header.contains("ElementSpacing = 2 2 3"));
        assert!(header.contains("Offset = -10 20 1"));

        let payload = &bytes[split..];
        assert_eq!(payload.len(), 24 * 4);
        let second = f32::from_le_bytes(payload[4..8].try_into().unwrap());
        assert_eq!(second, volume.data[[0, 0, 1]]);
    }

    #[test]
    fn preview_is_written_as_png() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_preview(&volume(), temp_dir.path(), "ct_preview").unwrap();
        let image = image::open(&path).unwrap();
        assert_eq!((image.width(), image.height()), (4, 3));
    }
}
