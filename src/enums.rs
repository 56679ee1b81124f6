use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Ascending z component of ImagePositionPatient
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Nifti,
    MetaImage,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Nifti => "nii",
            OutputFormat::MetaImage => "mha",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// One CT, one PT and one RTSTRUCT per patient, picked by the selector
    #[default]
    PetCt,
    /// Largest image series is fixed, every other image series is moving
    AllSeries,
}

impl BatchMode {
    /// File name template used when the configuration sets none. Every
    /// series of a patient shares its modality in `AllSeries`, so that mode
    /// names outputs after the series directory.
    pub fn default_template(self) -> &'static str {
        match self {
            BatchMode::PetCt => "{patient}_{modality}",
            BatchMode::AllSeries => "{patient}_{series}",
        }
    }
}
