use serde::{Deserialize, Serialize};

/// Sampling used when a frame is resampled onto another voxel grid.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// How the registration service initializes the moving-to-fixed transform
/// when no prior transform is handed over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializeMode {
    None,
    #[default]
    GeometryAlign,
    MomentsAlign,
}

impl InitializeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitializeMode::None => "Off",
            InitializeMode::GeometryAlign => "useGeometryAlign",
            InitializeMode::MomentsAlign => "useMomentsAlign",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    #[default]
    Numeric,
    Text,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}

/// Where the index value of a loaded frame comes from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    #[default]
    Ordinal,
    TriggerTime,
    TemporalPosition,
}
