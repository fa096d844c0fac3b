#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Volume axis that is held fixed when slicing in this orientation.
    pub fn axis(self) -> usize {
        match self {
            Orientation::Axial => 0,
            Orientation::Coronal => 1,
            Orientation::Sagittal => 2,
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Orientation::Axial => "axial",
            Orientation::Coronal => "coronal",
            Orientation::Sagittal => "sagittal",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    Bilinear(Processor),
    #[default]
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Processor {
    CPU,
}

/// Mesh quality presets, trading surface resolution for extraction time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QualityTier {
    Coarse,
    #[default]
    Medium,
    Fine,
}

impl QualityTier {
    /// Sampling stride in voxels used by the marching cubes pass.
    pub fn step(self) -> usize {
        match self {
            QualityTier::Coarse => 8,
            QualityTier::Medium => 5,
            QualityTier::Fine => 2,
        }
    }
}

impl std::str::FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coarse" | "low" => Ok(QualityTier::Coarse),
            "medium" => Ok(QualityTier::Medium),
            "fine" | "high" => Ok(QualityTier::Fine),
            other => Err(format!("unknown quality tier `{other}`")),
        }
    }
}
