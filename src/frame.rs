//! Decoding of a single archive entry into a [`RawFrame`].
//!
//! Decoding is split in two steps. [`FrameCandidate::from_bytes`] reads
//! whatever geometry and pixel data an entry carries, and
//! [`FrameCandidate::validate`] decides whether that is enough to take part
//! in a volume. Entries that decode but lack pixel data or a spatial position
//! (DICOMDIR records, structured reports, presentation states) come out of
//! the second step as [`Validity::Invalid`] with the reason attached.

use dicom::object::{DefaultDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption};
use dicom::transfer_syntax::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array2, s};
use thiserror::Error;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entry is not a DICOM data set")]
    NotDicom,

    #[error("DICOM read error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),

    #[error("could not rebuild file meta group: {0}")]
    Header(String),

    #[error("entry holds {size} bytes, more than the {limit} byte limit")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("archive entry error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded slice that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub pixels: Array2<f32>,
    /// Image Position (Patient), in millimetres.
    pub position: [f64; 3],
    pub patient_name: Option<String>,
    /// Row and column spacing, in millimetres.
    pub pixel_spacing: Option<(f64, f64)>,
    pub slice_thickness: Option<f64>,
}

impl RawFrame {
    pub fn rows(&self) -> usize {
        self.pixels.nrows()
    }

    pub fn columns(&self) -> usize {
        self.pixels.ncols()
    }

    /// `(rows, columns)` of the pixel grid.
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// Position along the through-plane axis.
    pub fn through_plane_position(&self) -> f64 {
        self.position[2]
    }
}

/// What an entry carried before validation.
#[derive(Clone, Debug, Default)]
pub struct FrameCandidate {
    pub pixels: Option<Array2<f32>>,
    pub position: Option<Vec<f64>>,
    pub patient_name: Option<String>,
    pub pixel_spacing: Option<Vec<f64>>,
    pub slice_thickness: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    MissingPixelData,
    EmptyPixelData,
    MissingPosition,
    MalformedPosition { components: usize },
    NonFinitePosition,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidReason::MissingPixelData => f.write_str("no pixel data"),
            InvalidReason::EmptyPixelData => f.write_str("empty pixel grid"),
            InvalidReason::MissingPosition => f.write_str("no image position"),
            InvalidReason::MalformedPosition { components } => {
                write!(f, "image position has {components} components, expected 3")
            }
            InvalidReason::NonFinitePosition => f.write_str("image position is not finite"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Validity {
    Valid(RawFrame),
    Invalid(InvalidReason),
}

impl FrameCandidate {
    /// Decode one archive entry.
    ///
    /// Part 10 files with or without the 128 byte preamble are read as is.
    /// With `force` set, data sets missing the file meta group are read as
    /// implicit VR little endian, provided the first element header is
    /// plausible.
    pub fn from_bytes(bytes: &[u8], force: bool) -> Result<Self, DecodeError> {
        let object = open_object(bytes, force)?;
        Self::from_dicom_object(&object)
    }

    pub fn from_dicom_object(object: &DefaultDicomObject) -> Result<Self, DecodeError> {
        let pixels = match object.element(tags::PIXEL_DATA) {
            Ok(_) => Some(decode_pixels(object)?),
            Err(_) => None,
        };

        Ok(Self {
            pixels,
            position: multi_float(object, tags::IMAGE_POSITION_PATIENT),
            patient_name: text(object, tags::PATIENT_NAME),
            pixel_spacing: multi_float(object, tags::PIXEL_SPACING),
            slice_thickness: object
                .element(tags::SLICE_THICKNESS)
                .ok()
                .and_then(|element| element.to_float64().ok()),
        })
    }

    /// A frame is valid iff it has a non-empty pixel grid and a
    /// three-component, finite position.
    pub fn validate(self) -> Validity {
        let Some(pixels) = self.pixels else {
            return Validity::Invalid(InvalidReason::MissingPixelData);
        };
        if pixels.is_empty() {
            return Validity::Invalid(InvalidReason::EmptyPixelData);
        }

        let Some(position) = self.position else {
            return Validity::Invalid(InvalidReason::MissingPosition);
        };
        let position: [f64; 3] = match position.as_slice() {
            &[x, y, z] => [x, y, z],
            other => {
                return Validity::Invalid(InvalidReason::MalformedPosition {
                    components: other.len(),
                });
            }
        };
        if position.iter().any(|c| !c.is_finite()) {
            return Validity::Invalid(InvalidReason::NonFinitePosition);
        }

        let pixel_spacing = match self.pixel_spacing.as_deref() {
            Some(&[row, col, ..]) if row > 0.0 && col > 0.0 => Some((row, col)),
            _ => None,
        };

        Validity::Valid(RawFrame {
            pixels,
            position,
            patient_name: self.patient_name,
            pixel_spacing,
            slice_thickness: self.slice_thickness.filter(|t| t.is_finite() && *t > 0.0),
        })
    }
}

fn open_object(bytes: &[u8], force: bool) -> Result<DefaultDicomObject, DecodeError> {
    if bytes.len() >= PREAMBLE_LEN + MAGIC.len()
        && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] == MAGIC
    {
        return Ok(dicom::object::from_reader(&bytes[PREAMBLE_LEN..])?);
    }
    if bytes.starts_with(MAGIC) {
        return Ok(dicom::object::from_reader(bytes)?);
    }
    if !force || !looks_like_implicit_dataset(bytes) {
        return Err(DecodeError::NotDicom);
    }

    let dataset =
        InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())?;
    let sop_class = text(&dataset, tags::SOP_CLASS_UID)
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string());
    let sop_instance =
        text(&dataset, tags::SOP_INSTANCE_UID).unwrap_or_else(|| "2.25.0".to_string());
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::IMPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(sop_class)
        .media_storage_sop_instance_uid(sop_instance);

    dataset
        .with_meta(meta)
        .map_err(|e| DecodeError::Header(e.to_string()))
}

// Headerless data sets conventionally start in group 0x0008; reject anything
// whose first element claims more bytes than the entry holds.
fn looks_like_implicit_dataset(bytes: &[u8]) -> bool {
    let Some(header) = bytes.get(..8) else {
        return false;
    };
    let group = u16::from_le_bytes([header[0], header[1]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let fits = length == UNDEFINED_LENGTH || (length as usize) <= bytes.len() - 8;
    matches!(group, 0x0002 | 0x0008) && fits
}

fn decode_pixels(object: &DefaultDicomObject) -> Result<Array2<f32>, DecodeError> {
    let pixel_data = object.decode_pixel_data()?;
    let options = ConvertOptions::new().with_voi_lut(VoiLutOption::Identity);
    let array = pixel_data.to_ndarray_with_options::<f32>(&options)?;
    // First frame, first sample.
    Ok(array.slice_move(s![0, .., .., 0]))
}

fn multi_float(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<Vec<f64>> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_multi_float64().ok())
}

fn text(object: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn candidate() -> FrameCandidate {
        FrameCandidate {
            pixels: Some(Array2::from_elem((4, 3), 7.0)),
            position: Some(vec![0.0, 1.0, 2.5]),
            patient_name: Some("DOE^JANE".to_string()),
            pixel_spacing: Some(vec![0.5, 0.75]),
            slice_thickness: Some(1.25),
        }
    }

    #[test]
    fn complete_candidate_is_valid() {
        let Validity::Valid(frame) = candidate().validate() else {
            panic!("candidate should validate");
        };
        assert_eq!(frame.shape(), (4, 3));
        assert_eq!(frame.rows(), 4);
        assert_eq!(frame.columns(), 3);
        assert_eq!(frame.through_plane_position(), 2.5);
        assert_eq!(frame.pixel_spacing, Some((0.5, 0.75)));
        assert_eq!(frame.slice_thickness, Some(1.25));
    }

    #[test]
    fn missing_pixels_are_rejected() {
        let c = FrameCandidate {
            pixels: None,
            ..candidate()
        };
        assert_eq!(
            c.validate(),
            Validity::Invalid(InvalidReason::MissingPixelData)
        );
    }

    #[test]
    fn empty_pixel_grid_is_rejected() {
        let c = FrameCandidate {
            pixels: Some(Array2::zeros((0, 3))),
            ..candidate()
        };
        assert_eq!(c.validate(), Validity::Invalid(InvalidReason::EmptyPixelData));
    }

    #[test]
    fn position_must_have_three_finite_components() {
        let missing = FrameCandidate {
            position: None,
            ..candidate()
        };
        assert_eq!(
            missing.validate(),
            Validity::Invalid(InvalidReason::MissingPosition)
        );

        let short = FrameCandidate {
            position: Some(vec![1.0, 2.0]),
            ..candidate()
        };
        assert_eq!(
            short.validate(),
            Validity::Invalid(InvalidReason::MalformedPosition { components: 2 })
        );

        let nan = FrameCandidate {
            position: Some(vec![1.0, f64::NAN, 2.0]),
            ..candidate()
        };
        assert_eq!(
            nan.validate(),
            Validity::Invalid(InvalidReason::NonFinitePosition)
        );
    }

    #[test]
    fn rows_and_columns_tags_are_not_required() {
        // Geometry comes from the decoded grid, so only pixels + position matter.
        let c = FrameCandidate {
            patient_name: None,
            pixel_spacing: None,
            slice_thickness: None,
            ..candidate()
        };
        let Validity::Valid(frame) = c.validate() else {
            panic!("candidate should validate");
        };
        assert_eq!(frame.pixel_spacing, None);
    }

    #[test]
    fn nonsense_bytes_are_not_dicom() {
        let err = FrameCandidate::from_bytes(b"not a dicom file at all", true).unwrap_err();
        assert!(matches!(err, DecodeError::NotDicom));

        let err = FrameCandidate::from_bytes(&[], true).unwrap_err();
        assert!(matches!(err, DecodeError::NotDicom));
    }

    #[test]
    fn headerless_sniffing_checks_group_and_length() {
        let mut plausible = vec![0x08, 0x00, 0x16, 0x00, 0x04, 0x00, 0x00, 0x00];
        plausible.extend_from_slice(b"1.2\0");
        assert!(looks_like_implicit_dataset(&plausible));

        let mut too_long = plausible.clone();
        too_long[4] = 0xF0;
        assert!(!looks_like_implicit_dataset(&too_long));

        let mut wrong_group = plausible;
        wrong_group[0] = 0x10;
        assert!(!looks_like_implicit_dataset(&wrong_group));
    }
}
