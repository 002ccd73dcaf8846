use crate::error::{Error, Result};
use crate::geometry::{Envelope, GeometryBlob};
use bon::Builder;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fmt::{self, Display};
use std::sync::Arc;
use strum::{FromRepr, IntoStaticStr};

/// Field-type codes as stored in field descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FieldType {
    Int16 = 0,
    Int32 = 1,
    Single = 2,
    Double = 3,
    String = 4,
    DateTime = 5,
    ObjectId = 6,
    Geometry = 7,
    Blob = 8,
    Raster = 9,
    Guid = 10,
    GlobalId = 11,
    Xml = 12,
    Int64 = 13,
    DateOnly = 14,
    TimeOnly = 15,
    DateTimeOffset = 16,
}

impl FieldType {
    /// Resolves a raw type code.
    ///
    /// # Errors
    ///
    /// Fails for codes outside the known enumeration.
    pub fn from_code(code: u8) -> Result<Self> {
        Self::from_repr(code)
            .ok_or_else(|| Error::malformed(format!("unknown field type code {code}")))
    }
}

/// Per-geometry-field parameters used to dequantize geometry blobs
#[derive(Debug, Clone, PartialEq, Builder)]
pub struct GeometryDef {
    /// Geometry-type byte of the owning table
    #[builder(default)]
    pub geometry_type: u8,
    /// Spatial reference as a WKT string, stored verbatim
    #[builder(default)]
    pub spatial_reference: String,
    /// X quantization origin
    #[builder(default = 0.0)]
    pub x_origin: f64,
    /// Y quantization origin
    #[builder(default = 0.0)]
    pub y_origin: f64,
    /// XY quantization scale, strictly positive
    #[builder(default = 1.0)]
    pub xy_scale: f64,
    /// XY snapping tolerance
    #[builder(default = 0.0)]
    pub xy_tolerance: f64,
    /// Whether Z origin/scale are meaningful
    #[builder(default)]
    pub has_z: bool,
    /// Z quantization origin
    #[builder(default = 0.0)]
    pub z_origin: f64,
    /// Z quantization scale, strictly positive when `has_z`
    #[builder(default = 1.0)]
    pub z_scale: f64,
    /// Z snapping tolerance
    #[builder(default = 0.0)]
    pub z_tolerance: f64,
    /// Whether M origin/scale are meaningful
    #[builder(default)]
    pub has_m: bool,
    /// M quantization origin
    #[builder(default = 0.0)]
    pub m_origin: f64,
    /// M quantization scale, strictly positive when `has_m`
    #[builder(default = 1.0)]
    pub m_scale: f64,
    /// M snapping tolerance
    #[builder(default = 0.0)]
    pub m_tolerance: f64,
    /// Declared layer extent
    #[builder(default)]
    pub extent: Envelope,
    /// Declared Z extrema, present when the table carries Z
    pub z_extent: Option<(f64, f64)>,
    /// Declared M extrema, present when the table carries M
    pub m_extent: Option<(f64, f64)>,
    /// Spatial-index grid sizes (one to three)
    #[builder(default)]
    pub grid_sizes: Vec<f64>,
}

/// A decoded field descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field alias, empty when none is stored
    pub alias: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether row values may be null
    pub nullable: bool,
    /// Declared width for text and numeric fields
    pub length: Option<i32>,
    /// Raw default-value bytes, when the descriptor stores one
    pub default: Option<Vec<u8>>,
    /// Quantization parameters, present on geometry fields
    pub geometry: Option<Arc<GeometryDef>>,
    /// Raster storage type byte, present on raster fields
    pub raster_type: Option<u8>,
}

/// Days between 1899-12-30 (the DateTime epoch) and a stored timestamp are
/// kept as a fractional day count
const DATE_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Converts a stored fractional day count to a timestamp.
///
/// # Errors
///
/// Fails when the day count is not finite or out of the representable range.
#[allow(clippy::cast_possible_truncation)]
pub fn datetime_from_days(days: f64) -> Result<NaiveDateTime> {
    if !days.is_finite() {
        return Err(Error::malformed("non-finite timestamp day count"));
    }
    let (y, m, d) = DATE_EPOCH;
    let epoch = NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or(Error::Assertion("timestamp epoch must be representable"))?;
    let millis = (days * 86_400_000.0).round();
    if millis.abs() >= i64::MAX as f64 {
        return Err(Error::malformed("timestamp day count out of range"));
    }
    epoch
        .checked_add_signed(Duration::milliseconds(millis as i64))
        .ok_or_else(|| Error::malformed("timestamp day count out of range"))
}

/// A decoded row value
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Value {
    Null,
    Int16(i16),
    Int32(i32),
    Single(f32),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
    ObjectId(i64),
    Geometry(GeometryBlob),
    Blob(Vec<u8>),
    Guid([u8; 16]),
    Int64(i64),
}

impl Value {
    /// Returns `true` for [`Value::Null`]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value as an `i32`, when it is one
    #[must_use]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an `i64`, widening from the integral variants
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) | Self::ObjectId(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an `f64`, widening from `Single`
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Single(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, when it is one
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a geometry blob, when it is one
    #[must_use]
    pub const fn as_geometry(&self) -> Option<&GeometryBlob> {
        match self {
            Self::Geometry(blob) => Some(blob),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "<null>"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Single(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::ObjectId(v) => write!(f, "{v}"),
            Self::Geometry(blob) => write!(f, "<geometry {} bytes>", blob.bytes().len()),
            Self::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
            Self::Guid(bytes) => {
                write!(f, "{{")?;
                for (i, byte) in bytes.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "}}")
            }
            Self::Int64(v) => write!(f, "{v}"),
        }
    }
}
