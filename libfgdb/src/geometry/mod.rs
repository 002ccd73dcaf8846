pub(crate) mod blob;
pub(crate) mod buffer;
pub(crate) mod builder;

pub use blob::{GeometryBlob, GeometryBlobReader};
pub use buffer::ShapeBuffer;
pub use builder::ShapeBuilder;

use crate::error::{Error, Result};
use strum::{FromRepr, IntoStaticStr};

/// Shape-type word flag: a Z stream is present
pub const HAS_Z_FLAG: u32 = 0x8000_0000;
/// Shape-type word flag: an M stream is present
pub const HAS_M_FLAG: u32 = 0x4000_0000;
/// Shape-type word flag: a curve-modifier stream is present
pub const HAS_CURVES_FLAG: u32 = 0x2000_0000;
/// Shape-type word flag: a vertex-ID stream is present
pub const HAS_ID_FLAG: u32 = 0x1000_0000;

/// Basic shape-type codes as stored in the low byte of a shape-type word
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ShapeType {
    Null = 0,
    Point = 1,
    Polyline = 3,
    Polygon = 5,
    Multipoint = 8,
    PointZ = 9,
    PolylineZ = 10,
    PointZM = 11,
    PolylineZM = 13,
    PolygonZM = 15,
    GeometryBag = 17,
    MultipointZM = 18,
    PolygonZ = 19,
    MultipointZ = 20,
    PointM = 21,
    PolylineM = 23,
    PolygonM = 25,
    MultipointM = 28,
    MultiPatchM = 31,
    MultiPatch = 32,
    GeneralPolyline = 50,
    GeneralPolygon = 51,
    GeneralPoint = 52,
    GeneralMultipoint = 53,
    GeneralMultiPatch = 54,
    /// Synthetic envelope type, never stored on disk
    Box = 254,
}

/// Coarse classification of a [`ShapeType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum GeometryClass {
    Null,
    Point,
    Multipoint,
    Polyline,
    Polygon,
    MultiPatch,
    GeometryBag,
    Envelope,
}

impl ShapeType {
    /// Classifies the shape type into its geometry class
    #[must_use]
    pub const fn class(self) -> GeometryClass {
        match self {
            Self::Null => GeometryClass::Null,
            Self::Point | Self::PointZ | Self::PointZM | Self::PointM | Self::GeneralPoint => {
                GeometryClass::Point
            }
            Self::Multipoint
            | Self::MultipointZ
            | Self::MultipointZM
            | Self::MultipointM
            | Self::GeneralMultipoint => GeometryClass::Multipoint,
            Self::Polyline
            | Self::PolylineZ
            | Self::PolylineZM
            | Self::PolylineM
            | Self::GeneralPolyline => GeometryClass::Polyline,
            Self::Polygon
            | Self::PolygonZ
            | Self::PolygonZM
            | Self::PolygonM
            | Self::GeneralPolygon => GeometryClass::Polygon,
            Self::MultiPatch | Self::MultiPatchM | Self::GeneralMultiPatch => {
                GeometryClass::MultiPatch
            }
            Self::GeometryBag => GeometryClass::GeometryBag,
            Self::Box => GeometryClass::Envelope,
        }
    }

    /// Shape types whose code alone implies a Z stream
    #[must_use]
    pub const fn implies_z(self) -> bool {
        matches!(
            self,
            Self::PointZ
                | Self::PolylineZ
                | Self::PointZM
                | Self::PolylineZM
                | Self::PolygonZM
                | Self::MultipointZM
                | Self::PolygonZ
                | Self::MultipointZ
        )
    }

    /// Shape types whose code alone implies an M stream
    #[must_use]
    pub const fn implies_m(self) -> bool {
        matches!(
            self,
            Self::PointZM
                | Self::PolylineZM
                | Self::PolygonZM
                | Self::MultipointZM
                | Self::PointM
                | Self::PolylineM
                | Self::PolygonM
                | Self::MultipointM
                | Self::MultiPatchM
        )
    }
}

/// A decoded shape-type word: the basic type plus its modifier flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeFlags {
    /// The raw 32-bit shape-type word
    pub word: u32,
    /// Basic shape type from the low byte
    pub shape_type: ShapeType,
    /// A Z stream is present (flag bit or Z-typed code)
    pub has_z: bool,
    /// An M stream is present (flag bit or M-typed code)
    pub has_m: bool,
    /// A vertex-ID stream is present
    pub has_id: bool,
    /// The explicit curves flag (bit 29)
    pub has_curves: bool,
}

impl ShapeFlags {
    /// Decodes a 32-bit shape-type word.
    ///
    /// # Errors
    ///
    /// `MultiPatch` and `GeometryBag` types are unsupported; any other
    /// unknown low-byte code is malformed.
    pub fn parse(word: u32) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let code = (word & 0xFF) as u8;
        let shape_type = ShapeType::from_repr(code)
            .ok_or_else(|| Error::malformed(format!("unknown shape type code {code}")))?;
        match shape_type.class() {
            GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::unsupported(format!(
                    "{} geometry",
                    <&'static str>::from(shape_type)
                )));
            }
            _ => {}
        }
        Ok(Self {
            word,
            shape_type,
            has_z: shape_type.implies_z() || word & HAS_Z_FLAG != 0,
            has_m: shape_type.implies_m() || word & HAS_M_FLAG != 0,
            has_id: word & HAS_ID_FLAG != 0,
            has_curves: word & HAS_CURVES_FLAG != 0,
        })
    }

    /// Geometry class of the basic shape type
    #[must_use]
    pub const fn class(&self) -> GeometryClass {
        self.shape_type.class()
    }

    /// Whether a curve-modifier stream may follow the coordinate streams.
    ///
    /// True for a `GeneralPolyline`/`GeneralPolygon` word with an all-zero
    /// flag byte, or for any polyline/polygon with the explicit curves
    /// flag. Always false for other classes.
    #[must_use]
    pub const fn may_have_curves(&self) -> bool {
        match self.class() {
            GeometryClass::Polyline | GeometryClass::Polygon => {
                let flagless_general = matches!(
                    self.shape_type,
                    ShapeType::GeneralPolyline | ShapeType::GeneralPolygon
                ) && self.word & 0xFFFF_FF00 == 0;
                flagless_general || self.has_curves
            }
            _ => false,
        }
    }
}

/// An XY bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Envelope {
    /// The empty envelope: all corners NaN
    pub const EMPTY: Self = Self {
        xmin: f64::NAN,
        ymin: f64::NAN,
        xmax: f64::NAN,
        ymax: f64::NAN,
    };

    /// Returns `true` if any corner is undefined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.xmin.is_nan() || self.ymin.is_nan() || self.xmax.is_nan() || self.ymax.is_nan()
    }

    /// Smallest envelope spanning the finite coordinates of `points`
    #[must_use]
    pub fn spanning(points: &[(f64, f64)]) -> Self {
        let mut env = Self::EMPTY;
        for &(x, y) in points {
            if x.is_finite() && y.is_finite() {
                if env.is_empty() {
                    env = Self {
                        xmin: x,
                        ymin: y,
                        xmax: x,
                        ymax: y,
                    };
                } else {
                    env.xmin = env.xmin.min(x);
                    env.ymin = env.ymin.min(y);
                    env.xmax = env.xmax.max(x);
                    env.ymax = env.ymax.max(y);
                }
            }
        }
        env
    }

    /// Returns `true` if `(x, y)` lies inside or on the boundary
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Non-linear segment parameters attached to one segment of a polyline or
/// polygon part
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CurveKind {
    /// Segment type 1: two doubles and a flag word
    CircularArc {
        /// Center or interior point, interpretation governed by `bits`
        params: [f64; 2],
        /// Arc flag word
        bits: i32,
    },
    /// Segment type 4: two control points
    CubicBezier {
        /// First and second control point
        control: [[f64; 2]; 2],
    },
    /// Segment type 5: five doubles and a flag word
    EllipticArc {
        /// Ellipse parameters, interpretation governed by `bits`
        params: [f64; 5],
        /// Arc flag word
        bits: i32,
    },
}

impl CurveKind {
    /// Segment-type code as stored on disk and in shape buffers
    #[must_use]
    pub const fn type_code(&self) -> i32 {
        match self {
            Self::CircularArc { .. } => 1,
            Self::CubicBezier { .. } => 4,
            Self::EllipticArc { .. } => 5,
        }
    }

    /// Parameter payload size in bytes (excluding segment index and type)
    #[must_use]
    pub const fn payload_size(&self) -> usize {
        Self::payload_size_for(self.type_code())
    }

    /// Parameter payload size for a raw segment-type code, if known
    #[must_use]
    pub const fn payload_size_for(type_code: i32) -> usize {
        match type_code {
            1 => 2 * 8 + 4,
            4 => 4 * 8,
            5 => 5 * 8 + 4,
            _ => 0,
        }
    }
}

/// A curve modifier: promotes the straight segment starting at vertex
/// `segment_index` to a non-linear segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveModifier {
    /// Index of the source segment within the composite vertex stream
    pub segment_index: i32,
    /// The segment geometry
    pub kind: CurveKind,
}

/// A single point, with optional Z, M and vertex-ID values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate, NaN when empty
    pub x: f64,
    /// Y coordinate, NaN when empty
    pub y: f64,
    /// Z value, present when the shape carries a Z stream
    pub z: Option<f64>,
    /// M value, present when the shape carries an M stream
    pub m: Option<f64>,
    /// Vertex ID, present when the shape carries an ID stream
    pub id: Option<i32>,
}

/// An unordered set of points with parallel coordinate streams
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Multipoint {
    /// Bounding box
    pub envelope: Envelope,
    /// XY coordinates
    pub xy: Vec<(f64, f64)>,
    /// Z values, one per point when present
    pub z: Option<Vec<f64>>,
    /// M values, one per point when present
    pub m: Option<Vec<f64>>,
    /// Vertex IDs, one per point when present
    pub ids: Option<Vec<i32>>,
}

/// The shared body of polylines and polygons: a flat vertex stream
/// partitioned by a part-start table, plus optional curve modifiers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartShape {
    /// Bounding box
    pub envelope: Envelope,
    /// XY coordinates of every part, concatenated
    pub xy: Vec<(f64, f64)>,
    /// Z values, one per vertex when present
    pub z: Option<Vec<f64>>,
    /// M values, one per vertex when present
    pub m: Option<Vec<f64>>,
    /// Vertex IDs, one per vertex when present
    pub ids: Option<Vec<i32>>,
    /// Starting vertex index of each part
    pub parts: Vec<i32>,
    /// Curve modifiers ordered by segment index
    pub curves: Vec<CurveModifier>,
}

impl MultipartShape {
    /// Iterates the vertex ranges of each part
    pub fn part_ranges(&self) -> impl Iterator<Item = std::ops::Range<usize>> + '_ {
        let n = self.xy.len();
        let starts = self.parts.iter().map(|&s| s.unsigned_abs() as usize);
        let ends = self
            .parts
            .iter()
            .skip(1)
            .map(|&s| s.unsigned_abs() as usize)
            .chain(std::iter::once(n));
        starts.zip(ends).map(|(s, e)| s..e)
    }
}

/// An unpacked geometry
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// The null shape
    Null,
    /// A bare bounding box
    Envelope(Envelope),
    /// A single point
    Point(Point),
    /// A set of points
    Multipoint(Multipoint),
    /// One or more open paths
    Polyline(MultipartShape),
    /// One or more closed rings
    Polygon(MultipartShape),
}

impl Shape {
    /// Bounding box of the shape, when it has one
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Self::Null => None,
            Self::Envelope(env) => Some(*env),
            Self::Point(p) => Some(Envelope {
                xmin: p.x,
                ymin: p.y,
                xmax: p.x,
                ymax: p.y,
            }),
            Self::Multipoint(mp) => Some(mp.envelope),
            Self::Polyline(body) | Self::Polygon(body) => Some(body.envelope),
        }
    }

    /// Number of vertices
    #[must_use]
    pub fn num_points(&self) -> usize {
        match self {
            Self::Null | Self::Envelope(_) => 0,
            Self::Point(p) => usize::from(!p.x.is_nan() || !p.y.is_nan()),
            Self::Multipoint(mp) => mp.xy.len(),
            Self::Polyline(body) | Self::Polygon(body) => body.xy.len(),
        }
    }

    /// Whether the shape carries a Z stream
    #[must_use]
    pub const fn has_z(&self) -> bool {
        match self {
            Self::Point(p) => p.z.is_some(),
            Self::Multipoint(Multipoint { z, .. })
            | Self::Polyline(MultipartShape { z, .. })
            | Self::Polygon(MultipartShape { z, .. }) => z.is_some(),
            _ => false,
        }
    }

    /// Whether the shape carries an M stream
    #[must_use]
    pub const fn has_m(&self) -> bool {
        match self {
            Self::Point(p) => p.m.is_some(),
            Self::Multipoint(Multipoint { m, .. })
            | Self::Polyline(MultipartShape { m, .. })
            | Self::Polygon(MultipartShape { m, .. }) => m.is_some(),
            _ => false,
        }
    }
}
