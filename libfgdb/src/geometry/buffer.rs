use super::builder::is_no_data;
use super::{CurveKind, CurveModifier, Envelope, GeometryClass, ShapeFlags, ShapeType};
use crate::error::{Error, Result};
use itertools::Itertools;

/// Read-only view over an Extended Shape Buffer byte array.
///
/// The layout is decoded once at construction: stream offsets are indexed,
/// curve records (which have type-dependent widths) are parsed eagerly, and
/// every section is bounds-checked. Accessors after that are infallible
/// and normalize the producer's `f64::MIN` NaN pattern back to real NaN.
#[derive(Debug)]
pub struct ShapeBuffer<B> {
    data: B,
    flags: ShapeFlags,
    slots: usize,
    num_parts: usize,
    parts_off: usize,
    xy_off: usize,
    z_off: Option<usize>,
    m_off: Option<usize>,
    id_off: Option<usize>,
    curves: Vec<CurveModifier>,
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<usize> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| Error::malformed("shape buffer ends prematurely"))?;
        self.pos = end;
        Ok(start)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let at = self.take(4)?;
        Ok(i32_at(self.bytes, at))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let at = self.take(8)?;
        Ok(raw_f64_at(self.bytes, at))
    }
}

fn i32_at(bytes: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(raw)
}

fn raw_f64_at(bytes: &[u8], at: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    f64::from_le_bytes(raw)
}

/// Reads a double and maps the no-data pattern to NaN
fn f64_at(bytes: &[u8], at: usize) -> f64 {
    let value = raw_f64_at(bytes, at);
    if is_no_data(value) {
        f64::NAN
    } else {
        value
    }
}

impl<B: AsRef<[u8]>> ShapeBuffer<B> {
    /// Wraps and indexes an Extended Shape Buffer.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is shorter than its declared streams, a count
    /// is negative, the type word is unknown, or a curve record carries a
    /// segment type other than 1, 4 or 5.
    #[allow(clippy::cast_sign_loss)]
    pub fn new(data: B) -> Result<Self> {
        let bytes = data.as_ref();
        let mut cursor = Cursor { bytes, pos: 0 };
        let word = cursor.read_i32()? as u32;
        let flags = ShapeFlags::parse(word)?;

        let mut slots = 0usize;
        let mut num_parts = 0usize;
        let mut parts_off = 0usize;
        let mut xy_off = 0usize;
        let mut z_off = None;
        let mut m_off = None;
        let mut id_off = None;
        let mut curves = Vec::new();

        match flags.class() {
            GeometryClass::Null => {}
            GeometryClass::Envelope => {
                return Err(Error::malformed("envelope shapes have no buffer encoding"));
            }
            GeometryClass::Point => {
                slots = 1;
                xy_off = cursor.take(16)?;
                if flags.has_z {
                    z_off = Some(cursor.take(8)?);
                }
                if flags.has_m {
                    m_off = Some(cursor.take(8)?);
                }
                if flags.has_id {
                    id_off = Some(cursor.take(4)?);
                }
            }
            GeometryClass::Multipoint => {
                cursor.take(32)?;
                slots = read_count(&mut cursor, "point count")?;
                xy_off = cursor.take(slots * 16)?;
                if flags.has_z {
                    z_off = Some(cursor.take(16 + slots * 8)?);
                }
                if flags.has_m {
                    m_off = Some(cursor.take(16 + slots * 8)?);
                }
                if flags.has_id {
                    id_off = Some(cursor.take(slots * 4)?);
                }
            }
            GeometryClass::Polyline | GeometryClass::Polygon => {
                cursor.take(32)?;
                num_parts = read_count(&mut cursor, "part count")?;
                slots = read_count(&mut cursor, "point count")?;
                parts_off = cursor.take(num_parts * 4)?;
                xy_off = cursor.take(slots * 16)?;
                if flags.has_z {
                    z_off = Some(cursor.take(16 + slots * 8)?);
                }
                if flags.has_m {
                    m_off = Some(cursor.take(16 + slots * 8)?);
                }
                if flags.may_have_curves() {
                    let num_curves = read_count(&mut cursor, "curve count")?;
                    curves.reserve(num_curves);
                    for _ in 0..num_curves {
                        curves.push(read_curve(&mut cursor)?);
                    }
                }
                if flags.has_id {
                    id_off = Some(cursor.take(slots * 4)?);
                }
            }
            GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::unsupported("multipatch shape buffer"));
            }
        }

        Ok(Self {
            data,
            flags,
            slots,
            num_parts,
            parts_off,
            xy_off,
            z_off,
            m_off,
            id_off,
            curves,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// The raw buffer bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes()
    }

    /// The decoded shape-type word
    #[must_use]
    pub const fn flags(&self) -> &ShapeFlags {
        &self.flags
    }

    /// Basic shape type from the low byte of the type word
    #[must_use]
    pub const fn geometry_type(&self) -> ShapeType {
        self.flags.shape_type
    }

    /// Whether a Z stream is present
    #[must_use]
    pub const fn has_z(&self) -> bool {
        self.flags.has_z
    }

    /// Whether an M stream is present
    #[must_use]
    pub const fn has_m(&self) -> bool {
        self.flags.has_m
    }

    /// Whether a vertex-ID stream is present
    #[must_use]
    pub const fn has_id(&self) -> bool {
        self.flags.has_id
    }

    /// Whether a curve section is present
    #[must_use]
    pub const fn has_curves(&self) -> bool {
        self.flags.may_have_curves()
    }

    /// Number of vertices; an empty point reports zero
    #[must_use]
    pub fn num_points(&self) -> usize {
        if self.flags.class() == GeometryClass::Point {
            let (x, y) = self.slot_xy(0);
            usize::from(!(x.is_nan() && y.is_nan()))
        } else {
            self.slots
        }
    }

    /// Number of parts; zero for non-multipart shapes
    #[must_use]
    pub const fn num_parts(&self) -> usize {
        self.num_parts
    }

    /// Number of curve modifiers
    #[must_use]
    pub fn num_curves(&self) -> usize {
        self.curves.len()
    }

    /// The curve modifiers, ordered as stored
    #[must_use]
    pub fn curves(&self) -> &[CurveModifier] {
        &self.curves
    }

    /// Bounding box, for shape classes that store one
    #[must_use]
    pub fn envelope(&self) -> Option<Envelope> {
        match self.flags.class() {
            GeometryClass::Multipoint | GeometryClass::Polyline | GeometryClass::Polygon => {
                let bytes = self.bytes();
                Some(Envelope {
                    xmin: f64_at(bytes, 4),
                    ymin: f64_at(bytes, 12),
                    xmax: f64_at(bytes, 20),
                    ymax: f64_at(bytes, 28),
                })
            }
            _ => None,
        }
    }

    /// Starting vertex index of part `i`
    #[must_use]
    pub fn part_start(&self, i: usize) -> Option<i32> {
        (i < self.num_parts).then(|| i32_at(self.bytes(), self.parts_off + i * 4))
    }

    /// Iterates the part-start table
    pub fn part_starts(&self) -> impl Iterator<Item = i32> + '_ {
        (0..self.num_parts).filter_map(|i| self.part_start(i))
    }

    fn slot_xy(&self, i: usize) -> (f64, f64) {
        let bytes = self.bytes();
        (
            f64_at(bytes, self.xy_off + i * 16),
            f64_at(bytes, self.xy_off + i * 16 + 8),
        )
    }

    /// XY coordinate of vertex `i`
    #[must_use]
    pub fn xy(&self, i: usize) -> Option<(f64, f64)> {
        (i < self.num_points()).then(|| self.slot_xy(i))
    }

    /// Iterates the XY coordinates
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let end = self.xy_off + self.num_points() * 16;
        self.bytes()[self.xy_off..end]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                let v = f64::from_le_bytes(raw);
                if is_no_data(v) {
                    f64::NAN
                } else {
                    v
                }
            })
            .tuples()
    }

    /// Z extrema, when a Z stream is present on a non-point shape
    #[must_use]
    pub fn z_min_max(&self) -> Option<(f64, f64)> {
        if self.flags.class() == GeometryClass::Point {
            return None;
        }
        let off = self.z_off?;
        let bytes = self.bytes();
        Some((f64_at(bytes, off), f64_at(bytes, off + 8)))
    }

    /// M extrema, when an M stream is present on a non-point shape
    #[must_use]
    pub fn m_min_max(&self) -> Option<(f64, f64)> {
        if self.flags.class() == GeometryClass::Point {
            return None;
        }
        let off = self.m_off?;
        let bytes = self.bytes();
        Some((f64_at(bytes, off), f64_at(bytes, off + 8)))
    }

    /// Z value of vertex `i`
    #[must_use]
    pub fn z(&self, i: usize) -> Option<f64> {
        let off = self.z_off?;
        if i >= self.num_points() {
            return None;
        }
        let value_off = if self.flags.class() == GeometryClass::Point {
            off
        } else {
            off + 16 + i * 8
        };
        Some(f64_at(self.bytes(), value_off))
    }

    /// M value of vertex `i`
    #[must_use]
    pub fn m(&self, i: usize) -> Option<f64> {
        let off = self.m_off?;
        if i >= self.num_points() {
            return None;
        }
        let value_off = if self.flags.class() == GeometryClass::Point {
            off
        } else {
            off + 16 + i * 8
        };
        Some(f64_at(self.bytes(), value_off))
    }

    /// Vertex ID of vertex `i`
    #[must_use]
    pub fn id(&self, i: usize) -> Option<i32> {
        let off = self.id_off?;
        if i >= self.num_points() {
            return None;
        }
        Some(i32_at(self.bytes(), off + i * 4))
    }
}

fn read_count(cursor: &mut Cursor<'_>, what: &str) -> Result<usize> {
    let raw = cursor.read_i32()?;
    usize::try_from(raw).map_err(|_| Error::malformed(format!("negative {what}")))
}

fn read_curve(cursor: &mut Cursor<'_>) -> Result<CurveModifier> {
    let segment_index = cursor.read_i32()?;
    let type_code = cursor.read_i32()?;
    let kind = match type_code {
        1 => CurveKind::CircularArc {
            params: [cursor.read_f64()?, cursor.read_f64()?],
            bits: cursor.read_i32()?,
        },
        4 => CurveKind::CubicBezier {
            control: [
                [cursor.read_f64()?, cursor.read_f64()?],
                [cursor.read_f64()?, cursor.read_f64()?],
            ],
        },
        5 => CurveKind::EllipticArc {
            params: [
                cursor.read_f64()?,
                cursor.read_f64()?,
                cursor.read_f64()?,
                cursor.read_f64()?,
                cursor.read_f64()?,
            ],
            bits: cursor.read_i32()?,
        },
        other => {
            return Err(Error::malformed(format!(
                "unknown curve segment type {other}"
            )));
        }
    };
    Ok(CurveModifier {
        segment_index,
        kind,
    })
}
