use super::{
    CurveModifier, Envelope, GeometryClass, Multipoint, MultipartShape, Point, Shape, ShapeFlags,
};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};

/// The bit pattern the reference producer emits for NaN doubles in shape
/// buffers: `FF FF FF FF FF FF EF FF`, i.e. `f64::MIN`.
pub(crate) const NO_DATA: f64 = f64::MIN;

/// Returns `true` for both NaN encodings accepted in shape buffers
pub(crate) fn is_no_data(value: f64) -> bool {
    value.is_nan() || value == NO_DATA
}

/// Buffered accumulator for a single shape.
///
/// A builder is initialized with a shape-type word, receives coordinate,
/// measure, part and curve elements in any order, and emits either an
/// unpacked [`Shape`] or an Extended Shape Buffer byte array. The same
/// builder can be re-initialized and reused across rows.
#[derive(Debug, Default)]
pub struct ShapeBuilder {
    flags: Option<ShapeFlags>,
    xy: Vec<(f64, f64)>,
    z: Vec<f64>,
    m: Vec<f64>,
    ids: Vec<i32>,
    part_counts: Vec<i32>,
    curves: Vec<CurveModifier>,
    envelope: Envelope,
    z_range: Option<(f64, f64)>,
    m_range: Option<(f64, f64)>,
    real_nan: bool,
    strict_curve_order: bool,
}

impl ShapeBuilder {
    /// Creates an empty builder with default settings
    #[must_use]
    pub fn new() -> Self {
        Self {
            strict_curve_order: true,
            ..Self::default()
        }
    }

    /// Selects real IEEE NaN output instead of the reference producer's
    /// `f64::MIN` pattern
    pub fn emit_real_nan(&mut self, on: bool) {
        self.real_nan = on;
    }

    /// Disables the strictly-increasing check on curve segment indices
    pub fn check_curve_order(&mut self, on: bool) {
        self.strict_curve_order = on;
    }

    /// Resets all streams and extrema and adopts a new shape-type word.
    ///
    /// # Errors
    ///
    /// Fails for unknown, `MultiPatch` or `GeometryBag` type codes.
    pub fn initialize(&mut self, shape_word: u32) -> Result<()> {
        self.flags = Some(ShapeFlags::parse(shape_word)?);
        self.xy.clear();
        self.z.clear();
        self.m.clear();
        self.ids.clear();
        self.part_counts.clear();
        self.curves.clear();
        self.envelope = Envelope::EMPTY;
        self.z_range = None;
        self.m_range = None;
        Ok(())
    }

    /// Appends an XY vertex
    pub fn add_xy(&mut self, x: f64, y: f64) {
        self.xy.push((x, y));
    }

    /// Appends a Z value
    pub fn add_z(&mut self, z: f64) {
        self.z.push(z);
    }

    /// Appends an M value
    pub fn add_m(&mut self, m: f64) {
        self.m.push(m);
    }

    /// Appends a vertex ID
    pub fn add_id(&mut self, id: i32) {
        self.ids.push(id);
    }

    /// Appends a part with `vertex_count` vertices
    pub fn add_part(&mut self, vertex_count: i32) {
        self.part_counts.push(vertex_count);
    }

    /// Appends a curve modifier
    pub fn add_curve(&mut self, curve: CurveModifier) {
        self.curves.push(curve);
    }

    /// Records the XY bounding box
    pub fn set_xy_min_max(&mut self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) {
        self.envelope = Envelope {
            xmin,
            ymin,
            xmax,
            ymax,
        };
    }

    /// Records the Z extrema
    pub fn set_z_min_max(&mut self, zmin: f64, zmax: f64) {
        self.z_range = Some((zmin, zmax));
    }

    /// Records the M extrema
    pub fn set_m_min_max(&mut self, mmin: f64, mmax: f64) {
        self.m_range = Some((mmin, mmax));
    }

    /// Number of accumulated vertices
    #[must_use]
    pub fn num_points(&self) -> usize {
        self.xy.len()
    }

    /// Number of accumulated parts
    #[must_use]
    pub fn num_parts(&self) -> usize {
        self.part_counts.len()
    }

    /// Number of accumulated curve modifiers
    #[must_use]
    pub fn num_curves(&self) -> usize {
        self.curves.len()
    }

    /// The decoded shape-type word, when initialized
    #[must_use]
    pub const fn flags(&self) -> Option<&ShapeFlags> {
        self.flags.as_ref()
    }

    fn flags_checked(&self) -> Result<&ShapeFlags> {
        self.flags
            .as_ref()
            .ok_or(Error::Assertion("shape builder was not initialized"))
    }

    /// Verifies the accumulated elements form a consistent shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Assertion`] when the element counts contradict
    /// the shape type: a null shape with vertices, a point with more than
    /// one vertex, curves on a type that cannot carry them, part vertex
    /// counts that do not sum to the vertex count, or out-of-order curve
    /// segment indices.
    pub fn validate(&self) -> Result<()> {
        let flags = self.flags_checked()?;
        match flags.class() {
            GeometryClass::Null => {
                if !self.xy.is_empty() {
                    return Err(Error::Assertion("null shape carries vertices"));
                }
            }
            GeometryClass::Point => {
                if self.xy.len() > 1 {
                    return Err(Error::Assertion("point shape carries multiple vertices"));
                }
            }
            GeometryClass::Polyline | GeometryClass::Polygon => {
                let mut total: i64 = 0;
                for &count in &self.part_counts {
                    if count < 0 {
                        return Err(Error::Assertion("negative part vertex count"));
                    }
                    total += i64::from(count);
                }
                if total != self.xy.len() as i64 {
                    return Err(Error::Assertion(
                        "part vertex counts do not sum to the vertex count",
                    ));
                }
            }
            GeometryClass::Multipoint | GeometryClass::Envelope | GeometryClass::MultiPatch
            | GeometryClass::GeometryBag => {
                if !self.part_counts.is_empty() {
                    return Err(Error::Assertion("part table on a single-part shape type"));
                }
            }
        }
        if !self.curves.is_empty() && !flags.may_have_curves() {
            return Err(Error::Assertion("curves on a non-curve shape type"));
        }
        if self.strict_curve_order {
            let ordered = self
                .curves
                .windows(2)
                .all(|pair| pair[0].segment_index < pair[1].segment_index);
            if !ordered {
                return Err(Error::Assertion(
                    "curve segment indices are not strictly increasing",
                ));
            }
        }
        Ok(())
    }

    fn xy_envelope(&self) -> Envelope {
        if self.envelope.is_empty() {
            Envelope::spanning(&self.xy)
        } else {
            self.envelope
        }
    }

    fn z_extrema(&self) -> (f64, f64) {
        self.z_range.unwrap_or_else(|| range_of(&self.z))
    }

    fn m_extrema(&self) -> (f64, f64) {
        self.m_range.unwrap_or_else(|| range_of(&self.m))
    }

    fn sized<T: Copy>(values: &[T], n: usize, default: T) -> Vec<T> {
        let mut out = values.to_vec();
        out.resize(n, default);
        out
    }

    fn part_starts(&self) -> Vec<i32> {
        let mut starts = Vec::with_capacity(self.part_counts.len());
        let mut acc = 0i32;
        for &count in &self.part_counts {
            starts.push(acc);
            acc = acc.wrapping_add(count);
        }
        starts
    }

    /// Emits the accumulated elements as an unpacked [`Shape`].
    ///
    /// Z/M/ID streams are sized to the vertex count: excess values are
    /// truncated, missing values padded (Z with 0, M with NaN, ID with 0).
    ///
    /// # Errors
    ///
    /// Fails when [`Self::validate`] fails.
    pub fn to_shape(&self) -> Result<Shape> {
        self.validate()?;
        let flags = self.flags_checked()?;
        let n = self.xy.len();
        let shape = match flags.class() {
            GeometryClass::Null => Shape::Null,
            GeometryClass::Envelope => Shape::Envelope(self.envelope),
            GeometryClass::Point => {
                let (x, y) = self.xy.first().copied().unwrap_or((f64::NAN, f64::NAN));
                let empty = self.xy.is_empty();
                Shape::Point(Point {
                    x,
                    y,
                    z: flags
                        .has_z
                        .then(|| if empty { f64::NAN } else { self.z.first().copied().unwrap_or(0.0) }),
                    m: flags
                        .has_m
                        .then(|| if empty { f64::NAN } else { self.m.first().copied().unwrap_or(f64::NAN) }),
                    id: flags
                        .has_id
                        .then(|| self.ids.first().copied().unwrap_or(0)),
                })
            }
            GeometryClass::Multipoint => Shape::Multipoint(Multipoint {
                envelope: self.xy_envelope(),
                xy: self.xy.clone(),
                z: flags.has_z.then(|| Self::sized(&self.z, n, 0.0)),
                m: flags.has_m.then(|| Self::sized(&self.m, n, f64::NAN)),
                ids: flags.has_id.then(|| Self::sized(&self.ids, n, 0)),
            }),
            GeometryClass::Polyline | GeometryClass::Polygon => {
                let body = MultipartShape {
                    envelope: self.xy_envelope(),
                    xy: self.xy.clone(),
                    z: flags.has_z.then(|| Self::sized(&self.z, n, 0.0)),
                    m: flags.has_m.then(|| Self::sized(&self.m, n, f64::NAN)),
                    ids: flags.has_id.then(|| Self::sized(&self.ids, n, 0)),
                    parts: self.part_starts(),
                    curves: self.curves.clone(),
                };
                if flags.class() == GeometryClass::Polyline {
                    Shape::Polyline(body)
                } else {
                    Shape::Polygon(body)
                }
            }
            GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::Assertion("unsupported shape class in builder"));
            }
        };
        Ok(shape)
    }

    /// Emits the accumulated elements as an Extended Shape Buffer.
    ///
    /// # Errors
    ///
    /// Fails when [`Self::validate`] fails, or for the synthetic envelope
    /// type which has no buffer encoding.
    pub fn to_shape_buffer(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_shape_buffer(&mut buf)?;
        Ok(buf)
    }

    /// Writes the Extended Shape Buffer into `buf` (appending).
    ///
    /// # Errors
    ///
    /// See [`Self::to_shape_buffer`].
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn write_shape_buffer(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.validate()?;
        let flags = *self.flags_checked()?;
        let n = self.xy.len();
        let word = flags.word;
        match flags.class() {
            GeometryClass::Null => {
                write_u32(buf, word);
            }
            GeometryClass::Envelope => {
                return Err(Error::Assertion("envelope shapes have no buffer encoding"));
            }
            GeometryClass::Point => {
                write_u32(buf, word);
                let (x, y) = self.xy.first().copied().unwrap_or((f64::NAN, f64::NAN));
                self.write_f64(buf, x);
                self.write_f64(buf, y);
                if flags.has_z {
                    // empty points store a zero Z
                    let z = if self.xy.is_empty() || is_no_data(x) {
                        0.0
                    } else {
                        self.z.first().copied().unwrap_or(0.0)
                    };
                    self.write_f64(buf, z);
                }
                if flags.has_m {
                    self.write_f64(buf, self.m.first().copied().unwrap_or(f64::NAN));
                }
                if flags.has_id {
                    write_i32(buf, self.ids.first().copied().unwrap_or(0));
                }
            }
            GeometryClass::Multipoint => {
                write_u32(buf, word);
                self.write_envelope(buf);
                write_i32(buf, n as i32);
                for &(x, y) in &self.xy {
                    self.write_f64(buf, x);
                    self.write_f64(buf, y);
                }
                if flags.has_z {
                    let (zmin, zmax) = self.z_extrema();
                    self.write_f64(buf, zmin);
                    self.write_f64(buf, zmax);
                    for z in Self::sized(&self.z, n, 0.0) {
                        self.write_f64(buf, z);
                    }
                }
                if flags.has_m {
                    let (mmin, mmax) = self.m_extrema();
                    self.write_f64(buf, mmin);
                    self.write_f64(buf, mmax);
                    for m in Self::sized(&self.m, n, f64::NAN) {
                        self.write_f64(buf, m);
                    }
                }
                if flags.has_id {
                    for id in Self::sized(&self.ids, n, 0) {
                        write_i32(buf, id);
                    }
                }
            }
            GeometryClass::Polyline | GeometryClass::Polygon => {
                write_u32(buf, word);
                self.write_envelope(buf);
                write_i32(buf, self.part_counts.len() as i32);
                write_i32(buf, n as i32);
                for start in self.part_starts() {
                    write_i32(buf, start);
                }
                for &(x, y) in &self.xy {
                    self.write_f64(buf, x);
                    self.write_f64(buf, y);
                }
                if flags.has_z {
                    let (zmin, zmax) = self.z_extrema();
                    self.write_f64(buf, zmin);
                    self.write_f64(buf, zmax);
                    for z in Self::sized(&self.z, n, 0.0) {
                        self.write_f64(buf, z);
                    }
                }
                if flags.has_m {
                    let (mmin, mmax) = self.m_extrema();
                    self.write_f64(buf, mmin);
                    self.write_f64(buf, mmax);
                    for m in Self::sized(&self.m, n, f64::NAN) {
                        self.write_f64(buf, m);
                    }
                }
                if flags.may_have_curves() {
                    write_i32(buf, self.curves.len() as i32);
                    for curve in &self.curves {
                        self.write_curve(buf, curve);
                    }
                }
                if flags.has_id {
                    for id in Self::sized(&self.ids, n, 0) {
                        write_i32(buf, id);
                    }
                }
            }
            GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::Assertion("unsupported shape class in builder"));
            }
        }
        Ok(())
    }

    fn write_envelope(&self, buf: &mut Vec<u8>) {
        let env = self.xy_envelope();
        self.write_f64(buf, env.xmin);
        self.write_f64(buf, env.ymin);
        self.write_f64(buf, env.xmax);
        self.write_f64(buf, env.ymax);
    }

    fn write_curve(&self, buf: &mut Vec<u8>, curve: &CurveModifier) {
        use super::CurveKind::{CircularArc, CubicBezier, EllipticArc};
        write_i32(buf, curve.segment_index);
        write_i32(buf, curve.kind.type_code());
        match curve.kind {
            CircularArc { params, bits } => {
                for p in params {
                    self.write_f64(buf, p);
                }
                write_i32(buf, bits);
            }
            CubicBezier { control } => {
                for point in control {
                    for c in point {
                        self.write_f64(buf, c);
                    }
                }
            }
            EllipticArc { params, bits } => {
                for p in params {
                    self.write_f64(buf, p);
                }
                write_i32(buf, bits);
            }
        }
    }

    fn write_f64(&self, buf: &mut Vec<u8>, value: f64) {
        let value = if value.is_nan() && !self.real_nan {
            NO_DATA
        } else {
            value
        };
        // writes to a Vec cannot fail
        let _ = buf.write_f64::<LittleEndian>(value);
    }
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    let _ = buf.write_u32::<LittleEndian>(value);
}

fn write_i32(buf: &mut Vec<u8>, value: i32) {
    let _ = buf.write_i32::<LittleEndian>(value);
}

fn range_of(values: &[f64]) -> (f64, f64) {
    let mut min = f64::NAN;
    let mut max = f64::NAN;
    for &v in values {
        if v.is_finite() {
            if min.is_nan() {
                min = v;
                max = v;
            } else {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }
    (min, max)
}
