//! The compact geometry-blob codec.
//!
//! A geometry blob stores one shape as a shape-type word followed by
//! varint-coded, delta-coded, quantized coordinate streams. Deltas use the
//! signed varint form; counts, boxes and first-vertex values use unsigned
//! LEB128. Decoding surfaces NaN for every sentinel; sentinels never leak
//! to the consumer.

use super::builder::ShapeBuilder;
use super::buffer::ShapeBuffer;
use super::{CurveKind, CurveModifier, GeometryClass, Shape, ShapeFlags};
use crate::error::{Error, Result};
use crate::reader::ByteReader;
use crate::table::GeometryDef;
use std::cell::OnceCell;
use std::io::{Cursor, ErrorKind};
use std::sync::Arc;

/// One row's geometry: the raw blob bytes plus the geometry definition
/// needed to dequantize them.
///
/// A blob is value-semantic and idempotently decodable; the unpacked shape
/// and the Extended Shape Buffer rendering are each computed once and
/// memoized.
#[derive(Debug, Clone)]
pub struct GeometryBlob {
    bytes: Vec<u8>,
    geometry: Arc<GeometryDef>,
    shape: OnceCell<Shape>,
    buffer: OnceCell<Vec<u8>>,
}

impl PartialEq for GeometryBlob {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.geometry == other.geometry
    }
}

impl GeometryBlob {
    /// Wraps raw blob bytes with their geometry definition
    #[must_use]
    pub const fn new(bytes: Vec<u8>, geometry: Arc<GeometryDef>) -> Self {
        Self {
            bytes,
            geometry,
            shape: OnceCell::new(),
            buffer: OnceCell::new(),
        }
    }

    /// The raw on-disk blob bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The geometry definition the blob decodes against
    #[must_use]
    pub fn geometry_def(&self) -> &GeometryDef {
        &self.geometry
    }

    /// Decodes the blob into `builder`, replacing its previous content.
    ///
    /// # Errors
    ///
    /// Surfaces the codec errors of [`GeometryBlobReader`].
    pub fn read_into(&self, builder: &mut ShapeBuilder) -> Result<()> {
        GeometryBlobReader::new(&self.bytes, &self.geometry)?.read_into(builder)
    }

    /// The unpacked shape, decoded on first use.
    ///
    /// # Errors
    ///
    /// Surfaces the codec errors of [`GeometryBlobReader`].
    pub fn shape(&self) -> Result<&Shape> {
        if let Some(shape) = self.shape.get() {
            return Ok(shape);
        }
        let mut builder = ShapeBuilder::new();
        self.read_into(&mut builder)?;
        let shape = builder.to_shape()?;
        Ok(self.shape.get_or_init(|| shape))
    }

    /// A view over the Extended Shape Buffer rendering, transcoded on
    /// first use.
    ///
    /// # Errors
    ///
    /// Surfaces the codec errors of [`GeometryBlobReader`].
    pub fn shape_buffer(&self) -> Result<ShapeBuffer<&[u8]>> {
        if self.buffer.get().is_none() {
            let bytes =
                GeometryBlobReader::new(&self.bytes, &self.geometry)?.read_shape_buffer()?;
            let _ = self.buffer.set(bytes);
        }
        let bytes = self.buffer.get().map(Vec::as_slice).unwrap_or_default();
        ShapeBuffer::new(bytes)
    }
}

/// Streaming decoder for one geometry blob.
#[derive(Debug)]
pub struct GeometryBlobReader<'a> {
    rdr: ByteReader<Cursor<&'a [u8]>>,
    geometry: &'a GeometryDef,
    validate: bool,
}

impl<'a> GeometryBlobReader<'a> {
    /// Creates a decoder over `bytes` with validation on.
    ///
    /// # Errors
    ///
    /// Fails if the in-memory source cannot be wrapped.
    pub fn new(bytes: &'a [u8], geometry: &'a GeometryDef) -> Result<Self> {
        Ok(Self {
            rdr: ByteReader::new(Cursor::new(bytes))?,
            geometry,
            validate: true,
        })
    }

    /// Toggles validation (trailing-byte detection)
    #[must_use]
    pub const fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Decodes the blob into `builder`, replacing its previous content.
    ///
    /// # Errors
    ///
    /// Fails for an empty blob, varint or shape-type-word overflow,
    /// self-inconsistent counts, unsupported shape or segment types,
    /// streams without matching geometry-definition support, a blob that
    /// ends prematurely, or (validation on) unread trailing bytes.
    pub fn read_into(&mut self, builder: &mut ShapeBuilder) -> Result<()> {
        self.rdr.seek_to(0)?;
        if self.rdr.is_empty() {
            return Err(Error::malformed("empty geometry blob"));
        }
        let word = self.shape_word()?;
        let flags = ShapeFlags::parse(word)?;
        builder.initialize(word)?;
        self.check_streams(&flags)?;
        match flags.class() {
            GeometryClass::Null => {}
            GeometryClass::Point => self.read_point(&flags, builder)?,
            GeometryClass::Multipoint => self.read_multipoint(&flags, builder)?,
            GeometryClass::Polyline | GeometryClass::Polygon => {
                self.read_multipart(&flags, builder)?;
            }
            GeometryClass::Envelope | GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::malformed("shape class cannot appear in a blob"));
            }
        }
        if self.validate && self.rdr.position()? < self.rdr.len() {
            return Err(Error::malformed("unread trailing bytes after geometry"));
        }
        Ok(())
    }

    /// Transcodes the blob to an exactly-sized Extended Shape Buffer.
    ///
    /// Curve records have type-dependent widths and follow the coordinate
    /// streams, so the output size is computed in a first skip-only pass
    /// before the real decode runs.
    ///
    /// # Errors
    ///
    /// See [`Self::read_into`].
    pub fn read_shape_buffer(&mut self) -> Result<Vec<u8>> {
        let size = self.measure()?;
        let mut builder = ShapeBuilder::new();
        self.read_into(&mut builder)?;
        let mut buf = Vec::with_capacity(size);
        builder.write_shape_buffer(&mut buf)?;
        debug_assert_eq!(buf.len(), size, "measured size must match the rendering");
        Ok(buf)
    }

    fn map_eof<T>(result: Result<T>) -> Result<T> {
        match result {
            Err(Error::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                Err(Error::malformed("geometry blob ends prematurely"))
            }
            other => other,
        }
    }

    fn vu(&mut self) -> Result<u64> {
        Self::map_eof(self.rdr.read_varuint())
    }

    fn vi(&mut self) -> Result<i64> {
        Self::map_eof(self.rdr.read_varint())
    }

    fn f64(&mut self) -> Result<f64> {
        Self::map_eof(self.rdr.read_f64())
    }

    fn i32(&mut self) -> Result<i32> {
        Self::map_eof(self.rdr.read_i32())
    }

    fn shape_word(&mut self) -> Result<u32> {
        let word = self.vu()?;
        u32::try_from(word).map_err(|_| Error::malformed("shape type word overflows 32 bits"))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let raw = self.vu()?;
        if raw > i64::from(i32::MAX).unsigned_abs() {
            return Err(Error::malformed(format!("{what} exceeds the i32 range")));
        }
        usize::try_from(raw).map_err(|_| Error::malformed(format!("{what} exceeds the address range")))
    }

    fn check_streams(&self, flags: &ShapeFlags) -> Result<()> {
        if flags.has_z && !self.geometry.has_z {
            return Err(Error::MissingContext(
                "z stream without a z-aware geometry definition",
            ));
        }
        if flags.has_m && !self.geometry.has_m {
            return Err(Error::MissingContext(
                "m stream without an m-aware geometry definition",
            ));
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn dequantize_first(raw: u64, origin: f64, scale: f64) -> f64 {
        // zero marks an empty coordinate
        if raw == 0 {
            f64::NAN
        } else {
            origin + (raw - 1) as f64 / scale
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn dequantize_sum(sum: i64, origin: f64, scale: f64) -> f64 {
        // a negative running sum marks an undefined coordinate
        if sum < 0 {
            f64::NAN
        } else {
            origin + sum as f64 / scale
        }
    }

    fn read_point(&mut self, flags: &ShapeFlags, builder: &mut ShapeBuilder) -> Result<()> {
        let g = self.geometry;
        let x = Self::dequantize_first(self.vu()?, g.x_origin, g.xy_scale);
        let y = Self::dequantize_first(self.vu()?, g.y_origin, g.xy_scale);
        builder.add_xy(x, y);
        if flags.has_z {
            builder.add_z(Self::dequantize_first(self.vu()?, g.z_origin, g.z_scale));
        }
        if flags.has_m {
            builder.add_m(Self::dequantize_first(self.vu()?, g.m_origin, g.m_scale));
        }
        if flags.has_id {
            let id = self.vi()?;
            builder.add_id(truncate_id(id));
        }
        Ok(())
    }

    fn read_multipoint(&mut self, flags: &ShapeFlags, builder: &mut ShapeBuilder) -> Result<()> {
        let n = self.count("point count")?;
        if n == 0 {
            return Ok(());
        }
        self.read_box(builder)?;
        self.read_xy_deltas(n, builder)?;
        if flags.has_z {
            self.read_z_deltas(n, builder)?;
        }
        if flags.has_m {
            self.read_m_deltas(n, builder)?;
        }
        if flags.has_id {
            self.read_ids(n, builder)?;
        }
        Ok(())
    }

    fn read_multipart(&mut self, flags: &ShapeFlags, builder: &mut ShapeBuilder) -> Result<()> {
        let n = self.count("point count")?;
        if n == 0 {
            return Ok(());
        }
        let p = self.count("part count")?;
        if p == 0 {
            return Err(Error::malformed("zero parts with a nonzero point count"));
        }
        if p > n {
            return Err(Error::malformed("part count exceeds point count"));
        }
        let curves = if flags.may_have_curves() {
            let c = self.count("curve count")?;
            if c > n {
                return Err(Error::malformed("curve count exceeds point count"));
            }
            c
        } else {
            0
        };
        self.read_box(builder)?;
        self.read_part_counts(n, p, builder)?;
        self.read_xy_deltas(n, builder)?;
        if flags.has_z {
            self.read_z_deltas(n, builder)?;
        }
        if flags.has_m {
            self.read_m_deltas(n, builder)?;
        }
        if curves > 0 {
            self.read_curves(curves, builder)?;
        }
        if flags.has_id {
            self.read_ids(n, builder)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn read_box(&mut self, builder: &mut ShapeBuilder) -> Result<()> {
        let g = self.geometry;
        let xmin = g.x_origin + self.vu()? as f64 / g.xy_scale;
        let ymin = g.y_origin + self.vu()? as f64 / g.xy_scale;
        let xmax = xmin + self.vu()? as f64 / g.xy_scale;
        let ymax = ymin + self.vu()? as f64 / g.xy_scale;
        builder.set_xy_min_max(xmin, ymin, xmax, ymax);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn read_part_counts(&mut self, n: usize, p: usize, builder: &mut ShapeBuilder) -> Result<()> {
        // the last part's vertex count is implicit
        let mut consumed = 0u64;
        for _ in 0..p - 1 {
            let count = self.count("part vertex count")?;
            consumed += count as u64;
            builder.add_part(count as i32);
        }
        let last = (n as u64)
            .checked_sub(consumed)
            .ok_or_else(|| Error::malformed("part vertex counts exceed the point count"))?;
        builder.add_part(last as i32);
        Ok(())
    }

    fn read_xy_deltas(&mut self, n: usize, builder: &mut ShapeBuilder) -> Result<()> {
        let g = self.geometry;
        let mut dx = 0i64;
        let mut dy = 0i64;
        for _ in 0..n {
            dx = dx.wrapping_add(self.vi()?);
            dy = dy.wrapping_add(self.vi()?);
            builder.add_xy(
                Self::dequantize_sum(dx, g.x_origin, g.xy_scale),
                Self::dequantize_sum(dy, g.y_origin, g.xy_scale),
            );
        }
        Ok(())
    }

    fn read_z_deltas(&mut self, n: usize, builder: &mut ShapeBuilder) -> Result<()> {
        let g = self.geometry;
        let mut dz = 0i64;
        let mut range = MinMax::default();
        for _ in 0..n {
            dz = dz.wrapping_add(self.vi()?);
            let z = Self::dequantize_sum(dz, g.z_origin, g.z_scale);
            range.update(z);
            builder.add_z(z);
        }
        builder.set_z_min_max(range.min, range.max);
        Ok(())
    }

    fn read_m_deltas(&mut self, n: usize, builder: &mut ShapeBuilder) -> Result<()> {
        let g = self.geometry;
        let mut dm = 0i64;
        let mut range = MinMax::default();
        for _ in 0..n {
            // -2 marks every remaining measure as undefined
            if dm != ALL_REMAINING_NAN {
                dm = dm.wrapping_add(self.vi()?);
            }
            let m = if dm == ALL_REMAINING_NAN {
                f64::NAN
            } else {
                Self::dequantize_sum(dm, g.m_origin, g.m_scale)
            };
            range.update(m);
            builder.add_m(m);
        }
        builder.set_m_min_max(range.min, range.max);
        Ok(())
    }

    fn read_ids(&mut self, n: usize, builder: &mut ShapeBuilder) -> Result<()> {
        for _ in 0..n {
            let id = self.vi()?;
            builder.add_id(truncate_id(id));
        }
        Ok(())
    }

    fn read_curves(&mut self, c: usize, builder: &mut ShapeBuilder) -> Result<()> {
        for _ in 0..c {
            let segment_index = self.count("curve segment index")?;
            let kind = match self.curve_type()? {
                1 => CurveKind::CircularArc {
                    params: [self.f64()?, self.f64()?],
                    bits: self.i32()?,
                },
                4 => CurveKind::CubicBezier {
                    control: [
                        [self.f64()?, self.f64()?],
                        [self.f64()?, self.f64()?],
                    ],
                },
                5 => CurveKind::EllipticArc {
                    params: [
                        self.f64()?,
                        self.f64()?,
                        self.f64()?,
                        self.f64()?,
                        self.f64()?,
                    ],
                    bits: self.i32()?,
                },
                3 => return Err(Error::unsupported("spiral curve segment")),
                other => {
                    return Err(Error::malformed(format!(
                        "curve segment type {other} cannot appear as a modifier"
                    )));
                }
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            builder.add_curve(CurveModifier {
                segment_index: segment_index as i32,
                kind,
            });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn curve_type(&mut self) -> Result<u8> {
        // only the low byte of the type word selects the segment geometry
        let word = self.vu()?;
        Ok((word & 0xFF) as u8)
    }

    // --- skip-only pass used for exact output sizing ---

    fn measure(&mut self) -> Result<usize> {
        self.rdr.seek_to(0)?;
        if self.rdr.is_empty() {
            return Err(Error::malformed("empty geometry blob"));
        }
        let word = self.shape_word()?;
        let flags = ShapeFlags::parse(word)?;
        self.check_streams(&flags)?;
        let size = match flags.class() {
            GeometryClass::Null => 4,
            GeometryClass::Point => {
                4 + 16
                    + if flags.has_z { 8 } else { 0 }
                    + if flags.has_m { 8 } else { 0 }
                    + if flags.has_id { 4 } else { 0 }
            }
            GeometryClass::Multipoint => {
                let n = self.count("point count")?;
                4 + 32
                    + 4
                    + 16 * n
                    + if flags.has_z { 16 + 8 * n } else { 0 }
                    + if flags.has_m { 16 + 8 * n } else { 0 }
                    + if flags.has_id { 4 * n } else { 0 }
            }
            GeometryClass::Polyline | GeometryClass::Polygon => {
                self.measure_multipart(&flags)?
            }
            GeometryClass::Envelope | GeometryClass::MultiPatch | GeometryClass::GeometryBag => {
                return Err(Error::malformed("shape class cannot appear in a blob"));
            }
        };
        Ok(size)
    }

    fn measure_multipart(&mut self, flags: &ShapeFlags) -> Result<usize> {
        let may_have_curves = flags.may_have_curves();
        let fixed = 4 + 32 + 8;
        let n = self.count("point count")?;
        if n == 0 {
            return Ok(fixed
                + if flags.has_z { 16 } else { 0 }
                + if flags.has_m { 16 } else { 0 }
                + if may_have_curves { 4 } else { 0 });
        }
        let p = self.count("part count")?;
        let c = if may_have_curves {
            self.count("curve count")?
        } else {
            0
        };
        // box
        for _ in 0..4 {
            self.vu()?;
        }
        // explicit part sizes
        for _ in 0..p.saturating_sub(1) {
            self.vu()?;
        }
        // coordinate streams
        for _ in 0..2 * n {
            self.vi()?;
        }
        if flags.has_z {
            for _ in 0..n {
                self.vi()?;
            }
        }
        if flags.has_m {
            self.skip_m_deltas(n)?;
        }
        // curve records: only the type byte decides the record width
        let mut curve_bytes = 0usize;
        for _ in 0..c {
            self.vu()?;
            let type_code = self.curve_type()?;
            let payload = CurveKind::payload_size_for(i32::from(type_code));
            if payload == 0 {
                return Err(Error::malformed(format!(
                    "curve segment type {type_code} cannot appear as a modifier"
                )));
            }
            self.rdr.skip(payload as u64)?;
            curve_bytes += 8 + payload;
        }
        Ok(fixed
            + 4 * p
            + 16 * n
            + if flags.has_z { 16 + 8 * n } else { 0 }
            + if flags.has_m { 16 + 8 * n } else { 0 }
            + if may_have_curves { 4 + curve_bytes } else { 0 }
            + if flags.has_id { 4 * n } else { 0 })
    }

    fn skip_m_deltas(&mut self, n: usize) -> Result<()> {
        let mut dm = 0i64;
        for _ in 0..n {
            if dm != ALL_REMAINING_NAN {
                dm = dm.wrapping_add(self.vi()?);
            }
        }
        Ok(())
    }
}

/// Running-sum sentinel: every remaining measure is undefined
const ALL_REMAINING_NAN: i64 = -2;

#[allow(clippy::cast_possible_truncation)]
const fn truncate_id(id: i64) -> i32 {
    id as i32
}

#[derive(Debug)]
struct MinMax {
    min: f64,
    max: f64,
}

impl Default for MinMax {
    fn default() -> Self {
        Self {
            min: f64::NAN,
            max: f64::NAN,
        }
    }
}

impl MinMax {
    fn update(&mut self, value: f64) {
        if value.is_finite() {
            if self.min.is_nan() {
                self.min = value;
                self.max = value;
            } else {
                self.min = self.min.min(value);
                self.max = self.max.max(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ShapeType, HAS_Z_FLAG};
    use crate::testutil::{encode_varint, encode_varuint};

    fn def_with_scale(scale: f64) -> GeometryDef {
        GeometryDef::builder().xy_scale(scale).build()
    }

    fn decode(bytes: &[u8], def: &GeometryDef) -> Result<Shape> {
        let mut builder = ShapeBuilder::new();
        GeometryBlobReader::new(bytes, def)?.read_into(&mut builder)?;
        builder.to_shape()
    }

    fn push_vu(buf: &mut Vec<u8>, v: u64) {
        encode_varuint(buf, v);
    }

    fn push_vi(buf: &mut Vec<u8>, v: i64) {
        encode_varint(buf, v);
    }

    #[test]
    fn empty_point_with_z_decodes_to_nans() {
        let def = GeometryDef::builder().xy_scale(1.0).has_z(true).build();
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::GeneralPoint as u8) | u64::from(HAS_Z_FLAG));
        blob.extend_from_slice(&[0x00, 0x00, 0x00]);
        let Shape::Point(point) = decode(&blob, &def).unwrap() else {
            panic!("expected a point");
        };
        assert!(point.x.is_nan() && point.y.is_nan());
        assert!(point.z.unwrap().is_nan());

        // the buffer rendering stores a zero Z for the empty point
        let buffer = GeometryBlobReader::new(&blob, &def)
            .unwrap()
            .read_shape_buffer()
            .unwrap();
        assert_eq!(f64::from_le_bytes(buffer[20..28].try_into().unwrap()), 0.0);
    }

    #[test]
    fn point_coordinates_are_offset_by_one() {
        let def = GeometryDef::builder()
            .x_origin(-400.0)
            .y_origin(-400.0)
            .xy_scale(100.0)
            .build();
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::Point as u8));
        push_vu(&mut blob, 40_001); // (40001 - 1) / 100 - 400 = 0
        push_vu(&mut blob, 40_101); // 1
        let Shape::Point(point) = decode(&blob, &def).unwrap() else {
            panic!("expected a point");
        };
        assert!((point.x - 0.0).abs() < 1e-9);
        assert!((point.y - 1.0).abs() < 1e-9);
    }

    fn open_polyline_blob() -> (Vec<u8>, GeometryDef) {
        // single-part polyline through (0,0), (1,0), (2,1) at scale 1000
        let def = def_with_scale(1000.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::Polyline as u8));
        push_vu(&mut blob, 3); // points
        push_vu(&mut blob, 1); // parts
        push_vu(&mut blob, 0); // xmin
        push_vu(&mut blob, 0); // ymin
        push_vu(&mut blob, 2000); // xmax offset
        push_vu(&mut blob, 1000); // ymax offset
        for (dx, dy) in [(0, 0), (1000, 0), (1000, 1000)] {
            push_vi(&mut blob, dx);
            push_vi(&mut blob, dy);
        }
        (blob, def)
    }

    #[test]
    fn single_part_polyline_decodes() {
        let (blob, def) = open_polyline_blob();
        let Shape::Polyline(body) = decode(&blob, &def).unwrap() else {
            panic!("expected a polyline");
        };
        assert_eq!(body.xy, vec![(0.0, 0.0), (1.0, 0.0), (2.0, 1.0)]);
        assert_eq!(body.parts, vec![0]);
        let env = body.envelope;
        assert_eq!((env.xmin, env.ymin, env.xmax, env.ymax), (0.0, 0.0, 2.0, 1.0));
        for &(x, y) in &body.xy {
            assert!(env.contains(x, y));
        }
    }

    #[test]
    fn polyline_buffer_box_matches() {
        let (blob, def) = open_polyline_blob();
        let bytes = GeometryBlobReader::new(&blob, &def)
            .unwrap()
            .read_shape_buffer()
            .unwrap();
        let view = ShapeBuffer::new(bytes).unwrap();
        let env = view.envelope().unwrap();
        assert_eq!((env.xmin, env.ymin, env.xmax, env.ymax), (0.0, 0.0, 2.0, 1.0));
        assert_eq!(view.num_points(), 3);
        assert_eq!(view.part_starts().collect::<Vec<_>>(), vec![0]);
    }

    fn curved_polygon_blob() -> (Vec<u8>, GeometryDef) {
        // two parts of two vertices each, circular arc on segment 0
        let def = def_with_scale(1.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::GeneralPolygon as u8));
        push_vu(&mut blob, 4); // points
        push_vu(&mut blob, 2); // parts
        push_vu(&mut blob, 1); // curves
        for v in [0, 0, 10, 10] {
            push_vu(&mut blob, v); // box
        }
        push_vu(&mut blob, 2); // first part size; the last one is implicit
        for (dx, dy) in [(0, 0), (10, 0), (-10, 10), (10, 0)] {
            push_vi(&mut blob, dx);
            push_vi(&mut blob, dy);
        }
        push_vu(&mut blob, 0); // curve segment index
        push_vu(&mut blob, 1); // circular arc
        blob.extend_from_slice(&5.0f64.to_le_bytes());
        blob.extend_from_slice(&2.5f64.to_le_bytes());
        blob.extend_from_slice(&0x44i32.to_le_bytes());
        (blob, def)
    }

    #[test]
    fn two_part_polygon_with_arc_decodes() {
        let (blob, def) = curved_polygon_blob();
        let Shape::Polygon(body) = decode(&blob, &def).unwrap() else {
            panic!("expected a polygon");
        };
        assert_eq!(body.xy.len(), 4);
        assert_eq!(body.parts, vec![0, 2]);
        assert_eq!(body.curves.len(), 1);
        let curve = &body.curves[0];
        assert_eq!(curve.segment_index, 0);
        assert_eq!(
            curve.kind,
            CurveKind::CircularArc {
                params: [5.0, 2.5],
                bits: 0x44
            }
        );
    }

    #[test]
    fn curved_buffer_sizing_is_exact() {
        let (blob, def) = curved_polygon_blob();
        let mut reader = GeometryBlobReader::new(&blob, &def).unwrap();
        let measured = reader.measure().unwrap();
        let bytes = reader.read_shape_buffer().unwrap();
        assert_eq!(bytes.len(), measured);
        // type + box + counts + parts + xy + curve section
        assert_eq!(measured, 4 + 32 + 8 + 2 * 4 + 4 * 16 + 4 + (8 + 20));
        let view = ShapeBuffer::new(bytes).unwrap();
        assert_eq!(view.num_curves(), 1);
        assert_eq!(view.num_parts(), 2);
    }

    #[test]
    fn decode_is_idempotent() {
        let (blob, def) = curved_polygon_blob();
        let blob = GeometryBlob::new(blob, Arc::new(def));
        let first = blob.shape().unwrap().clone();
        let second = blob.shape().unwrap().clone();
        assert_eq!(first, second);
        let mut builder = ShapeBuilder::new();
        blob.read_into(&mut builder).unwrap();
        assert_eq!(builder.to_shape().unwrap(), first);
    }

    #[test]
    fn m_sentinels_surface_as_nan() {
        let def = GeometryDef::builder().xy_scale(1.0).has_m(true).m_scale(1.0).build();
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::PolylineM as u8));
        push_vu(&mut blob, 3);
        push_vu(&mut blob, 1);
        for v in [0, 0, 2, 0] {
            push_vu(&mut blob, v);
        }
        for (dx, dy) in [(1, 1), (1, 0), (1, 0)] {
            push_vi(&mut blob, dx);
            push_vi(&mut blob, dy);
        }
        // first m is nan (-1), recovers to 4, then drops to the -2 sentinel
        push_vi(&mut blob, -1);
        push_vi(&mut blob, 5);
        push_vi(&mut blob, -6);
        let Shape::Polyline(body) = decode(&blob, &def).unwrap() else {
            panic!("expected a polyline");
        };
        let m = body.m.unwrap();
        assert!(m[0].is_nan());
        assert_eq!(m[1], 4.0);
        assert!(m[2].is_nan());
    }

    #[test]
    fn all_remaining_m_sentinel_stops_the_stream() {
        let def = GeometryDef::builder().xy_scale(1.0).has_m(true).build();
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::PolylineM as u8));
        push_vu(&mut blob, 3);
        push_vu(&mut blob, 1);
        for v in [0, 0, 2, 0] {
            push_vu(&mut blob, v);
        }
        for (dx, dy) in [(1, 1), (1, 0), (1, 0)] {
            push_vi(&mut blob, dx);
            push_vi(&mut blob, dy);
        }
        // a single -2 delta covers all three measures
        push_vi(&mut blob, -2);
        let Shape::Polyline(body) = decode(&blob, &def).unwrap() else {
            panic!("expected a polyline");
        };
        assert!(body.m.unwrap().iter().all(|m| m.is_nan()));
    }

    #[test]
    fn negative_running_sum_is_nan() {
        let def = def_with_scale(10.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::Multipoint as u8));
        push_vu(&mut blob, 2);
        for v in [0, 0, 10, 10] {
            push_vu(&mut blob, v);
        }
        // second vertex dips the running x sum below zero
        for (dx, dy) in [(5, 5), (-8, 1)] {
            push_vi(&mut blob, dx);
            push_vi(&mut blob, dy);
        }
        let Shape::Multipoint(mp) = decode(&blob, &def).unwrap() else {
            panic!("expected a multipoint");
        };
        assert_eq!(mp.xy[0], (0.5, 0.5));
        assert!(mp.xy[1].0.is_nan());
        assert_eq!(mp.xy[1].1, 0.6);
    }

    #[test]
    fn z_without_z_definition_is_missing_context() {
        let def = def_with_scale(1.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::PointZ as u8));
        blob.extend_from_slice(&[0x00, 0x00, 0x00]);
        assert!(matches!(
            decode(&blob, &def),
            Err(Error::MissingContext(_))
        ));
    }

    #[test]
    fn trailing_bytes_fail_validation_only() {
        let (mut blob, def) = open_polyline_blob();
        blob.push(0x00);
        assert!(matches!(decode(&blob, &def), Err(Error::MalformedBlob(_))));
        let mut builder = ShapeBuilder::new();
        GeometryBlobReader::new(&blob, &def)
            .unwrap()
            .with_validation(false)
            .read_into(&mut builder)
            .unwrap();
        assert_eq!(builder.num_points(), 3);
    }

    #[test]
    fn straight_line_and_spiral_modifiers_are_rejected() {
        for (type_code, is_unsupported) in [(2u64, false), (3u64, true)] {
            let def = def_with_scale(1.0);
            let mut blob = Vec::new();
            push_vu(&mut blob, u64::from(ShapeType::GeneralPolyline as u8));
            push_vu(&mut blob, 2);
            push_vu(&mut blob, 1);
            push_vu(&mut blob, 1);
            for v in [0, 0, 1, 1] {
                push_vu(&mut blob, v);
            }
            for (dx, dy) in [(1, 1), (1, 1)] {
                push_vi(&mut blob, dx);
                push_vi(&mut blob, dy);
            }
            push_vu(&mut blob, 0);
            push_vu(&mut blob, type_code);
            let err = decode(&blob, &def).unwrap_err();
            if is_unsupported {
                assert!(matches!(err, Error::UnsupportedFormat(_)));
            } else {
                assert!(matches!(err, Error::MalformedBlob(_)));
            }
        }
    }

    #[test]
    fn part_count_cannot_exceed_point_count() {
        let def = def_with_scale(1.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::Polyline as u8));
        push_vu(&mut blob, 2);
        push_vu(&mut blob, 5);
        assert!(matches!(decode(&blob, &def), Err(Error::MalformedBlob(_))));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let (blob, def) = open_polyline_blob();
        assert!(matches!(
            decode(&blob[..blob.len() - 2], &def),
            Err(Error::MalformedBlob(_))
        ));
        assert!(matches!(decode(&[], &def), Err(Error::MalformedBlob(_))));
    }

    #[test]
    fn empty_multipart_renders_a_nan_box() {
        let def = def_with_scale(1.0);
        let mut blob = Vec::new();
        push_vu(&mut blob, u64::from(ShapeType::Polyline as u8));
        push_vu(&mut blob, 0);
        let bytes = GeometryBlobReader::new(&blob, &def)
            .unwrap()
            .read_shape_buffer()
            .unwrap();
        let view = ShapeBuffer::new(bytes).unwrap();
        assert_eq!(view.num_points(), 0);
        assert_eq!(view.num_parts(), 0);
        assert!(view.envelope().unwrap().is_empty());
    }
}
