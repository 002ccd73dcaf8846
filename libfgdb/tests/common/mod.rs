//! Byte-level writers that synthesize minimal `.gdb` directories for the
//! integration tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::Path;

pub fn encode_varuint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn encode_varint(buf: &mut Vec<u8>, value: i64) {
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut first = (magnitude & 0x3F) as u8;
    if negative {
        first |= 0x40;
    }
    magnitude >>= 6;
    if magnitude != 0 {
        first |= 0x80;
    }
    buf.push(first);
    while magnitude != 0 {
        let mut byte = (magnitude & 0x7F) as u8;
        magnitude >>= 7;
        if magnitude != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
    }
}

/// Geometry-field parameters for a synthetic table
#[derive(Clone, Copy)]
pub struct GeomParams {
    pub geometry_type: u8,
    pub xy_scale: f64,
    pub has_z: bool,
    pub has_m: bool,
}

impl GeomParams {
    pub const fn point(xy_scale: f64) -> Self {
        Self {
            geometry_type: 1,
            xy_scale,
            has_z: false,
            has_m: false,
        }
    }
}

/// One field of a synthetic table
pub enum FieldDef {
    ObjectId(&'static str),
    String(&'static str, bool),
    Int32(&'static str, bool),
    Double(&'static str, bool),
    DateTime(&'static str, bool),
    Geometry(&'static str, GeomParams),
}

impl FieldDef {
    fn name(&self) -> &'static str {
        match self {
            Self::ObjectId(name)
            | Self::String(name, _)
            | Self::Int32(name, _)
            | Self::Double(name, _)
            | Self::DateTime(name, _)
            | Self::Geometry(name, _) => *name,
        }
    }

    const fn type_code(&self) -> u8 {
        match self {
            Self::ObjectId(_) => 6,
            Self::String(..) => 4,
            Self::Int32(..) => 1,
            Self::Double(..) => 3,
            Self::DateTime(..) => 5,
            Self::Geometry(..) => 7,
        }
    }

    fn nullable(&self) -> bool {
        match self {
            Self::ObjectId(_) => false,
            Self::String(_, nullable)
            | Self::Int32(_, nullable)
            | Self::Double(_, nullable)
            | Self::DateTime(_, nullable) => *nullable,
            Self::Geometry(..) => true,
        }
    }
}

/// One row value; the object-id column takes a placeholder cell that
/// writes no bytes
#[derive(Clone)]
pub enum Cell {
    Null,
    ObjectId,
    Str(String),
    Int32(i32),
    Double(f64),
    DateTime(f64),
    Geometry(Vec<u8>),
}

/// A synthetic table: schema plus rows; a `None` row is deleted
pub struct TableSpec {
    pub fields: Vec<FieldDef>,
    pub rows: Vec<Option<Vec<Cell>>>,
    pub use_utf8: bool,
}

fn push_utf16_name(buf: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    buf.push(u8::try_from(units.len()).expect("short test name"));
    for unit in units {
        buf.extend_from_slice(&unit.to_le_bytes());
    }
}

fn write_field_descriptor(buf: &mut Vec<u8>, field: &FieldDef) {
    push_utf16_name(buf, field.name());
    push_utf16_name(buf, "");
    buf.push(field.type_code());
    let nullable_bit = u8::from(field.nullable());
    match field {
        FieldDef::ObjectId(_) => {
            buf.extend_from_slice(&[4, 2]);
        }
        FieldDef::String(..) => {
            buf.extend_from_slice(&100i32.to_le_bytes());
            buf.push(nullable_bit);
        }
        FieldDef::Int32(..) => {
            buf.extend_from_slice(&[4, nullable_bit, 0]);
        }
        FieldDef::Double(..) | FieldDef::DateTime(..) => {
            buf.extend_from_slice(&[8, nullable_bit, 0]);
        }
        FieldDef::Geometry(_, params) => {
            buf.push(0);
            buf.push(nullable_bit);
            let wkt: Vec<u16> = "GEOGCS[\"GCS_WGS_1984\"]".encode_utf16().collect();
            buf.extend_from_slice(&i16::try_from(wkt.len() * 2).unwrap().to_le_bytes());
            for unit in &wkt {
                buf.extend_from_slice(&unit.to_le_bytes());
            }
            let mut gflags = 0u8;
            if params.has_m {
                gflags |= 0b10;
            }
            if params.has_z {
                gflags |= 0b100;
            }
            buf.push(gflags);
            buf.extend_from_slice(&0.0f64.to_le_bytes());
            buf.extend_from_slice(&0.0f64.to_le_bytes());
            buf.extend_from_slice(&params.xy_scale.to_le_bytes());
            if params.has_m {
                buf.extend_from_slice(&0.0f64.to_le_bytes());
                buf.extend_from_slice(&1000.0f64.to_le_bytes());
            }
            if params.has_z {
                buf.extend_from_slice(&0.0f64.to_le_bytes());
                buf.extend_from_slice(&1000.0f64.to_le_bytes());
            }
            buf.extend_from_slice(&0.001f64.to_le_bytes());
            if params.has_m {
                buf.extend_from_slice(&0.001f64.to_le_bytes());
            }
            if params.has_z {
                buf.extend_from_slice(&0.001f64.to_le_bytes());
            }
            for corner in [-180.0f64, -90.0, 180.0, 90.0] {
                buf.extend_from_slice(&corner.to_le_bytes());
            }
            if params.has_z {
                buf.extend_from_slice(&0.0f64.to_le_bytes());
                buf.extend_from_slice(&1000.0f64.to_le_bytes());
            }
            if params.has_m {
                buf.extend_from_slice(&0.0f64.to_le_bytes());
                buf.extend_from_slice(&1000.0f64.to_le_bytes());
            }
            buf.push(0);
            buf.extend_from_slice(&1i32.to_le_bytes());
            buf.extend_from_slice(&1.0f64.to_le_bytes());
        }
    }
}

fn fields_section(spec: &TableSpec) -> Vec<u8> {
    let geometry = spec.fields.iter().find_map(|f| match f {
        FieldDef::Geometry(_, params) => Some(*params),
        _ => None,
    });
    let mut body = Vec::new();
    body.extend_from_slice(&4i32.to_le_bytes());
    let mut flags = u32::from(geometry.map_or(0, |g| g.geometry_type));
    if spec.use_utf8 {
        flags |= 1 << 8;
    }
    if geometry.is_some_and(|g| g.has_z) {
        flags |= 1 << 31;
    }
    if geometry.is_some_and(|g| g.has_m) {
        flags |= 1 << 30;
    }
    body.extend_from_slice(&flags.to_le_bytes());
    body.extend_from_slice(&i16::try_from(spec.fields.len()).unwrap().to_le_bytes());
    for field in &spec.fields {
        write_field_descriptor(&mut body, field);
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&i32::try_from(body.len()).unwrap().to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

fn write_row_payload(spec: &TableSpec, cells: &[Cell]) -> Vec<u8> {
    assert_eq!(cells.len(), spec.fields.len(), "one cell per field");
    let mut body = Vec::new();
    let null_flags: Vec<bool> = spec
        .fields
        .iter()
        .zip(cells)
        .filter(|(field, _)| field.nullable())
        .map(|(_, cell)| matches!(cell, Cell::Null))
        .collect();
    if !null_flags.is_empty() {
        let mut bitmap = vec![0u8; (null_flags.len() + 7) / 8];
        for (i, &is_null) in null_flags.iter().enumerate() {
            if is_null {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        body.extend_from_slice(&bitmap);
    }
    for (field, cell) in spec.fields.iter().zip(cells) {
        if matches!(field, FieldDef::ObjectId(_)) || matches!(cell, Cell::Null) {
            continue;
        }
        match cell {
            Cell::Str(text) => {
                let bytes: Vec<u8> = if spec.use_utf8 {
                    text.as_bytes().to_vec()
                } else {
                    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
                };
                encode_varuint(&mut body, bytes.len() as u64);
                body.extend_from_slice(&bytes);
            }
            Cell::Int32(v) => body.extend_from_slice(&v.to_le_bytes()),
            Cell::Double(v) | Cell::DateTime(v) => body.extend_from_slice(&v.to_le_bytes()),
            Cell::Geometry(blob) => {
                encode_varuint(&mut body, blob.len() as u64);
                body.extend_from_slice(blob);
            }
            Cell::Null | Cell::ObjectId => {}
        }
    }
    body
}

/// Writes `{base}.gdbtable` and `{base}.gdbtablx` for `spec` into `dir`
pub fn write_table(dir: impl AsRef<Path>, oid: i64, spec: &TableSpec) -> io::Result<()> {
    let dir = dir.as_ref();
    let base = format!("a{oid:08x}");
    let section = fields_section(spec);

    let header_len = 40u64;
    let fields_offset = header_len;
    let mut rows_blob = Vec::new();
    let mut offsets = Vec::with_capacity(spec.rows.len());
    let rows_start = header_len + section.len() as u64;
    for row in &spec.rows {
        match row {
            Some(cells) => {
                let payload = write_row_payload(spec, cells);
                offsets.push(rows_start + rows_blob.len() as u64);
                rows_blob.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_le_bytes());
                rows_blob.extend_from_slice(&payload);
            }
            None => offsets.push(0),
        }
    }

    let live_rows = i32::try_from(spec.rows.iter().filter(|r| r.is_some()).count()).unwrap();
    let file_size = header_len + section.len() as u64 + rows_blob.len() as u64;
    let mut table = Vec::new();
    table.extend_from_slice(&3i32.to_le_bytes());
    table.extend_from_slice(&live_rows.to_le_bytes());
    table.extend_from_slice(&512i32.to_le_bytes());
    table.extend_from_slice(&5i32.to_le_bytes());
    table.extend_from_slice(&[0u8; 8]);
    table.extend_from_slice(&i64::try_from(file_size).unwrap().to_le_bytes());
    table.extend_from_slice(&i64::try_from(fields_offset).unwrap().to_le_bytes());
    table.extend_from_slice(&section);
    table.extend_from_slice(&rows_blob);
    fs::write(dir.join(format!("{base}.gdbtable")), table)?;

    let num_rows = u32::try_from(spec.rows.len()).unwrap();
    let num_blocks = num_rows.div_ceil(1024);
    let mut tablx = Vec::new();
    tablx.extend_from_slice(&3i32.to_le_bytes());
    tablx.extend_from_slice(&num_blocks.to_le_bytes());
    tablx.extend_from_slice(&num_rows.to_le_bytes());
    tablx.extend_from_slice(&4i32.to_le_bytes());
    for slot in 0..(num_blocks as usize * 1024) {
        let offset = offsets.get(slot).copied().unwrap_or(0);
        tablx.extend_from_slice(&u32::try_from(offset).unwrap().to_le_bytes());
    }
    // dense trailer: no block map
    tablx.extend_from_slice(&0u32.to_le_bytes());
    tablx.extend_from_slice(&0u32.to_le_bytes());
    tablx.extend_from_slice(&num_blocks.to_le_bytes());
    tablx.extend_from_slice(&0u32.to_le_bytes());
    fs::write(dir.join(format!("{base}.gdbtablx")), tablx)?;
    Ok(())
}

/// Writes the catalog table (object identifier 1) listing `entries` as
/// `(name, format)` pairs keyed by row position: the first entry gets
/// object identifier 1.
pub fn write_catalog(
    dir: impl AsRef<Path>,
    entries: &[(&str, i32)],
    use_utf8: bool,
) -> io::Result<()> {
    let spec = TableSpec {
        fields: vec![
            FieldDef::ObjectId("OBJECTID"),
            FieldDef::String("Name", true),
            FieldDef::Int32("FileFormat", true),
        ],
        rows: entries
            .iter()
            .map(|(name, format)| {
                Some(vec![
                    Cell::ObjectId,
                    Cell::Str((*name).to_owned()),
                    Cell::Int32(*format),
                ])
            })
            .collect(),
        use_utf8,
    };
    write_table(dir, 1, &spec)
}

/// A point geometry blob at `(x, y)`, quantized by `xy_scale`
pub fn point_blob(x: f64, y: f64, xy_scale: f64) -> Vec<u8> {
    let mut blob = Vec::new();
    encode_varuint(&mut blob, 1);
    encode_varuint(&mut blob, (x * xy_scale + 1.0) as u64);
    encode_varuint(&mut blob, (y * xy_scale + 1.0) as u64);
    blob
}

/// An empty point geometry blob
pub fn empty_point_blob() -> Vec<u8> {
    vec![0x01, 0x00, 0x00]
}
