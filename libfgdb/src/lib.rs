//! # libfgdb
//!
//! This library provides read-only access to Esri File Geodatabase (FGDB)
//! directories: the `.gdb` folders produced by ArcGIS, holding a set of
//! relational tables persisted as small families of binary files.
//!
//! A consumer opens the directory, enumerates the catalog (the table of
//! tables, stored under object identifier 1), opens a table by name or
//! identifier, and iterates its rows or reads one row by object
//! identifier. Geometry-typed fields yield a [`geometry::GeometryBlob`]
//! that decodes on demand to an unpacked [`geometry::Shape`] or to the
//! Esri Extended Shape Buffer byte format.
//!
//! ### File family
//!
//! Each table with object identifier `N` is stored under the base name
//! `aXXXXXXXX` (lowercase 8-digit hex of `N`):
//!
//! - `{base}.gdbtable`: row data, headers and field descriptors
//! - `{base}.gdbtablx`: maps object identifiers to row byte offsets
//! - `{base}.gdbindexes`: index definitions (read on demand)
//! - `{base}.{index}.atx` / `.spx`: attribute/spatial indexes (not read)
//!
//! ### Limitations
//!
//! Everything is read-only: no writes, no transactional semantics. The
//! spatial and attribute indexes are never traversed, so there is no
//! query filtering. MultiPatch and GeometryBag geometries, raster fields
//! and the date-only/time-only/offset timestamp field types are rejected
//! when encountered.
//!
//! ### Usage
//!
//! Opening a geodatabase and scanning a table:
//!
//! ```no_run
//! use libfgdb::Database;
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = Database::open("data/parcels.gdb")?;
//!     for entry in db.catalog().entries() {
//!         println!("{:>4}  {}", entry.id, entry.name);
//!     }
//!     let mut table = db.open_table("Parcels")?;
//!     for row in table.scan() {
//!         let (oid, values) = row?;
//!         println!("{oid}: {} fields", values.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Decoding a standalone geometry blob against its quantization
//! parameters:
//!
//! ```
//! use libfgdb::geometry::{GeometryBlob, Shape};
//! use libfgdb::table::GeometryDef;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let def = Arc::new(GeometryDef::builder().xy_scale(100.0).build());
//!     // a point at (0.25, 0.5): coordinates quantize to value * scale + 1
//!     let blob = GeometryBlob::new(vec![0x01, 26, 51], def);
//!     let Shape::Point(point) = blob.shape()? else {
//!         anyhow::bail!("expected a point");
//!     };
//!     assert_eq!((point.x, point.y), (0.25, 0.5));
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

mod catalog;
mod database;
mod error;
/// Module containing geometry types and the two geometry byte codecs
pub mod geometry;
mod reader;
/// Module containing table, field and row-value types
pub mod table;

pub use catalog::{is_system_table, Catalog, CatalogEntry};
pub use database::Database;
pub use error::{Error, Result};
pub use geometry::{GeometryBlob, Shape, ShapeBuffer, ShapeBuilder, ShapeType};
pub use reader::ByteReader;
pub use table::{FieldDescriptor, FieldType, TableReader, Value};

/// Object identifier of the catalog table
pub const CATALOG_OBJECT_ID: i64 = 1;

pub(crate) const TABLE_DATA_EXT: &str = "gdbtable";
pub(crate) const OFFSET_INDEX_EXT: &str = "gdbtablx";
pub(crate) const INDEXES_EXT: &str = "gdbindexes";

/// Data-file base name for a table object identifier (`a` + 8 hex digits)
#[must_use]
pub fn table_base_name(oid: i64) -> String {
    format!("a{oid:08x}")
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Byte-level writers for synthetic on-disk structures, test-only.

    /// Declared width written for text fields
    pub const TEXT_FIELD_WIDTH: i32 = 100;
    /// XY scale written into geometry descriptors
    pub const GEOMETRY_XY_SCALE: f64 = 10_000.0;
    /// Spatial reference written into geometry descriptors
    pub const GEOMETRY_WKT: &str = "GEOGCS[\"GCS_WGS_1984\"]";

    pub fn encode_varuint(buf: &mut Vec<u8>, mut value: u64) {
        loop {
            #[allow(clippy::cast_possible_truncation)]
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
        #[allow(clippy::cast_possible_truncation)]
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
            #[allow(clippy::cast_possible_truncation)]
            let mut byte = (magnitude & 0x7F) as u8;
            magnitude >>= 7;
            if magnitude != 0 {
                byte |= 0x80;
            }
            buf.push(byte);
        }
    }

    /// A field to synthesize into a fields section
    pub struct FieldSpec {
        pub name: &'static str,
        pub kind: FieldKind,
        pub nullable: bool,
    }

    pub enum FieldKind {
        ObjectId,
        String,
        Double,
        /// Geometry with a dimension tag: `'n'`, `'z'` or `'m'`
        Geometry(char),
    }

    impl FieldSpec {
        pub const fn object_id(name: &'static str) -> Self {
            Self {
                name,
                kind: FieldKind::ObjectId,
                nullable: false,
            }
        }

        pub const fn string(name: &'static str, nullable: bool) -> Self {
            Self {
                name,
                kind: FieldKind::String,
                nullable,
            }
        }

        pub const fn double(name: &'static str, nullable: bool) -> Self {
            Self {
                name,
                kind: FieldKind::Double,
                nullable,
            }
        }

        pub const fn geometry(name: &'static str, dimension: char) -> Self {
            Self {
                name,
                kind: FieldKind::Geometry(dimension),
                nullable: true,
            }
        }
    }

    fn push_utf16_name(buf: &mut Vec<u8>, text: &str) {
        let units: Vec<u16> = text.encode_utf16().collect();
        buf.push(u8::try_from(units.len()).expect("short test name"));
        for unit in units {
            buf.extend_from_slice(&unit.to_le_bytes());
        }
    }

    /// A v3 data-file header with the fields section at `fields_offset`
    pub fn data_file_header_v3(
        row_count: i32,
        max_entry_size: i32,
        file_size: i64,
        fields_offset: i64,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3i32.to_le_bytes());
        buf.extend_from_slice(&row_count.to_le_bytes());
        buf.extend_from_slice(&max_entry_size.to_le_bytes());
        buf.extend_from_slice(&5i32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&file_size.to_le_bytes());
        buf.extend_from_slice(&fields_offset.to_le_bytes());
        buf
    }

    /// A complete fields section for `specs`
    pub fn fields_section(
        specs: &[FieldSpec],
        use_utf8: bool,
        geometry_type: u8,
        has_z: bool,
        has_m: bool,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&4i32.to_le_bytes());
        let mut flags = u32::from(geometry_type);
        if use_utf8 {
            flags |= 1 << 8;
        }
        if has_z {
            flags |= 1 << 31;
        }
        if has_m {
            flags |= 1 << 30;
        }
        body.extend_from_slice(&flags.to_le_bytes());
        body.extend_from_slice(
            &i16::try_from(specs.len()).expect("few test fields").to_le_bytes(),
        );
        for spec in specs {
            push_utf16_name(&mut body, spec.name);
            push_utf16_name(&mut body, "");
            let nullable_bit = u8::from(spec.nullable);
            match spec.kind {
                FieldKind::ObjectId => {
                    body.push(6);
                    body.extend_from_slice(&[4, 2]);
                }
                FieldKind::String => {
                    body.push(4);
                    body.extend_from_slice(&TEXT_FIELD_WIDTH.to_le_bytes());
                    body.push(nullable_bit);
                }
                FieldKind::Double => {
                    body.push(3);
                    body.extend_from_slice(&[8, nullable_bit, 0]);
                }
                FieldKind::Geometry(dimension) => {
                    body.push(7);
                    body.push(0);
                    body.push(nullable_bit);
                    let units: Vec<u16> = GEOMETRY_WKT.encode_utf16().collect();
                    body.extend_from_slice(
                        &i16::try_from(units.len() * 2).expect("short wkt").to_le_bytes(),
                    );
                    for unit in &units {
                        body.extend_from_slice(&unit.to_le_bytes());
                    }
                    let mut gflags = 0u8;
                    if dimension == 'm' {
                        gflags |= 0b10;
                    }
                    if dimension == 'z' {
                        gflags |= 0b100;
                    }
                    body.push(gflags);
                    for origin in [0.0f64, 0.0] {
                        body.extend_from_slice(&origin.to_le_bytes());
                    }
                    body.extend_from_slice(&GEOMETRY_XY_SCALE.to_le_bytes());
                    if dimension == 'm' {
                        body.extend_from_slice(&0.0f64.to_le_bytes());
                        body.extend_from_slice(&1000.0f64.to_le_bytes());
                    }
                    if dimension == 'z' {
                        body.extend_from_slice(&0.0f64.to_le_bytes());
                        body.extend_from_slice(&1000.0f64.to_le_bytes());
                    }
                    // tolerances
                    body.extend_from_slice(&0.001f64.to_le_bytes());
                    if dimension == 'm' {
                        body.extend_from_slice(&0.001f64.to_le_bytes());
                    }
                    if dimension == 'z' {
                        body.extend_from_slice(&0.001f64.to_le_bytes());
                    }
                    for corner in [-180.0f64, -90.0, 180.0, 90.0] {
                        body.extend_from_slice(&corner.to_le_bytes());
                    }
                    if has_z {
                        body.extend_from_slice(&0.0f64.to_le_bytes());
                        body.extend_from_slice(&8848.0f64.to_le_bytes());
                    }
                    if has_m {
                        body.extend_from_slice(&0.0f64.to_le_bytes());
                        body.extend_from_slice(&100.0f64.to_le_bytes());
                    }
                    body.push(0);
                    body.extend_from_slice(&1i32.to_le_bytes());
                    body.extend_from_slice(&1.0f64.to_le_bytes());
                }
            }
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(
            &i32::try_from(body.len()).expect("small test section").to_le_bytes(),
        );
        buf.extend_from_slice(&body);
        buf
    }
}
