pub(crate) mod field;
pub(crate) mod header;
pub(crate) mod index;
pub(crate) mod indexes;

pub use field::{datetime_from_days, FieldDescriptor, FieldType, GeometryDef, Value};
pub use index::OffsetIndexReader;
pub use indexes::IndexDef;

use crate::error::{Error, Result};
use crate::geometry::GeometryBlob;
use crate::reader::ByteReader;
use crate::{table_base_name, INDEXES_EXT, OFFSET_INDEX_EXT, TABLE_DATA_EXT};
use header::{DataFileHeader, FieldsSection};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reader over one table: its data file plus its offset index.
///
/// A table reader owns both underlying byte sources; dropping it closes
/// them. It is a single-cursor reader and not meant for concurrent use.
#[derive(Debug)]
pub struct TableReader {
    directory: PathBuf,
    base_name: String,
    data: ByteReader<BufReader<File>>,
    index: OffsetIndexReader<BufReader<File>>,
    header: DataFileHeader,
    schema: FieldsSection,
    index_defs: Option<Vec<IndexDef>>,
}

impl TableReader {
    /// Opens the table with object identifier `oid` inside `directory`.
    ///
    /// # Errors
    ///
    /// Fails when either backing file is missing or unreadable, or when a
    /// header is unsupported or malformed.
    pub fn open<P: AsRef<Path>>(directory: P, oid: i64) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let base_name = table_base_name(oid);
        let data_path = directory.join(format!("{base_name}.{TABLE_DATA_EXT}"));
        let index_path = directory.join(format!("{base_name}.{OFFSET_INDEX_EXT}"));
        debug!(path = %data_path.display(), "opening table");
        let mut data = ByteReader::open(&data_path)?;
        let index = OffsetIndexReader::open(&index_path)?;
        let header = DataFileHeader::read(&mut data)?;
        let fields_offset = u64::try_from(header.fields_offset)
            .map_err(|_| Error::malformed("negative fields section offset"))?;
        data.seek_to(fields_offset)?;
        let schema = FieldsSection::read(&mut data)?;
        if u64::try_from(header.file_size) != Ok(data.len()) {
            warn!(
                declared = header.file_size,
                actual = data.len(),
                "data file length differs from its declared size"
            );
        }
        debug!(
            rows = header.row_count,
            max_entry_size = header.max_entry_size,
            fields = schema.fields.len(),
            "table opened"
        );
        Ok(Self {
            directory,
            base_name,
            data,
            index,
            header,
            schema,
            index_defs: None,
        })
    }

    /// The table's field descriptors, in schema order
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.schema.fields
    }

    /// Number of live rows the data file declares
    #[must_use]
    pub const fn row_count(&self) -> i64 {
        self.header.row_count
    }

    /// Data-file format version (3 or 4)
    #[must_use]
    pub const fn version(&self) -> i32 {
        self.header.version
    }

    /// Highest addressable object identifier, deleted rows included
    #[must_use]
    pub const fn max_object_id(&self) -> i64 {
        self.index.max_object_id()
    }

    /// Whether row strings are UTF-8 (UTF-16LE otherwise)
    #[must_use]
    pub const fn use_utf8(&self) -> bool {
        self.schema.use_utf8
    }

    /// Fields-section schema version (3, 4 or 6)
    #[must_use]
    pub const fn schema_version(&self) -> i32 {
        self.schema.schema_version
    }

    /// Geometry-type byte from the fields-section flags word
    #[must_use]
    pub const fn geometry_type(&self) -> u8 {
        self.schema.geometry_type
    }

    /// Whether the table's geometries carry Z values
    #[must_use]
    pub const fn has_z(&self) -> bool {
        self.schema.has_z
    }

    /// Whether the table's geometries carry M values
    #[must_use]
    pub const fn has_m(&self) -> bool {
        self.schema.has_m
    }

    /// The geometry field descriptor, when the table has one
    #[must_use]
    pub fn geometry_field(&self) -> Option<&FieldDescriptor> {
        self.schema
            .fields
            .iter()
            .find(|f| f.field_type == FieldType::Geometry)
    }

    /// The index definitions from `{base}.gdbindexes`, read on first use.
    /// A missing definitions file yields an empty list.
    ///
    /// # Errors
    ///
    /// Fails when the definitions file exists but cannot be parsed.
    pub fn indexes(&mut self) -> Result<&[IndexDef]> {
        if self.index_defs.is_none() {
            let path = self
                .directory
                .join(format!("{}.{INDEXES_EXT}", self.base_name));
            let defs = if path.is_file() {
                let mut rdr = ByteReader::open(&path)?;
                IndexDef::read_all(&mut rdr)?
            } else {
                trace!(path = %path.display(), "no index definitions file");
                Vec::new()
            };
            self.index_defs = Some(defs);
        }
        Ok(self.index_defs.as_deref().unwrap_or_default())
    }

    /// Reads the row with object identifier `oid`, or `None` when the row
    /// is deleted or absent.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors and on malformed or unsupported row payloads.
    pub fn read_row(&mut self, oid: i64) -> Result<Option<Vec<Value>>> {
        let Some(offset) = self.index.row_offset(oid)? else {
            return Ok(None);
        };
        self.decode_row(oid, offset).map(Some)
    }

    /// Streams all live rows in ascending object-identifier order
    pub fn scan(&mut self) -> Rows<'_> {
        let max_object_id = self.max_object_id();
        Rows {
            table: self,
            next_oid: 1,
            max_object_id,
        }
    }

    fn decode_row(&mut self, oid: i64, offset: u64) -> Result<Vec<Value>> {
        let Self { data, schema, .. } = self;
        data.seek_to(offset)?;
        let row_size = data.read_u32()?;
        let end = offset + 4 + u64::from(row_size);

        let null_bits = if schema.nullable_count > 0 {
            data.read_bytes((schema.nullable_count + 7) / 8)?
        } else {
            Vec::new()
        };
        let mut null_cursor = 0usize;
        let mut values = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let is_null = field.nullable && {
                let bit = null_bits[null_cursor / 8] >> (null_cursor % 8) & 1;
                null_cursor += 1;
                bit == 1
            };
            if is_null {
                values.push(Value::Null);
            } else {
                values.push(decode_value(data, field, oid, schema.use_utf8)?);
            }
        }

        let pos = data.position()?;
        if pos > end {
            return Err(Error::malformed(format!(
                "row {oid} decode overran its stored size by {} bytes",
                pos - end
            )));
        }
        if pos < end {
            // a few slack bytes are seen in the wild
            trace!(oid, slack = end - pos, "row decoded short of its stored size");
        }
        Ok(values)
    }
}

/// Iterator over the live rows of a table, in ascending oid order.
///
/// Created by [`TableReader::scan`]; finite and not restartable.
#[derive(Debug)]
pub struct Rows<'a> {
    table: &'a mut TableReader,
    next_oid: i64,
    max_object_id: i64,
}

impl Iterator for Rows<'_> {
    type Item = Result<(i64, Vec<Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_oid <= self.max_object_id {
            let oid = self.next_oid;
            self.next_oid += 1;
            match self.table.read_row(oid) {
                Ok(Some(values)) => return Some(Ok((oid, values))),
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

fn decode_value<R: Read + Seek>(
    data: &mut ByteReader<R>,
    field: &FieldDescriptor,
    oid: i64,
    use_utf8: bool,
) -> Result<Value> {
    let value = match field.field_type {
        FieldType::Int16 => Value::Int16(data.read_i16()?),
        FieldType::Int32 => Value::Int32(data.read_i32()?),
        FieldType::Single => Value::Single(data.read_f32()?),
        FieldType::Double => Value::Double(data.read_f64()?),
        FieldType::DateTime => Value::DateTime(datetime_from_days(data.read_f64()?)?),
        // the identifier is the lookup key, never stored bytes
        FieldType::ObjectId => Value::ObjectId(oid),
        FieldType::String | FieldType::Xml => {
            let len = read_payload_len(data, "string")?;
            if use_utf8 {
                Value::String(data.read_utf8(len)?)
            } else {
                if len % 2 != 0 {
                    return Err(Error::malformed("odd utf-16 string byte length"));
                }
                Value::String(data.read_utf16(len / 2)?)
            }
        }
        FieldType::Geometry => {
            let len = read_payload_len(data, "geometry blob")?;
            let bytes = data.read_bytes(len)?;
            let def = field.geometry.as_ref().ok_or(Error::MissingContext(
                "geometry field without a geometry definition",
            ))?;
            Value::Geometry(GeometryBlob::new(bytes, Arc::clone(def)))
        }
        FieldType::Blob => {
            let len = read_payload_len(data, "blob")?;
            Value::Blob(data.read_bytes(len)?)
        }
        FieldType::Guid | FieldType::GlobalId => {
            let bytes = data.read_bytes(16)?;
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes);
            Value::Guid(raw)
        }
        FieldType::Int64 => Value::Int64(data.read_i64()?),
        FieldType::Raster => {
            return Err(Error::unsupported("raster field payload"));
        }
        FieldType::DateOnly | FieldType::TimeOnly | FieldType::DateTimeOffset => {
            return Err(Error::unsupported(format!(
                "{} field payload",
                <&'static str>::from(field.field_type)
            )));
        }
    };
    Ok(value)
}

fn read_payload_len<R: Read + Seek>(data: &mut ByteReader<R>, what: &str) -> Result<usize> {
    let len = data.read_varuint()?;
    if len > i64::from(i32::MAX).unsigned_abs() {
        return Err(Error::malformed(format!("{what} length exceeds the i32 range")));
    }
    usize::try_from(len)
        .map_err(|_| Error::malformed(format!("{what} length exceeds the address range")))
}
