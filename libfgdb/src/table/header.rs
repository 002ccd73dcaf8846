use super::field::{FieldDescriptor, FieldType, GeometryDef};
use crate::error::{Error, Result};
use crate::geometry::Envelope;
use crate::reader::ByteReader;
use std::io::{Read, Seek};
use std::sync::Arc;
use tracing::trace;

/// Expected value of the second magic word in every data-file header
const MAGIC2: i32 = 5;

/// The fixed-size leading section of a `.gdbtable` file
#[derive(Debug, Clone)]
pub(crate) struct DataFileHeader {
    pub version: i32,
    pub row_count: i64,
    pub max_entry_size: i32,
    pub file_size: i64,
    pub fields_offset: i64,
}

impl DataFileHeader {
    pub(crate) fn read<R: Read + Seek>(rdr: &mut ByteReader<R>) -> Result<Self> {
        let version = rdr.read_i32()?;
        let (row_count, max_entry_size) = match version {
            3 => {
                let rows = i64::from(rdr.read_i32()?);
                let max_entry_size = rdr.read_i32()?;
                let magic2 = rdr.read_i32()?;
                if magic2 != MAGIC2 {
                    trace!(magic2, "unexpected second magic word");
                }
                let _magic3 = rdr.read_bytes(4)?;
                let _magic4 = rdr.read_bytes(4)?;
                (rows, max_entry_size)
            }
            4 => {
                let _flag = rdr.read_i32()?;
                let max_entry_size = rdr.read_i32()?;
                let magic2 = rdr.read_i32()?;
                if magic2 != MAGIC2 {
                    trace!(magic2, "unexpected second magic word");
                }
                let rows = rdr.read_i64()?;
                (rows, max_entry_size)
            }
            other => {
                return Err(Error::unsupported(format!("data file version {other}")));
            }
        };
        let file_size = rdr.read_i64()?;
        let fields_offset = rdr.read_i64()?;
        trace!(version, row_count, file_size, fields_offset, "data file header");
        Ok(Self {
            version,
            row_count,
            max_entry_size,
            file_size,
            fields_offset,
        })
    }
}

/// The decoded fields section of a `.gdbtable` file
#[derive(Debug, Clone)]
pub(crate) struct FieldsSection {
    pub schema_version: i32,
    pub use_utf8: bool,
    pub geometry_type: u8,
    pub has_z: bool,
    pub has_m: bool,
    pub fields: Vec<FieldDescriptor>,
    pub nullable_count: usize,
}

impl FieldsSection {
    /// Reads the fields section; the reader must be positioned at the
    /// section start.
    pub(crate) fn read<R: Read + Seek>(rdr: &mut ByteReader<R>) -> Result<Self> {
        let header_bytes = rdr.read_i32()?;
        let schema_version = rdr.read_i32()?;
        if !matches!(schema_version, 3 | 4 | 6) {
            return Err(Error::unsupported(format!(
                "fields section version {schema_version}"
            )));
        }
        let flags = rdr.read_u32()?;
        let field_count = rdr.read_i16()?;
        let field_count = usize::try_from(field_count)
            .map_err(|_| Error::malformed("negative field count"))?;
        #[allow(clippy::cast_possible_truncation)]
        let geometry_type = (flags & 0xFF) as u8;
        let use_utf8 = flags & (1 << 8) != 0;
        let has_z = flags & (1 << 31) != 0;
        let has_m = flags & (1 << 30) != 0;
        trace!(header_bytes, schema_version, flags, field_count, "fields section");

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(read_field(rdr, geometry_type, has_z, has_m)?);
        }
        if fields
            .iter()
            .filter(|f| f.field_type == FieldType::ObjectId)
            .count()
            != 1
        {
            return Err(Error::malformed(
                "table must carry exactly one object-id field",
            ));
        }
        let nullable_count = fields.iter().filter(|f| f.nullable).count();
        Ok(Self {
            schema_version,
            use_utf8,
            geometry_type,
            has_z,
            has_m,
            fields,
            nullable_count,
        })
    }
}

fn read_field<R: Read + Seek>(
    rdr: &mut ByteReader<R>,
    geometry_type: u8,
    table_has_z: bool,
    table_has_m: bool,
) -> Result<FieldDescriptor> {
    let name_len = rdr.read_u8()?;
    let name = rdr.read_utf16(usize::from(name_len))?;
    let alias_len = rdr.read_u8()?;
    let alias = rdr.read_utf16(usize::from(alias_len))?;
    let field_type = FieldType::from_code(rdr.read_u8()?)?;
    trace!(%name, ?field_type, "field descriptor");

    let mut descriptor = FieldDescriptor {
        name,
        alias,
        field_type,
        nullable: false,
        length: None,
        default: None,
        geometry: None,
        raster_type: None,
    };
    match field_type {
        FieldType::ObjectId => {
            let _width = rdr.read_u8()?;
            let _flags = rdr.read_u8()?;
        }
        FieldType::Geometry => {
            let def = read_geometry_descriptor(
                rdr,
                &mut descriptor,
                geometry_type,
                table_has_z,
                table_has_m,
            )?;
            descriptor.geometry = Some(Arc::new(def));
        }
        FieldType::String | FieldType::Xml => {
            descriptor.length = Some(rdr.read_i32()?);
            let flags = rdr.read_u8()?;
            descriptor.nullable = flags & 1 != 0;
            if flags & 4 != 0 {
                let default_len = rdr.read_varuint()?;
                let default_len = usize::try_from(default_len)
                    .map_err(|_| Error::malformed("oversized default value"))?;
                descriptor.default = Some(rdr.read_bytes(default_len)?);
            }
        }
        FieldType::Blob => {
            let _unused = rdr.read_u8()?;
            let flags = rdr.read_u8()?;
            descriptor.nullable = flags & 1 != 0;
        }
        FieldType::Guid | FieldType::GlobalId => {
            let width = rdr.read_u8()?;
            let flags = rdr.read_u8()?;
            descriptor.length = Some(i32::from(width));
            descriptor.nullable = flags & 1 != 0;
        }
        FieldType::Raster => {
            let _unused = rdr.read_u8()?;
            let flags = rdr.read_u8()?;
            descriptor.nullable = flags & 1 != 0;
            descriptor.raster_type = Some(rdr.read_u8()?);
        }
        FieldType::Int16
        | FieldType::Int32
        | FieldType::Single
        | FieldType::Double
        | FieldType::DateTime
        | FieldType::Int64
        | FieldType::DateOnly
        | FieldType::TimeOnly
        | FieldType::DateTimeOffset => {
            let width = rdr.read_u8()?;
            let flags = rdr.read_u8()?;
            descriptor.length = Some(i32::from(width));
            descriptor.nullable = flags & 1 != 0;
            let default_len = rdr.read_u8()?;
            if default_len > 0 {
                descriptor.default = Some(rdr.read_bytes(usize::from(default_len))?);
            }
        }
    }
    Ok(descriptor)
}

fn read_geometry_descriptor<R: Read + Seek>(
    rdr: &mut ByteReader<R>,
    descriptor: &mut FieldDescriptor,
    geometry_type: u8,
    table_has_z: bool,
    table_has_m: bool,
) -> Result<GeometryDef> {
    let _unused = rdr.read_u8()?;
    let flags = rdr.read_u8()?;
    descriptor.nullable = flags & 1 != 0;
    let wkt_bytes = rdr.read_i16()?;
    let wkt_bytes = usize::try_from(wkt_bytes)
        .map_err(|_| Error::malformed("negative spatial reference length"))?;
    if wkt_bytes % 2 != 0 {
        return Err(Error::malformed("odd spatial reference byte length"));
    }
    let spatial_reference = rdr.read_utf16(wkt_bytes / 2)?;
    let geometry_flags = rdr.read_u8()?;
    let has_m = geometry_flags & 0b10 != 0;
    let has_z = geometry_flags & 0b100 != 0;

    let x_origin = rdr.read_f64()?;
    let y_origin = rdr.read_f64()?;
    let xy_scale = rdr.read_f64()?;
    if !xy_scale.is_finite() || xy_scale <= 0.0 {
        return Err(Error::malformed("non-positive xy quantization scale"));
    }
    let (m_origin, m_scale) = if has_m {
        (rdr.read_f64()?, rdr.read_f64()?)
    } else {
        (0.0, 1.0)
    };
    if has_m && (!m_scale.is_finite() || m_scale <= 0.0) {
        return Err(Error::malformed("non-positive m quantization scale"));
    }
    let (z_origin, z_scale) = if has_z {
        (rdr.read_f64()?, rdr.read_f64()?)
    } else {
        (0.0, 1.0)
    };
    if has_z && (!z_scale.is_finite() || z_scale <= 0.0) {
        return Err(Error::malformed("non-positive z quantization scale"));
    }
    let xy_tolerance = rdr.read_f64()?;
    let m_tolerance = if has_m { rdr.read_f64()? } else { 0.0 };
    let z_tolerance = if has_z { rdr.read_f64()? } else { 0.0 };
    let extent = Envelope {
        xmin: rdr.read_f64()?,
        ymin: rdr.read_f64()?,
        xmax: rdr.read_f64()?,
        ymax: rdr.read_f64()?,
    };
    let z_extent = if table_has_z {
        Some((rdr.read_f64()?, rdr.read_f64()?))
    } else {
        None
    };
    let m_extent = if table_has_m {
        Some((rdr.read_f64()?, rdr.read_f64()?))
    } else {
        None
    };
    let _unknown = rdr.read_u8()?;
    let grid_count = rdr.read_i32()?;
    if !(1..=3).contains(&grid_count) {
        return Err(Error::malformed(format!(
            "spatial grid count {grid_count} outside 1..=3"
        )));
    }
    let mut grid_sizes = Vec::with_capacity(grid_count.unsigned_abs() as usize);
    for _ in 0..grid_count {
        grid_sizes.push(rdr.read_f64()?);
    }

    Ok(GeometryDef {
        geometry_type,
        spatial_reference,
        x_origin,
        y_origin,
        xy_scale,
        xy_tolerance,
        has_z,
        z_origin,
        z_scale,
        z_tolerance,
        has_m,
        m_origin,
        m_scale,
        m_tolerance,
        extent,
        z_extent,
        m_extent,
        grid_sizes,
    })
}
