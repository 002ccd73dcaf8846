use crate::error::{Error, Result};
use crate::reader::ByteReader;
use std::io::{Read, Seek};

/// One entry of a table's `.gdbindexes` file: the index name and the field
/// list it covers. Index traversal is out of scope; only the definitions
/// are surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name
    pub name: String,
    /// Covered fields, as stored
    pub fields: String,
}

impl IndexDef {
    /// Reads the full definition list.
    pub(crate) fn read_all<R: Read + Seek>(rdr: &mut ByteReader<R>) -> Result<Vec<Self>> {
        let count = rdr.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| Error::malformed("negative index definition count"))?;
        let mut defs = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let name = read_prefixed_utf16(rdr)?;
            let fields = read_prefixed_utf16(rdr)?;
            defs.push(Self { name, fields });
        }
        Ok(defs)
    }
}

fn read_prefixed_utf16<R: Read + Seek>(rdr: &mut ByteReader<R>) -> Result<String> {
    let code_units = rdr.read_i32()?;
    let code_units = usize::try_from(code_units)
        .map_err(|_| Error::malformed("negative string length in index definition"))?;
    rdr.read_utf16(code_units)
}
