use crate::error::{Error, Result};
use crate::table::{FieldType, TableReader, Value};
use crate::CATALOG_OBJECT_ID;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

static SYSTEM_TABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^GDB_").expect("Regex for system table names must be valid")
});

/// Returns `true` for conventional system-table names (`GDB_*`,
/// case-insensitive)
#[must_use]
pub fn is_system_table(name: &str) -> bool {
    SYSTEM_TABLE_REGEX.is_match(name)
}

/// One catalog row: a table's identifier, name and file format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Table object identifier; doubles as the data-file base name
    pub id: i32,
    /// Table name
    pub name: String,
    /// File-format tag stored alongside the name
    pub format: i32,
}

impl CatalogEntry {
    /// Whether this entry names a conventional system table
    #[must_use]
    pub fn is_system(&self) -> bool {
        is_system_table(&self.name)
    }
}

/// The decoded catalog: the table of tables, stored under object
/// identifier 1.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Reads the catalog table of a geodatabase directory.
    ///
    /// # Errors
    ///
    /// Fails when the catalog table is missing, unsupported or malformed.
    pub(crate) fn read(directory: &Path) -> Result<Self> {
        let mut table = TableReader::open(directory, CATALOG_OBJECT_ID)?;
        let name_column = find_column(&table, "Name", FieldType::String);
        let format_column = find_column(&table, "FileFormat", FieldType::Int32);

        let mut entries = Vec::new();
        for row in table.scan() {
            let (oid, values) = row?;
            let id = i32::try_from(oid)
                .map_err(|_| Error::malformed("catalog identifier exceeds the i32 range"))?;
            let Some(name) = name_column
                .and_then(|col| values.get(col))
                .and_then(Value::as_str)
            else {
                warn!(oid, "catalog row without a usable name");
                continue;
            };
            let format = format_column
                .and_then(|col| values.get(col))
                .and_then(Value::as_i32)
                .unwrap_or(0);
            entries.push(CatalogEntry {
                id,
                name: name.to_owned(),
                format,
            });
        }
        Ok(Self { entries })
    }

    /// All catalog entries, in object-identifier order
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Looks a table up by name: exact match first, then case-insensitive
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| entry.name.eq_ignore_ascii_case(name))
            })
    }

    /// Looks a table up by object identifier
    #[must_use]
    pub fn get(&self, id: i32) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

/// Column position by conventional name, falling back to the first column
/// of the wanted type
fn find_column(table: &TableReader, name: &str, field_type: FieldType) -> Option<usize> {
    let fields = table.fields();
    fields
        .iter()
        .position(|f| f.field_type == field_type && f.name.eq_ignore_ascii_case(name))
        .or_else(|| fields.iter().position(|f| f.field_type == field_type))
}
