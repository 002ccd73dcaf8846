use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::table::TableReader;
use std::path::{Path, PathBuf};
use tracing::info;

/// Handle over an opened geodatabase directory.
///
/// The catalog is read once at construction. Table readers handed out by
/// [`Self::open_table`] are owned by the caller and close their backing
/// files when dropped.
#[derive(Debug)]
pub struct Database {
    directory: PathBuf,
    catalog: Catalog,
}

impl Database {
    /// Opens a `.gdb` directory and reads its catalog.
    ///
    /// # Errors
    ///
    /// Fails when the catalog table files are missing or unreadable, or
    /// carry an unsupported version.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let catalog = Catalog::read(&directory)?;
        info!(
            path = %directory.display(),
            tables = catalog.entries().len(),
            "geodatabase opened"
        );
        Ok(Self { directory, catalog })
    }

    /// The directory this handle reads from
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The decoded catalog
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Iterates the table names in the catalog
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.catalog.entries().iter().map(|entry| entry.name.as_str())
    }

    /// Opens a table by name (exact match first, then case-insensitive).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] for names absent from the catalog,
    /// and with the open errors of [`TableReader`] otherwise.
    pub fn open_table(&self, name: &str) -> Result<TableReader> {
        let entry = self
            .catalog
            .find(name)
            .ok_or_else(|| Error::NotFound(format!("table {name:?}")))?;
        TableReader::open(&self.directory, i64::from(entry.id))
    }

    /// Opens a table by catalog identifier.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NotFound`] for identifiers absent from the
    /// catalog, and with the open errors of [`TableReader`] otherwise.
    pub fn open_table_by_id(&self, id: i32) -> Result<TableReader> {
        let entry = self
            .catalog
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("table identifier {id}")))?;
        TableReader::open(&self.directory, i64::from(entry.id))
    }
}
