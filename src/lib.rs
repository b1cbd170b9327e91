//! # arsclib
//!
//! A library for reading, editing and writing Android compiled resources:
//! `resources.arsc` tables and binary XML documents, plus the encoder that
//! turns textual `values` and XML sources into them.
//!
use std::fs;
use std::path::Path;

#[macro_use]
pub mod block;
pub mod encode;
pub mod pool;
pub mod table;
pub mod value;
pub mod xml;

#[cfg(test)]
mod tests;

pub use block::{ArscError, ArscResult};
pub use encode::{EncodeContext, EncodeOptions, ResourceIds, ValuesEncoder, XmlEncoder};
pub use table::{FrameworkTable, ResConfig, TableBlock};
pub use xml::{ResXmlDocument, XmlDocument};

/// Reads a compiled resource table from a file
///
/// # Examples
///
/// ```no_run
///  use arsclib::read_table;
///  use std::path::Path;
///
///  let table = read_table(Path::new("resources.arsc")).unwrap();
///  println!("{:} packages loaded.", table.packages().len());
/// ```
pub fn read_table(path: &Path) -> ArscResult<TableBlock> {
    if !path.is_file() {
        return Err(ArscError::MissingSource(path.to_path_buf()));
    }
    TableBlock::from_bytes(&fs::read(path)?)
}

/// Reads a binary XML document (`AndroidManifest.xml`, a layout, ...) from a file
pub fn read_xml(path: &Path) -> ArscResult<ResXmlDocument> {
    if !path.is_file() {
        return Err(ArscError::MissingSource(path.to_path_buf()));
    }
    ResXmlDocument::from_bytes(&fs::read(path)?)
}
