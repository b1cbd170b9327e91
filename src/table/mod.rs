//! The `resources.arsc` chunk tree: table, packages, type-spec pairs and
//! entries, plus the framework-table specialisation.
//!
//! A [`TableBlock`] owns the global string pool that every string value in
//! every package points into. Edits that may renumber that pool (styled
//! strings, compaction) are routed through the table so the resulting
//! [`IndexRemap`] reaches all packages.

pub mod config;
pub mod entry;
pub mod framework;
pub mod library;
pub mod package;
pub mod type_block;

use std::io::Write;

use log::{debug, info, warn};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::block::error::{ArscError, ArscResult};
use crate::block::reader::BlockReader;
use crate::block::{Block, ChunkHeader, ChunkType, RawChunk, Segment};
use crate::pool::{IndexRemap, StringPool};
use crate::value::{
    escape_text, AttributeBag, BagKind, EntryStore, ResourceName, ValueItem, ValueType,
};

pub use config::ResConfig;
pub use entry::{Entry, EntryFlags, EntryValue};
pub use framework::FrameworkTable;
pub use package::{make_resource_id, split_resource_id, EntryContent, EntryGroup, PackageBlock};
pub use type_block::{SpecBlock, TypeBlock, TypeSpecPair};

const HEADER_SIZE: u16 = 12;

#[derive(Debug)]
pub struct TableBlock {
    header: ChunkHeader,
    pool: StringPool,
    packages: Vec<PackageBlock>,
    unknown: Vec<RawChunk>,
}

impl Default for TableBlock {
    fn default() -> Self {
        TableBlock::new()
    }
}

impl TableBlock {
    pub fn new() -> Self {
        let mut table = TableBlock {
            header: ChunkHeader::new(ChunkType::Table, HEADER_SIZE),
            pool: StringPool::new(true),
            packages: Vec::new(),
            unknown: Vec::new(),
        };
        table.refresh();
        table
    }

    /// Parses a complete `resources.arsc` image.
    pub fn from_bytes(bytes: &[u8]) -> ArscResult<Self> {
        TableBlock::read(&mut BlockReader::new(bytes))
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Table)?;
        let package_count = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;

        let mut pool: Option<StringPool> = None;
        let mut packages = Vec::with_capacity(package_count);
        let mut unknown = Vec::new();
        while chunk.remaining() >= ChunkHeader::SIZE {
            let next = chunk.peek_header()?;
            match next.chunk_type {
                ChunkType::StringPool if pool.is_none() => pool = Some(StringPool::read(&mut chunk)?),
                ChunkType::Package => packages.push(PackageBlock::read(&mut chunk)?),
                other => {
                    debug!("keeping unknown table chunk {}", other);
                    unknown.push(RawChunk::read(&mut chunk)?);
                }
            }
        }
        if packages.len() != package_count {
            warn!(
                "table header declares {} packages, found {}",
                package_count,
                packages.len()
            );
        }

        let mut pool = pool.unwrap_or_else(|| StringPool::new(true));
        for package in packages.iter_mut() {
            package.link(&mut pool);
        }
        info!(
            "read resource table: {} strings, {} packages",
            pool.len(),
            packages.len()
        );
        Ok(TableBlock {
            header,
            pool,
            packages,
            unknown,
        })
    }

    /// Refreshes the whole tree and serializes it.
    pub fn to_binary(&mut self) -> Vec<u8> {
        self.refresh();
        self.to_bytes()
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn packages(&self) -> &[PackageBlock] {
        &self.packages
    }

    pub fn package(&self, package_id: u8) -> Option<&PackageBlock> {
        self.packages
            .iter()
            .find(|package| package.id() == package_id as u32)
    }

    pub fn package_mut(&mut self, package_id: u8) -> Option<&mut PackageBlock> {
        self.packages
            .iter_mut()
            .find(|package| package.id() == package_id as u32)
    }

    pub fn package_by_name(&self, name: &str) -> Option<&PackageBlock> {
        self.packages.iter().find(|package| package.name() == name)
    }

    fn package_index(&self, package_id: u8) -> Option<usize> {
        self.packages
            .iter()
            .position(|package| package.id() == package_id as u32)
    }

    pub fn get_or_create_package(&mut self, package_id: u8, name: &str) -> &mut PackageBlock {
        let index = match self.package_index(package_id) {
            Some(index) => index,
            None => {
                debug!("creating package 0x{:02x} '{}'", package_id, name);
                self.packages.push(PackageBlock::new(package_id as u32, name));
                self.packages.len() - 1
            }
        };
        &mut self.packages[index]
    }

    /// Detaches a package, releasing its table-pool links.
    pub fn remove_package(&mut self, package_id: u8) -> Option<PackageBlock> {
        let index = self.package_index(package_id)?;
        let mut package = self.packages.remove(index);
        package.unlink(&mut self.pool);
        Some(package)
    }

    fn apply_remaps(&mut self, skip: Option<usize>, remaps: &[IndexRemap]) {
        for (index, package) in self.packages.iter_mut().enumerate() {
            if Some(index) == skip {
                continue;
            }
            for remap in remaps {
                package.apply_table_remap(remap);
            }
        }
    }

    fn owning_package(&self, resource_id: u32) -> ArscResult<usize> {
        let package_id = split_resource_id(resource_id).0;
        self.package_index(package_id).ok_or_else(|| {
            ArscError::invalid("resource id", format!("0x{:08x} has no package", resource_id))
        })
    }

    /// Writes one entry. See [`PackageBlock::put_entry`].
    pub fn put_entry(
        &mut self,
        resource_id: u32,
        config: &ResConfig,
        name: &str,
        content: &EntryContent,
    ) -> ArscResult<()> {
        let index = self.owning_package(resource_id)?;
        let remaps = self.packages[index].put_entry(&mut self.pool, resource_id, config, name, content)?;
        self.apply_remaps(Some(index), &remaps);
        Ok(())
    }

    pub fn get_entry(&self, resource_id: u32, config: &ResConfig) -> Option<&Entry> {
        self.package(split_resource_id(resource_id).0)?
            .get_entry(resource_id, config)
    }

    /// Pool-independent value of a simple entry.
    pub fn value(&self, resource_id: u32, config: &ResConfig) -> Option<ValueItem> {
        self.get_entry(resource_id, config)?.to_item(&self.pool)
    }

    pub fn entry_group(&self, resource_id: u32) -> Option<&EntryGroup> {
        self.package(split_resource_id(resource_id).0)?
            .entry_group(resource_id)
    }

    pub fn remove_entry(&mut self, resource_id: u32, config: &ResConfig) -> bool {
        match self.owning_package(resource_id) {
            Ok(index) => self.packages[index].remove_entry(&mut self.pool, resource_id, config),
            Err(_) => false,
        }
    }

    pub fn remove_entry_group(&mut self, resource_id: u32) -> usize {
        match self.owning_package(resource_id) {
            Ok(index) => self.packages[index].remove_entry_group(&mut self.pool, resource_id),
            Err(_) => 0,
        }
    }

    /// Compacts the table pool and renumbers every package.
    pub fn remove_unused_strings(&mut self) -> IndexRemap {
        let remap = self.pool.remove_unused_strings();
        if !remap.is_identity() {
            self.apply_remaps(None, std::slice::from_ref(&remap));
        }
        remap
    }

    /// Merges every package of `other`, creating the missing ones.
    pub fn merge(&mut self, other: &TableBlock) -> ArscResult<()> {
        for other_package in &other.packages {
            let package_id = other_package.id() as u8;
            self.get_or_create_package(package_id, other_package.name());
            let index = self.package_index(package_id).ok_or_else(|| {
                ArscError::Malformed(format!("package 0x{:02x} vanished", package_id))
            })?;
            let remaps = self.packages[index].merge(&mut self.pool, other_package, &other.pool)?;
            self.apply_remaps(Some(index), &remaps);
        }
        info!(
            "merged {} packages, {} strings in pool",
            other.packages.len(),
            self.pool.len()
        );
        Ok(())
    }

    /// Every `(resource id, config, entry)` of every package.
    pub fn list_entries(&self) -> impl Iterator<Item = (u32, &ResConfig, &Entry)> + '_ {
        self.packages.iter().flat_map(PackageBlock::entries)
    }

    pub(crate) fn split_mut(&mut self) -> (&mut StringPool, &mut [PackageBlock]) {
        (&mut self.pool, &mut self.packages)
    }

    /// Renders the entries of one package and configuration as a textual
    /// `values` document. Resource names are resolved through this table and
    /// then `store`.
    pub fn decode_values_xml(
        &self,
        package_id: u8,
        config: &ResConfig,
        store: &dyn EntryStore,
    ) -> ArscResult<String> {
        let package = self.package(package_id).ok_or_else(|| {
            ArscError::invalid("package id", format!("0x{:02x}", package_id))
        })?;
        let chain = crate::value::StoreChain::new(vec![self as &dyn EntryStore, store]);
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("resources")))?;
        for pair in package.pairs() {
            let type_name = match package.type_name(pair.id()) {
                Some(type_name) => type_name,
                None => continue,
            };
            let block = match pair.get_type(config) {
                Some(block) => block,
                None => continue,
            };
            for (_, entry) in block.entries() {
                let name = entry.key_name(package.key_pool()).unwrap_or_default();
                write_entry_xml(&mut writer, &self.pool, &chain, package_id, type_name, name, entry)?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new("resources")))?;
        String::from_utf8(writer.into_inner()).map_err(|err| ArscError::Xml(err.to_string()))
    }
}

/// Tag used for simple values of `type_name` in `values` documents.
fn simple_tag(type_name: &str) -> Option<&'static str> {
    match type_name {
        "string" => Some("string"),
        "dimen" => Some("dimen"),
        "color" => Some("color"),
        "bool" => Some("bool"),
        "integer" => Some("integer"),
        "fraction" => Some("fraction"),
        "drawable" => Some("drawable"),
        _ => None,
    }
}

fn write_entry_xml<W: Write>(
    writer: &mut Writer<W>,
    pool: &StringPool,
    store: &dyn EntryStore,
    package_id: u8,
    type_name: &str,
    name: &str,
    entry: &Entry,
) -> ArscResult<()> {
    if let Some(bag) = entry.to_bag(pool, type_name) {
        return match bag.classify() {
            BagKind::Plurals(plurals) => plurals.write_xml(writer, name, store, package_id),
            BagKind::Style(style) => style.write_xml(writer, name, store, package_id),
            BagKind::Attribute(mut attribute) => {
                attribute.resolve_names(store);
                attribute.write_xml(writer, name)
            }
            BagKind::Array(array) => array.write_xml(writer, name, store, package_id),
            BagKind::Other => {
                warn!("{}/{} is a bag of unknown shape", type_name, name);
                Ok(())
            }
        };
    }
    let item = match entry.to_item(pool) {
        Some(item) => item,
        None => return Ok(()),
    };
    if type_name == "id" && item.value_type != ValueType::Reference {
        let mut element = BytesStart::new("item");
        element.push_attribute(("type", "id"));
        element.push_attribute(("name", name));
        writer.write_event(Event::Empty(element))?;
        return Ok(());
    }
    let text = if item.is_string() {
        escape_text(item.text.as_deref().unwrap_or_default())
    } else {
        item.to_text(store, package_id)
    };
    let (tag, mut element) = match simple_tag(type_name) {
        Some(tag) => (tag, BytesStart::new(tag)),
        None => {
            let mut element = BytesStart::new("item");
            element.push_attribute(("type", type_name));
            ("item", element)
        }
    };
    element.push_attribute(("name", name));
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(&text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

impl EntryStore for TableBlock {
    fn resource_name(&self, resource_id: u32) -> Option<ResourceName> {
        let package = self.package(split_resource_id(resource_id).0)?;
        let (type_name, name) = package.resource_name(resource_id)?;
        Some(ResourceName {
            package_id: package.id() as u8,
            package: package.name().to_string(),
            type_name,
            name,
        })
    }

    fn resolve_name(&self, package: Option<&str>, type_name: &str, name: &str) -> Option<u32> {
        self.packages
            .iter()
            .filter(|candidate| package.map_or(true, |wanted| candidate.name() == wanted))
            .find_map(|candidate| candidate.resolve_name(type_name, name))
    }

    fn attribute_bag(&self, resource_id: u32) -> Option<AttributeBag> {
        let package = self.package(split_resource_id(resource_id).0)?;
        let (_, entry) = package.pick_entry(resource_id, None)?;
        let bag = entry.to_bag(&self.pool, "attr")?;
        let mut attribute = AttributeBag::decode(&bag)?;
        attribute.resolve_names(self);
        Some(attribute)
    }
}

impl Block for TableBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::U32(self.packages.len() as u32));
        segments.push(Segment::Block(&self.pool));
        segments.push(Segment::List(
            self.packages.iter().map(|package| package as &dyn Block).collect(),
        ));
        segments.push(Segment::List(
            self.unknown.iter().map(|chunk| chunk as &dyn Block).collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        for package in self.packages.iter_mut() {
            package.refresh();
        }
        self.pool.refresh();
        self.header.header_size = HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ArrayBag, EmptyStore};

    fn sample() -> TableBlock {
        let mut table = TableBlock::new();
        let package = table.get_or_create_package(0x7f, "com.example");
        let title = package.get_or_create_resource_id("string", "title");
        let sizes = package.get_or_create_resource_id("array", "sizes");
        let default = ResConfig::default();
        table
            .put_entry(title, &default, "title", &EntryContent::Value(ValueItem::string("Hello")))
            .unwrap();
        let array = ArrayBag::new(vec![ValueItem::string("small"), ValueItem::string("large")]);
        table
            .put_entry(sizes, &default, "sizes", &EntryContent::Bag(array.to_bag("array")))
            .unwrap();
        table
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let mut table = sample();
        let bytes = table.to_binary();
        let mut reread = TableBlock::from_bytes(&bytes).unwrap();
        assert_eq!(reread.to_binary(), bytes);
        assert_eq!(
            reread.value(0x7f010000, &ResConfig::default()).unwrap().text.as_deref(),
            Some("Hello")
        );
    }

    #[test]
    fn resolves_names_both_ways() {
        let table = sample();
        let name = table.resource_name(0x7f020000).unwrap();
        assert_eq!(name.to_string(), "com.example:array/sizes");
        assert_eq!(table.resolve_name(None, "string", "title"), Some(0x7f010000));
        assert_eq!(table.resolve_name(Some("other"), "string", "title"), None);
    }

    #[test]
    fn styled_strings_renumber_every_package() {
        let mut table = sample();
        table.get_or_create_package(0x02, "com.example.lib");
        let other = table
            .package_mut(0x02)
            .unwrap()
            .get_or_create_resource_id("string", "plain");
        table
            .put_entry(other, &ResConfig::default(), "plain", &EntryContent::Value(ValueItem::string("Plain")))
            .unwrap();
        let mut styled = ValueItem::string("Bold text");
        styled.spans.push(("b".to_string(), 0, 3));
        table
            .put_entry(0x7f010000, &ResConfig::default(), "title", &EntryContent::Value(styled))
            .unwrap();

        assert_eq!(table.pool().get(0), Some("Bold text"));
        assert_eq!(
            table.value(other, &ResConfig::default()).unwrap().text.as_deref(),
            Some("Plain")
        );
        assert_eq!(
            table.value(0x7f010000, &ResConfig::default()).unwrap().spans,
            vec![("b".to_string(), 0, 3)]
        );
    }

    #[test]
    fn compaction_keeps_surviving_values() {
        let mut table = sample();
        table
            .put_entry(0x7f010000, &ResConfig::default(), "title", &EntryContent::Value(ValueItem::string("Bye")))
            .unwrap();
        let remap = table.remove_unused_strings();
        assert!(!remap.is_identity());
        assert!(table.pool().entries().all(|entry| entry.reference_count() > 0));
        assert_eq!(
            table.value(0x7f010000, &ResConfig::default()).unwrap().text.as_deref(),
            Some("Bye")
        );
        let sizes = table.get_entry(0x7f020000, &ResConfig::default()).unwrap();
        let bag = sizes.to_bag(table.pool(), "array").unwrap();
        assert_eq!(bag.items[1].value.text.as_deref(), Some("large"));
    }

    #[test]
    fn decodes_values_document() {
        let table = sample();
        let xml = table
            .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
            .unwrap();
        assert!(xml.contains("<string name=\"title\">Hello</string>"));
        assert!(xml.contains("<string-array name=\"sizes\">"));
        assert!(xml.contains("<item>large</item>"));
    }
}
