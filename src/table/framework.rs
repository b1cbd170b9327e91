//! Framework reference tables (`android.jar`'s `resources.arsc` and the
//! like): a name lookup cache and the lossy size optimization.

use std::collections::HashMap;
use std::fmt;

use log::{debug, info};
use parking_lot::Mutex;

use crate::block::error::ArscResult;
use crate::block::Block;
use crate::table::{Entry, ResConfig, TableBlock};
use crate::value::{AttributeBag, EntryStore, ResourceName};

const TITLE: &str = "Framework table";
const PROP_TITLE: &str = "TITLE";
const PROP_NAME: &str = "NAME";
const PROP_VERSION: &str = "VERSION";
/// Properties are only searched among the first strings of the pool.
const PROP_SCAN: u32 = 10;

/// type name -> entry name -> resource id
type NameMap = HashMap<String, HashMap<String, u32>>;

pub struct FrameworkTable {
    table: TableBlock,
    names: Mutex<Option<NameMap>>,
}

impl FrameworkTable {
    pub fn new(table: TableBlock) -> Self {
        FrameworkTable {
            table,
            names: Mutex::new(None),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> ArscResult<Self> {
        Ok(FrameworkTable::new(TableBlock::from_bytes(bytes)?))
    }

    pub fn table(&self) -> &TableBlock {
        &self.table
    }

    /// Mutable access drops the name cache, which may no longer match.
    pub fn table_mut(&mut self) -> &mut TableBlock {
        self.clear_resource_name_map();
        &mut self.table
    }

    pub fn into_table(self) -> TableBlock {
        self.table
    }

    pub fn to_binary(&mut self) -> Vec<u8> {
        self.table.to_binary()
    }

    /// Builds the name cache. Does nothing when it is already built.
    pub fn load_resource_name_map(&self) {
        let mut names = self.names.lock();
        if names.is_some() {
            return;
        }
        let mut map: NameMap = HashMap::new();
        for package in self.table.packages() {
            for group in package.entry_groups() {
                if let Some((type_name, name)) = package.resource_name(group.resource_id()) {
                    map.entry(type_name)
                        .or_default()
                        .insert(name, group.resource_id());
                }
            }
        }
        debug!("framework name cache holds {} types", map.len());
        *names = Some(map);
    }

    pub fn clear_resource_name_map(&self) {
        self.names.lock().take();
    }

    pub fn has_resource_name_map(&self) -> bool {
        self.names.lock().is_some()
    }

    /// Id of `type_name/name`: from the cache when loaded, else by scanning
    /// the first package that has the type.
    pub fn resolve_resource_id(&self, type_name: &str, name: &str) -> Option<u32> {
        {
            let names = self.names.lock();
            if let Some(map) = names.as_ref() {
                return map.get(type_name).and_then(|names| names.get(name)).copied();
            }
        }
        self.table
            .packages()
            .iter()
            .find(|package| package.type_id(type_name).is_some())
            .and_then(|package| package.resolve_name(type_name, name))
    }

    /// One representative entry of `type_name/name`.
    pub fn search_entry(&self, type_name: &str, name: &str) -> Option<&Entry> {
        let resource_id = self.resolve_resource_id(type_name, name)?;
        let package = self
            .table
            .package(crate::table::split_resource_id(resource_id).0)?;
        package.pick_entry(resource_id, None).map(|(_, entry)| entry)
    }

    /// Shrinks the table to one default-configuration entry per resource and
    /// a single shared string, then stamps the name/version properties.
    /// String values are lost; only ids, names and non-string values remain.
    pub fn optimize(&mut self, name: &str, version: &str) {
        self.clear_resource_name_map();
        let before = self.table.count_bytes();
        let (pool, packages) = self.table.split_mut();
        let mut removed = 0;
        for package in packages.iter_mut() {
            package.sort_types();
            removed += package.keep_default_entries(pool);
        }

        pool.clear_styles();
        self.table.remove_unused_strings();
        self.shrink_strings();
        self.table.remove_unused_strings();

        self.write_property(PROP_TITLE, TITLE);
        self.write_property(PROP_NAME, name);
        self.write_property(PROP_VERSION, version);
        self.table.refresh();
        info!(
            "optimized framework '{}' {}: removed {} entries, {} -> {} bytes",
            name,
            version,
            removed,
            before,
            self.table.count_bytes()
        );
    }

    /// Points every string value at string 0, which becomes the title.
    fn shrink_strings(&mut self) {
        let (pool, packages) = self.table.split_mut();
        if pool.is_empty() {
            pool.push("");
        }
        pool.set_string(0, &format!("{}:{}", PROP_TITLE, TITLE));
        for package in packages.iter_mut() {
            package.visit_table_refs(&mut |reference| pool.rebind(reference, 0));
        }
    }

    fn property_index(&self, key: &str) -> Option<u32> {
        let prefix = format!("{}:", key);
        let pool = self.table.pool();
        (0..PROP_SCAN.min(pool.len() as u32)).find(|index| {
            pool.get(*index)
                .map_or(false, |text| text.trim().starts_with(&prefix))
        })
    }

    fn load_property(&self, key: &str) -> Option<String> {
        let index = self.property_index(key)?;
        let text = self.table.pool().get(index)?.trim();
        Some(text[key.len() + 1..].to_string())
    }

    fn write_property(&mut self, key: &str, value: &str) {
        let text = format!("{}:{}", key, value);
        match self.property_index(key) {
            Some(index) => {
                self.table.split_mut().0.set_string(index, &text);
            }
            None => {
                self.table.split_mut().0.get_or_create(&text);
            }
        }
    }

    pub fn title(&self) -> Option<String> {
        self.load_property(PROP_TITLE)
    }

    pub fn framework_name(&self) -> Option<String> {
        self.load_property(PROP_NAME)
    }

    pub fn framework_version(&self) -> Option<String> {
        self.load_property(PROP_VERSION)
    }

    pub fn set_framework_name(&mut self, name: &str) {
        self.write_property(PROP_NAME, name);
    }

    pub fn set_framework_version(&mut self, version: &str) {
        self.write_property(PROP_VERSION, version);
    }

    pub fn is_optimized(&self) -> bool {
        self.framework_version().is_some()
    }
}

impl EntryStore for FrameworkTable {
    fn resource_name(&self, resource_id: u32) -> Option<ResourceName> {
        self.table.resource_name(resource_id)
    }

    fn resolve_name(&self, package: Option<&str>, type_name: &str, name: &str) -> Option<u32> {
        match package {
            Some(wanted) if self.table.package_by_name(wanted).is_none() => None,
            _ => self.resolve_resource_id(type_name, name),
        }
    }

    fn attribute_bag(&self, resource_id: u32) -> Option<AttributeBag> {
        self.table.attribute_bag(resource_id)
    }
}

impl fmt::Display for FrameworkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_optimized() {
            write!(f, "Unoptimized: ")?;
        }
        write!(f, "FrameworkTable: SIZE={}", self.table.count_bytes())?;
        write!(
            f,
            "\n{}:{}",
            PROP_TITLE,
            self.title().unwrap_or_else(|| "null".to_string())
        )?;
        write!(
            f,
            "\n  {}:{}",
            PROP_NAME,
            self.framework_name().unwrap_or_else(|| "null".to_string())
        )?;
        write!(
            f,
            "\n  {}:{}",
            PROP_VERSION,
            self.framework_version().unwrap_or_else(|| "null".to_string())
        )?;
        write!(f, "\n  PACKAGES={}", self.table.packages().len())?;
        for package in self.table.packages() {
            write!(f, "\n    0x{:02x}:{}", package.id(), package.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for FrameworkTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameworkTable")
            .field("packages", &self.table.packages().len())
            .field("cached", &self.has_resource_name_map())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::EntryContent;
    use crate::value::{ValueItem, ValueType};

    fn framework() -> FrameworkTable {
        let mut table = TableBlock::new();
        let package = table.get_or_create_package(0x01, "android");
        let label = package.get_or_create_resource_id("string", "ok");
        let width = package.get_or_create_resource_id("dimen", "thumb");
        let german = ResConfig::parse_qualifiers("de").unwrap();
        let default = ResConfig::default();
        table
            .put_entry(label, &default, "ok", &EntryContent::Value(ValueItem::string("OK")))
            .unwrap();
        table
            .put_entry(label, &german, "ok", &EntryContent::Value(ValueItem::string("OK!")))
            .unwrap();
        table
            .put_entry(
                width,
                &german,
                "thumb",
                &EntryContent::Value(ValueItem::typed(ValueType::Dimension, 0x1001)),
            )
            .unwrap();
        FrameworkTable::new(table)
    }

    #[test]
    fn cache_and_scan_agree() {
        let framework = framework();
        let scanned = framework.resolve_resource_id("dimen", "thumb");
        assert_eq!(scanned, Some(0x01020000));
        framework.load_resource_name_map();
        assert!(framework.has_resource_name_map());
        assert_eq!(framework.resolve_resource_id("dimen", "thumb"), scanned);
        assert_eq!(framework.resolve_resource_id("string", "ok"), Some(0x01010000));
        assert_eq!(framework.resolve_resource_id("string", "missing"), None);
        framework.clear_resource_name_map();
        assert!(!framework.has_resource_name_map());
        assert_eq!(framework.resolve_resource_id("dimen", "thumb"), scanned);
        assert!(framework.search_entry("string", "ok").is_some());
    }

    #[test]
    fn optimize_keeps_one_default_entry() {
        let mut framework = framework();
        framework.optimize("android", "34");
        let table = framework.table();
        let group = table.entry_group(0x01010000).unwrap();
        assert_eq!(group.configs(), &[ResConfig::default()]);
        let moved = table.value(0x01020000, &ResConfig::default()).unwrap();
        assert_eq!(moved.data, 0x1001);
        for package in table.packages() {
            for pair in package.pairs() {
                assert!(pair.types().iter().all(|block| block.config().is_default()));
            }
        }
        assert_eq!(framework.framework_name().as_deref(), Some("android"));
        assert_eq!(framework.framework_version().as_deref(), Some("34"));
        assert_eq!(framework.title().as_deref(), Some(TITLE));
        assert!(framework.is_optimized());
        assert!(framework.to_string().contains("0x01:android"));
    }

    #[test]
    fn optimized_table_survives_round_trip() {
        let mut framework = framework();
        framework.optimize("android", "34");
        let bytes = framework.to_binary();
        let mut reread = FrameworkTable::from_bytes(&bytes).unwrap();
        assert_eq!(reread.framework_version().as_deref(), Some("34"));
        assert_eq!(reread.to_binary(), bytes);
    }
}
