//! Textual-to-binary encoding: resolution context, value grammars and the
//! `values` and XML document encoders.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::block::error::{ArscError, ArscResult};
use crate::table::{split_resource_id, EntryContent, FrameworkTable, ResConfig, TableBlock};
use crate::value::{AttributeFormat, EntryStore, StoreChain, ValueItem, ValueType};
use crate::xml::XmlDocument;

pub mod parse;
pub mod values;
pub mod xml;

pub use parse::{parse_reference, unescape_string, NamedReference, Reference};
pub use values::ValuesEncoder;
pub use xml::XmlEncoder;

/// Switches for one encode run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Flag every resource named in `public.xml` as public.
    pub mark_public: bool,
    /// Keep the raw text of typed XML attribute values.
    pub keep_raw_values: bool,
    /// Drop unreferenced pool strings after encoding.
    pub compact_strings: bool,
    /// Store values no typed grammar accepts as strings instead of failing.
    pub string_fallback: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            mark_public: true,
            keep_raw_values: false,
            compact_strings: false,
            string_fallback: true,
        }
    }
}

/// `type/name` → resource id, as declared by a `public.xml` document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceIds {
    ids: BTreeMap<(String, String), u32>,
}

impl ResourceIds {
    pub fn new() -> Self {
        ResourceIds::default()
    }

    /// Reads `<public type=".." name=".." id="0x.."/>` declarations. All ids
    /// must share one package id.
    pub fn from_xml(xml: &str) -> ArscResult<Self> {
        let document = XmlDocument::from_string(xml)?;
        let mut ids = ResourceIds::new();
        for public in document.root.child_elements().filter(|e| e.name == "public") {
            let (type_name, name, id) = match (
                public.attribute("type"),
                public.attribute("name"),
                public.attribute("id"),
            ) {
                (Some(type_name), Some(name), Some(id)) => (type_name, name, id),
                _ => {
                    warn!("line {}: incomplete <public> declaration", public.line);
                    continue;
                }
            };
            let id = parse_id(id).ok_or_else(|| ArscError::invalid("resource id", id))?;
            if let Some(package_id) = ids.package_id() {
                if package_id != split_resource_id(id).0 {
                    return Err(ArscError::invalid(
                        "public.xml",
                        format!("package count should be 1, found 0x{:02x} and 0x{:08x}", package_id, id),
                    ));
                }
            }
            ids.add(type_name, name, id);
        }
        debug!("read {} public ids", ids.len());
        Ok(ids)
    }

    /// Like [`ResourceIds::from_xml`]; a missing file or one without
    /// declarations is a configuration error.
    pub fn from_file(path: &Path) -> ArscResult<Self> {
        if !path.is_file() {
            return Err(ArscError::MissingSource(path.to_path_buf()));
        }
        let ids = Self::from_xml(&fs::read_to_string(path)?)?;
        if ids.is_empty() {
            return Err(ArscError::MissingSource(path.to_path_buf()));
        }
        Ok(ids)
    }

    pub fn get(&self, type_name: &str, name: &str) -> Option<u32> {
        self.ids
            .get(&(type_name.to_string(), name.to_string()))
            .copied()
    }

    pub fn add(&mut self, type_name: &str, name: &str, resource_id: u32) {
        self.ids
            .insert((type_name.to_string(), name.to_string()), resource_id);
    }

    pub fn package_id(&self) -> Option<u8> {
        self.ids.values().next().map(|id| split_resource_id(*id).0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u32)> + '_ {
        self.ids
            .iter()
            .map(|((type_name, name), id)| (type_name.as_str(), name.as_str(), *id))
    }
}

fn parse_id(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Everything an encoder needs to turn names into ids: the package being
/// built, its declared ids, ids allocated so far and the framework tables
/// that satisfy `android:` references.
pub struct EncodeContext<'a> {
    package_id: u8,
    package_name: String,
    public: ResourceIds,
    allocated: ResourceIds,
    frameworks: Vec<&'a FrameworkTable>,
    pub options: EncodeOptions,
}

impl<'a> EncodeContext<'a> {
    pub fn new(package_id: u8, package_name: &str) -> Self {
        EncodeContext {
            package_id,
            package_name: package_name.to_string(),
            public: ResourceIds::new(),
            allocated: ResourceIds::new(),
            frameworks: Vec::new(),
            options: EncodeOptions::default(),
        }
    }

    /// Context whose package id comes from the declared ids.
    pub fn with_public_ids(package_name: &str, public: ResourceIds) -> ArscResult<Self> {
        let package_id = public.package_id().ok_or_else(|| {
            ArscError::invalid("public.xml", "no resource id declarations")
        })?;
        let mut context = EncodeContext::new(package_id, package_name);
        context.public = public;
        Ok(context)
    }

    pub fn add_framework(&mut self, framework: &'a FrameworkTable) {
        framework.load_resource_name_map();
        self.frameworks.push(framework);
    }

    pub fn package_id(&self) -> u8 {
        self.package_id
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn public_ids(&self) -> &ResourceIds {
        &self.public
    }

    pub fn frameworks(&self) -> &[&'a FrameworkTable] {
        &self.frameworks
    }

    /// The table, then every framework.
    pub fn store<'s>(&'s self, table: &'s TableBlock) -> StoreChain<'s> {
        let mut chain = StoreChain::new(vec![table as &dyn EntryStore]);
        for framework in &self.frameworks {
            chain.push(*framework as &dyn EntryStore);
        }
        chain
    }

    /// Creates the package being built and reserves every declared id so
    /// allocations never collide with them.
    pub fn prepare_package(&self, table: &mut TableBlock) -> ArscResult<()> {
        let package = table.get_or_create_package(self.package_id, &self.package_name);
        for (type_name, _, resource_id) in self.public.iter() {
            package.reserve_resource_id(resource_id, type_name)?;
        }
        Ok(())
    }

    fn is_own_package(&self, package: Option<&str>) -> bool {
        package.map_or(true, |package| package == self.package_name)
    }

    /// Id of `type_name/name` in the package being built.
    pub fn local_id(&self, table: &TableBlock, type_name: &str, name: &str) -> Option<u32> {
        self.public
            .get(type_name, name)
            .or_else(|| self.allocated.get(type_name, name))
            .or_else(|| {
                table
                    .package(self.package_id)
                    .and_then(|package| package.resolve_name(type_name, name))
            })
    }

    /// Id of `type_name/name` in the package being built, allocating one
    /// at the end of its type when it is not declared anywhere yet.
    pub fn get_or_create_id(&mut self, table: &mut TableBlock, type_name: &str, name: &str) -> u32 {
        if let Some(resource_id) = self.local_id(table, type_name, name) {
            return resource_id;
        }
        let resource_id = table
            .get_or_create_package(self.package_id, &self.package_name)
            .get_or_create_resource_id(type_name, name);
        debug!("allocated 0x{:08x} for {}/{}", resource_id, type_name, name);
        self.allocated.add(type_name, name, resource_id);
        resource_id
    }

    /// Creates the `id` entry `name` unless one exists already.
    pub fn ensure_id(&mut self, table: &mut TableBlock, name: &str) -> ArscResult<u32> {
        let resource_id = self.get_or_create_id(table, "id", name);
        if table.entry_group(resource_id).is_none() {
            table.put_entry(
                resource_id,
                &ResConfig::default(),
                name,
                &EntryContent::Value(ValueItem::typed(ValueType::IntBoolean, 0)),
            )?;
        }
        Ok(resource_id)
    }

    fn lookup(&self, table: &TableBlock, reference: &NamedReference) -> Option<u32> {
        let package = reference.package.as_deref();
        let type_name = reference.type_name.as_str();
        let name = reference.name.as_str();
        if self.is_own_package(package) {
            if let Some(resource_id) = self.local_id(table, type_name, name) {
                return Some(resource_id);
            }
        }
        let foreign = package.filter(|package| *package != self.package_name);
        self.frameworks
            .iter()
            .find_map(|framework| framework.resolve_name(foreign, type_name, name))
            .or_else(|| foreign.and_then(|_| table.resolve_name(foreign, type_name, name)))
    }

    /// Resolves a symbolic id without creating anything.
    pub fn resolve_name(&self, table: &TableBlock, reference: &NamedReference) -> Option<u32> {
        self.lookup(table, reference)
    }

    /// Typed value of a reference. `@+id/name` creates the id entry.
    pub fn resolve_reference(&mut self, table: &mut TableBlock, text: &str) -> ArscResult<ValueItem> {
        let reference = parse_reference(text)
            .ok_or_else(|| ArscError::UnresolvedReference(text.to_string()))?;
        let named = match reference {
            Reference::Null => return Ok(ValueItem::null()),
            Reference::Empty => return Ok(ValueItem::empty()),
            Reference::Literal { attribute, id } => return Ok(reference_item(attribute, id)),
            Reference::Named(named) => named,
        };
        if named.create && named.type_name == "id" && self.is_own_package(named.package.as_deref()) {
            let resource_id = self.ensure_id(table, &named.name)?;
            return Ok(reference_item(named.attribute, resource_id));
        }
        match self.lookup(table, &named) {
            Some(resource_id) => Ok(reference_item(named.attribute, resource_id)),
            None => Err(ArscError::UnresolvedReference(text.to_string())),
        }
    }

    /// Generic textual value: reference, then empty to null, then the typed
    /// grammars in priority order, then an unescaped string.
    pub fn encode_value(&mut self, table: &mut TableBlock, text: &str) -> ArscResult<ValueItem> {
        let trimmed = text.trim();
        if parse::is_reference(trimmed) {
            return self.resolve_reference(table, trimmed);
        }
        if trimmed.is_empty() {
            return Ok(ValueItem::typed(ValueType::Null, 0));
        }
        if let Some(item) = parse::encode_guess(trimmed) {
            return Ok(item);
        }
        if !self.options.string_fallback {
            return Err(ArscError::invalid("value", text));
        }
        Ok(ValueItem::string(unescape_string(text)))
    }

    /// Value of the attribute `attribute_id`: references first, then enum or
    /// flag names, then the grammars its format allows.
    pub fn encode_attribute_value(
        &mut self,
        table: &mut TableBlock,
        attribute_id: u32,
        text: &str,
    ) -> ArscResult<ValueItem> {
        let trimmed = text.trim();
        if parse::is_reference(trimmed) {
            return self.resolve_reference(table, trimmed);
        }
        let attribute = self.store(table).attribute_bag(attribute_id);
        let attribute = match attribute {
            Some(attribute) => attribute,
            None => return self.encode_value(table, text),
        };
        if let Some(item) = attribute.encode_symbols(trimmed) {
            return Ok(item);
        }
        if let Some(item) = encode_for_format(trimmed, attribute.format) {
            return Ok(item);
        }
        if attribute.format.contains(AttributeFormat::STRING) || self.options.string_fallback {
            return Ok(ValueItem::string(unescape_string(text)));
        }
        Err(ArscError::invalid("attribute value", text))
    }

    /// Sets the public flag on every declared id present in the table.
    pub fn apply_public_flags(&self, table: &mut TableBlock) -> usize {
        if !self.options.mark_public {
            return 0;
        }
        let mut count = 0;
        if let Some(package) = table.package_mut(self.package_id) {
            for (_, _, resource_id) in self.public.iter() {
                if package.entry_group(resource_id).is_some() {
                    package.set_public(resource_id, true);
                    count += 1;
                }
            }
        }
        info!("marked {} resources public", count);
        count
    }
}

/// First typed grammar of `format` that accepts `text`.
pub fn encode_for_format(text: &str, format: AttributeFormat) -> Option<ValueItem> {
    let grammars: [(AttributeFormat, fn(&str) -> Option<ValueItem>); 6] = [
        (AttributeFormat::BOOLEAN, parse::encode_boolean),
        (AttributeFormat::COLOR, parse::encode_color),
        (AttributeFormat::DIMENSION, parse::encode_dimension),
        (AttributeFormat::FRACTION, parse::encode_fraction),
        (AttributeFormat::INTEGER, parse::encode_hex_or_int),
        (AttributeFormat::FLOAT, encode_any_float),
    ];
    grammars
        .iter()
        .filter(|(flag, _)| format.contains(*flag))
        .find_map(|(_, grammar)| grammar(text))
}

fn encode_any_float(text: &str) -> Option<ValueItem> {
    parse::encode_float(text).or_else(|| {
        let value = text.trim().parse::<f32>().ok()?;
        Some(ValueItem::typed(ValueType::Float, value.to_bits()))
    })
}

fn reference_item(attribute: bool, resource_id: u32) -> ValueItem {
    let value_type = if attribute {
        ValueType::Attribute
    } else {
        ValueType::Reference
    };
    ValueItem::typed(value_type, resource_id)
}
