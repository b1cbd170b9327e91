//! Binary XML documents (`AndroidManifest.xml`, layouts, drawables).
//!
//! A document is a string pool, an optional resource map and one element
//! tree. Attribute names that carry a resource id sit at the head of the pool,
//! one per resource map slot, so the pool keeps that prefix apart from the
//! deduplicated strings behind it.

pub mod chunks;
pub mod element;
pub mod text;

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::block::error::{ArscError, ArscResult};
use crate::block::reader::BlockReader;
use crate::block::{Block, ChunkHeader, ChunkType, RawChunk, Segment};
use crate::pool::{StringHolder, StringPool};
use crate::value::{EntryStore, ValueType};

pub use chunks::{NamespaceChunk, ResXmlAttribute, ResourceMap, TextChunk};
pub use element::{ResXmlElement, ResXmlNode};
pub use text::{XmlAttribute, XmlContent, XmlDocument, XmlElement};

pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";
pub const ANDROID_PREFIX: &str = "android";
pub const AUTO_NAMESPACE: &str = "http://schemas.android.com/apk/res-auto";

const XML_HEADER_SIZE: u16 = 8;

#[derive(Debug)]
pub struct ResXmlDocument {
    header: ChunkHeader,
    pool: StringPool,
    resource_map: ResourceMap,
    root: Option<ResXmlElement>,
    tail: Vec<RawChunk>,
}

impl Default for ResXmlDocument {
    fn default() -> Self {
        ResXmlDocument::new()
    }
}

impl ResXmlDocument {
    pub fn new() -> Self {
        ResXmlDocument {
            header: ChunkHeader::new(ChunkType::Xml, XML_HEADER_SIZE),
            pool: StringPool::new(false),
            resource_map: ResourceMap::default(),
            root: None,
            tail: Vec::new(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> ArscResult<Self> {
        ResXmlDocument::read(&mut BlockReader::new(bytes))
    }

    /// Reads one XML chunk. Only the pool, the resource map and element
    /// stream chunks may appear inside it.
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Xml)?;
        chunk.seek(header.header_size as usize)?;
        let mut document = ResXmlDocument {
            header,
            ..ResXmlDocument::new()
        };
        while chunk.is_available() {
            let offset = chunk.position();
            let next = chunk.peek_header()?;
            match next.chunk_type {
                ChunkType::StringPool => document.pool = StringPool::read(&mut chunk)?,
                ChunkType::XmlResourceMap => document.resource_map = ResourceMap::read(&mut chunk)?,
                ChunkType::XmlLastChunk => document.tail.push(RawChunk::read(&mut chunk)?),
                kind if kind.is_xml_node() => {
                    if document.root.is_some() {
                        fail!("second root element at 0x{:x}", offset);
                    }
                    document.root = Some(ResXmlElement::read(&mut chunk)?);
                }
                other => {
                    return Err(ArscError::UnexpectedChunk {
                        expected: "XML document child".to_string(),
                        actual: other,
                        offset,
                    })
                }
            }
        }
        document.link();
        debug!(
            "read XML document: {} strings, {} resource ids, {} elements",
            document.pool.len(),
            document.resource_map.ids.len(),
            document.root.as_ref().map_or(0, ResXmlElement::count_elements)
        );
        Ok(document)
    }

    /// Registers every string reference of the tree with the pool.
    fn link(&mut self) {
        self.pool.set_reserved(self.resource_map.ids.len() as u32);
        if let Some(root) = self.root.as_mut() {
            self.pool.link_holder(root);
        }
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn resource_map(&self) -> &[u32] {
        &self.resource_map.ids
    }

    pub fn root(&self) -> Option<&ResXmlElement> {
        self.root.as_ref()
    }

    /// The pool together with the root, for edits that need both.
    pub fn split_mut(&mut self) -> (&mut StringPool, Option<&mut ResXmlElement>) {
        (&mut self.pool, self.root.as_mut())
    }

    /// Replaces the root with a new, empty element.
    pub fn create_root_element(&mut self, name: &str) -> &mut ResXmlElement {
        if let Some(mut old) = self.root.take() {
            self.pool.unlink_holder(&mut old);
        }
        let root = ResXmlElement::new(&mut self.pool, None, name);
        self.root.insert(root)
    }

    /// Pool index of an attribute name. Names with a resource id live in the
    /// resource-mapped prefix of the pool; a new one is inserted at the end
    /// of that prefix and the tree is renumbered when strings follow it.
    pub fn get_or_create_attribute_name(&mut self, name: &str, resource_id: u32) -> u32 {
        if resource_id == 0 {
            return self.pool.get_or_create(name);
        }
        let ids = &self.resource_map.ids;
        if let Some(index) = (0..ids.len()).find(|i| ids[*i] == resource_id && self.pool.get(*i as u32) == Some(name)) {
            return index as u32;
        }
        let index = ids.len() as u32;
        if (index as usize) < self.pool.len() {
            let remap = self.pool.insert(index, name);
            if let Some(root) = self.root.as_mut() {
                remap.apply_to(root);
            }
        } else {
            self.pool.push(name);
        }
        self.resource_map.ids.push(resource_id);
        self.pool.set_reserved(self.resource_map.ids.len() as u32);
        index
    }

    pub fn attribute_resource_id(&self, attribute: &ResXmlAttribute) -> Option<u32> {
        attribute.resource_id(&self.resource_map.ids)
    }

    /// Drops unreferenced strings, keeping the resource map aligned with the
    /// surviving resource-mapped names.
    pub fn remove_unused_strings(&mut self) -> usize {
        let before = self.pool.len();
        let remap = self.pool.remove_unused_strings();
        if remap.is_identity() {
            return 0;
        }
        let ids: Vec<u32> = self
            .resource_map
            .ids
            .iter()
            .enumerate()
            .filter(|(old, _)| remap.get(*old as u32).is_some())
            .map(|(_, id)| *id)
            .collect();
        self.resource_map.ids = ids;
        if let Some(root) = self.root.as_mut() {
            remap.apply_to(root);
        }
        before - self.pool.len()
    }

    /// Renders the document as textual XML. Attribute values with an enum or
    /// flag definition in `store` are written by symbol name.
    pub fn decode_to_xml(&self, store: &dyn EntryStore, package_id: u8) -> ArscResult<String> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| ArscError::Xml("document has no root element".to_string()))?;
        let mut scopes: Vec<BTreeMap<String, String>> = Vec::new();
        let element = self.decode_element(root, store, package_id, &mut scopes);
        XmlDocument::new(element).to_string()
    }

    fn decode_element(
        &self,
        element: &ResXmlElement,
        store: &dyn EntryStore,
        package_id: u8,
        scopes: &mut Vec<BTreeMap<String, String>>,
    ) -> XmlElement {
        let pool = &self.pool;
        let mut scope = BTreeMap::new();
        let mut out = XmlElement::new(element.name(pool).unwrap_or_default());
        for namespace in element.namespaces() {
            let prefix = pool.resolve(&namespace.prefix).unwrap_or_default().to_string();
            let uri = pool.resolve(&namespace.uri).unwrap_or_default().to_string();
            scope.insert(uri.clone(), prefix.clone());
            out.namespaces.push((prefix, uri));
        }
        scopes.push(scope);
        out.line = element.line();
        out.namespace_uri = element.namespace_uri(pool).map(str::to_string);
        out.prefix = out
            .namespace_uri
            .as_deref()
            .and_then(|uri| prefix_in_scope(scopes, uri));

        for attribute in element.attributes() {
            let resource_id = self.attribute_resource_id(attribute);
            let name = match attribute.name(pool) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => match resource_id.and_then(|id| store.resource_name(id)) {
                    Some(name) => name.name,
                    None => format!("attr_0x{:08x}", resource_id.unwrap_or_default()),
                },
            };
            let namespace_uri = attribute.namespace_uri(pool).map(str::to_string);
            let prefix = namespace_uri.as_deref().and_then(|uri| {
                let prefix = prefix_in_scope(scopes, uri);
                if prefix.is_none() {
                    warn!("no prefix in scope for namespace '{}'", uri);
                }
                prefix
            });
            out.attributes.push(XmlAttribute {
                prefix,
                namespace_uri,
                name,
                value: self.attribute_text(attribute, resource_id, store, package_id),
            });
        }

        for child in element.children() {
            match child {
                ResXmlNode::Element(child) => {
                    let child = self.decode_element(child, store, package_id, scopes);
                    out.append_child(child);
                }
                ResXmlNode::Text(text) => out.push_text(text.text(pool).unwrap_or_default()),
            }
        }
        scopes.pop();
        out
    }

    fn attribute_text(
        &self,
        attribute: &ResXmlAttribute,
        resource_id: Option<u32>,
        store: &dyn EntryStore,
        package_id: u8,
    ) -> String {
        let value = attribute.value();
        match value.value_type() {
            ValueType::String => attribute
                .raw_text(&self.pool)
                .or_else(|| self.pool.get(value.data()))
                .unwrap_or_default()
                .to_string(),
            ValueType::IntDec | ValueType::IntHex => resource_id
                .and_then(|id| store.attribute_bag(id))
                .and_then(|bag| bag.decode_value_text(value.data()))
                .unwrap_or_else(|| value.to_item(&self.pool).to_text(store, package_id)),
            _ => value.to_item(&self.pool).to_text(store, package_id),
        }
    }

    pub fn to_binary(&mut self) -> Vec<u8> {
        self.refresh();
        self.to_bytes()
    }
}

fn prefix_in_scope(scopes: &[BTreeMap<String, String>], uri: &str) -> Option<String> {
    scopes.iter().rev().find_map(|scope| scope.get(uri)).cloned()
}

impl StringHolder for ResXmlDocument {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut crate::pool::StringRef)) {
        if let Some(root) = self.root.as_mut() {
            root.visit_string_refs(visit);
        }
    }
}

impl Block for ResXmlDocument {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::Block(&self.pool));
        segments.push(Segment::Block(&self.resource_map));
        if let Some(root) = &self.root {
            segments.push(Segment::Block(root));
        }
        segments.push(Segment::List(
            self.tail.iter().map(|chunk| chunk as &dyn Block).collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        if let Some(root) = self.root.as_mut() {
            root.prepare(&self.pool, &self.resource_map.ids);
            root.refresh();
        }
        self.pool.refresh();
        self.resource_map.refresh();
        self.header.header_size = XML_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{EmptyStore, ValueItem};

    const ORIENTATION: u32 = 0x010100c4;
    const TEXT: u32 = 0x0101014f;

    fn layout() -> ResXmlDocument {
        let mut document = ResXmlDocument::new();
        let orientation = document.get_or_create_attribute_name("orientation", ORIENTATION);
        let (pool, _) = document.split_mut();
        pool.get_or_create("unrelated");
        let text = document.get_or_create_attribute_name("text", TEXT);
        document.create_root_element("LinearLayout");
        let (pool, root) = document.split_mut();
        let root = root.unwrap();
        root.add_namespace(pool, ANDROID_PREFIX, ANDROID_NAMESPACE);
        root.set_attribute(
            pool,
            Some(ANDROID_NAMESPACE),
            orientation,
            &ValueItem::typed(ValueType::IntDec, 1),
        );
        let child = root.create_child(pool, None, "TextView");
        child.set_attribute(pool, Some(ANDROID_NAMESPACE), text, &ValueItem::string("Hello"));
        document
    }

    #[test]
    fn resource_mapped_names_form_the_pool_prefix() {
        let document = layout();
        assert_eq!(document.resource_map(), &[ORIENTATION, TEXT]);
        assert_eq!(document.pool().get(0), Some("orientation"));
        assert_eq!(document.pool().get(1), Some("text"));
        assert_eq!(document.pool().get(2), Some("unrelated"));
        assert_eq!(document.pool().reserved(), 2);
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let mut document = layout();
        let bytes = document.to_binary();
        let mut reread = ResXmlDocument::from_bytes(&bytes).unwrap();
        assert_eq!(reread.resource_map(), &[ORIENTATION, TEXT]);
        let root = reread.root().unwrap();
        assert_eq!(root.name(reread.pool()), Some("LinearLayout"));
        let child = root.child_elements().next().unwrap();
        let text = child.attribute_by_id(reread.resource_map(), TEXT).unwrap();
        assert_eq!(text.raw_text(reread.pool()), Some("Hello"));
        assert_eq!(reread.to_binary(), bytes);
    }

    #[test]
    fn compaction_realigns_the_resource_map() {
        let mut document = layout();
        document.remove_unused_strings();
        assert_eq!(document.resource_map(), &[ORIENTATION, TEXT]);
        assert_eq!(document.pool().index_of("unrelated"), None);

        let (pool, root) = document.split_mut();
        let root = root.unwrap();
        assert!(root.remove_attribute(pool, 0));
        document.remove_unused_strings();
        assert_eq!(document.resource_map(), &[TEXT]);
        assert_eq!(document.pool().get(0), Some("text"));
        let root = document.root().unwrap();
        let child = root.child_elements().next().unwrap();
        assert_eq!(child.attributes()[0].name(document.pool()), Some("text"));
        assert_eq!(document.attribute_resource_id(&child.attributes()[0]), Some(TEXT));
    }

    #[test]
    fn decodes_to_textual_xml() {
        let document = layout();
        let xml = document.decode_to_xml(&EmptyStore, 0x7f).unwrap();
        assert!(xml.contains("xmlns:android=\"http://schemas.android.com/apk/res/android\""));
        assert!(xml.contains("android:orientation=\"1\""));
        assert!(xml.contains("<TextView android:text=\"Hello\"/>"));
    }

    #[test]
    fn nested_table_chunk_is_rejected() {
        let mut document = layout();
        let mut bytes = document.to_binary();
        let mut table = crate::table::TableBlock::new();
        let nested = table.to_binary();
        bytes.extend_from_slice(&nested);
        let size = bytes.len() as u32;
        bytes[4..8].copy_from_slice(&size.to_le_bytes());
        match ResXmlDocument::from_bytes(&bytes) {
            Err(ArscError::UnexpectedChunk { actual, .. }) => assert_eq!(actual, ChunkType::Table),
            other => panic!("expected an unexpected-chunk error, got {:?}", other.map(|_| ())),
        }
    }
}
