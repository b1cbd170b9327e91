//! The element tree of a binary XML document.
//!
//! An element owns the namespace declarations that open right before its
//! start chunk, its attributes, its children and the end chunks that close
//! it. All string references point into the document's pool; every editing
//! method therefore takes that pool.

use log::warn;

use crate::block::error::{ArscError, ArscResult};
use crate::block::reader::BlockReader;
use crate::block::{Block, ChunkType, Segment};
use crate::pool::{StringHolder, StringPool, StringRef, NO_INDEX};
use crate::value::ValueItem;
use crate::xml::chunks::{EndElement, NamespaceChunk, ResXmlAttribute, StartElement, TextChunk};
use crate::xml::ANDROID_NAMESPACE;

#[derive(Debug)]
pub enum ResXmlNode {
    Element(ResXmlElement),
    Text(TextChunk),
}

impl ResXmlNode {
    pub fn as_element(&self) -> Option<&ResXmlElement> {
        match self {
            ResXmlNode::Element(element) => Some(element),
            ResXmlNode::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ResXmlElement> {
        match self {
            ResXmlNode::Element(element) => Some(element),
            ResXmlNode::Text(_) => None,
        }
    }

    fn as_block(&self) -> &dyn Block {
        match self {
            ResXmlNode::Element(element) => element,
            ResXmlNode::Text(text) => text,
        }
    }
}

impl StringHolder for ResXmlNode {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        match self {
            ResXmlNode::Element(element) => element.visit_string_refs(visit),
            ResXmlNode::Text(text) => text.visit_string_refs(visit),
        }
    }
}

#[derive(Debug)]
pub struct ResXmlElement {
    namespaces: Vec<NamespaceChunk>,
    start: StartElement,
    children: Vec<ResXmlNode>,
    end: EndElement,
    namespace_ends: Vec<NamespaceChunk>,
}

fn index_of(pool: &mut StringPool, text: Option<&str>) -> u32 {
    text.map_or(NO_INDEX, |text| pool.get_or_create(text))
}

impl ResXmlElement {
    /// A linked element named `name` in `namespace_uri`.
    pub fn new(pool: &mut StringPool, namespace_uri: Option<&str>, name: &str) -> Self {
        let namespace = index_of(pool, namespace_uri);
        let name = pool.get_or_create(name);
        let mut element = ResXmlElement {
            namespaces: Vec::new(),
            start: StartElement::new(namespace, name),
            children: Vec::new(),
            end: EndElement::new(namespace, name),
            namespace_ends: Vec::new(),
        };
        pool.link_holder(&mut element);
        element
    }

    /// Consumes element-stream chunks until the element opened first is
    /// closed, along with the namespace scopes it declared.
    pub(crate) fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let mut pending: Vec<NamespaceChunk> = Vec::new();
        let mut stack: Vec<ResXmlElement> = Vec::new();
        loop {
            let offset = reader.position();
            let header = reader.peek_header()?;
            match header.chunk_type {
                ChunkType::XmlStartNamespace => pending.push(NamespaceChunk::read(reader)?),
                ChunkType::XmlStartElement => {
                    let start = StartElement::read(reader)?;
                    stack.push(ResXmlElement {
                        namespaces: std::mem::take(&mut pending),
                        start,
                        children: Vec::new(),
                        end: EndElement::new(NO_INDEX, NO_INDEX),
                        namespace_ends: Vec::new(),
                    });
                }
                ChunkType::XmlCdata => {
                    let text = TextChunk::read(reader)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(ResXmlNode::Text(text)),
                        None => fail!("character data outside of an element at 0x{:x}", offset),
                    }
                }
                ChunkType::XmlEndElement => {
                    let end = EndElement::read(reader)?;
                    let mut element = match stack.pop() {
                        Some(element) => element,
                        None => fail!("end element without a start at 0x{:x}", offset),
                    };
                    if end.name.index() != element.start.name.index() {
                        warn!(
                            "end element at 0x{:x} names string {} but closes {}",
                            offset,
                            end.name.index(),
                            element.start.name.index()
                        );
                    }
                    element.end = end;
                    while element.namespace_ends.len() < element.namespaces.len()
                        && reader.is_available()
                        && reader.peek_header()?.chunk_type == ChunkType::XmlEndNamespace
                    {
                        element.namespace_ends.push(NamespaceChunk::read(reader)?);
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(ResXmlNode::Element(element)),
                        None => return Ok(element),
                    }
                }
                ChunkType::XmlEndNamespace => {
                    fail!("end namespace without an open scope at 0x{:x}", offset)
                }
                other => {
                    return Err(ArscError::UnexpectedChunk {
                        expected: "XML element node".to_string(),
                        actual: other,
                        offset,
                    })
                }
            }
        }
    }

    pub fn name<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.start.name)
    }

    pub fn namespace_uri<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.start.namespace)
    }

    pub fn set_name(&mut self, pool: &mut StringPool, namespace_uri: Option<&str>, name: &str) {
        let namespace = index_of(pool, namespace_uri);
        let name = pool.get_or_create(name);
        pool.rebind(&mut self.start.namespace, namespace);
        pool.rebind(&mut self.start.name, name);
        pool.rebind(&mut self.end.namespace, namespace);
        pool.rebind(&mut self.end.name, name);
    }

    pub fn line(&self) -> u32 {
        self.start.info.line
    }

    pub fn set_line(&mut self, line: u32) {
        self.start.info.line = line;
        for namespace in self.namespaces.iter_mut() {
            namespace.info.line = line;
        }
    }

    pub fn comment<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.start.info.comment)
    }

    pub fn set_comment(&mut self, pool: &mut StringPool, comment: Option<&str>) {
        match comment {
            Some(comment) => {
                pool.set_ref(&mut self.start.info.comment, comment);
            }
            None => pool.clear_ref(&mut self.start.info.comment),
        }
    }

    pub fn namespaces(&self) -> &[NamespaceChunk] {
        &self.namespaces
    }

    /// Declares `prefix` -> `uri` on this element. Returns false when the
    /// same declaration already exists here.
    pub fn add_namespace(&mut self, pool: &mut StringPool, prefix: &str, uri: &str) -> bool {
        let declared = self.namespaces.iter().any(|namespace| {
            pool.resolve(&namespace.prefix) == Some(prefix) && pool.resolve(&namespace.uri) == Some(uri)
        });
        if declared {
            return false;
        }
        let prefix = pool.get_or_create(prefix);
        let uri = pool.get_or_create(uri);
        let mut start = NamespaceChunk::new(true, prefix, uri);
        start.info.line = self.line();
        pool.link_holder(&mut start);
        let end = start.end_chunk(pool);
        self.namespaces.push(start);
        self.namespace_ends.insert(0, end);
        true
    }

    pub fn attributes(&self) -> &[ResXmlAttribute] {
        &self.start.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut [ResXmlAttribute] {
        &mut self.start.attributes
    }

    pub fn attribute(
        &self,
        pool: &StringPool,
        namespace_uri: Option<&str>,
        name: &str,
    ) -> Option<&ResXmlAttribute> {
        self.start.attributes.iter().find(|attribute| {
            attribute.name(pool) == Some(name) && attribute.namespace_uri(pool) == namespace_uri
        })
    }

    pub fn attribute_by_id(&self, resource_map: &[u32], resource_id: u32) -> Option<&ResXmlAttribute> {
        self.start
            .attributes
            .iter()
            .find(|attribute| attribute.resource_id(resource_map) == Some(resource_id))
    }

    /// Sets the attribute whose name string is `name_index`, creating it when
    /// missing. String values also carry their text as the raw value.
    pub fn set_attribute(
        &mut self,
        pool: &mut StringPool,
        namespace_uri: Option<&str>,
        name_index: u32,
        value: &ValueItem,
    ) -> &mut ResXmlAttribute {
        let namespace = index_of(pool, namespace_uri);
        let position = self.start.attributes.iter().position(|attribute| {
            attribute.name.index() == name_index && attribute.namespace.index() == namespace
        });
        let position = match position {
            Some(position) => position,
            None => {
                let mut attribute = ResXmlAttribute::new(namespace, name_index);
                pool.link_holder(&mut attribute);
                self.start.attributes.push(attribute);
                self.start.attributes.len() - 1
            }
        };
        let attribute = &mut self.start.attributes[position];
        attribute.value_mut().assign(pool, value);
        let raw = if value.is_string() {
            value.text.as_deref()
        } else {
            None
        };
        attribute.set_raw_text(pool, raw);
        attribute
    }

    pub fn remove_attribute(&mut self, pool: &mut StringPool, index: usize) -> bool {
        if index >= self.start.attributes.len() {
            return false;
        }
        let mut attribute = self.start.attributes.remove(index);
        pool.unlink_holder(&mut attribute);
        true
    }

    pub fn children(&self) -> &[ResXmlNode] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &ResXmlElement> {
        self.children.iter().filter_map(ResXmlNode::as_element)
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut ResXmlElement> {
        self.children.iter_mut().filter_map(ResXmlNode::as_element_mut)
    }

    pub fn find_child(&self, pool: &StringPool, name: &str) -> Option<&ResXmlElement> {
        self.child_elements()
            .find(|child| child.name(pool) == Some(name))
    }

    pub fn create_child(
        &mut self,
        pool: &mut StringPool,
        namespace_uri: Option<&str>,
        name: &str,
    ) -> &mut ResXmlElement {
        let mut child = ResXmlElement::new(pool, namespace_uri, name);
        child.set_line(self.line());
        self.children.push(ResXmlNode::Element(child));
        match self.children.last_mut() {
            Some(ResXmlNode::Element(child)) => child,
            _ => unreachable!("a child element was just pushed"),
        }
    }

    pub fn add_text(&mut self, pool: &mut StringPool, text: &str) {
        self.children.push(ResXmlNode::Text(TextChunk::new(pool, text)));
    }

    pub fn remove_child(&mut self, pool: &mut StringPool, index: usize) -> bool {
        if index >= self.children.len() {
            return false;
        }
        let mut child = self.children.remove(index);
        pool.unlink_holder(&mut child);
        true
    }

    /// Number of elements in this subtree, this one included.
    pub fn count_elements(&self) -> usize {
        1 + self.child_elements().map(ResXmlElement::count_elements).sum::<usize>()
    }

    /// Orders attributes by resource id, unmapped ones last, and recomputes
    /// the id/class/style indexes of the whole subtree.
    pub(crate) fn prepare(&mut self, pool: &StringPool, resource_map: &[u32]) {
        self.start
            .attributes
            .sort_by_key(|attribute| attribute.resource_id(resource_map).unwrap_or(u32::MAX));
        self.start.id_index = 0;
        self.start.class_index = 0;
        self.start.style_index = 0;
        for (i, attribute) in self.start.attributes.iter().enumerate() {
            let slot = i as u16 + 1;
            match (attribute.namespace_uri(pool), attribute.name(pool)) {
                (Some(ANDROID_NAMESPACE), Some("id")) => self.start.id_index = slot,
                (None, Some("class")) => self.start.class_index = slot,
                (None, Some("style")) => self.start.style_index = slot,
                _ => {}
            }
        }
        for child in self.child_elements_mut() {
            child.prepare(pool, resource_map);
        }
    }
}

impl StringHolder for ResXmlElement {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for namespace in self.namespaces.iter_mut() {
            namespace.visit_string_refs(visit);
        }
        self.start.visit_string_refs(visit);
        for child in self.children.iter_mut() {
            child.visit_string_refs(visit);
        }
        self.end.visit_string_refs(visit);
        for namespace in self.namespace_ends.iter_mut() {
            namespace.visit_string_refs(visit);
        }
    }
}

impl Block for ResXmlElement {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![
            Segment::List(self.namespaces.iter().map(|ns| ns as &dyn Block).collect()),
            Segment::Block(&self.start),
            Segment::List(self.children.iter().map(ResXmlNode::as_block).collect()),
            Segment::Block(&self.end),
            Segment::List(self.namespace_ends.iter().map(|ns| ns as &dyn Block).collect()),
        ]
    }

    fn refresh(&mut self) {
        for namespace in self.namespaces.iter_mut() {
            namespace.refresh();
        }
        self.start.refresh();
        for child in self.children.iter_mut() {
            match child {
                ResXmlNode::Element(element) => element.refresh(),
                ResXmlNode::Text(text) => text.refresh(),
            }
        }
        self.end.info.line = self.start.info.line;
        self.end.refresh();
        for namespace in self.namespace_ends.iter_mut() {
            namespace.refresh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    fn tree(pool: &mut StringPool) -> ResXmlElement {
        let mut root = ResXmlElement::new(pool, None, "LinearLayout");
        root.add_namespace(pool, "android", ANDROID_NAMESPACE);
        let orientation = pool.get_or_create("orientation");
        root.set_attribute(
            pool,
            Some(ANDROID_NAMESPACE),
            orientation,
            &ValueItem::typed(ValueType::IntDec, 1),
        );
        let child = root.create_child(pool, None, "TextView");
        child.add_text(pool, "hi");
        root
    }

    #[test]
    fn read_consumes_one_subtree() {
        let mut pool = StringPool::new(false);
        let mut root = tree(&mut pool);
        root.refresh();
        let bytes = root.to_bytes();

        let mut reader = BlockReader::new(&bytes);
        let mut reread = ResXmlElement::read(&mut reader).unwrap();
        assert!(!reader.is_available());
        pool.link_holder(&mut reread);
        assert_eq!(reread.name(&pool), Some("LinearLayout"));
        assert_eq!(reread.namespaces().len(), 1);
        assert_eq!(reread.count_elements(), 2);
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn setting_an_attribute_twice_replaces_it() {
        let mut pool = StringPool::new(false);
        let mut root = tree(&mut pool);
        let orientation = pool.get_or_create("orientation");
        root.set_attribute(
            &mut pool,
            Some(ANDROID_NAMESPACE),
            orientation,
            &ValueItem::string("vertical"),
        );
        assert_eq!(root.attributes().len(), 1);
        let attribute = &root.attributes()[0];
        assert_eq!(attribute.raw_text(&pool), Some("vertical"));
        assert!(attribute.value().is_string());
    }

    #[test]
    fn android_id_sets_the_id_index() {
        let mut pool = StringPool::new(false);
        let mut root = tree(&mut pool);
        let id = pool.get_or_create("id");
        root.set_attribute(&mut pool, Some(ANDROID_NAMESPACE), id, &ValueItem::reference(0x7f080000));
        root.prepare(&pool, &[]);
        assert_eq!(root.start.id_index, 2);
    }

    #[test]
    fn removing_a_child_releases_its_strings() {
        let mut pool = StringPool::new(false);
        let mut root = tree(&mut pool);
        let hi = pool.index_of("hi").unwrap();
        assert!(pool.entry(hi).unwrap().reference_count() > 0);
        assert!(root.remove_child(&mut pool, 0));
        assert_eq!(pool.entry(hi).unwrap().reference_count(), 0);
    }
}
