//! Element-stream chunks: namespace, element start/end and CDATA nodes.
//!
//! Every node chunk starts with the same 16-byte header: the chunk header, a
//! source line number and a comment string index.

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{Block, ChunkHeader, ChunkType, Segment};
use crate::pool::{StringHolder, StringPool, StringRef};
use crate::value::ResValue;

pub const NODE_HEADER_SIZE: u16 = 16;
pub const ATTRIBUTE_START: u16 = 20;
pub const ATTRIBUTE_SIZE: u16 = 20;

/// Line number and optional comment shared by every node chunk.
#[derive(Debug, Default)]
pub struct NodeInfo {
    pub line: u32,
    pub comment: StringRef,
}

impl NodeInfo {
    fn segments(&self) -> [Segment<'static>; 2] {
        [Segment::U32(self.line), Segment::U32(self.comment.index())]
    }
}

/// Enters a node chunk of type `expected` and reads its common header. The
/// returned reader is positioned at the extension.
fn enter_node<'a>(
    reader: &mut BlockReader<'a>,
    expected: ChunkType,
) -> ArscResult<(ChunkHeader, BlockReader<'a>, NodeInfo)> {
    let start = reader.position();
    let (header, mut chunk) = reader.enter_chunk(expected)?;
    if header.header_size < NODE_HEADER_SIZE {
        fail!(
            "{} at 0x{:x} has a {}-byte header",
            header.chunk_type,
            start,
            header.header_size
        );
    }
    let line = chunk.read_u32()?;
    let comment = StringRef::new(chunk.read_u32()?);
    chunk.seek(header.header_size as usize)?;
    Ok((header, chunk, NodeInfo { line, comment }))
}

/// `ResXMLTree_namespaceExt`, as either a start or an end chunk.
#[derive(Debug)]
pub struct NamespaceChunk {
    header: ChunkHeader,
    pub info: NodeInfo,
    pub prefix: StringRef,
    pub uri: StringRef,
}

impl NamespaceChunk {
    /// Unlinked chunk; the owner links it into its pool.
    pub fn new(start: bool, prefix: u32, uri: u32) -> Self {
        let chunk_type = if start {
            ChunkType::XmlStartNamespace
        } else {
            ChunkType::XmlEndNamespace
        };
        NamespaceChunk {
            header: ChunkHeader::new(chunk_type, NODE_HEADER_SIZE),
            info: NodeInfo::default(),
            prefix: StringRef::new(prefix),
            uri: StringRef::new(uri),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let expected = match reader.peek_header()?.chunk_type {
            ChunkType::XmlEndNamespace => ChunkType::XmlEndNamespace,
            _ => ChunkType::XmlStartNamespace,
        };
        let (header, mut chunk, info) = enter_node(reader, expected)?;
        let prefix = StringRef::new(chunk.read_u32()?);
        let uri = StringRef::new(chunk.read_u32()?);
        Ok(NamespaceChunk {
            header,
            info,
            prefix,
            uri,
        })
    }

    pub fn is_start(&self) -> bool {
        self.header.chunk_type == ChunkType::XmlStartNamespace
    }

    /// The matching end chunk for this declaration.
    pub fn end_chunk(&self, pool: &mut StringPool) -> NamespaceChunk {
        let mut end = NamespaceChunk::new(false, self.prefix.index(), self.uri.index());
        end.info.line = self.info.line;
        pool.link_holder(&mut end);
        end
    }
}

impl StringHolder for NamespaceChunk {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.info.comment);
        visit(&mut self.prefix);
        visit(&mut self.uri);
    }
}

impl Block for NamespaceChunk {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend(self.info.segments());
        segments.push(Segment::U32(self.prefix.index()));
        segments.push(Segment::U32(self.uri.index()));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = NODE_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `ResXMLTree_attribute`: namespace, name, raw text and typed value.
#[derive(Debug)]
pub struct ResXmlAttribute {
    pub namespace: StringRef,
    pub name: StringRef,
    pub raw_value: StringRef,
    value: ResValue,
}

impl ResXmlAttribute {
    pub fn new(namespace: u32, name: u32) -> Self {
        ResXmlAttribute {
            namespace: StringRef::new(namespace),
            name: StringRef::new(name),
            raw_value: StringRef::none(),
            value: ResValue::null(),
        }
    }

    fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let namespace = StringRef::new(reader.read_u32()?);
        let name = StringRef::new(reader.read_u32()?);
        let raw_value = StringRef::new(reader.read_u32()?);
        let value = ResValue::read(reader)?;
        Ok(ResXmlAttribute {
            namespace,
            name,
            raw_value,
            value,
        })
    }

    pub fn value(&self) -> &ResValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut ResValue {
        &mut self.value
    }

    /// Resource id of the attribute name, looked up in the document's
    /// resource map by the name's pool index.
    pub fn resource_id(&self, resource_map: &[u32]) -> Option<u32> {
        resource_map
            .get(self.name.index() as usize)
            .copied()
            .filter(|id| *id != 0)
    }

    pub fn name<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.name)
    }

    pub fn namespace_uri<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.namespace)
    }

    pub fn raw_text<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.raw_value)
    }

    /// Sets the raw text that accompanies string values; `None` clears it.
    pub fn set_raw_text(&mut self, pool: &mut StringPool, text: Option<&str>) {
        match text {
            Some(text) => {
                pool.set_ref(&mut self.raw_value, text);
            }
            None => pool.clear_ref(&mut self.raw_value),
        }
    }
}

impl StringHolder for ResXmlAttribute {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.namespace);
        visit(&mut self.name);
        visit(&mut self.raw_value);
        self.value.visit_string_refs(visit);
    }
}

impl Block for ResXmlAttribute {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![
            Segment::U32(self.namespace.index()),
            Segment::U32(self.name.index()),
            Segment::U32(self.raw_value.index()),
            Segment::Block(&self.value),
        ]
    }
}

/// `ResXMLTree_attrExt` with its attribute array.
#[derive(Debug)]
pub struct StartElement {
    header: ChunkHeader,
    pub info: NodeInfo,
    pub namespace: StringRef,
    pub name: StringRef,
    pub id_index: u16,
    pub class_index: u16,
    pub style_index: u16,
    pub attributes: Vec<ResXmlAttribute>,
}

impl StartElement {
    pub fn new(namespace: u32, name: u32) -> Self {
        StartElement {
            header: ChunkHeader::new(ChunkType::XmlStartElement, NODE_HEADER_SIZE),
            info: NodeInfo::default(),
            namespace: StringRef::new(namespace),
            name: StringRef::new(name),
            id_index: 0,
            class_index: 0,
            style_index: 0,
            attributes: Vec::new(),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk, info) = enter_node(reader, ChunkType::XmlStartElement)?;
        let extension = header.header_size as usize;
        let namespace = StringRef::new(chunk.read_u32()?);
        let name = StringRef::new(chunk.read_u32()?);
        let attribute_start = chunk.read_u16()? as usize;
        let attribute_size = chunk.read_u16()? as usize;
        let count = chunk.read_u16()? as usize;
        let id_index = chunk.read_u16()?;
        let class_index = chunk.read_u16()?;
        let style_index = chunk.read_u16()?;
        if count > 0 && attribute_size < ATTRIBUTE_SIZE as usize {
            fail!("attribute size {} is too small", attribute_size);
        }
        let mut attributes = Vec::with_capacity(count);
        for i in 0..count {
            chunk.seek(extension + attribute_start + i * attribute_size)?;
            attributes.push(ResXmlAttribute::read(&mut chunk)?);
        }
        Ok(StartElement {
            header,
            info,
            namespace,
            name,
            id_index,
            class_index,
            style_index,
            attributes,
        })
    }
}

impl StringHolder for StartElement {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.info.comment);
        visit(&mut self.namespace);
        visit(&mut self.name);
        for attribute in self.attributes.iter_mut() {
            attribute.visit_string_refs(visit);
        }
    }
}

impl Block for StartElement {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend(self.info.segments());
        segments.push(Segment::U32(self.namespace.index()));
        segments.push(Segment::U32(self.name.index()));
        segments.push(Segment::U16(ATTRIBUTE_START));
        segments.push(Segment::U16(ATTRIBUTE_SIZE));
        segments.push(Segment::U16(self.attributes.len() as u16));
        segments.push(Segment::U16(self.id_index));
        segments.push(Segment::U16(self.class_index));
        segments.push(Segment::U16(self.style_index));
        segments.push(Segment::List(
            self.attributes
                .iter()
                .map(|attribute| attribute as &dyn Block)
                .collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = NODE_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `ResXMLTree_endElementExt`.
#[derive(Debug)]
pub struct EndElement {
    header: ChunkHeader,
    pub info: NodeInfo,
    pub namespace: StringRef,
    pub name: StringRef,
}

impl EndElement {
    pub fn new(namespace: u32, name: u32) -> Self {
        EndElement {
            header: ChunkHeader::new(ChunkType::XmlEndElement, NODE_HEADER_SIZE),
            info: NodeInfo::default(),
            namespace: StringRef::new(namespace),
            name: StringRef::new(name),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk, info) = enter_node(reader, ChunkType::XmlEndElement)?;
        let namespace = StringRef::new(chunk.read_u32()?);
        let name = StringRef::new(chunk.read_u32()?);
        Ok(EndElement {
            header,
            info,
            namespace,
            name,
        })
    }
}

impl StringHolder for EndElement {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.info.comment);
        visit(&mut self.namespace);
        visit(&mut self.name);
    }
}

impl Block for EndElement {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend(self.info.segments());
        segments.push(Segment::U32(self.namespace.index()));
        segments.push(Segment::U32(self.name.index()));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = NODE_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `ResXMLTree_cdataExt`: character data between elements.
#[derive(Debug)]
pub struct TextChunk {
    header: ChunkHeader,
    pub info: NodeInfo,
    pub text: StringRef,
    value: ResValue,
}

impl TextChunk {
    /// Linked text node holding `text`.
    pub fn new(pool: &mut StringPool, text: &str) -> Self {
        let mut chunk = TextChunk {
            header: ChunkHeader::new(ChunkType::XmlCdata, NODE_HEADER_SIZE),
            info: NodeInfo::default(),
            text: StringRef::none(),
            value: ResValue::null(),
        };
        pool.set_ref(&mut chunk.text, text);
        chunk.value.set_string(pool, text);
        chunk
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk, info) = enter_node(reader, ChunkType::XmlCdata)?;
        let text = StringRef::new(chunk.read_u32()?);
        let value = ResValue::read(&mut chunk)?;
        Ok(TextChunk {
            header,
            info,
            text,
            value,
        })
    }

    pub fn text<'p>(&self, pool: &'p StringPool) -> Option<&'p str> {
        pool.resolve(&self.text)
    }

    pub fn value(&self) -> &ResValue {
        &self.value
    }

    pub fn set_text(&mut self, pool: &mut StringPool, text: &str) {
        pool.set_ref(&mut self.text, text);
        self.value.set_string(pool, text);
    }
}

impl StringHolder for TextChunk {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.info.comment);
        visit(&mut self.text);
        self.value.visit_string_refs(visit);
    }
}

impl Block for TextChunk {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend(self.info.segments());
        segments.push(Segment::U32(self.text.index()));
        segments.push(Segment::Block(&self.value));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = NODE_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `RES_XML_RESOURCE_MAP_TYPE`: resource ids of the leading pool strings.
#[derive(Debug)]
pub struct ResourceMap {
    header: ChunkHeader,
    pub ids: Vec<u32>,
}

impl Default for ResourceMap {
    fn default() -> Self {
        ResourceMap {
            header: ChunkHeader::new(ChunkType::XmlResourceMap, ChunkHeader::SIZE as u16),
            ids: Vec::new(),
        }
    }
}

impl ResourceMap {
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::XmlResourceMap)?;
        chunk.seek(header.header_size as usize)?;
        let mut ids = Vec::with_capacity(chunk.remaining() / 4);
        while chunk.remaining() >= 4 {
            ids.push(chunk.read_u32()?);
        }
        Ok(ResourceMap { header, ids })
    }
}

impl Block for ResourceMap {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend(self.ids.iter().map(|id| Segment::U32(*id)));
        segments
    }

    fn is_null(&self) -> bool {
        self.ids.is_empty()
    }

    fn refresh(&mut self) {
        self.header.header_size = ChunkHeader::SIZE as u16;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_element_round_trip() {
        let mut pool = StringPool::new(false);
        let name = pool.push("manifest");
        let attribute = pool.push("package");
        let mut element = StartElement::new(crate::pool::NO_INDEX, name);
        element.info.line = 2;
        let mut package = ResXmlAttribute::new(crate::pool::NO_INDEX, attribute);
        package.value_mut().set_string(&mut pool, "com.example");
        package.set_raw_text(&mut pool, Some("com.example"));
        element.attributes.push(package);
        element.refresh();
        let bytes = element.to_bytes();
        assert_eq!(bytes.len(), 36 + 20);

        let reread = StartElement::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.info.line, 2);
        assert_eq!(reread.name.index(), name);
        assert_eq!(reread.attributes.len(), 1);
        assert_eq!(reread.attributes[0].raw_text(&pool), Some("com.example"));
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn text_chunk_is_28_bytes() {
        let mut pool = StringPool::new(false);
        let mut text = TextChunk::new(&mut pool, "hello");
        text.refresh();
        assert_eq!(text.count_bytes(), 28);
        assert_eq!(pool.entry(0).unwrap().reference_count(), 2);
    }

    #[test]
    fn resource_map_is_null_when_empty() {
        let mut map = ResourceMap::default();
        map.refresh();
        assert!(map.to_bytes().is_empty());
        map.ids.push(0x0101_0003);
        map.refresh();
        assert_eq!(map.to_bytes().len(), 12);
    }
}
