//! Chunk framing shared by resource tables and binary XML.
//!
//! Every composite declares its serialized layout once, as an ordered list of
//! [`Segment`]s. Byte counting, writing and offset queries are a single walk
//! over that list, so a node never has to serialize itself twice to learn
//! where one of its children starts.

#[macro_use]
pub mod error;
pub mod reader;

use std::borrow::Cow;
use std::fmt;
use std::io::Write;

pub use error::{ArscError, ArscResult};
pub use reader::BlockReader;

/// Chunk type tags of the compiled resource formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkType {
    Null,
    StringPool,
    Table,
    Xml,
    XmlStartNamespace,
    XmlEndNamespace,
    XmlStartElement,
    XmlEndElement,
    XmlCdata,
    XmlLastChunk,
    XmlResourceMap,
    Package,
    Type,
    Spec,
    Library,
    Overlayable,
    OverlayablePolicy,
    StagedAlias,
    Unknown(u16),
}

impl ChunkType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => ChunkType::Null,
            0x0001 => ChunkType::StringPool,
            0x0002 => ChunkType::Table,
            0x0003 => ChunkType::Xml,
            0x0100 => ChunkType::XmlStartNamespace,
            0x0101 => ChunkType::XmlEndNamespace,
            0x0102 => ChunkType::XmlStartElement,
            0x0103 => ChunkType::XmlEndElement,
            0x0104 => ChunkType::XmlCdata,
            0x017f => ChunkType::XmlLastChunk,
            0x0180 => ChunkType::XmlResourceMap,
            0x0200 => ChunkType::Package,
            0x0201 => ChunkType::Type,
            0x0202 => ChunkType::Spec,
            0x0203 => ChunkType::Library,
            0x0204 => ChunkType::Overlayable,
            0x0205 => ChunkType::OverlayablePolicy,
            0x0206 => ChunkType::StagedAlias,
            other => ChunkType::Unknown(other),
        }
    }

    pub fn value(self) -> u16 {
        match self {
            ChunkType::Null => 0x0000,
            ChunkType::StringPool => 0x0001,
            ChunkType::Table => 0x0002,
            ChunkType::Xml => 0x0003,
            ChunkType::XmlStartNamespace => 0x0100,
            ChunkType::XmlEndNamespace => 0x0101,
            ChunkType::XmlStartElement => 0x0102,
            ChunkType::XmlEndElement => 0x0103,
            ChunkType::XmlCdata => 0x0104,
            ChunkType::XmlLastChunk => 0x017f,
            ChunkType::XmlResourceMap => 0x0180,
            ChunkType::Package => 0x0200,
            ChunkType::Type => 0x0201,
            ChunkType::Spec => 0x0202,
            ChunkType::Library => 0x0203,
            ChunkType::Overlayable => 0x0204,
            ChunkType::OverlayablePolicy => 0x0205,
            ChunkType::StagedAlias => 0x0206,
            ChunkType::Unknown(value) => value,
        }
    }

    /// Chunk types that may appear in the element stream of an XML document.
    pub fn is_xml_node(self) -> bool {
        matches!(
            self,
            ChunkType::XmlStartNamespace
                | ChunkType::XmlEndNamespace
                | ChunkType::XmlStartElement
                | ChunkType::XmlEndElement
                | ChunkType::XmlCdata
                | ChunkType::XmlLastChunk
        )
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Unknown(value) => write!(f, "UNKNOWN(0x{:04x})", value),
            other => write!(f, "{:?}(0x{:04x})", other, other.value()),
        }
    }
}

/// The `{type, headerSize, chunkSize}` prefix of every chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: ChunkType,
    pub header_size: u16,
    pub chunk_size: u32,
}

impl ChunkHeader {
    pub const SIZE: usize = 8;

    pub fn new(chunk_type: ChunkType, header_size: u16) -> Self {
        ChunkHeader {
            chunk_type,
            header_size,
            chunk_size: header_size as u32,
        }
    }

    pub fn segments(&self) -> [Segment<'static>; 3] {
        [
            Segment::U16(self.chunk_type.value()),
            Segment::U16(self.header_size),
            Segment::U32(self.chunk_size),
        ]
    }
}

impl fmt::Display for ChunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} header={} size={}",
            self.chunk_type, self.header_size, self.chunk_size
        )
    }
}

/// One piece of a node's serialized layout: a fixed-width item, a child
/// container, or an ordered list of child containers.
pub enum Segment<'a> {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(Cow<'a, [u8]>),
    Block(&'a dyn Block),
    List(Vec<&'a dyn Block>),
}

impl<'a> Segment<'a> {
    pub fn count_bytes(&self) -> usize {
        match self {
            Segment::U8(_) => 1,
            Segment::U16(_) => 2,
            Segment::U32(_) => 4,
            Segment::Bytes(bytes) => bytes.len(),
            Segment::Block(block) => block.count_bytes(),
            Segment::List(blocks) => blocks.iter().map(|block| block.count_bytes()).sum(),
        }
    }

    pub fn write_bytes(&self, buf: &mut Vec<u8>) -> usize {
        match self {
            Segment::U8(value) => write_u8(buf, *value),
            Segment::U16(value) => write_u16(buf, *value),
            Segment::U32(value) => write_u32(buf, *value),
            Segment::Bytes(bytes) => {
                buf.extend_from_slice(bytes);
                bytes.len()
            }
            Segment::Block(block) => block.write_bytes(buf),
            Segment::List(blocks) => blocks.iter().map(|block| block.write_bytes(buf)).sum(),
        }
    }
}

/// Uniform contract of every node in a chunk tree.
///
/// `refresh` is the only mutation-settling operation: implementations refresh
/// their children first and only then recompute their own derived fields.
/// Callers must refresh before writing.
pub trait Block {
    /// Serialized layout of this node, in write order.
    fn segments(&self) -> Vec<Segment<'_>>;

    fn refresh(&mut self) {}

    /// A null node contributes nothing to the stream.
    fn is_null(&self) -> bool {
        false
    }

    fn count_bytes(&self) -> usize {
        if self.is_null() {
            return 0;
        }
        self.segments().iter().map(Segment::count_bytes).sum()
    }

    /// Bytes preceding the segment at `index` within this node.
    fn count_up_to(&self, index: usize) -> usize {
        if self.is_null() {
            return 0;
        }
        self.segments()
            .iter()
            .take(index)
            .map(Segment::count_bytes)
            .sum()
    }

    fn write_bytes(&self, buf: &mut Vec<u8>) -> usize {
        if self.is_null() {
            return 0;
        }
        self.segments()
            .iter()
            .map(|segment| segment.write_bytes(buf))
            .sum()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.count_bytes());
        self.write_bytes(&mut buf);
        buf
    }

    fn write_to(&self, out: &mut dyn Write) -> ArscResult<usize> {
        let bytes = self.to_bytes();
        out.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

/// Opaque chunk kept verbatim so unknown or unmodelled data survives a
/// read/write cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChunk {
    pub header: ChunkHeader,
    pub bytes: Vec<u8>,
}

impl RawChunk {
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, bytes) = reader.read_raw_chunk()?;
        Ok(RawChunk {
            header,
            bytes: bytes.to_vec(),
        })
    }
}

impl Block for RawChunk {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![Segment::Bytes(Cow::Borrowed(&self.bytes))]
    }
}

pub(crate) fn write_u8(buf: &mut Vec<u8>, value: u8) -> usize {
    buf.push(value);
    1
}

pub(crate) fn write_u16(buf: &mut Vec<u8>, value: u16) -> usize {
    buf.extend_from_slice(&value.to_le_bytes());
    2
}

pub(crate) fn write_u32(buf: &mut Vec<u8>, value: u32) -> usize {
    buf.extend_from_slice(&value.to_le_bytes());
    4
}

pub(crate) fn align_to_four(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

pub(crate) fn padding_for(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Decodes a fixed-length, NUL-padded UTF-16 field such as a package name.
pub(crate) fn read_fixed_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encodes `text` into a NUL-padded UTF-16 field of exactly `len` bytes,
/// truncating so that at least one terminator remains.
pub(crate) fn fixed_utf16(text: &str, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for unit in text.encode_utf16() {
        if out.len() + 2 >= len {
            break;
        }
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.resize(len, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        header: ChunkHeader,
        left: RawChunk,
        right: u32,
    }

    impl Block for Pair {
        fn segments(&self) -> Vec<Segment<'_>> {
            let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
            segments.push(Segment::Block(&self.left));
            segments.push(Segment::U32(self.right));
            segments
        }
    }

    #[test]
    fn counts_and_offsets_follow_segments() {
        let pair = Pair {
            header: ChunkHeader::new(ChunkType::Unknown(0x7777), 8),
            left: RawChunk {
                header: ChunkHeader::new(ChunkType::Null, 8),
                bytes: vec![1, 2, 3, 4, 5, 6, 7, 8],
            },
            right: 0xdeadbeef,
        };
        assert_eq!(pair.count_bytes(), 20);
        assert_eq!(pair.count_up_to(3), 8);
        assert_eq!(pair.count_up_to(4), 16);
        let bytes = pair.to_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[16..], &0xdeadbeefu32.to_le_bytes());
    }

    #[test]
    fn fixed_utf16_round_trips() {
        let field = fixed_utf16("com.example", 256);
        assert_eq!(field.len(), 256);
        assert_eq!(read_fixed_utf16(&field), "com.example");
    }

    #[test]
    fn unknown_chunk_type_is_kept() {
        assert_eq!(ChunkType::from_u16(0x0999), ChunkType::Unknown(0x0999));
        assert_eq!(ChunkType::Unknown(0x0999).value(), 0x0999);
        assert_eq!(ChunkType::from_u16(0x0206), ChunkType::StagedAlias);
    }
}
