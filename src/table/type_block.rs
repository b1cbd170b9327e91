use std::borrow::Cow;

use bitflags::bitflags;
use log::trace;

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{Block, ChunkHeader, ChunkType, Segment};
use crate::pool::{StringPool, StringRef};
use crate::table::config::ResConfig;
use crate::table::entry::Entry;

const SPEC_HEADER_SIZE: u16 = 16;
const TYPE_HEADER_BASE: u16 = 20;
const NO_ENTRY: u32 = 0xFFFF_FFFF;
const NO_ENTRY16: u16 = 0xFFFF;

bitflags! {
    /// `ResTable_type` flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        const SPARSE = 0x01;
        const OFFSET16 = 0x02;
    }
}

bitflags! {
    /// Per-entry flags of a spec chunk.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SpecFlags: u32 {
        const PUBLIC = 0x4000_0000;
        const STAGED_API = 0x2000_0000;
    }
}

/// `ResTable_typeSpec`: configuration-change flags for every entry of a type.
#[derive(Debug)]
pub struct SpecBlock {
    header: ChunkHeader,
    id: u8,
    types_count: u16,
    flags: Vec<u32>,
}

impl SpecBlock {
    pub fn new(id: u8) -> Self {
        let mut spec = SpecBlock {
            header: ChunkHeader::new(ChunkType::Spec, SPEC_HEADER_SIZE),
            id,
            types_count: 0,
            flags: Vec::new(),
        };
        spec.refresh();
        spec
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Spec)?;
        let id = chunk.read_u8()?;
        chunk.read_u8()?;
        let types_count = chunk.read_u16()?;
        let count = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;
        let mut flags = Vec::with_capacity(count);
        for _ in 0..count {
            flags.push(chunk.read_u32()?);
        }
        if id == 0 {
            fail!("spec chunk with type id 0");
        }
        Ok(SpecBlock {
            header,
            id,
            types_count,
            flags,
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn entry_count(&self) -> usize {
        self.flags.len()
    }

    pub fn set_entry_count(&mut self, count: usize) {
        self.flags.resize(count, 0);
    }

    pub fn flags(&self, entry_id: u16) -> u32 {
        self.flags.get(entry_id as usize).copied().unwrap_or(0)
    }

    pub fn set_flags(&mut self, entry_id: u16, flags: u32) {
        if entry_id as usize >= self.flags.len() {
            self.flags.resize(entry_id as usize + 1, 0);
        }
        self.flags[entry_id as usize] = flags;
    }

    pub fn is_public(&self, entry_id: u16) -> bool {
        SpecFlags::from_bits_retain(self.flags(entry_id)).contains(SpecFlags::PUBLIC)
    }
}

impl Block for SpecBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend([
            Segment::U8(self.id),
            Segment::U8(0),
            Segment::U16(self.types_count),
            Segment::U32(self.flags.len() as u32),
        ]);
        segments.extend(self.flags.iter().map(|flag| Segment::U32(*flag)));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = SPEC_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `ResTable_type`: the entries of one type under one configuration.
///
/// Slots are dense and indexed by entry id; `None` is an absent entry.
/// Sparse and 16-bit offset layouts are accepted on read and written back
/// dense.
#[derive(Debug)]
pub struct TypeBlock {
    header: ChunkHeader,
    id: u8,
    config: ResConfig,
    entries: Vec<Option<Entry>>,
    offsets: Vec<u8>,
}

impl TypeBlock {
    pub fn new(id: u8, config: ResConfig) -> Self {
        let header_size = TYPE_HEADER_BASE + config.size() as u16;
        let mut block = TypeBlock {
            header: ChunkHeader::new(ChunkType::Type, header_size),
            id,
            config,
            entries: Vec::new(),
            offsets: Vec::new(),
        };
        block.refresh();
        block
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Type)?;
        let id = chunk.read_u8()?;
        let flags = TypeFlags::from_bits_retain(chunk.read_u8()?);
        chunk.read_u16()?;
        let count = chunk.read_u32()? as usize;
        let entries_start = chunk.read_u32()? as usize;
        let config = ResConfig::read(&mut chunk)?;
        chunk.seek(header.header_size as usize)?;
        if id == 0 {
            fail!("type chunk with type id 0");
        }

        let mut slots: Vec<(usize, usize)> = Vec::with_capacity(count);
        if flags.contains(TypeFlags::SPARSE) {
            for _ in 0..count {
                let index = chunk.read_u16()? as usize;
                let offset = chunk.read_u16()? as usize * 4;
                slots.push((index, offset));
            }
        } else if flags.contains(TypeFlags::OFFSET16) {
            for index in 0..count {
                let offset = chunk.read_u16()?;
                if offset != NO_ENTRY16 {
                    slots.push((index, offset as usize * 4));
                }
            }
        } else {
            for index in 0..count {
                let offset = chunk.read_u32()?;
                if offset != NO_ENTRY {
                    slots.push((index, offset as usize));
                }
            }
        }

        let dense_len = if flags.contains(TypeFlags::SPARSE) {
            slots.iter().map(|(index, _)| index + 1).max().unwrap_or(0)
        } else {
            count
        };
        let mut entries: Vec<Option<Entry>> = (0..dense_len).map(|_| None).collect();
        for (index, offset) in slots {
            chunk.seek(entries_start + offset)?;
            entries[index] = Some(Entry::read(&mut chunk)?);
        }
        trace!(
            "read type 0x{:02x} {} with {} slots",
            id,
            config,
            entries.len()
        );
        Ok(TypeBlock {
            header,
            id,
            config,
            entries,
            offsets: Vec::new(),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn config(&self) -> &ResConfig {
        &self.config
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn set_entry_count(&mut self, count: usize) {
        if count > self.entries.len() {
            self.entries.resize_with(count, || None);
        }
    }

    pub fn get(&self, entry_id: u16) -> Option<&Entry> {
        self.entries.get(entry_id as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, entry_id: u16) -> Option<&mut Entry> {
        self.entries.get_mut(entry_id as usize).and_then(Option::as_mut)
    }

    /// The entry at `entry_id`, creating the slot (and any gap before it).
    pub fn get_or_create(&mut self, entry_id: u16) -> &mut Entry {
        let index = entry_id as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index].get_or_insert_with(|| Entry::new(crate::pool::NO_INDEX))
    }

    /// Takes the entry out of its slot; the caller releases its pool links.
    pub fn take(&mut self, entry_id: u16) -> Option<Entry> {
        self.entries.get_mut(entry_id as usize).and_then(Option::take)
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index as u16, entry)))
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = (u16, &mut Entry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|entry| (index as u16, entry)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    pub fn link(&mut self, pool: &mut StringPool, key_pool: &mut StringPool) {
        for (_, entry) in self.entries_mut() {
            entry.link(pool, key_pool);
        }
    }

    pub fn visit_values(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for (_, entry) in self.entries_mut() {
            entry.visit_values(visit);
        }
    }

    pub fn visit_keys(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for (_, entry) in self.entries_mut() {
            entry.visit_key(visit);
        }
    }

    fn entries_start(&self) -> u32 {
        self.header.header_size as u32 + 4 * self.entries.len() as u32
    }
}

impl Block for TypeBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend([
            Segment::U8(self.id),
            Segment::U8(0),
            Segment::U16(0),
            Segment::U32(self.entries.len() as u32),
            Segment::U32(self.entries_start()),
            Segment::Block(&self.config),
            Segment::Bytes(Cow::Borrowed(&self.offsets)),
            Segment::List(
                self.entries
                    .iter()
                    .flatten()
                    .map(|entry| entry as &dyn Block)
                    .collect(),
            ),
        ]);
        segments
    }

    fn refresh(&mut self) {
        let mut offsets = Vec::with_capacity(self.entries.len() * 4);
        let mut cursor = 0u32;
        for slot in &self.entries {
            match slot {
                Some(entry) => {
                    offsets.extend_from_slice(&cursor.to_le_bytes());
                    cursor += entry.count_bytes() as u32;
                }
                None => offsets.extend_from_slice(&NO_ENTRY.to_le_bytes()),
            }
        }
        self.offsets = offsets;
        self.header.header_size = TYPE_HEADER_BASE + self.config.size() as u16;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// One spec chunk with the type chunks that share its id.
#[derive(Debug)]
pub struct TypeSpecPair {
    spec: SpecBlock,
    types: Vec<TypeBlock>,
}

impl TypeSpecPair {
    pub fn new(id: u8) -> Self {
        TypeSpecPair {
            spec: SpecBlock::new(id),
            types: Vec::new(),
        }
    }

    pub fn from_spec(spec: SpecBlock) -> Self {
        TypeSpecPair {
            spec,
            types: Vec::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.spec.id()
    }

    pub fn spec(&self) -> &SpecBlock {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut SpecBlock {
        &mut self.spec
    }

    pub fn types(&self) -> &[TypeBlock] {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut Vec<TypeBlock> {
        &mut self.types
    }

    pub fn push_type(&mut self, block: TypeBlock) {
        self.types.push(block);
    }

    pub fn get_type(&self, config: &ResConfig) -> Option<&TypeBlock> {
        self.types.iter().find(|block| block.config() == config)
    }

    pub fn get_type_mut(&mut self, config: &ResConfig) -> Option<&mut TypeBlock> {
        self.types.iter_mut().find(|block| block.config() == config)
    }

    pub fn get_or_create_type(&mut self, config: &ResConfig) -> &mut TypeBlock {
        let position = match self.types.iter().position(|block| block.config() == config) {
            Some(position) => position,
            None => {
                let mut block = TypeBlock::new(self.id(), config.clone());
                block.set_entry_count(self.spec.entry_count());
                self.types.push(block);
                self.types.len() - 1
            }
        };
        &mut self.types[position]
    }

    /// Widest entry count among the spec and all its types.
    pub fn entry_count(&self) -> usize {
        self.types
            .iter()
            .map(TypeBlock::entry_count)
            .chain(std::iter::once(self.spec.entry_count()))
            .max()
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.types.iter().all(TypeBlock::is_empty)
    }

    /// Drops type chunks without entries.
    pub fn remove_empty_types(&mut self) -> usize {
        let before = self.types.len();
        self.types.retain(|block| !block.is_empty());
        before - self.types.len()
    }

    pub fn link(&mut self, pool: &mut StringPool, key_pool: &mut StringPool) {
        for block in self.types.iter_mut() {
            block.link(pool, key_pool);
        }
    }

    pub fn visit_values(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for block in self.types.iter_mut() {
            block.visit_values(visit);
        }
    }

    pub fn visit_keys(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for block in self.types.iter_mut() {
            block.visit_keys(visit);
        }
    }
}

impl Block for TypeSpecPair {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments = vec![Segment::Block(&self.spec as &dyn Block)];
        segments.push(Segment::List(
            self.types.iter().map(|block| block as &dyn Block).collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        let count = self.entry_count();
        for block in self.types.iter_mut() {
            block.set_entry_count(count);
            block.refresh();
        }
        self.spec.set_entry_count(count);
        self.spec.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ValueItem, ValueType};

    fn type_with_gap() -> TypeBlock {
        let mut pool = StringPool::new(true);
        let mut keys = StringPool::new(true);
        let mut block = TypeBlock::new(2, ResConfig::default());
        block.get_or_create(0).set_key(&mut keys, "first");
        block.get_or_create(2).set_key(&mut keys, "third");
        block
            .get_mut(2)
            .unwrap()
            .set_value(&mut pool, &ValueItem::typed(ValueType::IntDec, 7));
        block.refresh();
        block
    }

    #[test]
    fn gaps_are_written_as_no_entry() {
        let block = type_with_gap();
        let bytes = block.to_bytes();
        let header = 20 + 64;
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 3);
        let offsets = &bytes[header..header + 12];
        assert_eq!(&offsets[4..8], &NO_ENTRY.to_le_bytes());
        assert_eq!(bytes.len(), header + 12 + 2 * 16);
    }

    #[test]
    fn type_round_trip() {
        let block = type_with_gap();
        let bytes = block.to_bytes();
        let mut reread = TypeBlock::read(&mut BlockReader::new(&bytes)).unwrap();
        assert!(reread.get(1).is_none());
        assert_eq!(reread.get(2).unwrap().key_index(), 1);
        reread.refresh();
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn sparse_layout_is_normalized() {
        let dense = type_with_gap().to_bytes();
        let header = 20 + 64;
        let entries_at = header + 12;
        // rebuild the same chunk with a sparse offset table of two pairs
        let mut sparse = Vec::new();
        sparse.extend_from_slice(&dense[..8]);
        sparse.push(2);
        sparse.push(TypeFlags::SPARSE.bits());
        sparse.extend_from_slice(&[0, 0]);
        sparse.extend_from_slice(&2u32.to_le_bytes());
        sparse.extend_from_slice(&((header + 8) as u32).to_le_bytes());
        sparse.extend_from_slice(&dense[20..header]);
        sparse.extend_from_slice(&[0, 0, 0, 0]);
        sparse.extend_from_slice(&[2, 0, 4, 0]);
        sparse.extend_from_slice(&dense[entries_at..]);
        let size = sparse.len() as u32;
        sparse[4..8].copy_from_slice(&size.to_le_bytes());

        let mut block = TypeBlock::read(&mut BlockReader::new(&sparse)).unwrap();
        assert_eq!(block.entry_count(), 3);
        assert!(block.get(1).is_none());
        block.refresh();
        assert_eq!(block.to_bytes(), dense);
    }

    #[test]
    fn pair_keeps_types_in_step_with_spec() {
        let mut pair = TypeSpecPair::new(1);
        pair.get_or_create_type(&ResConfig::default()).get_or_create(4);
        let land = ResConfig::parse_qualifiers("land").unwrap();
        pair.get_or_create_type(&land);
        pair.refresh();
        assert_eq!(pair.spec().entry_count(), 5);
        assert!(pair.types().iter().all(|block| block.entry_count() == 5));
        assert_eq!(pair.remove_empty_types(), 1);
    }
}
