//! Auxiliary package chunks: shared-library references, staged aliases and
//! overlayable declarations.

use std::borrow::Cow;

use bitflags::bitflags;

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{fixed_utf16, read_fixed_utf16, Block, ChunkHeader, ChunkType, Segment};

const LIBRARY_HEADER_SIZE: u16 = 12;
const STAGED_ALIAS_HEADER_SIZE: u16 = 12;
const OVERLAYABLE_HEADER_SIZE: u16 = 1032;
const POLICY_HEADER_SIZE: u16 = 16;
const NAME_BYTES: usize = 256;
const OVERLAYABLE_NAME_BYTES: usize = 512;

/// One `ResTable_lib_entry`: a dynamic package id and its package name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryInfo {
    pub package_id: u32,
    pub name: String,
}

#[derive(Debug)]
pub struct LibraryBlock {
    header: ChunkHeader,
    infos: Vec<LibraryInfo>,
}

impl Default for LibraryBlock {
    fn default() -> Self {
        LibraryBlock {
            header: ChunkHeader::new(ChunkType::Library, LIBRARY_HEADER_SIZE),
            infos: Vec::new(),
        }
    }
}

impl LibraryBlock {
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Library)?;
        let count = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;
        let mut infos = Vec::with_capacity(count);
        for _ in 0..count {
            let package_id = chunk.read_u32()?;
            let name = read_fixed_utf16(chunk.read_bytes(NAME_BYTES)?);
            infos.push(LibraryInfo { package_id, name });
        }
        Ok(LibraryBlock { header, infos })
    }

    pub fn infos(&self) -> &[LibraryInfo] {
        &self.infos
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Adds `info` unless a library with the same id is already listed.
    pub fn add(&mut self, info: LibraryInfo) -> bool {
        if self.infos.iter().any(|known| known.package_id == info.package_id) {
            return false;
        }
        self.infos.push(info);
        true
    }

    pub fn merge(&mut self, other: &LibraryBlock) {
        for info in &other.infos {
            self.add(info.clone());
        }
    }
}

impl Block for LibraryBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::U32(self.infos.len() as u32));
        for info in &self.infos {
            segments.push(Segment::U32(info.package_id));
            segments.push(Segment::Bytes(Cow::Owned(fixed_utf16(&info.name, NAME_BYTES))));
        }
        segments
    }

    fn is_null(&self) -> bool {
        self.infos.is_empty()
    }

    fn refresh(&mut self) {
        self.header.header_size = LIBRARY_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// Maps a staged (pre-release) resource id to its finalized id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagedAlias {
    pub staged_id: u32,
    pub finalized_id: u32,
}

#[derive(Debug)]
pub struct StagedAliasBlock {
    header: ChunkHeader,
    aliases: Vec<StagedAlias>,
}

impl Default for StagedAliasBlock {
    fn default() -> Self {
        StagedAliasBlock {
            header: ChunkHeader::new(ChunkType::StagedAlias, STAGED_ALIAS_HEADER_SIZE),
            aliases: Vec::new(),
        }
    }
}

impl StagedAliasBlock {
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::StagedAlias)?;
        let count = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;
        let mut aliases = Vec::with_capacity(count);
        for _ in 0..count {
            aliases.push(StagedAlias {
                staged_id: chunk.read_u32()?,
                finalized_id: chunk.read_u32()?,
            });
        }
        Ok(StagedAliasBlock { header, aliases })
    }

    pub fn aliases(&self) -> &[StagedAlias] {
        &self.aliases
    }

    pub fn add(&mut self, alias: StagedAlias) -> bool {
        if self.aliases.contains(&alias) {
            return false;
        }
        self.aliases.push(alias);
        true
    }

    pub fn finalized_id(&self, staged_id: u32) -> Option<u32> {
        self.aliases
            .iter()
            .find(|alias| alias.staged_id == staged_id)
            .map(|alias| alias.finalized_id)
    }
}

impl Block for StagedAliasBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::U32(self.aliases.len() as u32));
        for alias in &self.aliases {
            segments.push(Segment::U32(alias.staged_id));
            segments.push(Segment::U32(alias.finalized_id));
        }
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = STAGED_ALIAS_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

bitflags! {
    /// Who may overlay the entries listed by a policy chunk.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PolicyFlags: u32 {
        const PUBLIC = 0x0000_0001;
        const SYSTEM_PARTITION = 0x0000_0002;
        const VENDOR_PARTITION = 0x0000_0004;
        const PRODUCT_PARTITION = 0x0000_0008;
        const SIGNATURE = 0x0000_0010;
        const ODM_PARTITION = 0x0000_0020;
        const OEM_PARTITION = 0x0000_0040;
        const ACTOR_SIGNATURE = 0x0000_0080;
        const CONFIG_SIGNATURE = 0x0000_0100;
    }
}

#[derive(Debug)]
pub struct OverlayablePolicyBlock {
    header: ChunkHeader,
    pub flags: PolicyFlags,
    pub entry_ids: Vec<u32>,
}

impl OverlayablePolicyBlock {
    pub fn new(flags: PolicyFlags) -> Self {
        OverlayablePolicyBlock {
            header: ChunkHeader::new(ChunkType::OverlayablePolicy, POLICY_HEADER_SIZE),
            flags,
            entry_ids: Vec::new(),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::OverlayablePolicy)?;
        let flags = PolicyFlags::from_bits_retain(chunk.read_u32()?);
        let count = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;
        let mut entry_ids = Vec::with_capacity(count);
        for _ in 0..count {
            entry_ids.push(chunk.read_u32()?);
        }
        Ok(OverlayablePolicyBlock {
            header,
            flags,
            entry_ids,
        })
    }
}

impl Block for OverlayablePolicyBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::U32(self.flags.bits()));
        segments.push(Segment::U32(self.entry_ids.len() as u32));
        segments.extend(self.entry_ids.iter().map(|id| Segment::U32(*id)));
        segments
    }

    fn refresh(&mut self) {
        self.header.header_size = POLICY_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

/// `ResTable_overlayable_header` with its nested policy chunks.
#[derive(Debug)]
pub struct OverlayableBlock {
    header: ChunkHeader,
    pub name: String,
    pub actor: String,
    pub policies: Vec<OverlayablePolicyBlock>,
}

impl OverlayableBlock {
    pub fn new(name: &str, actor: &str) -> Self {
        OverlayableBlock {
            header: ChunkHeader::new(ChunkType::Overlayable, OVERLAYABLE_HEADER_SIZE),
            name: name.to_string(),
            actor: actor.to_string(),
            policies: Vec::new(),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Overlayable)?;
        let name = read_fixed_utf16(chunk.read_bytes(OVERLAYABLE_NAME_BYTES)?);
        let actor = read_fixed_utf16(chunk.read_bytes(OVERLAYABLE_NAME_BYTES)?);
        chunk.seek(header.header_size as usize)?;
        let mut policies = Vec::new();
        while chunk.is_available() {
            policies.push(OverlayablePolicyBlock::read(&mut chunk)?);
        }
        Ok(OverlayableBlock {
            header,
            name,
            actor,
            policies,
        })
    }
}

impl Block for OverlayableBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.push(Segment::Bytes(Cow::Owned(fixed_utf16(
            &self.name,
            OVERLAYABLE_NAME_BYTES,
        ))));
        segments.push(Segment::Bytes(Cow::Owned(fixed_utf16(
            &self.actor,
            OVERLAYABLE_NAME_BYTES,
        ))));
        segments.push(Segment::List(
            self.policies.iter().map(|policy| policy as &dyn Block).collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        for policy in self.policies.iter_mut() {
            policy.refresh();
        }
        self.header.header_size = OVERLAYABLE_HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_round_trip() {
        let mut library = LibraryBlock::default();
        assert!(library.add(LibraryInfo {
            package_id: 2,
            name: "com.example.lib".to_string(),
        }));
        assert!(!library.add(LibraryInfo {
            package_id: 2,
            name: "other".to_string(),
        }));
        library.refresh();
        let bytes = library.to_bytes();
        assert_eq!(bytes.len(), 12 + 4 + 256);
        let reread = LibraryBlock::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.infos(), library.infos());
    }

    #[test]
    fn overlayable_nests_policies() {
        let mut overlayable = OverlayableBlock::new("Theme", "overlay://theme");
        let mut policy = OverlayablePolicyBlock::new(PolicyFlags::PUBLIC | PolicyFlags::SIGNATURE);
        policy.entry_ids.push(0x7f010000);
        overlayable.policies.push(policy);
        overlayable.refresh();
        let bytes = overlayable.to_bytes();
        assert_eq!(bytes.len(), 1032 + 16 + 4);
        let reread = OverlayableBlock::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.name, "Theme");
        assert_eq!(reread.actor, "overlay://theme");
        assert_eq!(reread.policies[0].entry_ids, vec![0x7f010000]);
    }

    #[test]
    fn staged_alias_lookup() {
        let mut block = StagedAliasBlock::default();
        block.add(StagedAlias {
            staged_id: 0x7f010001,
            finalized_id: 0x7f010002,
        });
        assert_eq!(block.finalized_id(0x7f010001), Some(0x7f010002));
        assert_eq!(block.finalized_id(0x7f010002), None);
    }
}
