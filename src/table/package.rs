use std::borrow::Cow;
use std::collections::BTreeMap;

use log::{debug, trace, warn};

use crate::block::error::{ArscError, ArscResult};
use crate::block::reader::BlockReader;
use crate::block::{fixed_utf16, read_fixed_utf16, Block, ChunkHeader, ChunkType, RawChunk, Segment};
use crate::pool::{IndexRemap, StringPool, StringRef};
use crate::table::config::ResConfig;
use crate::table::entry::{Entry, EntryValue};
use crate::table::library::{
    LibraryBlock, LibraryInfo, OverlayableBlock, OverlayablePolicyBlock, StagedAlias,
    StagedAliasBlock,
};
use crate::table::type_block::{SpecBlock, SpecFlags, TypeBlock, TypeSpecPair};
use crate::value::{Bag, ValueItem, ValueType};

pub const HEADER_SIZE: u16 = 284;
/// Header size of packages that carry the `typeIdOffset` field.
pub const HEADER_SIZE_WITH_OFFSET: u16 = 288;
const NAME_BYTES: usize = 256;

/// Splits a resource id into `(package, type, entry)`.
pub fn split_resource_id(resource_id: u32) -> (u8, u8, u16) {
    (
        (resource_id >> 24) as u8,
        (resource_id >> 16) as u8,
        resource_id as u16,
    )
}

pub fn make_resource_id(package_id: u8, type_id: u8, entry_id: u16) -> u32 {
    ((package_id as u32) << 24) | ((type_id as u32) << 16) | entry_id as u32
}

/// Every configuration that defines one resource id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryGroup {
    resource_id: u32,
    configs: Vec<ResConfig>,
}

impl EntryGroup {
    fn new(resource_id: u32) -> Self {
        EntryGroup {
            resource_id,
            configs: Vec::new(),
        }
    }

    pub fn resource_id(&self) -> u32 {
        self.resource_id
    }

    pub fn type_id(&self) -> u8 {
        split_resource_id(self.resource_id).1
    }

    pub fn entry_id(&self) -> u16 {
        split_resource_id(self.resource_id).2
    }

    pub fn configs(&self) -> &[ResConfig] {
        &self.configs
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn has_default(&self) -> bool {
        self.configs.iter().any(ResConfig::is_default)
    }

    fn add(&mut self, config: &ResConfig) {
        if !self.configs.contains(config) {
            self.configs.push(config.clone());
        }
    }

    fn remove(&mut self, config: &ResConfig) {
        self.configs.retain(|known| known != config);
    }
}

/// Content written into an entry by the editing API.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryContent {
    Value(ValueItem),
    Bag(Bag),
}

/// `ResTable_package` with its pools, type chunks and auxiliary chunks.
#[derive(Debug)]
pub struct PackageBlock {
    header: ChunkHeader,
    id: u32,
    name: String,
    last_public_type: u32,
    last_public_key: u32,
    type_id_offset: Option<u32>,
    type_pool: StringPool,
    key_pool: StringPool,
    pairs: Vec<TypeSpecPair>,
    library: LibraryBlock,
    staged_aliases: Vec<StagedAliasBlock>,
    overlayables: Vec<OverlayableBlock>,
    policies: Vec<OverlayablePolicyBlock>,
    unknown: Vec<RawChunk>,
    groups: BTreeMap<u32, EntryGroup>,
}

impl PackageBlock {
    pub fn new(id: u32, name: &str) -> Self {
        let mut package = PackageBlock {
            header: ChunkHeader::new(ChunkType::Package, HEADER_SIZE),
            id,
            name: name.to_string(),
            last_public_type: 0,
            last_public_key: 0,
            type_id_offset: None,
            type_pool: StringPool::new(false),
            key_pool: StringPool::new(true),
            pairs: Vec::new(),
            library: LibraryBlock::default(),
            staged_aliases: Vec::new(),
            overlayables: Vec::new(),
            policies: Vec::new(),
            unknown: Vec::new(),
            groups: BTreeMap::new(),
        };
        package.refresh();
        package
    }

    /// Reads the chunk. Table-pool references stay unlinked until the owning
    /// table calls [`PackageBlock::link`].
    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::Package)?;
        let id = chunk.read_u32()?;
        let name = read_fixed_utf16(chunk.read_bytes(NAME_BYTES)?);
        let type_strings = chunk.read_u32()? as usize;
        let last_public_type = chunk.read_u32()?;
        let key_strings = chunk.read_u32()? as usize;
        let last_public_key = chunk.read_u32()?;
        let type_id_offset = if header.header_size >= HEADER_SIZE_WITH_OFFSET {
            Some(chunk.read_u32()?)
        } else {
            None
        };

        chunk.seek(type_strings)?;
        let type_pool = StringPool::read(&mut chunk)?;
        chunk.seek(key_strings)?;
        let mut key_pool = StringPool::read(&mut chunk)?;
        let body_start = chunk.position().max(header.header_size as usize);
        chunk.seek(body_start)?;

        let mut package = PackageBlock {
            header,
            id,
            name,
            last_public_type,
            last_public_key,
            type_id_offset,
            type_pool,
            key_pool: StringPool::new(true),
            pairs: Vec::new(),
            library: LibraryBlock::default(),
            staged_aliases: Vec::new(),
            overlayables: Vec::new(),
            policies: Vec::new(),
            unknown: Vec::new(),
            groups: BTreeMap::new(),
        };

        while chunk.remaining() >= ChunkHeader::SIZE {
            let next = chunk.peek_header()?;
            match next.chunk_type {
                ChunkType::Spec => {
                    let spec = SpecBlock::read(&mut chunk)?;
                    match package.pair_index(spec.id()) {
                        Some(index) => *package.pairs[index].spec_mut() = spec,
                        None => package.pairs.push(TypeSpecPair::from_spec(spec)),
                    }
                }
                ChunkType::Type => {
                    let block = TypeBlock::read(&mut chunk)?;
                    let index = package.get_or_create_pair_index(block.id());
                    package.pairs[index].push_type(block);
                }
                ChunkType::Library => {
                    let library = LibraryBlock::read(&mut chunk)?;
                    package.library.merge(&library);
                }
                ChunkType::StagedAlias => {
                    package.staged_aliases.push(StagedAliasBlock::read(&mut chunk)?);
                }
                ChunkType::Overlayable => {
                    package.overlayables.push(OverlayableBlock::read(&mut chunk)?);
                }
                ChunkType::OverlayablePolicy => {
                    package.policies.push(OverlayablePolicyBlock::read(&mut chunk)?);
                }
                other => {
                    debug!("keeping unknown package chunk {}", other);
                    package.unknown.push(RawChunk::read(&mut chunk)?);
                }
            }
        }

        for pair in package.pairs.iter_mut() {
            pair.visit_keys(&mut |reference| key_pool.link(reference));
        }
        package.key_pool = key_pool;
        package.rebuild_entry_groups();
        debug!(
            "read package 0x{:02x} '{}': {} types, {} entry groups",
            package.id,
            package.name,
            package.pairs.len(),
            package.groups.len()
        );
        Ok(package)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn type_pool(&self) -> &StringPool {
        &self.type_pool
    }

    pub fn key_pool(&self) -> &StringPool {
        &self.key_pool
    }

    pub fn pairs(&self) -> &[TypeSpecPair] {
        &self.pairs
    }

    pub fn library(&self) -> &LibraryBlock {
        &self.library
    }

    pub fn add_library(&mut self, info: LibraryInfo) -> bool {
        self.library.add(info)
    }

    pub fn staged_aliases(&self) -> impl Iterator<Item = &StagedAlias> {
        self.staged_aliases.iter().flat_map(|block| block.aliases().iter())
    }

    pub fn add_staged_alias(&mut self, alias: StagedAlias) -> bool {
        if self.staged_aliases.is_empty() {
            self.staged_aliases.push(StagedAliasBlock::default());
        }
        if self.staged_aliases().any(|known| *known == alias) {
            return false;
        }
        match self.staged_aliases.last_mut() {
            Some(block) => block.add(alias),
            None => false,
        }
    }

    pub fn overlayables(&self) -> &[OverlayableBlock] {
        &self.overlayables
    }

    pub fn add_overlayable(&mut self, overlayable: OverlayableBlock) {
        self.overlayables.push(overlayable);
    }

    /// Links every table-pool reference held by this package's entries.
    pub fn link(&mut self, table_pool: &mut StringPool) {
        for pair in self.pairs.iter_mut() {
            pair.visit_values(&mut |reference| table_pool.link(reference));
        }
    }

    /// Drops every table-pool link, before the package leaves its table.
    pub fn unlink(&mut self, table_pool: &mut StringPool) {
        for pair in self.pairs.iter_mut() {
            pair.visit_values(&mut |reference| table_pool.unlink(reference));
        }
    }

    /// Visits every reference into the table string pool.
    pub fn visit_table_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for pair in self.pairs.iter_mut() {
            pair.visit_values(visit);
        }
    }

    pub fn apply_table_remap(&mut self, remap: &IndexRemap) {
        self.visit_table_refs(&mut |reference| remap.apply(reference));
    }

    // ---- types ----

    pub fn type_name(&self, type_id: u8) -> Option<&str> {
        if type_id == 0 {
            return None;
        }
        self.type_pool
            .get(type_id as u32 - 1)
            .filter(|name| !name.is_empty())
    }

    pub fn type_id(&self, type_name: &str) -> Option<u8> {
        (0..self.type_pool.len())
            .find(|index| self.type_pool.get(*index as u32) == Some(type_name))
            .map(|index| index as u8 + 1)
    }

    /// Binds `type_name` to `type_id` in the positional type pool, filling
    /// any gap below it with empty names.
    pub fn set_type_name(&mut self, type_id: u8, type_name: &str) {
        if type_id == 0 {
            return;
        }
        let index = type_id as u32 - 1;
        while self.type_pool.len() as u32 <= index {
            self.type_pool.push("");
        }
        self.type_pool.set_string(index, type_name);
    }

    /// Id of `type_name`, allocating the next free id when it is new.
    pub fn get_or_create_type_id(&mut self, type_name: &str) -> u8 {
        if let Some(type_id) = self.type_id(type_name) {
            return type_id;
        }
        let highest = self
            .pairs
            .iter()
            .map(TypeSpecPair::id)
            .max()
            .unwrap_or(0)
            .max(self.type_pool.len() as u8);
        let type_id = highest + 1;
        self.set_type_name(type_id, type_name);
        self.get_or_create_pair_index(type_id);
        type_id
    }

    fn pair_index(&self, type_id: u8) -> Option<usize> {
        self.pairs.iter().position(|pair| pair.id() == type_id)
    }

    fn get_or_create_pair_index(&mut self, type_id: u8) -> usize {
        match self.pair_index(type_id) {
            Some(index) => index,
            None => {
                self.pairs.push(TypeSpecPair::new(type_id));
                self.pairs.len() - 1
            }
        }
    }

    pub fn pair(&self, type_id: u8) -> Option<&TypeSpecPair> {
        self.pair_index(type_id).map(|index| &self.pairs[index])
    }

    /// Orders type-spec pairs by type id; the on-disk order must follow ids.
    pub fn sort_types(&mut self) {
        self.pairs.sort_by_key(TypeSpecPair::id);
    }

    /// The `typeIdOffset` field is always written as 0. Recomputing it from
    /// the highest type id is left alone because existing tooling reads the
    /// zero.
    pub fn refresh_type_id_offset(&mut self) {
        if self.type_id_offset.is_some() {
            self.type_id_offset = Some(0);
        }
    }

    // ---- entries ----

    fn slot<'a>(
        pairs: &'a mut Vec<TypeSpecPair>,
        type_id: u8,
        entry_id: u16,
        config: &ResConfig,
    ) -> &'a mut Entry {
        let index = match pairs.iter().position(|pair| pair.id() == type_id) {
            Some(index) => index,
            None => {
                pairs.push(TypeSpecPair::new(type_id));
                pairs.len() - 1
            }
        };
        pairs[index].get_or_create_type(config).get_or_create(entry_id)
    }

    /// Locates or creates the entry slot and records it in the entry group
    /// index.
    pub fn get_or_create_entry(&mut self, type_id: u8, entry_id: u16, config: &ResConfig) -> &mut Entry {
        let resource_id = make_resource_id(self.id as u8, type_id, entry_id);
        self.groups
            .entry(resource_id)
            .or_insert_with(|| EntryGroup::new(resource_id))
            .add(config);
        Self::slot(&mut self.pairs, type_id, entry_id, config)
    }

    pub fn get_entry(&self, resource_id: u32, config: &ResConfig) -> Option<&Entry> {
        let (_, type_id, entry_id) = split_resource_id(resource_id);
        self.pair(type_id)?.get_type(config)?.get(entry_id)
    }

    pub fn get_entry_mut(&mut self, resource_id: u32, config: &ResConfig) -> Option<&mut Entry> {
        let (_, type_id, entry_id) = split_resource_id(resource_id);
        let index = self.pair_index(type_id)?;
        self.pairs[index].get_type_mut(config)?.get_mut(entry_id)
    }

    /// All `(resource id, config, entry)` triples, in type then config order.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &ResConfig, &Entry)> + '_ {
        let package_id = self.id as u8;
        self.pairs.iter().flat_map(move |pair| {
            pair.types().iter().flat_map(move |block| {
                block.entries().map(move |(entry_id, entry)| {
                    (
                        make_resource_id(package_id, pair.id(), entry_id),
                        block.config(),
                        entry,
                    )
                })
            })
        })
    }

    pub fn rebuild_entry_groups(&mut self) {
        let mut groups: BTreeMap<u32, EntryGroup> = BTreeMap::new();
        for (resource_id, config, _) in self.entries() {
            groups
                .entry(resource_id)
                .or_insert_with(|| EntryGroup::new(resource_id))
                .add(config);
        }
        self.groups = groups;
    }

    pub fn entry_groups(&self) -> impl Iterator<Item = &EntryGroup> {
        self.groups.values()
    }

    /// The group of `resource_id`. When the id has no group of its own, a
    /// staged alias pointing from it to a finalized id is followed once.
    pub fn entry_group(&self, resource_id: u32) -> Option<&EntryGroup> {
        if resource_id == 0 {
            return None;
        }
        if let Some(group) = self.groups.get(&resource_id) {
            return Some(group);
        }
        let finalized = self
            .staged_aliases()
            .find(|alias| alias.staged_id == resource_id)
            .map(|alias| alias.finalized_id)?;
        self.groups.get(&finalized)
    }

    /// The entries of a group, paired with their configuration.
    pub fn group_entries(&self, group: &EntryGroup) -> Vec<(&ResConfig, &Entry)> {
        let pair = match self.pair(group.type_id()) {
            Some(pair) => pair,
            None => return Vec::new(),
        };
        group
            .configs()
            .iter()
            .filter_map(|config| {
                let block = pair.get_type(config)?;
                block.get(group.entry_id()).map(|entry| (block.config(), entry))
            })
            .collect()
    }

    /// Entry for `config`, else the default-configuration one, else any.
    pub fn pick_entry(&self, resource_id: u32, config: Option<&ResConfig>) -> Option<(&ResConfig, &Entry)> {
        let group = self.entry_group(resource_id)?;
        let entries = self.group_entries(group);
        if let Some(config) = config {
            if let Some(found) = entries.iter().find(|(known, _)| *known == config) {
                return Some(*found);
            }
        }
        entries
            .iter()
            .find(|(known, _)| known.is_default())
            .or_else(|| entries.first())
            .copied()
    }

    /// `(type, name)` of a resource id in this package.
    pub fn resource_name(&self, resource_id: u32) -> Option<(String, String)> {
        let group = self.entry_group(resource_id)?;
        let type_name = self.type_name(group.type_id())?.to_string();
        let key = self
            .group_entries(group)
            .into_iter()
            .find_map(|(_, entry)| entry.key_name(&self.key_pool))?
            .to_string();
        trace!("resolved 0x{:08x} to {}/{}", resource_id, type_name, key);
        Some((type_name, key))
    }

    pub fn resolve_name(&self, type_name: &str, name: &str) -> Option<u32> {
        let type_id = self.type_id(type_name)?;
        let key = self.key_pool.index_of(name)?;
        self.groups
            .values()
            .filter(|group| group.type_id() == type_id)
            .find(|group| {
                self.group_entries(group)
                    .iter()
                    .any(|(_, entry)| entry.key_index() == key)
            })
            .map(EntryGroup::resource_id)
    }

    /// Id of `type_name/name`, allocating a new entry id at the end of the
    /// type when the name is unknown. The allocation is reserved in the spec.
    pub fn get_or_create_resource_id(&mut self, type_name: &str, name: &str) -> u32 {
        if let Some(resource_id) = self.resolve_name(type_name, name) {
            return resource_id;
        }
        let type_id = self.get_or_create_type_id(type_name);
        let index = self.get_or_create_pair_index(type_id);
        let pair = &mut self.pairs[index];
        let entry_id = pair.entry_count() as u16;
        pair.spec_mut().set_entry_count(entry_id as usize + 1);
        make_resource_id(self.id as u8, type_id, entry_id)
    }

    /// Binds the type of a declared id and keeps later allocations past it.
    pub fn reserve_resource_id(&mut self, resource_id: u32, type_name: &str) -> ArscResult<()> {
        let (type_id, entry_id) = self.check_package(resource_id)?;
        match self.type_name(type_id) {
            Some(existing) if existing != type_name => {
                return Err(ArscError::invalid(
                    "resource id",
                    format!("0x{:08x} is {}, not {}", resource_id, existing, type_name),
                ))
            }
            Some(_) => {}
            None => self.set_type_name(type_id, type_name),
        }
        let index = self.get_or_create_pair_index(type_id);
        let spec = self.pairs[index].spec_mut();
        if spec.entry_count() <= entry_id as usize {
            spec.set_entry_count(entry_id as usize + 1);
        }
        Ok(())
    }

    fn check_package(&self, resource_id: u32) -> ArscResult<(u8, u16)> {
        let (package_id, type_id, entry_id) = split_resource_id(resource_id);
        if package_id as u32 != self.id || type_id == 0 {
            return Err(ArscError::invalid(
                "resource id",
                format!("0x{:08x} in package 0x{:02x}", resource_id, self.id),
            ));
        }
        Ok((type_id, entry_id))
    }

    /// Writes `content` as the entry `resource_id` under `config`, named
    /// `name`. Styled strings may renumber the table pool; every remap that
    /// happened is returned, already applied to this package, so the caller
    /// can apply it to the rest of the table in order.
    pub fn put_entry(
        &mut self,
        table_pool: &mut StringPool,
        resource_id: u32,
        config: &ResConfig,
        name: &str,
        content: &EntryContent,
    ) -> ArscResult<Vec<IndexRemap>> {
        let (type_id, entry_id) = self.check_package(resource_id)?;
        let mut remaps = Vec::new();
        match content {
            EntryContent::Value(item) => {
                let stored = self.prepare_item(table_pool, item, &mut remaps);
                let entry = self.get_or_create_entry(type_id, entry_id, config);
                entry.set_value(table_pool, &stored);
            }
            EntryContent::Bag(bag) => {
                let entry = self.get_or_create_entry(type_id, entry_id, config);
                entry.set_bag(table_pool, bag);
                for (index, item) in bag.items.iter().enumerate() {
                    if item.value.spans.is_empty() {
                        continue;
                    }
                    let stored = self.prepare_item(table_pool, &item.value, &mut remaps);
                    if let Some(slot) = self
                        .get_entry_mut(resource_id, config)
                        .and_then(|entry| entry.bag_item_mut(index))
                    {
                        slot.value.set(table_pool, stored.value_type, stored.data);
                    }
                }
            }
        }
        let entry = Self::slot(&mut self.pairs, type_id, entry_id, config);
        entry.set_key(&mut self.key_pool, name);
        Ok(remaps)
    }

    /// Styled strings are placed in the pool up front and replaced by their
    /// index; everything else passes through.
    fn prepare_item(
        &mut self,
        table_pool: &mut StringPool,
        item: &ValueItem,
        remaps: &mut Vec<IndexRemap>,
    ) -> ValueItem {
        let text = match (&item.text, item.is_string() && !item.spans.is_empty()) {
            (Some(text), true) => text,
            _ => return item.clone(),
        };
        let (index, remap) = table_pool.get_or_create_styled(text, &item.spans);
        if let Some(remap) = remap {
            self.apply_table_remap(&remap);
            remaps.push(remap);
        }
        ValueItem::typed(ValueType::String, index)
    }

    /// Sets the public flag of an entry group in the spec and every entry.
    pub fn set_public(&mut self, resource_id: u32, public: bool) {
        let (_, type_id, entry_id) = split_resource_id(resource_id);
        if let Some(index) = self.pair_index(type_id) {
            let pair = &mut self.pairs[index];
            let mut flags = pair.spec().flags(entry_id);
            if public {
                flags |= SpecFlags::PUBLIC.bits();
            } else {
                flags &= !SpecFlags::PUBLIC.bits();
            }
            pair.spec_mut().set_flags(entry_id, flags);
            for block in pair.types_mut().iter_mut() {
                if let Some(entry) = block.get_mut(entry_id) {
                    entry.set_public(public);
                }
            }
        }
    }

    pub fn remove_entry(&mut self, table_pool: &mut StringPool, resource_id: u32, config: &ResConfig) -> bool {
        let (_, type_id, entry_id) = split_resource_id(resource_id);
        let index = match self.pair_index(type_id) {
            Some(index) => index,
            None => return false,
        };
        let taken = self.pairs[index]
            .get_type_mut(config)
            .and_then(|block| block.take(entry_id));
        let mut entry = match taken {
            Some(entry) => entry,
            None => return false,
        };
        entry.release(table_pool, &mut self.key_pool);
        if let Some(group) = self.groups.get_mut(&resource_id) {
            group.remove(config);
            if group.is_empty() {
                self.groups.remove(&resource_id);
            }
        }
        true
    }

    /// Removes the entry in every configuration.
    pub fn remove_entry_group(&mut self, table_pool: &mut StringPool, resource_id: u32) -> usize {
        let configs = match self.groups.get(&resource_id) {
            Some(group) => group.configs().to_vec(),
            None => return 0,
        };
        configs
            .iter()
            .filter(|config| self.remove_entry(table_pool, resource_id, config))
            .count()
    }

    /// Drops type chunks left without entries, then pairs left without type
    /// chunks.
    pub fn remove_empty(&mut self) -> usize {
        let mut removed = 0;
        for pair in self.pairs.iter_mut() {
            removed += pair.remove_empty_types();
        }
        let before = self.pairs.len();
        self.pairs.retain(|pair| !pair.types().is_empty());
        removed + before - self.pairs.len()
    }

    /// Compacts the key pool and renumbers every entry key.
    pub fn remove_unused_keys(&mut self) -> IndexRemap {
        let remap = self.key_pool.remove_unused_strings();
        if !remap.is_identity() {
            for pair in self.pairs.iter_mut() {
                pair.visit_keys(&mut |reference| remap.apply(reference));
            }
        }
        remap
    }

    /// Merges `other` (whose strings live in `other_pool`) into this package.
    /// Package ids and the names of shared type ids must match; nothing is
    /// touched otherwise.
    pub fn merge(
        &mut self,
        table_pool: &mut StringPool,
        other: &PackageBlock,
        other_pool: &StringPool,
    ) -> ArscResult<Vec<IndexRemap>> {
        if self.id != other.id {
            return Err(ArscError::PackageIdMismatch(self.id, other.id));
        }
        for pair in other.pairs() {
            let type_id = pair.id();
            let names = (self.type_name(type_id), other.type_name(type_id));
            if let (Some(ours), Some(theirs)) = names {
                if !ours.is_empty() && !theirs.is_empty() && ours != theirs {
                    warn!(
                        "type 0x{:02x} is '{}' here but '{}' in the merged package",
                        type_id, ours, theirs
                    );
                    return Err(ArscError::invalid(
                        "type name",
                        format!("0x{:02x}: {} != {}", type_id, ours, theirs),
                    ));
                }
            }
        }
        if !other.name.is_empty() {
            self.name = other.name.clone();
        }
        self.library.merge(&other.library);
        for alias in other.staged_aliases() {
            self.add_staged_alias(*alias);
        }
        let mut remaps = Vec::new();
        let mut merged = 0usize;
        for (resource_id, config, entry) in other.entries() {
            let (_, type_id, entry_id) = split_resource_id(resource_id);
            let type_name = match other.type_name(type_id) {
                Some(type_name) => type_name,
                None => {
                    warn!("skipping 0x{:08x}: type {} has no name", resource_id, type_id);
                    continue;
                }
            };
            if self.type_name(type_id).is_none() {
                self.set_type_name(type_id, type_name);
            }
            let name = entry.key_name(&other.key_pool).unwrap_or_default();
            let content = match entry.value() {
                EntryValue::Simple(value) => EntryContent::Value(value.to_item(other_pool)),
                EntryValue::Bag { .. } => match entry.to_bag(other_pool, type_name) {
                    Some(bag) => EntryContent::Bag(bag),
                    None => continue,
                },
            };
            remaps.extend(self.put_entry(table_pool, resource_id, config, name, &content)?);
            if let Some(target) = self.get_entry_mut(resource_id, config) {
                target.set_public(entry.is_public());
            }
            if let Some(pair) = other.pair(type_id) {
                let flags = pair.spec().flags(entry_id);
                if flags != 0 {
                    let index = self.get_or_create_pair_index(type_id);
                    self.pairs[index].spec_mut().set_flags(entry_id, flags);
                }
            }
            merged += 1;
        }
        debug!("merged {} entries into package 0x{:02x}", merged, self.id);
        Ok(remaps)
    }

    /// Keeps one entry per group, the default-configuration one when there
    /// is one. A group without a default entry keeps its first entry, which
    /// is moved into the default type chunk so a framework table answers
    /// name lookups from a single configuration; every other type chunk is
    /// then dropped. Returns the number of entries removed.
    pub(crate) fn keep_default_entries(&mut self, table_pool: &mut StringPool) -> usize {
        let default = ResConfig::default();
        let groups: Vec<EntryGroup> = self.groups.values().cloned().collect();
        let mut removed = 0;
        for group in groups {
            let keep = if group.has_default() {
                default.clone()
            } else {
                match group.configs().first() {
                    Some(config) => config.clone(),
                    None => continue,
                }
            };
            for config in group.configs() {
                if *config != keep && self.remove_entry(table_pool, group.resource_id(), config) {
                    removed += 1;
                }
            }
            if keep.is_default() {
                continue;
            }
            let (_, type_id, entry_id) = split_resource_id(group.resource_id());
            if let Some(index) = self.pair_index(type_id) {
                let pair = &mut self.pairs[index];
                let moved = pair.get_type_mut(&keep).and_then(|block| block.take(entry_id));
                if let Some(entry) = moved {
                    *pair.get_or_create_type(&default).get_or_create(entry_id) = entry;
                }
            }
        }
        for pair in self.pairs.iter_mut() {
            pair.types_mut().retain(|block| block.config().is_default());
        }
        self.remove_empty();
        self.rebuild_entry_groups();
        removed
    }

    fn fill_type_names(&mut self) {
        let ids: Vec<u8> = self.pairs.iter().map(TypeSpecPair::id).collect();
        for type_id in ids {
            while self.type_pool.len() < type_id as usize {
                self.type_pool.push("");
            }
        }
    }
}

impl Block for PackageBlock {
    fn segments(&self) -> Vec<Segment<'_>> {
        let type_strings = self.header.header_size as u32;
        let key_strings = type_strings + self.type_pool.count_bytes() as u32;
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend([
            Segment::U32(self.id),
            Segment::Bytes(Cow::Owned(fixed_utf16(&self.name, NAME_BYTES))),
            Segment::U32(type_strings),
            Segment::U32(self.last_public_type),
            Segment::U32(key_strings),
            Segment::U32(self.last_public_key),
        ]);
        if let Some(offset) = self.type_id_offset {
            segments.push(Segment::U32(offset));
        }
        segments.push(Segment::Block(&self.type_pool));
        segments.push(Segment::Block(&self.key_pool));
        segments.push(Segment::List(self.pairs.iter().map(|pair| pair as &dyn Block).collect()));
        segments.push(Segment::Block(&self.library));
        segments.push(Segment::List(
            self.staged_aliases.iter().map(|block| block as &dyn Block).collect(),
        ));
        segments.push(Segment::List(
            self.overlayables.iter().map(|block| block as &dyn Block).collect(),
        ));
        segments.push(Segment::List(
            self.policies.iter().map(|block| block as &dyn Block).collect(),
        ));
        segments.push(Segment::List(
            self.unknown.iter().map(|block| block as &dyn Block).collect(),
        ));
        segments
    }

    fn refresh(&mut self) {
        self.sort_types();
        self.fill_type_names();
        for pair in self.pairs.iter_mut() {
            pair.refresh();
        }
        self.type_pool.refresh();
        self.key_pool.refresh();
        self.library.refresh();
        for block in self.staged_aliases.iter_mut() {
            block.refresh();
        }
        for block in self.overlayables.iter_mut() {
            block.refresh();
        }
        for block in self.policies.iter_mut() {
            block.refresh();
        }
        self.refresh_type_id_offset();
        self.last_public_type = self.type_pool.len() as u32;
        self.last_public_key = self.key_pool.len() as u32;
        self.header.header_size = if self.type_id_offset.is_some() {
            HEADER_SIZE_WITH_OFFSET
        } else {
            HEADER_SIZE
        };
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_entry(package: &mut PackageBlock, pool: &mut StringPool, name: &str, text: &str) -> u32 {
        let resource_id = package.get_or_create_resource_id("string", name);
        package
            .put_entry(
                pool,
                resource_id,
                &ResConfig::default(),
                name,
                &EntryContent::Value(ValueItem::string(text)),
            )
            .unwrap();
        resource_id
    }

    #[test]
    fn allocates_ids_per_type() {
        let mut pool = StringPool::new(true);
        let mut package = PackageBlock::new(0x7f, "com.example");
        let first = string_entry(&mut package, &mut pool, "first", "One");
        let second = string_entry(&mut package, &mut pool, "second", "Two");
        assert_eq!(first, 0x7f010000);
        assert_eq!(second, 0x7f010001);
        assert_eq!(package.resolve_name("string", "second"), Some(second));
        assert_eq!(
            package.resource_name(first),
            Some(("string".to_string(), "first".to_string()))
        );
    }

    #[test]
    fn group_tracks_configurations() {
        let mut pool = StringPool::new(true);
        let mut package = PackageBlock::new(0x7f, "com.example");
        let resource_id = string_entry(&mut package, &mut pool, "title", "Title");
        let german = ResConfig::parse_qualifiers("de").unwrap();
        package
            .put_entry(
                &mut pool,
                resource_id,
                &german,
                "title",
                &EntryContent::Value(ValueItem::string("Titel")),
            )
            .unwrap();
        let group = package.entry_group(resource_id).unwrap();
        assert_eq!(group.configs().len(), 2);
        let (config, _) = package.pick_entry(resource_id, Some(&german)).unwrap();
        assert_eq!(config, &german);

        assert!(package.remove_entry(&mut pool, resource_id, &german));
        assert_eq!(package.entry_group(resource_id).unwrap().configs().len(), 1);
        assert_eq!(package.remove_entry_group(&mut pool, resource_id), 1);
        assert!(package.entry_group(resource_id).is_none());
        assert_eq!(pool.total_references(), 0);
        assert_eq!(package.remove_empty(), 3);
    }

    #[test]
    fn type_pool_is_positional() {
        let mut package = PackageBlock::new(0x7f, "com.example");
        package.set_type_name(3, "color");
        assert_eq!(package.type_pool().len(), 3);
        assert_eq!(package.type_name(1), None);
        assert_eq!(package.type_id("color"), Some(3));
        assert_eq!(package.get_or_create_type_id("dimen"), 4);
    }

    #[test]
    fn staged_alias_falls_through_to_finalized_group() {
        let mut package = PackageBlock::new(0x7f, "com.example");
        package.set_type_name(1, "attr");
        let mut keys = StringPool::new(true);
        package.get_or_create_entry(1, 2, &ResConfig::default()).set_key(&mut keys, "shape");
        package.add_staged_alias(StagedAlias {
            staged_id: 0x7f010001,
            finalized_id: 0x7f010002,
        });
        assert_eq!(package.entry_group(0x7f010001).unwrap().resource_id(), 0x7f010002);
        assert!(package.entry_group(0).is_none());
        assert!(package.entry_group(0x7f010005).is_none());
    }

    #[test]
    fn merge_rejects_other_package_ids() {
        let mut pool = StringPool::new(true);
        let mut other_pool = StringPool::new(true);
        let mut package = PackageBlock::new(0x02, "first");
        let mut other = PackageBlock::new(0x03, "second");
        string_entry(&mut other, &mut other_pool, "label", "Label");
        let result = package.merge(&mut pool, &other, &other_pool);
        assert!(matches!(result, Err(ArscError::PackageIdMismatch(0x02, 0x03))));
        assert_eq!(package.name(), "first");
        assert_eq!(package.entries().count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn merge_rejects_conflicting_type_names() {
        let mut pool = StringPool::new(true);
        let mut other_pool = StringPool::new(true);
        let mut package = PackageBlock::new(0x7f, "com.example");
        string_entry(&mut package, &mut pool, "label", "Label");
        let mut other = PackageBlock::new(0x7f, "com.example.other");
        let margin = other.get_or_create_resource_id("dimen", "margin");
        other
            .put_entry(
                &mut other_pool,
                margin,
                &ResConfig::default(),
                "margin",
                &EntryContent::Value(ValueItem::typed(ValueType::Dimension, 0x1001)),
            )
            .unwrap();
        assert_eq!(split_resource_id(margin).1, 1);

        let result = package.merge(&mut pool, &other, &other_pool);
        assert!(matches!(result, Err(ArscError::InvalidValue { kind: "type name", .. })));
        assert_eq!(package.name(), "com.example");
        assert_eq!(package.type_name(1), Some("string"));
        assert_eq!(package.entries().count(), 1);
    }

    #[test]
    fn merge_copies_entries_between_pools() {
        let mut pool = StringPool::new(true);
        let mut other_pool = StringPool::new(true);
        let mut package = PackageBlock::new(0x7f, "com.example");
        let mut other = PackageBlock::new(0x7f, "com.example.merged");
        let label = string_entry(&mut other, &mut other_pool, "label", "Label");
        other.set_public(label, true);

        package.merge(&mut pool, &other, &other_pool).unwrap();
        assert_eq!(package.name(), "com.example.merged");
        assert_eq!(package.resolve_name("string", "label"), Some(label));
        let entry = package.get_entry(label, &ResConfig::default()).unwrap();
        assert!(entry.is_public());
        assert_eq!(entry.to_item(&pool).unwrap().text.as_deref(), Some("Label"));
        assert!(package.pair(1).unwrap().spec().is_public(0));
    }

    #[test]
    fn header_with_type_id_offset_writes_zero() {
        let mut package = PackageBlock::new(0x7f, "com.example");
        package.type_id_offset = Some(5);
        package.refresh();
        let bytes = package.to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), HEADER_SIZE_WITH_OFFSET);
        assert_eq!(&bytes[284..288], &[0, 0, 0, 0]);
    }
}
