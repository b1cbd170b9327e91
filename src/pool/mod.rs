//! Deduplicating string pool with tracked back-references.
//!
//! Every location in a chunk tree that stores a pool index does so through a
//! [`StringRef`]. Linking a reference registers a holder id on the pool entry
//! it points at, so the pool always knows which entries are in use. Index
//! changes go through [`StringPool::rebind`], and whole-pool renumbering
//! (insertion, compaction) produces an [`IndexRemap`] that the owning tree
//! applies to all of its references through [`StringHolder`].

pub mod codec;

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use bitflags::bitflags;
use log::{debug, warn};

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{align_to_four, Block, ChunkHeader, ChunkType, Segment};

/// Index value meaning "no string".
pub const NO_INDEX: u32 = 0xFFFF_FFFF;

const HEADER_SIZE: u16 = 28;
const SPAN_END: u32 = 0xFFFF_FFFF;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PoolFlags: u32 {
        const SORTED = 0x0000_0001;
        const UTF8 = 0x0000_0100;
    }
}

/// Identity of one linked reference, unique within its pool.
pub type HolderId = u32;

/// A pool index stored somewhere in a chunk tree.
///
/// The type is deliberately not `Clone`: two copies of a linked reference
/// would share one holder id and desynchronize the pool's bookkeeping. Use
/// [`StringRef::detached`] to copy just the index.
#[derive(Debug, PartialEq, Eq)]
pub struct StringRef {
    index: u32,
    holder: Option<HolderId>,
}

impl StringRef {
    pub fn new(index: u32) -> Self {
        StringRef {
            index,
            holder: None,
        }
    }

    pub fn none() -> Self {
        StringRef::new(NO_INDEX)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_none(&self) -> bool {
        self.index == NO_INDEX
    }

    pub fn is_linked(&self) -> bool {
        self.holder.is_some()
    }

    pub fn holder(&self) -> Option<HolderId> {
        self.holder
    }

    /// Unlinked copy carrying the same index.
    pub fn detached(&self) -> StringRef {
        StringRef::new(self.index)
    }

    /// Overwrites the raw index of an unlinked reference. Linked references
    /// must be retargeted through [`StringPool::rebind`].
    pub(crate) fn set_raw(&mut self, index: u32) {
        debug_assert!(self.holder.is_none());
        self.index = index;
    }
}

impl Default for StringRef {
    fn default() -> Self {
        StringRef::none()
    }
}

/// Anything that stores references into one particular pool.
pub trait StringHolder {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef));
}

/// Old index to new index mapping produced by a pool renumbering. `None`
/// marks a removed entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexRemap {
    map: Vec<Option<u32>>,
}

impl IndexRemap {
    pub fn identity(len: usize) -> Self {
        IndexRemap {
            map: (0..len as u32).map(Some).collect(),
        }
    }

    pub fn get(&self, old: u32) -> Option<u32> {
        self.map.get(old as usize).copied().flatten()
    }

    pub fn is_identity(&self) -> bool {
        self.map
            .iter()
            .enumerate()
            .all(|(i, slot)| *slot == Some(i as u32))
    }

    /// Moves `reference` into the new index space. The holder id travels
    /// with the entry, so a linked reference stays linked.
    pub fn apply(&self, reference: &mut StringRef) {
        if reference.index != NO_INDEX {
            reference.index = self.get(reference.index).unwrap_or(NO_INDEX);
        }
    }

    pub fn apply_to(&self, holder: &mut dyn StringHolder) {
        holder.visit_string_refs(&mut |reference| self.apply(reference));
    }
}

/// One rich-text run of a styled string.
#[derive(Debug, PartialEq, Eq)]
pub struct Span {
    pub name: StringRef,
    pub first: u32,
    pub last: u32,
}

/// A string plus its style spans and the holders currently pointing at it.
#[derive(Debug, Default)]
pub struct PoolEntry {
    text: String,
    spans: Vec<Span>,
    refs: BTreeSet<HolderId>,
}

impl PoolEntry {
    fn new(text: String) -> Self {
        PoolEntry {
            text,
            spans: Vec::new(),
            refs: BTreeSet::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn has_style(&self) -> bool {
        !self.spans.is_empty()
    }

    pub fn holders(&self) -> &BTreeSet<HolderId> {
        &self.refs
    }

    pub fn reference_count(&self) -> usize {
        self.refs.len()
    }
}

#[derive(Debug, Default)]
struct PoolLayout {
    style_count: u32,
    strings_start: u32,
    styles_start: u32,
    offsets: Vec<u8>,
    strings: Vec<u8>,
    styles: Vec<u8>,
}

/// A string pool chunk.
///
/// Strings are held decoded. Modified UTF-8 read from a UTF-8 pool is
/// written back as standard UTF-8, and a UTF-8 pool holding a string longer
/// than its length prefix allows is written as UTF-16.
#[derive(Debug)]
pub struct StringPool {
    header: ChunkHeader,
    flags: PoolFlags,
    entries: Vec<PoolEntry>,
    lookup: HashMap<String, u32>,
    reserved: u32,
    next_holder: HolderId,
    layout: PoolLayout,
}

impl StringPool {
    pub fn new(utf8: bool) -> Self {
        let mut pool = StringPool {
            header: ChunkHeader::new(ChunkType::StringPool, HEADER_SIZE),
            flags: if utf8 { PoolFlags::UTF8 } else { PoolFlags::empty() },
            entries: Vec::new(),
            lookup: HashMap::new(),
            reserved: 0,
            next_holder: 0,
            layout: PoolLayout::default(),
        };
        pool.refresh();
        pool
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let (header, mut chunk) = reader.enter_chunk(ChunkType::StringPool)?;
        let string_count = chunk.read_u32()? as usize;
        let style_count = chunk.read_u32()? as usize;
        let flags = PoolFlags::from_bits_retain(chunk.read_u32()?);
        let strings_start = chunk.read_u32()? as usize;
        let styles_start = chunk.read_u32()? as usize;
        chunk.seek(header.header_size as usize)?;

        let mut string_offsets = Vec::with_capacity(string_count);
        for _ in 0..string_count {
            string_offsets.push(chunk.read_u32()? as usize);
        }
        let mut style_offsets = Vec::with_capacity(style_count);
        for _ in 0..style_count {
            style_offsets.push(chunk.read_u32()? as usize);
        }

        let utf8 = flags.contains(PoolFlags::UTF8);
        let data = chunk.slice(0, chunk.len())?;
        let mut entries = Vec::with_capacity(string_count);
        for offset in string_offsets {
            let text = codec::read_string(data, strings_start + offset, utf8)?;
            entries.push(PoolEntry::new(text));
        }

        for (index, offset) in style_offsets.into_iter().enumerate() {
            let mut cursor = styles_start + offset;
            let mut spans = Vec::new();
            loop {
                let name = chunk.u32_at(cursor)?;
                if name == SPAN_END {
                    break;
                }
                spans.push(Span {
                    name: StringRef::new(name),
                    first: chunk.u32_at(cursor + 4)?,
                    last: chunk.u32_at(cursor + 8)?,
                });
                cursor += 12;
            }
            match entries.get_mut(index) {
                Some(entry) => entry.spans = spans,
                None => fail!("style {} has no matching string", index),
            }
        }

        let mut pool = StringPool {
            header,
            flags,
            entries,
            lookup: HashMap::new(),
            reserved: 0,
            next_holder: 0,
            layout: PoolLayout::default(),
        };
        pool.rebuild_lookup();
        pool.link_spans();
        pool.refresh();
        debug!(
            "read string pool: {} strings, {} styles, utf8={}",
            string_count, style_count, utf8
        );
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_utf8(&self) -> bool {
        self.flags.contains(PoolFlags::UTF8)
    }

    pub fn set_utf8(&mut self, utf8: bool) {
        self.flags.set(PoolFlags::UTF8, utf8);
    }

    pub fn flags(&self) -> PoolFlags {
        self.flags
    }

    /// Strings below this index are positional and never reused when
    /// deduplicating.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    pub fn set_reserved(&mut self, reserved: u32) {
        self.reserved = reserved.min(self.entries.len() as u32);
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get(index as usize).map(|entry| entry.text.as_str())
    }

    pub fn entry(&self, index: u32) -> Option<&PoolEntry> {
        self.entries.get(index as usize)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.iter()
    }

    /// Text of a reference, if it points at an existing entry.
    pub fn resolve(&self, reference: &StringRef) -> Option<&str> {
        self.get(reference.index)
    }

    /// First dedup-eligible index holding `text`.
    pub fn index_of(&self, text: &str) -> Option<u32> {
        match self.lookup.get(text) {
            Some(index) if *index >= self.reserved => Some(*index),
            Some(_) => self
                .entries
                .iter()
                .enumerate()
                .skip(self.reserved as usize)
                .find(|(_, entry)| entry.text == text)
                .map(|(index, _)| index as u32),
            None => None,
        }
    }

    /// Index of an existing equal string, or of a newly appended one.
    pub fn get_or_create(&mut self, text: &str) -> u32 {
        match self.index_of(text) {
            Some(index) => index,
            None => self.push(text),
        }
    }

    /// Appends without deduplication; positional pools need this.
    pub fn push(&mut self, text: &str) -> u32 {
        let index = self.entries.len() as u32;
        self.entries.push(PoolEntry::new(text.to_string()));
        self.lookup.entry(text.to_string()).or_insert(index);
        index
    }

    /// Replaces the text at `index` in place. Holders keep pointing at it.
    pub fn set_string(&mut self, index: u32, text: &str) -> bool {
        match self.entries.get_mut(index as usize) {
            Some(entry) => {
                entry.text = text.to_string();
                self.rebuild_lookup();
                true
            }
            None => false,
        }
    }

    /// Inserts `text` at `index`, shifting later entries up by one. The
    /// caller must apply the returned remap to every holder of this pool.
    pub fn insert(&mut self, index: u32, text: &str) -> IndexRemap {
        let len = self.entries.len();
        let at = (index as usize).min(len);
        self.entries.insert(at, PoolEntry::new(text.to_string()));
        let remap = IndexRemap {
            map: (0..len as u32)
                .map(|old| Some(if old as usize >= at { old + 1 } else { old }))
                .collect(),
        };
        self.remap_spans(&remap);
        if (at as u32) < self.reserved {
            self.reserved += 1;
        }
        self.rebuild_lookup();
        remap
    }

    /// Registers `reference` as a holder of the entry it points at.
    pub fn link(&mut self, reference: &mut StringRef) {
        if reference.index == NO_INDEX {
            return;
        }
        let holder = match reference.holder {
            Some(holder) => holder,
            None => {
                let holder = self.next_holder;
                self.next_holder += 1;
                holder
            }
        };
        match self.entries.get_mut(reference.index as usize) {
            Some(entry) => {
                entry.refs.insert(holder);
                reference.holder = Some(holder);
            }
            None => warn!(
                "string index {} out of range ({} strings)",
                reference.index,
                self.entries.len()
            ),
        }
    }

    /// Drops `reference` from its entry's holder set. The index is kept.
    pub fn unlink(&mut self, reference: &mut StringRef) {
        if let Some(holder) = reference.holder.take() {
            if let Some(entry) = self.entries.get_mut(reference.index as usize) {
                entry.refs.remove(&holder);
            }
        }
    }

    /// The single retargeting primitive: unlink from the old entry, assign,
    /// link to the new entry.
    pub fn rebind(&mut self, reference: &mut StringRef, index: u32) {
        self.unlink(reference);
        reference.index = index;
        self.link(reference);
    }

    /// Retargets `reference` at `text`, creating the string when needed.
    pub fn set_ref(&mut self, reference: &mut StringRef, text: &str) -> u32 {
        let index = self.get_or_create(text);
        self.rebind(reference, index);
        index
    }

    /// Clears `reference` to [`NO_INDEX`].
    pub fn clear_ref(&mut self, reference: &mut StringRef) {
        self.rebind(reference, NO_INDEX);
    }

    pub fn link_holder(&mut self, holder: &mut dyn StringHolder) {
        holder.visit_string_refs(&mut |reference| self.link(reference));
    }

    pub fn unlink_holder(&mut self, holder: &mut dyn StringHolder) {
        holder.visit_string_refs(&mut |reference| self.unlink(reference));
    }

    /// Style spans of the string at `index`, as `(tag, first, last)`.
    pub fn style(&self, index: u32) -> Vec<(String, u32, u32)> {
        match self.entries.get(index as usize) {
            Some(entry) => entry
                .spans
                .iter()
                .map(|span| {
                    let tag = self.resolve(&span.name).unwrap_or_default();
                    (tag.to_string(), span.first, span.last)
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Replaces the spans of the string at `index`. Styled strings must sit
    /// at the front of the pool; [`StringPool::get_or_create_styled`] takes
    /// care of that for new strings.
    pub fn set_style(&mut self, index: u32, spans: &[(String, u32, u32)]) {
        if index as usize >= self.entries.len() {
            return;
        }
        self.clear_style(index);
        let mut built = Vec::with_capacity(spans.len());
        for (tag, first, last) in spans {
            let mut name = StringRef::none();
            self.set_ref(&mut name, tag);
            built.push(Span {
                name,
                first: *first,
                last: *last,
            });
        }
        if let Some(entry) = self.entries.get_mut(index as usize) {
            entry.spans = built;
        }
    }

    fn clear_style(&mut self, index: u32) {
        let spans = match self.entries.get_mut(index as usize) {
            Some(entry) => std::mem::take(&mut entry.spans),
            None => return,
        };
        for mut span in spans {
            self.unlink(&mut span.name);
        }
    }

    /// Drops every style span in the pool.
    pub fn clear_styles(&mut self) {
        for index in 0..self.entries.len() as u32 {
            self.clear_style(index);
        }
    }

    /// Number of entries that must be written with a style slot.
    pub fn style_count(&self) -> u32 {
        self.entries
            .iter()
            .rposition(PoolEntry::has_style)
            .map(|last| last as u32 + 1)
            .unwrap_or(0)
    }

    /// Total holders registered across all entries.
    pub fn total_references(&self) -> usize {
        self.entries.iter().map(PoolEntry::reference_count).sum()
    }

    /// Removes every entry nobody references and renumbers the survivors.
    /// The caller must apply the returned remap to every holder of this pool.
    pub fn remove_unused_strings(&mut self) -> IndexRemap {
        // a removed styled string releases its span names, which may free more
        loop {
            let doomed: Vec<u32> = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.refs.is_empty() && entry.has_style())
                .map(|(index, _)| index as u32)
                .collect();
            if doomed.is_empty() {
                break;
            }
            for index in doomed {
                self.clear_style(index);
            }
        }

        let mut remap = IndexRemap::default();
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut reserved = 0;
        for (old, entry) in std::mem::take(&mut self.entries).into_iter().enumerate() {
            if entry.refs.is_empty() {
                remap.map.push(None);
                continue;
            }
            if (old as u32) < self.reserved {
                reserved += 1;
            }
            remap.map.push(Some(kept.len() as u32));
            kept.push(entry);
        }
        let removed = remap.map.len() - kept.len();
        self.entries = kept;
        self.reserved = reserved;
        self.remap_spans(&remap);
        self.rebuild_lookup();
        if removed > 0 {
            debug!("removed {} unused strings", removed);
        }
        remap
    }

    /// Compacts the pool and renumbers every reference in `holder`.
    pub fn compact(&mut self, holder: &mut dyn StringHolder) -> IndexRemap {
        let remap = self.remove_unused_strings();
        if !remap.is_identity() {
            remap.apply_to(holder);
        }
        remap
    }

    /// Adds a styled string, reusing an entry with the same text and spans.
    /// Styled strings live in front of all unstyled ones, so this may insert;
    /// the caller applies the returned remap.
    pub fn get_or_create_styled(
        &mut self,
        text: &str,
        spans: &[(String, u32, u32)],
    ) -> (u32, Option<IndexRemap>) {
        if spans.is_empty() {
            return (self.get_or_create(text), None);
        }
        let existing = (self.reserved..self.style_count())
            .find(|&index| self.get(index) == Some(text) && self.style(index) == spans);
        if let Some(index) = existing {
            return (index, None);
        }
        let slot = self.style_count().max(self.reserved);
        let unstyled_tail = self.entries[slot as usize..]
            .iter()
            .any(|entry| !entry.has_style());
        if !unstyled_tail {
            let index = self.push(text);
            self.set_style(index, spans);
            return (index, None);
        }
        let remap = self.insert(slot, text);
        self.set_style(slot, spans);
        (slot, Some(remap))
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            self.lookup.entry(entry.text.clone()).or_insert(index as u32);
        }
    }

    fn link_spans(&mut self) {
        for index in 0..self.entries.len() {
            let mut spans = std::mem::take(&mut self.entries[index].spans);
            for span in spans.iter_mut() {
                self.link(&mut span.name);
            }
            self.entries[index].spans = spans;
        }
    }

    fn remap_spans(&mut self, remap: &IndexRemap) {
        for entry in self.entries.iter_mut() {
            for span in entry.spans.iter_mut() {
                remap.apply(&mut span.name);
            }
        }
    }

    fn build_layout(&self) -> PoolLayout {
        let utf8 = self.is_utf8();
        let string_count = self.entries.len() as u32;
        let style_count = self.style_count();

        let mut offsets = Vec::with_capacity((string_count + style_count) as usize * 4);
        let mut strings = Vec::new();
        for entry in &self.entries {
            offsets.extend_from_slice(&(strings.len() as u32).to_le_bytes());
            codec::write_string(&mut strings, &entry.text, utf8);
        }
        align_to_four(&mut strings);

        let mut styles = Vec::new();
        for entry in self.entries.iter().take(style_count as usize) {
            offsets.extend_from_slice(&(styles.len() as u32).to_le_bytes());
            for span in &entry.spans {
                styles.extend_from_slice(&span.name.index.to_le_bytes());
                styles.extend_from_slice(&span.first.to_le_bytes());
                styles.extend_from_slice(&span.last.to_le_bytes());
            }
            styles.extend_from_slice(&SPAN_END.to_le_bytes());
        }
        if style_count > 0 {
            styles.extend_from_slice(&SPAN_END.to_le_bytes());
            styles.extend_from_slice(&SPAN_END.to_le_bytes());
        }

        let strings_start = if string_count == 0 {
            0
        } else {
            HEADER_SIZE as u32 + offsets.len() as u32
        };
        let styles_start = if style_count == 0 {
            0
        } else {
            HEADER_SIZE as u32 + offsets.len() as u32 + strings.len() as u32
        };
        PoolLayout {
            style_count,
            strings_start,
            styles_start,
            offsets,
            strings,
            styles,
        }
    }
}

impl StringHolder for StringPool {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        for entry in self.entries.iter_mut() {
            for span in entry.spans.iter_mut() {
                visit(&mut span.name);
            }
        }
    }
}

impl Block for StringPool {
    fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments: Vec<Segment<'_>> = self.header.segments().into_iter().collect();
        segments.extend([
            Segment::U32(self.entries.len() as u32),
            Segment::U32(self.layout.style_count),
            Segment::U32(self.flags.bits()),
            Segment::U32(self.layout.strings_start),
            Segment::U32(self.layout.styles_start),
            Segment::Bytes(Cow::Borrowed(&self.layout.offsets)),
            Segment::Bytes(Cow::Borrowed(&self.layout.strings)),
            Segment::Bytes(Cow::Borrowed(&self.layout.styles)),
        ]);
        segments
    }

    fn refresh(&mut self) {
        if self.is_utf8() {
            let oversized = self
                .entries
                .iter()
                .position(|entry| !codec::fits_utf8(&entry.text));
            if let Some(index) = oversized {
                warn!(
                    "string {} is too long for a UTF-8 pool, writing the pool as UTF-16",
                    index
                );
                self.set_utf8(false);
            }
        }
        self.layout = self.build_layout();
        self.header.header_size = HEADER_SIZE;
        self.header.chunk_size = self.count_bytes() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Holders(Vec<StringRef>);

    impl StringHolder for Holders {
        fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
            for reference in self.0.iter_mut() {
                visit(reference);
            }
        }
    }

    fn holding(pool: &mut StringPool, texts: &[&str]) -> Holders {
        let mut holders = Holders(Vec::new());
        for text in texts {
            let mut reference = StringRef::none();
            pool.set_ref(&mut reference, text);
            holders.0.push(reference);
        }
        holders
    }

    fn assert_consistent(pool: &StringPool, holders: &mut Holders) {
        let mut seen = 0;
        holders.visit_string_refs(&mut |reference| {
            if reference.is_none() {
                return;
            }
            let holder = reference.holder().unwrap();
            assert!(pool.entry(reference.index()).unwrap().holders().contains(&holder));
            seen += 1;
        });
        assert_eq!(seen, pool.total_references());
    }

    #[test]
    fn get_or_create_deduplicates() {
        let mut pool = StringPool::new(true);
        let a = pool.get_or_create("alpha");
        let b = pool.get_or_create("beta");
        assert_eq!(pool.get_or_create("alpha"), a);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.push("alpha"), 2);
        assert_eq!(pool.index_of("alpha"), Some(0));
    }

    #[test]
    fn rebind_moves_the_holder() {
        let mut pool = StringPool::new(false);
        let mut holders = holding(&mut pool, &["one", "two"]);
        let two = pool.index_of("two").unwrap();
        pool.rebind(&mut holders.0[0], two);
        assert_eq!(pool.entry(0).unwrap().reference_count(), 0);
        assert_eq!(pool.entry(two).unwrap().reference_count(), 2);
        assert_consistent(&pool, &mut holders);
    }

    #[test]
    fn compaction_keeps_values_of_survivors() {
        let mut pool = StringPool::new(true);
        pool.get_or_create("unused-1");
        let mut holders = holding(&mut pool, &["keep", "also", "keep"]);
        pool.get_or_create("unused-2");
        let before: Vec<String> = holders
            .0
            .iter()
            .map(|r| pool.resolve(r).unwrap().to_string())
            .collect();

        let remap = pool.compact(&mut holders);
        pool.refresh();

        assert_eq!(remap.get(0), None);
        assert_eq!(pool.len(), 2);
        assert!(pool.entries().all(|entry| entry.reference_count() > 0));
        let after: Vec<String> = holders
            .0
            .iter()
            .map(|r| pool.resolve(r).unwrap().to_string())
            .collect();
        assert_eq!(before, after);
        assert_consistent(&pool, &mut holders);
    }

    #[test]
    fn insert_shifts_indexes() {
        let mut pool = StringPool::new(true);
        let mut holders = holding(&mut pool, &["a", "b"]);
        let remap = pool.insert(0, "head");
        remap.apply_to(&mut holders);
        assert_eq!(pool.get(0), Some("head"));
        assert_eq!(pool.resolve(&holders.0[0]), Some("a"));
        assert_eq!(pool.resolve(&holders.0[1]), Some("b"));
        assert_consistent(&pool, &mut holders);
    }

    #[test]
    fn styled_strings_survive_a_round_trip() {
        let mut pool = StringPool::new(false);
        let mut holders = holding(&mut pool, &["plain"]);
        let (index, remap) =
            pool.get_or_create_styled("Hello world", &[("b".to_string(), 6, 10)]);
        if let Some(remap) = remap {
            remap.apply_to(&mut holders);
        }
        assert_eq!(index, 0);
        let mut styled = StringRef::new(index);
        pool.link(&mut styled);
        pool.refresh();

        let bytes = pool.to_bytes();
        let reread = StringPool::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.get(0), Some("Hello world"));
        assert_eq!(reread.style(0), vec![("b".to_string(), 6, 10)]);
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn equal_styled_strings_share_an_entry() {
        let mut pool = StringPool::new(true);
        let bold = [("b".to_string(), 0, 3)];
        let (first, _) = pool.get_or_create_styled("Bold text", &bold);
        let (again, remap) = pool.get_or_create_styled("Bold text", &bold);
        assert_eq!(first, again);
        assert!(remap.is_none());
        let (italic, _) = pool.get_or_create_styled("Bold text", &[("i".to_string(), 0, 3)]);
        assert_ne!(first, italic);
        assert_eq!(pool.style_count(), 2);
    }

    #[test]
    fn reserved_prefix_is_not_reused() {
        let mut pool = StringPool::new(true);
        pool.push("name");
        pool.set_reserved(1);
        assert_eq!(pool.get_or_create("name"), 1);
        assert_eq!(pool.get_or_create("name"), 1);
    }

    #[test]
    fn oversized_string_switches_the_pool_to_utf16() {
        let mut pool = StringPool::new(true);
        let limit = "x".repeat(codec::MAX_UTF8_LENGTH);
        pool.get_or_create(&limit);
        pool.refresh();
        assert!(pool.is_utf8());
        let reread = StringPool::read(&mut BlockReader::new(&pool.to_bytes())).unwrap();
        assert_eq!(reread.get(0), Some(limit.as_str()));

        let long = "x".repeat(codec::MAX_UTF8_LENGTH + 1);
        pool.get_or_create(&long);
        pool.refresh();
        assert!(!pool.is_utf8());
        let bytes = pool.to_bytes();
        let reread = StringPool::read(&mut BlockReader::new(&bytes)).unwrap();
        assert!(!reread.is_utf8());
        assert_eq!(reread.get(0), Some(limit.as_str()));
        assert_eq!(reread.get(1), Some(long.as_str()));
        assert_eq!(reread.to_bytes(), bytes);
    }

    #[test]
    fn empty_pool_serializes_header_only() {
        let pool = StringPool::new(true);
        let bytes = pool.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[4..8], &28u32.to_le_bytes());
    }
}
