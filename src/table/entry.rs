use bitflags::bitflags;

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{Block, Segment};
use crate::pool::{StringHolder, StringPool, StringRef};
use crate::value::{Bag, BagEntry, ResValue, ValueItem, ValueType};

bitflags! {
    /// `ResTable_entry` flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u16 {
        const COMPLEX = 0x0001;
        const PUBLIC = 0x0002;
        const WEAK = 0x0004;
    }
}

const FLAG_COMPACT: u16 = 0x0008;
const SIMPLE_SIZE: u16 = 8;
const BAG_SIZE: u16 = 16;

/// One name/value item of a complex entry.
#[derive(Debug)]
pub struct BagItem {
    pub name: u32,
    pub value: ResValue,
}

impl Block for BagItem {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![Segment::U32(self.name), Segment::Block(&self.value)]
    }
}

#[derive(Debug)]
pub enum EntryValue {
    Simple(ResValue),
    Bag { parent: u32, items: Vec<BagItem> },
}

/// A `ResTable_entry` with its value or bag. The key lives in the package's
/// key pool and string values in the table pool; the owner links both.
#[derive(Debug)]
pub struct Entry {
    flags: EntryFlags,
    key: StringRef,
    value: EntryValue,
}

impl Entry {
    pub fn new(key: u32) -> Self {
        Entry {
            flags: EntryFlags::empty(),
            key: StringRef::new(key),
            value: EntryValue::Simple(ResValue::null()),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let start = reader.position();
        let size = reader.read_u16()? as usize;
        let raw_flags = reader.read_u16()?;
        if raw_flags & FLAG_COMPACT != 0 {
            fail!("compact entry at 0x{:x} is not supported", start);
        }
        let flags = EntryFlags::from_bits_retain(raw_flags);
        let key = reader.read_u32()?;
        let value = if flags.contains(EntryFlags::COMPLEX) {
            let parent = reader.read_u32()?;
            let count = reader.read_u32()? as usize;
            reader.seek(start + size)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let name = reader.read_u32()?;
                items.push(BagItem {
                    name,
                    value: ResValue::read(reader)?,
                });
            }
            EntryValue::Bag { parent, items }
        } else {
            reader.seek(start + size)?;
            EntryValue::Simple(ResValue::read(reader)?)
        };
        Ok(Entry {
            flags,
            key: StringRef::new(key),
            value,
        })
    }

    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.value, EntryValue::Bag { .. })
    }

    pub fn is_public(&self) -> bool {
        self.flags.contains(EntryFlags::PUBLIC)
    }

    pub fn set_public(&mut self, public: bool) {
        self.flags.set(EntryFlags::PUBLIC, public);
    }

    pub fn is_weak(&self) -> bool {
        self.flags.contains(EntryFlags::WEAK)
    }

    pub fn key(&self) -> &StringRef {
        &self.key
    }

    pub fn key_index(&self) -> u32 {
        self.key.index()
    }

    pub fn set_key(&mut self, key_pool: &mut StringPool, name: &str) {
        key_pool.set_ref(&mut self.key, name);
    }

    pub fn key_name<'p>(&self, key_pool: &'p StringPool) -> Option<&'p str> {
        key_pool.resolve(&self.key)
    }

    pub fn value(&self) -> &EntryValue {
        &self.value
    }

    pub fn simple_value(&self) -> Option<&ResValue> {
        match &self.value {
            EntryValue::Simple(value) => Some(value),
            EntryValue::Bag { .. } => None,
        }
    }

    pub fn simple_value_mut(&mut self) -> Option<&mut ResValue> {
        match &mut self.value {
            EntryValue::Simple(value) => Some(value),
            EntryValue::Bag { .. } => None,
        }
    }

    /// Mutable bag item at `index`, when this is a complex entry.
    pub fn bag_item_mut(&mut self, index: usize) -> Option<&mut BagItem> {
        match &mut self.value {
            EntryValue::Bag { items, .. } => items.get_mut(index),
            EntryValue::Simple(_) => None,
        }
    }

    /// Replaces the content with a simple value; string payloads are linked
    /// into `pool`.
    pub fn set_value(&mut self, pool: &mut StringPool, item: &ValueItem) {
        self.clear_value(pool);
        let mut value = ResValue::null();
        value.assign(pool, item);
        self.flags.remove(EntryFlags::COMPLEX);
        self.value = EntryValue::Simple(value);
    }

    /// Replaces the content with a bag shaped like `bag`. Items carrying
    /// styled strings get their plain text here; the owner restyles them.
    pub fn set_bag(&mut self, pool: &mut StringPool, bag: &Bag) {
        self.clear_value(pool);
        let items = bag
            .items
            .iter()
            .map(|item| {
                let mut value = ResValue::null();
                value.assign(pool, &item.value);
                BagItem {
                    name: item.name,
                    value,
                }
            })
            .collect();
        self.flags.insert(EntryFlags::COMPLEX);
        self.value = EntryValue::Bag {
            parent: bag.parent,
            items,
        };
    }

    fn clear_value(&mut self, pool: &mut StringPool) {
        self.visit_values(&mut |reference| pool.unlink(reference));
    }

    /// Drops every pool link this entry holds.
    pub fn release(&mut self, pool: &mut StringPool, key_pool: &mut StringPool) {
        self.clear_value(pool);
        key_pool.unlink(&mut self.key);
    }

    pub fn link(&mut self, pool: &mut StringPool, key_pool: &mut StringPool) {
        key_pool.link(&mut self.key);
        self.visit_values(&mut |reference| pool.link(reference));
    }

    /// References into the table pool.
    pub fn visit_values(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        match &mut self.value {
            EntryValue::Simple(value) => value.visit_string_refs(visit),
            EntryValue::Bag { items, .. } => {
                for item in items.iter_mut() {
                    item.value.visit_string_refs(visit);
                }
            }
        }
    }

    /// The reference into the package key pool.
    pub fn visit_key(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        visit(&mut self.key);
    }

    pub fn to_item(&self, pool: &StringPool) -> Option<ValueItem> {
        self.simple_value().map(|value| value.to_item(pool))
    }

    pub fn to_bag(&self, pool: &StringPool, type_name: &str) -> Option<Bag> {
        match &self.value {
            EntryValue::Bag { parent, items } => Some(Bag {
                type_name: type_name.to_string(),
                parent: *parent,
                items: items
                    .iter()
                    .map(|item| BagEntry::new(item.name, item.value.to_item(pool)))
                    .collect(),
            }),
            EntryValue::Simple(_) => None,
        }
    }

    /// True for a simple entry whose value is an unset null, or an empty bag.
    pub fn is_unset(&self) -> bool {
        match &self.value {
            EntryValue::Simple(value) => value.value_type() == ValueType::Null && value.data() == 0,
            EntryValue::Bag { items, .. } => items.is_empty(),
        }
    }
}

impl Block for Entry {
    fn segments(&self) -> Vec<Segment<'_>> {
        match &self.value {
            EntryValue::Simple(value) => vec![
                Segment::U16(SIMPLE_SIZE),
                Segment::U16(self.flags.bits() & !EntryFlags::COMPLEX.bits()),
                Segment::U32(self.key.index()),
                Segment::Block(value),
            ],
            EntryValue::Bag { parent, items } => vec![
                Segment::U16(BAG_SIZE),
                Segment::U16(self.flags.bits() | EntryFlags::COMPLEX.bits()),
                Segment::U32(self.key.index()),
                Segment::U32(*parent),
                Segment::U32(items.len() as u32),
                Segment::List(items.iter().map(|item| item as &dyn Block).collect()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_entry_layout() {
        let mut pool = StringPool::new(true);
        let mut keys = StringPool::new(true);
        let mut entry = Entry::new(0);
        entry.set_key(&mut keys, "app_name");
        entry.set_value(&mut pool, &ValueItem::string("Demo"));
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[8, 0, 0, 0]);
        assert_eq!(bytes[11], ValueType::String.value());

        let reread = Entry::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.to_bytes(), bytes);
        assert!(!reread.is_complex());
    }

    #[test]
    fn bag_entry_layout() {
        let mut pool = StringPool::new(true);
        let mut entry = Entry::new(3);
        let bag = Bag {
            type_name: "array".to_string(),
            parent: 0,
            items: vec![
                BagEntry::new(0x0100_0001, ValueItem::string("a")),
                BagEntry::new(0x0100_0002, ValueItem::typed(ValueType::IntDec, 2)),
            ],
        };
        entry.set_bag(&mut pool, &bag);
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 16 + 2 * 12);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) & 1, 1);

        let reread = Entry::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.to_bag(&pool, "array").unwrap(), bag);
    }

    #[test]
    fn replacing_a_value_releases_its_string() {
        let mut pool = StringPool::new(true);
        let mut entry = Entry::new(0);
        entry.set_value(&mut pool, &ValueItem::string("old"));
        entry.set_value(&mut pool, &ValueItem::typed(ValueType::IntBoolean, 1));
        assert_eq!(pool.total_references(), 0);
    }

    #[test]
    fn compact_entries_are_rejected() {
        let bytes = [8, 0, 0x08, 0, 0, 0, 0, 0, 8, 0, 0, 0x10, 1, 0, 0, 0];
        assert!(Entry::read(&mut BlockReader::new(&bytes)).is_err());
    }
}
