use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::block::error::ArscResult;
use crate::value::{escape_text, Bag, BagEntry, EntryStore, ValueItem, ValueType};

/// High id of array item names written by encoders.
pub const ARRAY_ID_HIGH: u16 = 0x0100;
/// Alternate high id some producers use for array items.
pub const ARRAY_ID_HIGH_ALT: u16 = 0x0200;

/// A dense, ordered list of values stored as a bag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayBag {
    pub items: Vec<ValueItem>,
}

impl ArrayBag {
    pub fn new(items: Vec<ValueItem>) -> Self {
        ArrayBag { items }
    }

    /// Name of the item at `index`: `{high = 0x0100, low = index + 1}`.
    pub fn item_name(index: usize) -> u32 {
        ((ARRAY_ID_HIGH as u32) << 16) | ((index as u32 + 1) & 0xFFFF)
    }

    /// True when the bag has no parent and its item names form the gapless
    /// sequence `1..=n` under one of the array high ids.
    pub fn can_decode(bag: &Bag) -> bool {
        if bag.parent != 0 || bag.items.is_empty() {
            return false;
        }
        bag.items.iter().enumerate().all(|(position, item)| {
            let high = item.id_high();
            (high == ARRAY_ID_HIGH || high == ARRAY_ID_HIGH_ALT)
                && item.id_low() as usize == position + 1
        })
    }

    pub fn decode(bag: &Bag) -> Option<Self> {
        if !Self::can_decode(bag) {
            return None;
        }
        Some(ArrayBag {
            items: bag.items.iter().map(|item| item.value.clone()).collect(),
        })
    }

    pub fn to_bag(&self, type_name: &str) -> Bag {
        Bag {
            type_name: type_name.to_string(),
            parent: 0,
            items: self
                .items
                .iter()
                .enumerate()
                .map(|(index, value)| BagEntry::new(Self::item_name(index), value.clone()))
                .collect(),
        }
    }

    /// `string-array`, `integer-array` or plain `array`, by item types.
    pub fn tag(&self) -> &'static str {
        if self.items.iter().all(ValueItem::is_string) {
            "string-array"
        } else if self
            .items
            .iter()
            .all(|item| item.value_type == ValueType::IntDec)
        {
            "integer-array"
        } else {
            "array"
        }
    }

    pub fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        store: &dyn EntryStore,
        package_id: u8,
    ) -> ArscResult<()> {
        let tag = self.tag();
        let mut start = BytesStart::new(tag);
        start.push_attribute(("name", name));
        writer.write_event(Event::Start(start))?;
        for value in &self.items {
            let text = if value.is_string() {
                escape_text(value.text.as_deref().unwrap_or_default())
            } else {
                value.to_text(store, package_id)
            };
            writer.write_event(Event::Start(BytesStart::new("item")))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new("item")))?;
        }
        writer.write_event(Event::End(BytesEnd::new(tag)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EmptyStore;

    fn bag(names: &[u32]) -> Bag {
        Bag {
            type_name: "array".to_string(),
            parent: 0,
            items: names
                .iter()
                .map(|name| BagEntry::new(*name, ValueItem::typed(ValueType::IntDec, 1)))
                .collect(),
        }
    }

    #[test]
    fn dense_sequence_is_an_array() {
        assert!(ArrayBag::can_decode(&bag(&[0x0100_0001, 0x0100_0002, 0x0200_0003])));
    }

    #[test]
    fn gaps_and_parents_are_not_arrays() {
        assert!(!ArrayBag::can_decode(&bag(&[0x0100_0001, 0x0100_0003])));
        assert!(!ArrayBag::can_decode(&bag(&[0x0101_0001])));
        assert!(!ArrayBag::can_decode(&bag(&[])));
        let mut with_parent = bag(&[0x0100_0001]);
        with_parent.parent = 0x7f0e0001;
        assert!(!ArrayBag::can_decode(&with_parent));
    }

    #[test]
    fn writes_string_array() {
        let array = ArrayBag::new(vec![ValueItem::string("one"), ValueItem::string("@two")]);
        let mut writer = Writer::new(Vec::new());
        array.write_xml(&mut writer, "numbers", &EmptyStore, 0x7f).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            xml,
            "<string-array name=\"numbers\"><item>one</item><item>\\@two</item></string-array>"
        );
    }
}
