use std::collections::BTreeMap;
use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::block::error::ArscResult;
use crate::value::{escape_text, Bag, BagEntry, EntryStore, ValueItem};

/// Type-name prefix of plurals entries.
pub const PLURALS_TYPE: &str = "plurals";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluralQuantity {
    Zero,
    One,
    Two,
    Few,
    Many,
    Other,
}

impl PluralQuantity {
    pub const ALL: [PluralQuantity; 6] = [
        PluralQuantity::Other,
        PluralQuantity::Zero,
        PluralQuantity::One,
        PluralQuantity::Two,
        PluralQuantity::Few,
        PluralQuantity::Many,
    ];

    /// Bag item name of this quantity.
    pub fn id(self) -> u32 {
        match self {
            PluralQuantity::Other => 0x0100_0004,
            PluralQuantity::Zero => 0x0100_0005,
            PluralQuantity::One => 0x0100_0006,
            PluralQuantity::Two => 0x0100_0007,
            PluralQuantity::Few => 0x0100_0008,
            PluralQuantity::Many => 0x0100_0009,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|quantity| quantity.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            PluralQuantity::Other => "other",
            PluralQuantity::Zero => "zero",
            PluralQuantity::One => "one",
            PluralQuantity::Two => "two",
            PluralQuantity::Few => "few",
            PluralQuantity::Many => "many",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|quantity| quantity.name() == name)
    }
}

/// Quantity to text (or reference) mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluralsBag {
    pub items: BTreeMap<PluralQuantity, ValueItem>,
}

impl PluralsBag {
    pub fn can_decode(bag: &Bag) -> bool {
        bag.type_name.starts_with(PLURALS_TYPE)
            && !bag.items.is_empty()
            && bag
                .items
                .iter()
                .all(|item| PluralQuantity::from_id(item.name).is_some())
    }

    pub fn decode(bag: &Bag) -> Option<Self> {
        if !Self::can_decode(bag) {
            return None;
        }
        let mut items = BTreeMap::new();
        for item in &bag.items {
            let quantity = PluralQuantity::from_id(item.name)?;
            items.insert(quantity, item.value.clone());
        }
        Some(PluralsBag { items })
    }

    pub fn quantities(&self) -> Vec<PluralQuantity> {
        self.items.keys().copied().collect()
    }

    /// Items ordered by name id, as compiled tables keep them.
    pub fn to_bag(&self, type_name: &str) -> Bag {
        let mut items: Vec<BagEntry> = self
            .items
            .iter()
            .map(|(quantity, value)| BagEntry::new(quantity.id(), value.clone()))
            .collect();
        items.sort_by_key(|item| item.name);
        Bag {
            type_name: type_name.to_string(),
            parent: 0,
            items,
        }
    }

    pub fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        store: &dyn EntryStore,
        package_id: u8,
    ) -> ArscResult<()> {
        let mut start = BytesStart::new(PLURALS_TYPE);
        start.push_attribute(("name", name));
        writer.write_event(Event::Start(start))?;
        for (quantity, value) in &self.items {
            let text = if value.is_string() {
                escape_text(value.text.as_deref().unwrap_or_default())
            } else {
                value.to_text(store, package_id)
            };
            let mut item = BytesStart::new("item");
            item.push_attribute(("quantity", quantity.name()));
            writer.write_event(Event::Start(item))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new("item")))?;
        }
        writer.write_event(Event::End(BytesEnd::new(PLURALS_TYPE)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_and_one_decode_in_quantity_order() {
        let bag = Bag {
            type_name: "plurals".to_string(),
            parent: 0,
            items: vec![
                BagEntry::new(0x0100_0004, ValueItem::string("%d songs")),
                BagEntry::new(0x0100_0006, ValueItem::string("one song")),
            ],
        };
        let plurals = PluralsBag::decode(&bag).unwrap();
        assert_eq!(
            plurals.quantities(),
            vec![PluralQuantity::One, PluralQuantity::Other]
        );
        assert_eq!(plurals.to_bag("plurals"), bag);
    }

    #[test]
    fn wrong_type_name_is_rejected() {
        let bag = Bag {
            type_name: "array".to_string(),
            parent: 0,
            items: vec![BagEntry::new(0x0100_0004, ValueItem::string("x"))],
        };
        assert!(!PluralsBag::can_decode(&bag));
    }
}
