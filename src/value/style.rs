use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::block::error::ArscResult;
use crate::value::array::ArrayBag;
use crate::value::{escape_text, Bag, BagEntry, EntryStore, ValueItem, ValueType};

/// Type-name prefix of style entries.
pub const STYLE_TYPE: &str = "style";

/// A style: optional parent plus attribute overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleBag {
    pub parent: u32,
    pub items: Vec<BagEntry>,
}

impl StyleBag {
    pub fn can_decode(bag: &Bag) -> bool {
        bag.type_name.starts_with(STYLE_TYPE) && !ArrayBag::can_decode(bag)
    }

    pub fn decode(bag: &Bag) -> Option<Self> {
        if !Self::can_decode(bag) {
            return None;
        }
        Some(StyleBag {
            parent: bag.parent,
            items: bag.items.clone(),
        })
    }

    pub fn parent_reference(&self, store: &dyn EntryStore, package_id: u8) -> Option<String> {
        if self.parent == 0 {
            return None;
        }
        Some(ValueItem::reference(self.parent).to_text(store, package_id))
    }

    /// Override for the attribute `attribute_id`, if any.
    pub fn get(&self, attribute_id: u32) -> Option<&ValueItem> {
        self.items
            .iter()
            .find(|item| item.name == attribute_id)
            .map(|item| &item.value)
    }

    pub fn to_bag(&self, type_name: &str) -> Bag {
        let mut items = self.items.clone();
        items.sort_by_key(|item| item.name);
        Bag {
            type_name: type_name.to_string(),
            parent: self.parent,
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
        let mut start = BytesStart::new(STYLE_TYPE);
        start.push_attribute(("name", name));
        let parent = self.parent_reference(store, package_id);
        if let Some(parent) = parent.as_deref() {
            start.push_attribute(("parent", parent));
        }
        writer.write_event(Event::Start(start))?;
        for item in &self.items {
            let attribute = attribute_name(store, item.name, package_id);
            let text = style_value_text(store, item, package_id);
            let mut element = BytesStart::new("item");
            element.push_attribute(("name", attribute.as_str()));
            writer.write_event(Event::Start(element))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new("item")))?;
        }
        writer.write_event(Event::End(BytesEnd::new(STYLE_TYPE)))?;
        Ok(())
    }
}

/// `[package:]name` of an attribute id, or its hex form when unknown.
pub(crate) fn attribute_name(store: &dyn EntryStore, attribute_id: u32, package_id: u8) -> String {
    match store.resource_name(attribute_id) {
        Some(name) if name.package_id == package_id || name.package.is_empty() => name.name,
        Some(name) => format!("{}:{}", name.package, name.name),
        None => format!("@0x{:08x}", attribute_id),
    }
}

fn style_value_text(store: &dyn EntryStore, item: &BagEntry, package_id: u8) -> String {
    let value = &item.value;
    if value.is_string() {
        return escape_text(value.text.as_deref().unwrap_or_default());
    }
    if matches!(value.value_type, ValueType::IntDec | ValueType::IntHex) {
        if let Some(names) = store
            .attribute_bag(item.name)
            .and_then(|attribute| attribute.decode_value_text(value.data))
        {
            return names;
        }
    }
    value.to_text(store, package_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EmptyStore;

    #[test]
    fn array_shaped_style_is_not_a_style() {
        let bag = Bag {
            type_name: "style".to_string(),
            parent: 0,
            items: vec![BagEntry::new(0x0100_0001, ValueItem::null())],
        };
        assert!(!StyleBag::can_decode(&bag));
    }

    #[test]
    fn writes_parent_and_items() {
        let bag = Bag {
            type_name: "style".to_string(),
            parent: 0x7f0f0001,
            items: vec![BagEntry::new(
                0x7f030002,
                ValueItem::typed(ValueType::IntBoolean, 1),
            )],
        };
        let style = StyleBag::decode(&bag).unwrap();
        let mut writer = Writer::new(Vec::new());
        style.write_xml(&mut writer, "AppTheme", &EmptyStore, 0x7f).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            xml,
            "<style name=\"AppTheme\" parent=\"@0x7f0f0001\">\
             <item name=\"@0x7f030002\">true</item></style>"
        );
    }
}
