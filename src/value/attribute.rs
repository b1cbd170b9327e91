use std::io::Write;

use bitflags::bitflags;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};

use crate::block::error::ArscResult;
use crate::value::{Bag, BagEntry, EntryStore, ValueItem, ValueType};

/// Bag item names reserved for attribute-definition facets.
pub const ATTR_TYPE: u32 = 0x0100_0000;
pub const ATTR_MIN: u32 = 0x0100_0001;
pub const ATTR_MAX: u32 = 0x0100_0002;
pub const ATTR_L10N: u32 = 0x0100_0003;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AttributeFormat: u32 {
        const REFERENCE = 0x0001;
        const STRING = 0x0002;
        const INTEGER = 0x0004;
        const BOOLEAN = 0x0008;
        const COLOR = 0x0010;
        const FLOAT = 0x0020;
        const DIMENSION = 0x0040;
        const FRACTION = 0x0080;
        const ANY = 0xFFFF;
        const ENUM = 0x0001_0000;
        const FLAGS = 0x0002_0000;
    }
}

const FORMAT_NAMES: [(&str, AttributeFormat); 10] = [
    ("reference", AttributeFormat::REFERENCE),
    ("string", AttributeFormat::STRING),
    ("integer", AttributeFormat::INTEGER),
    ("boolean", AttributeFormat::BOOLEAN),
    ("color", AttributeFormat::COLOR),
    ("float", AttributeFormat::FLOAT),
    ("dimension", AttributeFormat::DIMENSION),
    ("fraction", AttributeFormat::FRACTION),
    ("enum", AttributeFormat::ENUM),
    ("flags", AttributeFormat::FLAGS),
];

impl AttributeFormat {
    /// Parses `reference|color` style format lists.
    pub fn parse(text: &str) -> Option<Self> {
        let mut format = AttributeFormat::empty();
        for name in text.split('|').map(str::trim).filter(|name| !name.is_empty()) {
            if name == "any" {
                format |= AttributeFormat::ANY;
                continue;
            }
            let (_, flag) = FORMAT_NAMES.iter().find(|(known, _)| *known == name)?;
            format |= *flag;
        }
        Some(format)
    }

    /// Format list as written in `attrs.xml`; enum and flags are implied by
    /// child elements and left out.
    pub fn names(self) -> String {
        if self.contains(AttributeFormat::ANY) {
            return "any".to_string();
        }
        FORMAT_NAMES
            .iter()
            .filter(|(_, flag)| {
                !flag.intersects(AttributeFormat::ENUM | AttributeFormat::FLAGS)
                    && self.contains(*flag)
            })
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// One named enum or flag value. `id` is the resource id of the `id` entry
/// that names it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSymbol {
    pub id: u32,
    pub name: Option<String>,
    pub value: u32,
}

/// Attribute definition: allowed formats, bounds and symbol table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeBag {
    pub format: AttributeFormat,
    pub min: Option<i32>,
    pub max: Option<i32>,
    pub l10n: Option<u32>,
    pub symbols: Vec<AttributeSymbol>,
}

impl AttributeBag {
    pub fn new(format: AttributeFormat) -> Self {
        AttributeBag {
            format,
            min: None,
            max: None,
            l10n: None,
            symbols: Vec::new(),
        }
    }

    /// Decided by the presence of the format facet, whatever the type name.
    pub fn can_decode(bag: &Bag) -> bool {
        bag.items.iter().any(|item| item.name == ATTR_TYPE)
    }

    pub fn decode(bag: &Bag) -> Option<Self> {
        if !Self::can_decode(bag) {
            return None;
        }
        let mut attribute = AttributeBag::new(AttributeFormat::empty());
        for item in &bag.items {
            match item.name {
                ATTR_TYPE => attribute.format = AttributeFormat::from_bits_retain(item.value.data),
                ATTR_MIN => attribute.min = Some(item.value.data as i32),
                ATTR_MAX => attribute.max = Some(item.value.data as i32),
                ATTR_L10N => attribute.l10n = Some(item.value.data),
                id => attribute.symbols.push(AttributeSymbol {
                    id,
                    name: None,
                    value: item.value.data,
                }),
            }
        }
        Some(attribute)
    }

    /// Fills symbol names from `store`.
    pub fn resolve_names(&mut self, store: &dyn EntryStore) {
        for symbol in self.symbols.iter_mut() {
            if symbol.name.is_none() {
                symbol.name = store.resource_name(symbol.id).map(|name| name.name);
            }
        }
    }

    pub fn is_enum(&self) -> bool {
        self.format.contains(AttributeFormat::ENUM)
    }

    pub fn is_flag(&self) -> bool {
        self.format.contains(AttributeFormat::FLAGS)
    }

    pub fn symbol(&self, name: &str) -> Option<&AttributeSymbol> {
        self.symbols
            .iter()
            .find(|symbol| symbol.name.as_deref() == Some(name))
    }

    /// Encodes `a|b` (flags) or `a` (enum) to an integer value. Every name
    /// must be known.
    pub fn encode_symbols(&self, text: &str) -> Option<ValueItem> {
        if !self.is_enum() && !self.is_flag() {
            return None;
        }
        let mut data = 0u32;
        let mut found = false;
        for name in text
            .split(|c: char| c == '|' || c.is_whitespace())
            .filter(|name| !name.is_empty())
        {
            data |= self.symbol(name)?.value;
            found = true;
        }
        if !found {
            return None;
        }
        let value_type = if self.is_flag() {
            ValueType::IntHex
        } else {
            ValueType::IntDec
        };
        Some(ValueItem::typed(value_type, data))
    }

    /// Symbols naming `data`. Enums need an exact match. Flags prefer an
    /// exact match, then a greedy cover of the set bits by the widest
    /// non-overlapping flags; a partial cover yields `None`.
    pub fn decode_value(&self, data: u32) -> Option<Vec<&AttributeSymbol>> {
        if let Some(exact) = self.symbols.iter().find(|symbol| symbol.value == data) {
            return Some(vec![exact]);
        }
        if !self.is_flag() || data == 0 {
            return None;
        }
        let mut candidates: Vec<&AttributeSymbol> = self
            .symbols
            .iter()
            .filter(|symbol| symbol.value != 0 && symbol.value & data == symbol.value)
            .collect();
        candidates.sort_by(|a, b| {
            b.value
                .count_ones()
                .cmp(&a.value.count_ones())
                .then(b.value.cmp(&a.value))
        });
        let mut covered = 0u32;
        let mut picked = Vec::new();
        for symbol in candidates {
            if symbol.value & covered == 0 {
                covered |= symbol.value;
                picked.push(symbol);
            }
        }
        if covered == data {
            Some(picked)
        } else {
            None
        }
    }

    /// `a|b` text for `data`, when every bit has a name.
    pub fn decode_value_text(&self, data: u32) -> Option<String> {
        let symbols = self.decode_value(data)?;
        let names: Option<Vec<&str>> = symbols
            .iter()
            .map(|symbol| symbol.name.as_deref())
            .collect();
        Some(names?.join("|"))
    }

    pub fn to_bag(&self, type_name: &str) -> Bag {
        let mut items = vec![BagEntry::new(
            ATTR_TYPE,
            ValueItem::typed(ValueType::IntDec, self.format.bits()),
        )];
        if let Some(min) = self.min {
            items.push(BagEntry::new(ATTR_MIN, ValueItem::typed(ValueType::IntDec, min as u32)));
        }
        if let Some(max) = self.max {
            items.push(BagEntry::new(ATTR_MAX, ValueItem::typed(ValueType::IntDec, max as u32)));
        }
        if let Some(l10n) = self.l10n {
            items.push(BagEntry::new(ATTR_L10N, ValueItem::typed(ValueType::IntDec, l10n)));
        }
        let symbol_type = if self.is_flag() {
            ValueType::IntHex
        } else {
            ValueType::IntDec
        };
        for symbol in &self.symbols {
            items.push(BagEntry::new(symbol.id, ValueItem::typed(symbol_type, symbol.value)));
        }
        Bag {
            type_name: type_name.to_string(),
            parent: 0,
            items,
        }
    }

    pub fn write_xml<W: Write>(&self, writer: &mut Writer<W>, name: &str) -> ArscResult<()> {
        let mut start = BytesStart::new("attr");
        start.push_attribute(("name", name));
        let formats = self.format.names();
        if !formats.is_empty() {
            start.push_attribute(("format", formats.as_str()));
        }
        let min = self.min.map(|min| min.to_string());
        if let Some(min) = min.as_deref() {
            start.push_attribute(("min", min));
        }
        let max = self.max.map(|max| max.to_string());
        if let Some(max) = max.as_deref() {
            start.push_attribute(("max", max));
        }
        if self.symbols.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        let child = if self.is_flag() { "flag" } else { "enum" };
        for symbol in &self.symbols {
            let symbol_name = symbol
                .name
                .clone()
                .unwrap_or_else(|| format!("@0x{:08x}", symbol.id));
            let value = if self.is_flag() {
                format!("0x{:08x}", symbol.value)
            } else {
                (symbol.value as i32).to_string()
            };
            let mut element = BytesStart::new(child);
            element.push_attribute(("name", symbol_name.as_str()));
            element.push_attribute(("value", value.as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        writer.write_event(Event::End(BytesEnd::new("attr")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(symbols: &[(&str, u32)]) -> AttributeBag {
        let mut attribute = AttributeBag::new(AttributeFormat::FLAGS);
        for (index, (name, value)) in symbols.iter().enumerate() {
            attribute.symbols.push(AttributeSymbol {
                id: 0x7f0a0000 + index as u32,
                name: Some(name.to_string()),
                value: *value,
            });
        }
        attribute
    }

    #[test]
    fn exact_flag_match_wins() {
        let attribute = flags(&[("A", 0x1), ("B", 0x2), ("AB", 0x3)]);
        assert_eq!(attribute.decode_value_text(0x3).as_deref(), Some("AB"));
    }

    #[test]
    fn greedy_cover_uses_widest_flags() {
        let attribute = flags(&[("top", 0x30), ("bottom", 0x50), ("center", 0x11), ("left", 0x3)]);
        assert_eq!(attribute.decode_value_text(0x33).as_deref(), Some("top|left"));
        assert_eq!(attribute.decode_value_text(0x80), None);
    }

    #[test]
    fn zero_value_needs_a_zero_flag() {
        let mut attribute = flags(&[("one", 0x1)]);
        assert_eq!(attribute.decode_value(0), None);
        attribute.symbols.push(AttributeSymbol {
            id: 0x7f0a0100,
            name: Some("none".to_string()),
            value: 0,
        });
        assert_eq!(attribute.decode_value_text(0).as_deref(), Some("none"));
    }

    #[test]
    fn encodes_flag_combinations_as_hex() {
        let attribute = flags(&[("A", 0x1), ("B", 0x4)]);
        let value = attribute.encode_symbols("A | B").unwrap();
        assert_eq!(value.value_type, ValueType::IntHex);
        assert_eq!(value.data, 0x5);
        assert_eq!(attribute.encode_symbols("A|C"), None);
    }

    #[test]
    fn format_names_round_trip() {
        let format = AttributeFormat::parse("reference|color").unwrap();
        assert_eq!(format, AttributeFormat::REFERENCE | AttributeFormat::COLOR);
        assert_eq!(format.names(), "reference|color");
        assert_eq!(AttributeFormat::parse("bogus"), None);
    }

    #[test]
    fn bag_round_trip_keeps_facets() {
        let mut attribute = AttributeBag::new(AttributeFormat::INTEGER | AttributeFormat::ENUM);
        attribute.min = Some(-1);
        attribute.symbols.push(AttributeSymbol {
            id: 0x7f0a0001,
            name: None,
            value: 2,
        });
        let decoded = AttributeBag::decode(&attribute.to_bag("attr")).unwrap();
        assert_eq!(decoded, attribute);
    }
}
