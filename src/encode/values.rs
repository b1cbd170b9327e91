use std::collections::{BTreeMap, HashMap};

use log::{debug, error, info};
use once_cell::sync::Lazy;

use crate::block::error::{ArscError, ArscResult};
use crate::encode::parse::{self, Unescaper};
use crate::encode::{EncodeContext, NamedReference};
use crate::table::{EntryContent, ResConfig, TableBlock};
use crate::value::attribute::AttributeSymbol;
use crate::value::{
    ArrayBag, AttributeBag, AttributeFormat, Bag, BagEntry, PluralQuantity, PluralsBag,
    StyleBag, ValueItem, ValueType,
};
use crate::xml::{XmlContent, XmlDocument, XmlElement};

/// How a child of `<resources>` is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValuesTag {
    /// A simple value of the given type.
    Simple(&'static str),
    /// `<item type="..">`.
    Item,
    Array(ArrayKind),
    Plurals,
    Style,
    Attr,
    Styleable,
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayKind {
    String,
    Integer,
    Any,
}

static VALUES_TAGS: Lazy<HashMap<&'static str, ValuesTag>> = Lazy::new(|| {
    HashMap::from([
        ("string", ValuesTag::Simple("string")),
        ("dimen", ValuesTag::Simple("dimen")),
        ("integer", ValuesTag::Simple("integer")),
        ("bool", ValuesTag::Simple("bool")),
        ("color", ValuesTag::Simple("color")),
        ("fraction", ValuesTag::Simple("fraction")),
        ("drawable", ValuesTag::Simple("drawable")),
        ("id", ValuesTag::Simple("id")),
        ("item", ValuesTag::Item),
        ("string-array", ValuesTag::Array(ArrayKind::String)),
        ("integer-array", ValuesTag::Array(ArrayKind::Integer)),
        ("array", ValuesTag::Array(ArrayKind::Any)),
        ("plurals", ValuesTag::Plurals),
        ("style", ValuesTag::Style),
        ("attr", ValuesTag::Attr),
        ("declare-styleable", ValuesTag::Styleable),
        ("public", ValuesTag::Ignored),
        ("eat-comment", ValuesTag::Ignored),
        ("skip", ValuesTag::Ignored),
    ])
});

/// Encodes `<resources>` documents of one configuration into the package
/// of its context.
pub struct ValuesEncoder<'c, 'a> {
    context: &'c mut EncodeContext<'a>,
    config: ResConfig,
}

/// One resource declared by a `values` document.
struct Declaration<'x> {
    tag: ValuesTag,
    type_name: String,
    name: String,
    element: &'x XmlElement,
}

impl<'c, 'a> ValuesEncoder<'c, 'a> {
    pub fn new(context: &'c mut EncodeContext<'a>, config: ResConfig) -> Self {
        ValuesEncoder { context, config }
    }

    /// Encoder for the configuration named by a `values-…` qualifier suffix.
    pub fn for_qualifiers(context: &'c mut EncodeContext<'a>, qualifiers: &str) -> ArscResult<Self> {
        Ok(ValuesEncoder::new(context, ResConfig::parse_qualifiers(qualifiers)?))
    }

    pub fn encode_str(&mut self, table: &mut TableBlock, xml: &str) -> ArscResult<usize> {
        self.encode(table, &XmlDocument::from_string(xml)?)
    }

    /// Encodes every resource of `document` and returns how many entries
    /// were written. Names are given ids before any value is encoded, so
    /// values may refer to resources declared later in the document.
    pub fn encode(&mut self, table: &mut TableBlock, document: &XmlDocument) -> ArscResult<usize> {
        if document.root.name != "resources" {
            return Err(ArscError::invalid("values root", document.root.name.as_str()));
        }
        self.context.prepare_package(table)?;
        let declarations = declarations(&document.root)?;
        for declaration in &declarations {
            self.context
                .get_or_create_id(table, &declaration.type_name, &declaration.name);
        }
        for declaration in &declarations {
            if let Err(err) = self.encode_declaration(table, declaration) {
                error!(
                    "line {}: can not encode {}/{}: {}",
                    declaration.element.line, declaration.type_name, declaration.name, err
                );
                return Err(err);
            }
        }
        self.context.apply_public_flags(table);
        if self.context.options.compact_strings {
            table.remove_unused_strings();
        }
        info!(
            "encoded {} resources for config '{}'",
            declarations.len(),
            self.config
        );
        Ok(declarations.len())
    }

    fn encode_declaration(&mut self, table: &mut TableBlock, declaration: &Declaration<'_>) -> ArscResult<()> {
        let element = declaration.element;
        let content = match declaration.tag {
            ValuesTag::Simple(_) | ValuesTag::Item => {
                EntryContent::Value(self.encode_simple(table, &declaration.type_name, element)?)
            }
            ValuesTag::Array(kind) => EntryContent::Bag(self.encode_array(table, kind, element)?),
            ValuesTag::Plurals => EntryContent::Bag(self.encode_plurals(table, element)?),
            ValuesTag::Style => {
                EntryContent::Bag(self.encode_style(table, &declaration.name, element)?)
            }
            ValuesTag::Attr => EntryContent::Bag(self.encode_attr(table, element)?),
            ValuesTag::Styleable | ValuesTag::Ignored => return Ok(()),
        };
        let resource_id = self
            .context
            .get_or_create_id(table, &declaration.type_name, &declaration.name);
        debug!(
            "0x{:08x} {}/{}",
            resource_id, declaration.type_name, declaration.name
        );
        table.put_entry(resource_id, &self.config, &declaration.name, &content)
    }

    fn encode_simple(&mut self, table: &mut TableBlock, type_name: &str, element: &XmlElement) -> ArscResult<ValueItem> {
        let raw = element.text();
        let text = raw.trim();
        if !element.has_child_elements() && parse::is_reference(text) {
            return self.context.resolve_reference(table, text);
        }
        let typed = match type_name {
            "string" => return Ok(encode_styled(element)),
            "id" if text.is_empty() => Some(ValueItem::typed(ValueType::IntBoolean, 0)),
            "dimen" => parse::encode_dimension_or_float(text).or_else(|| parse::encode_hex_or_int(text)),
            "integer" => parse::encode_hex_or_int(text),
            "bool" => parse::encode_boolean(text),
            "color" => parse::encode_color(text),
            "fraction" => parse::encode_fraction(text),
            _ => return self.context.encode_value(table, &raw),
        };
        typed.ok_or_else(|| ArscError::InvalidValue {
            kind: value_kind(type_name),
            value: text.to_string(),
        })
    }

    /// Items are named `{high = 0x0100, low = index + 1}` in document order.
    fn encode_array(&mut self, table: &mut TableBlock, kind: ArrayKind, element: &XmlElement) -> ArscResult<Bag> {
        let mut items = Vec::new();
        for item in element.child_elements().filter(|child| child.name == "item") {
            let raw = item.text();
            let text = raw.trim();
            let value = if !item.has_child_elements() && parse::is_reference(text) {
                self.context.resolve_reference(table, text)?
            } else if text.is_empty() && !item.has_child_elements() {
                ValueItem::typed(ValueType::Null, 0)
            } else {
                match kind {
                    ArrayKind::String => encode_styled(item),
                    ArrayKind::Integer => parse::encode_hex_or_int(text)
                        .ok_or_else(|| ArscError::invalid("integer", text))?,
                    ArrayKind::Any => {
                        parse::encode_guess(text).unwrap_or_else(|| encode_styled(item))
                    }
                }
            };
            items.push(value);
        }
        Ok(ArrayBag::new(items).to_bag("array"))
    }

    fn encode_plurals(&mut self, table: &mut TableBlock, element: &XmlElement) -> ArscResult<Bag> {
        let mut items = BTreeMap::new();
        for item in element.child_elements().filter(|child| child.name == "item") {
            let quantity = item.attribute("quantity").unwrap_or_default();
            let quantity = PluralQuantity::from_name(quantity)
                .ok_or_else(|| ArscError::invalid("quantity", quantity))?;
            let text = item.text();
            let value = if !item.has_child_elements() && parse::is_reference(text.trim()) {
                self.context.resolve_reference(table, text.trim())?
            } else {
                encode_styled(item)
            };
            items.insert(quantity, value);
        }
        Ok(PluralsBag { items }.to_bag("plurals"))
    }

    fn encode_style(&mut self, table: &mut TableBlock, name: &str, element: &XmlElement) -> ArscResult<Bag> {
        let parent = match element.attribute("parent").map(str::trim) {
            Some("") => 0,
            Some(parent) if parent.starts_with('@') || parent.starts_with('?') => {
                self.context.resolve_reference(table, parent)?.data
            }
            Some(parent) => {
                let reference = format!("@style/{}", parent);
                self.context.resolve_reference(table, &reference)?.data
            }
            None => implicit_parent(name)
                .and_then(|parent| self.context.local_id(table, "style", parent))
                .unwrap_or(0),
        };
        let mut items = Vec::new();
        for item in element.child_elements().filter(|child| child.name == "item") {
            let attribute_name = item
                .attribute("name")
                .ok_or_else(|| ArscError::invalid("style item", format!("line {} has no name", item.line)))?;
            let attribute_id = self.attribute_id(table, attribute_name)?;
            let value = if item.has_child_elements() {
                encode_styled(item)
            } else {
                self.context
                    .encode_attribute_value(table, attribute_id, &item.text())?
            };
            items.push(BagEntry::new(attribute_id, value));
        }
        Ok(StyleBag { parent, items }.to_bag("style"))
    }

    /// Id of a style item name: `[package:]name`, `@0x…` or a full
    /// reference. Unknown attributes of this package are allocated.
    fn attribute_id(&mut self, table: &mut TableBlock, name: &str) -> ArscResult<u32> {
        let name = name.trim();
        if name.starts_with('@') || name.starts_with('?') {
            return Ok(self.context.resolve_reference(table, name)?.data);
        }
        let (package, local) = match name.split_once(':') {
            Some((package, local)) => (Some(package.to_string()), local),
            None => (None, name),
        };
        let own = package
            .as_deref()
            .map_or(true, |package| package == self.context.package_name());
        if own {
            return Ok(self.context.get_or_create_id(table, "attr", local));
        }
        let reference = NamedReference {
            attribute: true,
            create: false,
            private: false,
            package,
            type_name: "attr".to_string(),
            name: local.to_string(),
        };
        self.context
            .resolve_name(table, &reference)
            .ok_or_else(|| ArscError::UnresolvedReference(name.to_string()))
    }

    /// Format, bounds and symbols. Each symbol is also an `id` entry.
    fn encode_attr(&mut self, table: &mut TableBlock, element: &XmlElement) -> ArscResult<Bag> {
        let mut format = match element.attribute("format") {
            Some(text) => AttributeFormat::parse(text).ok_or_else(|| ArscError::invalid("format", text))?,
            None => AttributeFormat::empty(),
        };
        let mut attribute = AttributeBag::new(AttributeFormat::empty());
        attribute.min = parse_bound(element, "min")?;
        attribute.max = parse_bound(element, "max")?;
        for child in element.child_elements() {
            let flag = match child.name.as_str() {
                "enum" => AttributeFormat::ENUM,
                "flag" => AttributeFormat::FLAGS,
                _ => continue,
            };
            format |= flag;
            let name = child
                .attribute("name")
                .ok_or_else(|| ArscError::invalid(flag_kind(flag), format!("line {} has no name", child.line)))?;
            let text = child.attribute("value").unwrap_or_default();
            let value = parse::encode_hex_or_int(text)
                .ok_or_else(|| ArscError::invalid(flag_kind(flag), text))?
                .data;
            let id = self.context.ensure_id(table, name)?;
            attribute.symbols.push(AttributeSymbol {
                id,
                name: Some(name.to_string()),
                value,
            });
        }
        attribute.format = if format.is_empty() {
            AttributeFormat::ANY
        } else {
            format
        };
        Ok(attribute.to_bag("attr"))
    }
}

fn flag_kind(flag: AttributeFormat) -> &'static str {
    if flag == AttributeFormat::FLAGS {
        "flag"
    } else {
        "enum"
    }
}

fn value_kind(type_name: &str) -> &'static str {
    match type_name {
        "dimen" => "dimen",
        "integer" => "integer",
        "bool" => "bool",
        "color" => "color",
        "fraction" => "fraction",
        "id" => "id",
        _ => "value",
    }
}

fn parse_bound(element: &XmlElement, name: &'static str) -> ArscResult<Option<i32>> {
    match element.attribute(name) {
        None => Ok(None),
        Some(text) => parse::encode_hex_or_int(text)
            .map(|item| Some(item.data as i32))
            .ok_or_else(|| ArscError::invalid(name, text)),
    }
}

/// `Theme.Dark.Blue` inherits from `Theme.Dark`.
fn implicit_parent(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(parent, _)| parent)
}

/// Lists the resources of a `<resources>` element in document order.
/// Attributes defined inside `declare-styleable` count as top-level `attr`s.
fn declarations(root: &XmlElement) -> ArscResult<Vec<Declaration<'_>>> {
    let mut declarations = Vec::new();
    for element in root.child_elements() {
        let tag = match VALUES_TAGS.get(element.name.as_str()) {
            Some(tag) => *tag,
            None => {
                return Err(ArscError::invalid(
                    "values tag",
                    format!("<{}> at line {}", element.name, element.line),
                ))
            }
        };
        match tag {
            ValuesTag::Ignored => continue,
            ValuesTag::Styleable => {
                for attr in element.child_elements().filter(|child| child.name == "attr") {
                    if attr.attribute("format").is_none() && !attr.has_child_elements() {
                        continue;
                    }
                    declarations.push(Declaration {
                        tag: ValuesTag::Attr,
                        type_name: "attr".to_string(),
                        name: required_name(attr)?,
                        element: attr,
                    });
                }
                continue;
            }
            _ => {}
        }
        let type_name = match tag {
            ValuesTag::Simple(type_name) => type_name.to_string(),
            ValuesTag::Item => element
                .attribute("type")
                .ok_or_else(|| ArscError::invalid("item", format!("line {} has no type", element.line)))?
                .to_string(),
            ValuesTag::Array(_) => "array".to_string(),
            ValuesTag::Plurals => "plurals".to_string(),
            ValuesTag::Style => "style".to_string(),
            _ => "attr".to_string(),
        };
        declarations.push(Declaration {
            tag,
            type_name,
            name: required_name(element)?,
            element,
        });
    }
    Ok(declarations)
}

fn required_name(element: &XmlElement) -> ArscResult<String> {
    element
        .attribute("name")
        .map(str::to_string)
        .ok_or_else(|| ArscError::invalid("name", format!("<{}> at line {}", element.name, element.line)))
}

/// String value of an element whose children may be style tags. Each tag
/// becomes a span over the text it encloses; attributes are kept as
/// `tag;name=value`.
fn encode_styled(element: &XmlElement) -> ValueItem {
    let mut unescaper = Unescaper::new();
    let mut spans = Vec::new();
    collect_styled(element, &mut unescaper, &mut spans);
    let mut item = ValueItem::string(unescaper.finish());
    item.spans = spans
        .into_iter()
        .filter_map(|span: Option<(String, u32, u32)>| span)
        .collect();
    item
}

fn collect_styled(
    element: &XmlElement,
    unescaper: &mut Unescaper,
    spans: &mut Vec<Option<(String, u32, u32)>>,
) {
    for child in &element.children {
        match child {
            XmlContent::Text(text) => unescaper.push(text),
            XmlContent::Element(tag) => {
                unescaper.flush_space();
                let first = unescaper.utf16_len();
                let slot = spans.len();
                spans.push(None);
                collect_styled(tag, unescaper, spans);
                let end = unescaper.utf16_len();
                if end > first {
                    spans[slot] = Some((span_name(tag), first, end - 1));
                }
            }
        }
    }
}

fn span_name(tag: &XmlElement) -> String {
    let mut name = tag.name.clone();
    for attribute in &tag.attributes {
        name.push(';');
        name.push_str(&attribute.name);
        name.push('=');
        name.push_str(&attribute.value);
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{BagKind, EmptyStore};

    const VALUES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <string name="app_name">Demo</string>
    <string name="greeting">Hello <b>World</b>!</string>
    <string name="alias">@string/app_name</string>
    <dimen name="margin">16dp</dimen>
    <integer name="retries">0x10</integer>
    <bool name="enabled">true</bool>
    <color name="accent">#ff0000</color>
    <item type="id" name="toolbar"/>
    <string-array name="sizes">
        <item>small</item>
        <item>@string/app_name</item>
        <item>large</item>
    </string-array>
    <integer-array name="steps">
        <item>1</item>
        <item>2</item>
    </integer-array>
    <plurals name="songs">
        <item quantity="other">%d songs</item>
        <item quantity="one">One song</item>
    </plurals>
    <attr name="tint" format="color|reference"/>
    <attr name="mode">
        <enum name="fast" value="1"/>
        <enum name="slow" value="2"/>
    </attr>
    <style name="Base">
        <item name="tint">#00ff00</item>
    </style>
    <style name="Base.Child">
        <item name="mode">slow</item>
    </style>
</resources>"#;

    fn encoded() -> (EncodeContext<'static>, TableBlock) {
        let mut context = EncodeContext::new(0x7f, "com.example");
        let mut table = TableBlock::new();
        let count = ValuesEncoder::new(&mut context, ResConfig::default())
            .encode_str(&mut table, VALUES)
            .unwrap();
        assert_eq!(count, 15);
        (context, table)
    }

    fn lookup(context: &EncodeContext<'_>, table: &TableBlock, type_name: &str, name: &str) -> u32 {
        context.local_id(table, type_name, name).unwrap()
    }

    #[test]
    fn simple_values_are_typed() {
        let (context, table) = encoded();
        let config = ResConfig::default();
        let value = |type_name: &str, name: &str| {
            table
                .value(lookup(&context, &table, type_name, name), &config)
                .unwrap()
        };
        assert_eq!(value("string", "app_name").text.as_deref(), Some("Demo"));
        assert_eq!(
            value("string", "alias"),
            ValueItem::reference(lookup(&context, &table, "string", "app_name"))
        );
        assert_eq!(value("dimen", "margin"), ValueItem::typed(ValueType::Dimension, 0x1001));
        assert_eq!(value("integer", "retries"), ValueItem::typed(ValueType::IntHex, 0x10));
        assert_eq!(value("bool", "enabled").data, 0xFFFF_FFFF);
        assert_eq!(value("color", "accent"), ValueItem::typed(ValueType::IntColorRgb8, 0xFFFF_0000));
        assert_eq!(value("id", "toolbar"), ValueItem::typed(ValueType::IntBoolean, 0));
    }

    #[test]
    fn styled_string_gets_a_span() {
        let (context, table) = encoded();
        let resource_id = lookup(&context, &table, "string", "greeting");
        let item = table.value(resource_id, &ResConfig::default()).unwrap();
        assert_eq!(item.text.as_deref(), Some("Hello World!"));
        assert_eq!(item.spans, vec![("b".to_string(), 6, 10)]);
    }

    #[test]
    fn string_array_items_are_numbered_in_order() {
        let (context, table) = encoded();
        let resource_id = lookup(&context, &table, "array", "sizes");
        let entry = table.get_entry(resource_id, &ResConfig::default()).unwrap();
        let bag = entry.to_bag(table.pool(), "array").unwrap();
        let names: Vec<u32> = bag.items.iter().map(|item| item.name).collect();
        assert_eq!(names, vec![0x0100_0001, 0x0100_0002, 0x0100_0003]);
        match bag.classify() {
            BagKind::Array(array) => {
                assert_eq!(array.items[0].text.as_deref(), Some("small"));
                assert_eq!(array.items[1].value_type, ValueType::Reference);
                assert_eq!(array.items[2].text.as_deref(), Some("large"));
            }
            other => panic!("not an array: {:?}", other),
        }
    }

    #[test]
    fn plurals_and_attributes_decode_back() {
        let (context, table) = encoded();
        let plurals = lookup(&context, &table, "plurals", "songs");
        let bag = table
            .get_entry(plurals, &ResConfig::default())
            .unwrap()
            .to_bag(table.pool(), "plurals")
            .unwrap();
        match bag.classify() {
            BagKind::Plurals(plurals) => {
                assert_eq!(
                    plurals.quantities(),
                    vec![PluralQuantity::One, PluralQuantity::Other]
                );
            }
            other => panic!("not plurals: {:?}", other),
        }

        let mode = lookup(&context, &table, "attr", "mode");
        let attribute = crate::value::EntryStore::attribute_bag(&table, mode).unwrap();
        assert!(attribute.is_enum());
        assert_eq!(attribute.symbol("slow").map(|symbol| symbol.value), Some(2));
        assert!(table.entry_group(attribute.symbols[0].id).is_some());
    }

    #[test]
    fn style_inherits_from_dotted_prefix_and_encodes_enum_names() {
        let (context, table) = encoded();
        let base = lookup(&context, &table, "style", "Base");
        let child = lookup(&context, &table, "style", "Base.Child");
        let mode = lookup(&context, &table, "attr", "mode");
        let bag = table
            .get_entry(child, &ResConfig::default())
            .unwrap()
            .to_bag(table.pool(), "style")
            .unwrap();
        match bag.classify() {
            BagKind::Style(style) => {
                assert_eq!(style.parent, base);
                assert_eq!(style.get(mode), Some(&ValueItem::typed(ValueType::IntDec, 2)));
            }
            other => panic!("not a style: {:?}", other),
        }
        let xml = table
            .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
            .unwrap();
        assert!(xml.contains("<style name=\"Base.Child\" parent=\"@style/Base\">"));
    }

    #[test]
    fn bad_typed_value_names_the_kind() {
        let mut context = EncodeContext::new(0x7f, "com.example");
        let mut table = TableBlock::new();
        let result = ValuesEncoder::new(&mut context, ResConfig::default()).encode_str(
            &mut table,
            "<resources><dimen name=\"gap\">wide</dimen></resources>",
        );
        assert!(matches!(
            result,
            Err(ArscError::InvalidValue { kind: "dimen", .. })
        ));
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let mut context = EncodeContext::new(0x7f, "com.example");
        let mut table = TableBlock::new();
        let result = ValuesEncoder::new(&mut context, ResConfig::default()).encode_str(
            &mut table,
            "<resources><string name=\"x\">@string/nowhere</string></resources>",
        );
        assert!(matches!(result, Err(ArscError::UnresolvedReference(_))));
    }
}
