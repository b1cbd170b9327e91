//! Typed `Res_value` handling, textual rendering and the bag decoders.

pub mod array;
pub mod attribute;
pub mod plurals;
pub mod style;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::error::ArscResult;
use crate::block::reader::BlockReader;
use crate::block::{Block, Segment};
use crate::pool::{StringHolder, StringPool, StringRef};

pub use array::ArrayBag;
pub use attribute::{AttributeBag, AttributeFormat};
pub use plurals::{PluralQuantity, PluralsBag};
pub use style::StyleBag;

/// `Res_value` data types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Reference,
    Attribute,
    String,
    Float,
    Dimension,
    Fraction,
    DynamicReference,
    DynamicAttribute,
    IntDec,
    IntHex,
    IntBoolean,
    IntColorArgb8,
    IntColorRgb8,
    IntColorArgb4,
    IntColorRgb4,
    Unknown(u8),
}

impl ValueType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => ValueType::Null,
            0x01 => ValueType::Reference,
            0x02 => ValueType::Attribute,
            0x03 => ValueType::String,
            0x04 => ValueType::Float,
            0x05 => ValueType::Dimension,
            0x06 => ValueType::Fraction,
            0x07 => ValueType::DynamicReference,
            0x08 => ValueType::DynamicAttribute,
            0x10 => ValueType::IntDec,
            0x11 => ValueType::IntHex,
            0x12 => ValueType::IntBoolean,
            0x1c => ValueType::IntColorArgb8,
            0x1d => ValueType::IntColorRgb8,
            0x1e => ValueType::IntColorArgb4,
            0x1f => ValueType::IntColorRgb4,
            other => ValueType::Unknown(other),
        }
    }

    pub fn value(self) -> u8 {
        match self {
            ValueType::Null => 0x00,
            ValueType::Reference => 0x01,
            ValueType::Attribute => 0x02,
            ValueType::String => 0x03,
            ValueType::Float => 0x04,
            ValueType::Dimension => 0x05,
            ValueType::Fraction => 0x06,
            ValueType::DynamicReference => 0x07,
            ValueType::DynamicAttribute => 0x08,
            ValueType::IntDec => 0x10,
            ValueType::IntHex => 0x11,
            ValueType::IntBoolean => 0x12,
            ValueType::IntColorArgb8 => 0x1c,
            ValueType::IntColorRgb8 => 0x1d,
            ValueType::IntColorArgb4 => 0x1e,
            ValueType::IntColorRgb4 => 0x1f,
            ValueType::Unknown(value) => value,
        }
    }

    pub fn is_reference(self) -> bool {
        matches!(
            self,
            ValueType::Reference
                | ValueType::Attribute
                | ValueType::DynamicReference
                | ValueType::DynamicAttribute
        )
    }

    pub fn is_color(self) -> bool {
        matches!(
            self,
            ValueType::IntColorArgb8
                | ValueType::IntColorRgb8
                | ValueType::IntColorArgb4
                | ValueType::IntColorRgb4
        )
    }
}

/// Binary `Res_value`: `{size u16 = 8, res0 u8, type u8, data u32}`.
///
/// For [`ValueType::String`] the data word is a linked reference into the
/// owning tree's string pool. For every other type it is a plain payload and
/// never registered with a pool.
#[derive(Debug, PartialEq, Eq)]
pub struct ResValue {
    value_type: ValueType,
    data: StringRef,
}

impl ResValue {
    pub const SIZE: usize = 8;

    pub fn null() -> Self {
        ResValue {
            value_type: ValueType::Null,
            data: StringRef::new(0),
        }
    }

    /// Unlinked value; string values must be linked by the owner.
    pub fn new(value_type: ValueType, data: u32) -> Self {
        ResValue {
            value_type,
            data: StringRef::new(data),
        }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let start = reader.position();
        let size = reader.read_u16()? as usize;
        reader.read_u8()?;
        let value_type = ValueType::from_u8(reader.read_u8()?);
        let data = reader.read_u32()?;
        if size < Self::SIZE {
            fail!("Res_value at 0x{:x} declares size {}", start, size);
        }
        if size > Self::SIZE {
            reader.seek(start + size)?;
        }
        Ok(ResValue::new(value_type, data))
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn data(&self) -> u32 {
        self.data.index()
    }

    pub fn is_string(&self) -> bool {
        self.value_type == ValueType::String
    }

    /// Sets type and data, keeping pool holders in step. For
    /// [`ValueType::String`] `data` is a pool index.
    pub fn set(&mut self, pool: &mut StringPool, value_type: ValueType, data: u32) {
        if self.is_string() {
            pool.unlink(&mut self.data);
        }
        self.value_type = value_type;
        self.data = StringRef::new(data);
        if self.is_string() {
            pool.link(&mut self.data);
        }
    }

    pub fn set_string(&mut self, pool: &mut StringPool, text: &str) {
        let index = pool.get_or_create(text);
        self.set(pool, ValueType::String, index);
    }

    /// Releases a string value's pool holder before the value is dropped.
    pub fn release(&mut self, pool: &mut StringPool) {
        if self.is_string() {
            pool.unlink(&mut self.data);
        }
    }

    /// Writes an unstyled value item through `pool`.
    pub fn assign(&mut self, pool: &mut StringPool, item: &ValueItem) {
        match (&item.text, item.value_type) {
            (Some(text), ValueType::String) => self.set_string(pool, text),
            _ => self.set(pool, item.value_type, item.data),
        }
    }

    pub fn to_item(&self, pool: &StringPool) -> ValueItem {
        if self.is_string() {
            let index = self.data();
            return ValueItem {
                value_type: ValueType::String,
                data: index,
                text: pool.get(index).map(str::to_string),
                spans: pool.style(index),
            };
        }
        ValueItem::typed(self.value_type, self.data())
    }
}

impl StringHolder for ResValue {
    fn visit_string_refs(&mut self, visit: &mut dyn FnMut(&mut StringRef)) {
        if self.is_string() {
            visit(&mut self.data);
        }
    }
}

impl Block for ResValue {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![
            Segment::U16(Self::SIZE as u16),
            Segment::U8(0),
            Segment::U8(self.value_type.value()),
            Segment::U32(self.data()),
        ]
    }
}

/// A pool-independent value: what decoders produce and encoders consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueItem {
    pub value_type: ValueType,
    pub data: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<(String, u32, u32)>,
}

impl ValueItem {
    pub fn typed(value_type: ValueType, data: u32) -> Self {
        ValueItem {
            value_type,
            data,
            text: None,
            spans: Vec::new(),
        }
    }

    pub fn string(text: impl Into<String>) -> Self {
        ValueItem {
            value_type: ValueType::String,
            data: 0,
            text: Some(text.into()),
            spans: Vec::new(),
        }
    }

    pub fn reference(resource_id: u32) -> Self {
        ValueItem::typed(ValueType::Reference, resource_id)
    }

    pub fn null() -> Self {
        ValueItem::typed(ValueType::Null, 0)
    }

    /// `@empty`: a null value with data 1.
    pub fn empty() -> Self {
        ValueItem::typed(ValueType::Null, 1)
    }

    pub fn is_string(&self) -> bool {
        self.value_type == ValueType::String
    }

    /// Renders the value the way it is written in `values/*.xml`.
    pub fn to_text(&self, store: &dyn EntryStore, package_id: u8) -> String {
        match self.value_type {
            ValueType::Null => {
                if self.data == 1 {
                    "@empty".to_string()
                } else {
                    "@null".to_string()
                }
            }
            ValueType::Reference | ValueType::DynamicReference => {
                reference_text('@', self.data, store, package_id)
            }
            ValueType::Attribute | ValueType::DynamicAttribute => {
                reference_text('?', self.data, store, package_id)
            }
            ValueType::String => self.text.clone().unwrap_or_default(),
            _ => format_typed(self.value_type, self.data).unwrap_or_else(|| format!("0x{:08x}", self.data)),
        }
    }
}

fn reference_text(prefix: char, resource_id: u32, store: &dyn EntryStore, package_id: u8) -> String {
    if resource_id == 0 {
        return format!("{}null", prefix);
    }
    match store.resource_name(resource_id) {
        Some(name) => name.reference(prefix, package_id),
        None => format!("{}0x{:08x}", prefix, resource_id),
    }
}

/// Textual form of the scalar value types, `None` for the others.
pub fn format_typed(value_type: ValueType, data: u32) -> Option<String> {
    let text = match value_type {
        ValueType::Float => format_float(f32::from_bits(data)),
        ValueType::Dimension => format!(
            "{}{}",
            format_float(complex_to_float(data)),
            dimension_unit(data & COMPLEX_UNIT_MASK)?
        ),
        ValueType::Fraction => format!(
            "{}{}",
            format_float(complex_to_float(data) * 100.0),
            fraction_unit(data & COMPLEX_UNIT_MASK)?
        ),
        ValueType::IntDec => (data as i32).to_string(),
        ValueType::IntHex => format!("0x{:08x}", data),
        ValueType::IntBoolean => (data != 0).to_string(),
        ValueType::IntColorArgb8 => format!("#{:08x}", data),
        ValueType::IntColorRgb8 => format!("#{:06x}", data & 0x00FF_FFFF),
        ValueType::IntColorArgb4 => format!(
            "#{:x}{:x}{:x}{:x}",
            (data >> 28) & 0xF,
            (data >> 20) & 0xF,
            (data >> 12) & 0xF,
            (data >> 4) & 0xF
        ),
        ValueType::IntColorRgb4 => format!(
            "#{:x}{:x}{:x}",
            (data >> 20) & 0xF,
            (data >> 12) & 0xF,
            (data >> 4) & 0xF
        ),
        _ => return None,
    };
    Some(text)
}

/// Shortest decimal form that always carries a fractional part.
pub fn format_float(value: f32) -> String {
    let text = format!("{}", value);
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

pub const COMPLEX_UNIT_MASK: u32 = 0xF;
const COMPLEX_RADIX_SHIFT: u32 = 4;
const COMPLEX_RADIX_MASK: u32 = 0x3;
const COMPLEX_MANTISSA_SHIFT: u32 = 8;
const COMPLEX_MANTISSA_MASK: u32 = 0x00FF_FFFF;

const RADIX_23P0: u32 = 0;
const RADIX_16P7: u32 = 1;
const RADIX_8P15: u32 = 2;
const RADIX_0P23: u32 = 3;

const MANTISSA_MULT: f32 = 1.0 / (1 << COMPLEX_MANTISSA_SHIFT) as f32;
const RADIX_MULTS: [f32; 4] = [
    MANTISSA_MULT,
    MANTISSA_MULT / (1 << 7) as f32,
    MANTISSA_MULT / (1 << 15) as f32,
    MANTISSA_MULT / (1 << 23) as f32,
];

pub const DIMENSION_UNITS: [(&str, u32); 7] = [
    ("px", 0),
    ("dp", 1),
    ("dip", 1),
    ("sp", 2),
    ("pt", 3),
    ("in", 4),
    ("mm", 5),
];

pub const FRACTION_UNITS: [(&str, u32); 2] = [("%", 0), ("%p", 1)];

fn dimension_unit(unit: u32) -> Option<&'static str> {
    DIMENSION_UNITS
        .iter()
        .find(|(name, value)| *value == unit && *name != "dip")
        .map(|(name, _)| *name)
}

fn fraction_unit(unit: u32) -> Option<&'static str> {
    FRACTION_UNITS
        .iter()
        .find(|(_, value)| *value == unit)
        .map(|(name, _)| *name)
}

/// Packs a float and unit into the dimension/fraction complex format,
/// choosing the radix that keeps the most precision.
pub fn float_to_complex(value: f32, unit: u32) -> u32 {
    let negative = value < 0.0;
    let bits = (value.abs() as f64 * (1u64 << 23) as f64 + 0.5).floor() as u64;
    let (radix, shift) = if bits & 0x7F_FFFF == 0 {
        (RADIX_23P0, 23)
    } else if bits & 0xFFFF_FFFF_FF80_0000 == 0 {
        (RADIX_0P23, 0)
    } else if bits & 0xFFFF_FFFF_8000_0000 == 0 {
        (RADIX_8P15, 8)
    } else if bits & 0xFFFF_FF80_0000_0000 == 0 {
        (RADIX_16P7, 16)
    } else {
        (RADIX_23P0, 23)
    };
    let mut mantissa = ((bits >> shift) as u32) & COMPLEX_MANTISSA_MASK;
    if negative {
        // two's complement within the 24-bit mantissa
        mantissa = mantissa.wrapping_neg() & COMPLEX_MANTISSA_MASK;
    }
    (mantissa << COMPLEX_MANTISSA_SHIFT)
        | (radix << COMPLEX_RADIX_SHIFT)
        | (unit & COMPLEX_UNIT_MASK)
}

pub fn complex_to_float(complex: u32) -> f32 {
    let mantissa = (complex & (COMPLEX_MANTISSA_MASK << COMPLEX_MANTISSA_SHIFT)) as i32;
    let radix = ((complex >> COMPLEX_RADIX_SHIFT) & COMPLEX_RADIX_MASK) as usize;
    mantissa as f32 * RADIX_MULTS[radix]
}

/// `package:type/name` triple of a resource id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceName {
    pub package_id: u8,
    pub package: String,
    pub type_name: String,
    pub name: String,
}

impl ResourceName {
    /// `@type/name`, qualified with the package when it is not `current`.
    pub fn reference(&self, prefix: char, current: u8) -> String {
        if self.package_id == current || self.package.is_empty() {
            format!("{}{}/{}", prefix, self.type_name, self.name)
        } else {
            format!("{}{}:{}/{}", prefix, self.package, self.type_name, self.name)
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.package, self.type_name, self.name)
    }
}

/// Symbol lookups used when rendering or resolving references.
pub trait EntryStore {
    fn resource_name(&self, resource_id: u32) -> Option<ResourceName>;

    /// Resolves `[package:]type/name` to an id.
    fn resolve_name(&self, package: Option<&str>, type_name: &str, name: &str) -> Option<u32>;

    /// Decoded attribute definition stored under `resource_id`.
    fn attribute_bag(&self, resource_id: u32) -> Option<AttributeBag>;
}

/// Several stores searched in order; the first hit wins.
pub struct StoreChain<'a> {
    stores: Vec<&'a dyn EntryStore>,
}

impl<'a> StoreChain<'a> {
    pub fn new(stores: Vec<&'a dyn EntryStore>) -> Self {
        StoreChain { stores }
    }

    pub fn push(&mut self, store: &'a dyn EntryStore) {
        self.stores.push(store);
    }
}

impl<'a> EntryStore for StoreChain<'a> {
    fn resource_name(&self, resource_id: u32) -> Option<ResourceName> {
        self.stores
            .iter()
            .find_map(|store| store.resource_name(resource_id))
    }

    fn resolve_name(&self, package: Option<&str>, type_name: &str, name: &str) -> Option<u32> {
        self.stores
            .iter()
            .find_map(|store| store.resolve_name(package, type_name, name))
    }

    fn attribute_bag(&self, resource_id: u32) -> Option<AttributeBag> {
        self.stores
            .iter()
            .find_map(|store| store.attribute_bag(resource_id))
    }
}

/// A store that knows nothing; references render as hex ids.
pub struct EmptyStore;

impl EntryStore for EmptyStore {
    fn resource_name(&self, _: u32) -> Option<ResourceName> {
        None
    }

    fn resolve_name(&self, _: Option<&str>, _: &str, _: &str) -> Option<u32> {
        None
    }

    fn attribute_bag(&self, _: u32) -> Option<AttributeBag> {
        None
    }
}

/// One item of a generic bag: a 32-bit name and a value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagEntry {
    pub name: u32,
    pub value: ValueItem,
}

impl BagEntry {
    pub fn new(name: u32, value: ValueItem) -> Self {
        BagEntry { name, value }
    }

    pub fn id_high(&self) -> u16 {
        (self.name >> 16) as u16
    }

    pub fn id_low(&self) -> u16 {
        (self.name & 0xFFFF) as u16
    }
}

/// Pool-independent view of a complex entry, together with the type name of
/// the entry it came from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bag {
    pub type_name: String,
    pub parent: u32,
    pub items: Vec<BagEntry>,
}

/// What a generic bag turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum BagKind {
    Plurals(PluralsBag),
    Style(StyleBag),
    Attribute(AttributeBag),
    Array(ArrayBag),
    Other,
}

impl Bag {
    /// Classifies the bag, trying the views implied by the type name before
    /// the purely structural array check.
    pub fn classify(&self) -> BagKind {
        if let Some(plurals) = PluralsBag::decode(self) {
            return BagKind::Plurals(plurals);
        }
        if let Some(style) = StyleBag::decode(self) {
            return BagKind::Style(style);
        }
        if let Some(attribute) = AttributeBag::decode(self) {
            return BagKind::Attribute(attribute);
        }
        if let Some(array) = ArrayBag::decode(self) {
            return BagKind::Array(array);
        }
        BagKind::Other
    }
}

/// Escapes text so a textual encoder reads it back as the same string.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    if text.starts_with('@') || text.starts_with('?') || text.starts_with('#') {
        out.push('\\');
    }
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixteen_dp_packs_into_radix_23p0() {
        let data = float_to_complex(16.0, 1);
        assert_eq!(data, 0x0000_1001);
        assert_eq!(
            format_typed(ValueType::Dimension, data).as_deref(),
            Some("16.0dp")
        );
    }

    #[test]
    fn fractional_and_negative_dimensions() {
        let half = float_to_complex(0.5, 0);
        assert!((complex_to_float(half) - 0.5).abs() < 1e-6);
        let negative = float_to_complex(-2.0, 2);
        assert_eq!(format_typed(ValueType::Dimension, negative).as_deref(), Some("-2.0sp"));
        let precise = float_to_complex(1.25, 1);
        assert_eq!(format_typed(ValueType::Dimension, precise).as_deref(), Some("1.25dp"));
    }

    #[test]
    fn negative_fractional_values_keep_their_magnitude() {
        let one_and_half = float_to_complex(-1.5, 1);
        assert_eq!(
            format_typed(ValueType::Dimension, one_and_half).as_deref(),
            Some("-1.5dp")
        );
        let half = float_to_complex(-0.5, 1);
        assert_eq!(format_typed(ValueType::Dimension, half).as_deref(), Some("-0.5dp"));
        assert!((complex_to_float(half) + 0.5).abs() < 1e-6);
        let percent = float_to_complex(-0.125, 0);
        assert_eq!(format_typed(ValueType::Fraction, percent).as_deref(), Some("-12.5%"));
    }

    #[test]
    fn colors_render_by_width() {
        assert_eq!(format_typed(ValueType::IntColorArgb8, 0x80ff0000).unwrap(), "#80ff0000");
        assert_eq!(format_typed(ValueType::IntColorRgb8, 0xff00ff00).unwrap(), "#00ff00");
        assert_eq!(format_typed(ValueType::IntColorRgb4, 0xffff0000).unwrap(), "#f00");
        assert_eq!(format_typed(ValueType::IntColorArgb4, 0x88ff0000).unwrap(), "#8f00");
    }

    #[test]
    fn null_and_empty_render_differently() {
        assert_eq!(ValueItem::null().to_text(&EmptyStore, 0x7f), "@null");
        assert_eq!(ValueItem::empty().to_text(&EmptyStore, 0x7f), "@empty");
        assert_eq!(
            ValueItem::reference(0x7f010001).to_text(&EmptyStore, 0x7f),
            "@0x7f010001"
        );
    }

    #[test]
    fn string_value_tracks_pool_holder() {
        let mut pool = StringPool::new(true);
        let mut value = ResValue::null();
        value.set_string(&mut pool, "hello");
        assert_eq!(pool.entry(0).unwrap().reference_count(), 1);
        value.set(&mut pool, ValueType::IntDec, 5);
        assert_eq!(pool.entry(0).unwrap().reference_count(), 0);
        assert_eq!(value.to_bytes(), vec![8, 0, 0, 0x10, 5, 0, 0, 0]);
    }
}
