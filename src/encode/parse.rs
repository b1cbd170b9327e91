//! Grammars of the textual value forms: references, dimensions, fractions,
//! numbers, booleans and colors, plus string unescaping.

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while1, take_while_m_n};
use nom::character::complete::{char, digit0, digit1, hex_digit1, one_of};
use nom::combinator::{all_consuming, map, map_res, opt, recognize};
use nom::sequence::{pair, preceded, terminated, tuple};
use nom::IResult;

use crate::value::{
    float_to_complex, ValueItem, ValueType, DIMENSION_UNITS, FRACTION_UNITS,
};

/// A parsed `@`/`?` reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reference {
    Null,
    Empty,
    /// `@0x7f010000` or `?0x7f010000`.
    Literal { attribute: bool, id: u32 },
    Named(NamedReference),
}

/// `@[+][*][package:]type/name` or `?[package:][type/]name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedReference {
    pub attribute: bool,
    pub create: bool,
    pub private: bool,
    pub package: Option<String>,
    pub type_name: String,
    pub name: String,
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '$'))(input)
}

fn literal_reference(input: &str) -> IResult<&str, Reference> {
    map(
        pair(
            one_of("@?"),
            preceded(
                tag_no_case("0x"),
                map_res(take_while_m_n(1, 8, |c: char| c.is_ascii_hexdigit()), |hex| {
                    u32::from_str_radix(hex, 16)
                }),
            ),
        ),
        |(kind, id)| Reference::Literal {
            attribute: kind == '?',
            id,
        },
    )(input)
}

fn named_reference(input: &str) -> IResult<&str, Reference> {
    let (input, kind) = one_of("@?")(input)?;
    let (input, create) = opt(char('+'))(input)?;
    let (input, private) = opt(char('*'))(input)?;
    let (input, package) = opt(terminated(identifier, char(':')))(input)?;
    let (input, type_name) = opt(terminated(identifier, char('/')))(input)?;
    let (input, name) = identifier(input)?;
    let attribute = kind == '?';
    let type_name = match type_name {
        Some(type_name) => type_name,
        None if attribute => "attr",
        None => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    Ok((
        input,
        Reference::Named(NamedReference {
            attribute,
            create: create.is_some(),
            private: private.is_some(),
            package: package.map(str::to_string),
            type_name: type_name.to_string(),
            name: name.to_string(),
        }),
    ))
}

pub fn parse_reference(text: &str) -> Option<Reference> {
    let (_, reference) = all_consuming(alt((
        map(tag("@null"), |_| Reference::Null),
        map(tag("@empty"), |_| Reference::Empty),
        literal_reference,
        named_reference,
    )))(text.trim())
    .ok()?;
    Some(reference)
}

/// True for text an encoder must resolve rather than store as a string.
pub fn is_reference(text: &str) -> bool {
    let text = text.trim();
    (text.starts_with('@') || text.starts_with('?')) && parse_reference(text).is_some()
}

/// `[+-]digits[.digits][e[+-]digits]` or `.digits`.
fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

fn float_number(input: &str) -> IResult<&str, f32> {
    map_res(number, str::parse::<f32>)(input)
}

pub fn encode_dimension(text: &str) -> Option<ValueItem> {
    let (_, (value, unit)) = all_consuming(pair(
        float_number,
        take_while1(|c: char| c.is_ascii_alphabetic()),
    ))(text.trim())
    .ok()?;
    let (_, unit) = DIMENSION_UNITS.iter().find(|(name, _)| *name == unit)?;
    Some(ValueItem::typed(
        ValueType::Dimension,
        float_to_complex(value, *unit),
    ))
}

pub fn encode_fraction(text: &str) -> Option<ValueItem> {
    let (_, (value, unit)) =
        all_consuming(pair(float_number, alt((tag("%p"), tag("%")))))(text.trim()).ok()?;
    let (_, unit) = FRACTION_UNITS.iter().find(|(name, _)| *name == unit)?;
    Some(ValueItem::typed(
        ValueType::Fraction,
        float_to_complex(value / 100.0, *unit),
    ))
}

/// Floats need a fractional part or an exponent; bare digits are integers.
pub fn encode_float(text: &str) -> Option<ValueItem> {
    let text = text.trim();
    if !text.contains(|c: char| matches!(c, '.' | 'e' | 'E')) {
        return None;
    }
    let (_, value) = all_consuming(float_number)(text).ok()?;
    Some(ValueItem::typed(ValueType::Float, value.to_bits()))
}

pub fn encode_dimension_or_float(text: &str) -> Option<ValueItem> {
    encode_dimension(text).or_else(|| encode_float(text))
}

fn hex_integer(input: &str) -> IResult<&str, u32> {
    preceded(
        tag_no_case("0x"),
        map_res(take_while_m_n(1, 8, |c: char| c.is_ascii_hexdigit()), |hex| {
            u32::from_str_radix(hex, 16)
        }),
    )(input)
}

fn decimal_integer(input: &str) -> IResult<&str, u32> {
    map_res(recognize(pair(opt(one_of("+-")), digit1)), |digits: &str| {
        let value = digits.parse::<i64>()?;
        if value < i32::MIN as i64 || value > u32::MAX as i64 {
            return digits.parse::<i32>().map(|value| value as u32);
        }
        Ok::<u32, std::num::ParseIntError>(value as u32)
    })(input)
}

/// `0x…` as [`ValueType::IntHex`], decimal as [`ValueType::IntDec`].
pub fn encode_hex_or_int(text: &str) -> Option<ValueItem> {
    let text = text.trim();
    if let Ok((_, value)) = all_consuming(hex_integer)(text) {
        return Some(ValueItem::typed(ValueType::IntHex, value));
    }
    let (_, value) = all_consuming(decimal_integer)(text).ok()?;
    Some(ValueItem::typed(ValueType::IntDec, value))
}

pub fn encode_boolean(text: &str) -> Option<ValueItem> {
    match text.trim() {
        "true" => Some(ValueItem::typed(ValueType::IntBoolean, 0xFFFF_FFFF)),
        "false" => Some(ValueItem::typed(ValueType::IntBoolean, 0)),
        _ => None,
    }
}

fn color_digits(input: &str) -> IResult<&str, &str> {
    preceded(char('#'), hex_digit1)(input)
}

/// `#rgb`, `#argb`, `#rrggbb` or `#aarrggbb`, stored as ARGB.
pub fn encode_color(text: &str) -> Option<ValueItem> {
    let (_, digits) = all_consuming(color_digits)(text.trim()).ok()?;
    let raw = u32::from_str_radix(digits, 16).ok()?;
    let nibble = |shift: u32| {
        let value = (raw >> shift) & 0xF;
        value << 4 | value
    };
    let (value_type, data) = match digits.len() {
        3 => (
            ValueType::IntColorRgb4,
            0xFF00_0000 | nibble(8) << 16 | nibble(4) << 8 | nibble(0),
        ),
        4 => (
            ValueType::IntColorArgb4,
            nibble(12) << 24 | nibble(8) << 16 | nibble(4) << 8 | nibble(0),
        ),
        6 => (ValueType::IntColorRgb8, 0xFF00_0000 | raw),
        8 => (ValueType::IntColorArgb8, raw),
        _ => return None,
    };
    Some(ValueItem::typed(value_type, data))
}

/// Best-effort typed parse in fixed priority: dimension or float, fraction,
/// hex or int, boolean, color.
pub fn encode_guess(text: &str) -> Option<ValueItem> {
    encode_dimension_or_float(text)
        .or_else(|| encode_fraction(text))
        .or_else(|| encode_hex_or_int(text))
        .or_else(|| encode_boolean(text))
        .or_else(|| encode_color(text))
}

/// Accumulates the unescaped form of one string value, possibly spread
/// over several text nodes. Whitespace runs outside double quotes collapse
/// to one space and leading/trailing whitespace is dropped.
#[derive(Debug, Default)]
pub struct Unescaper {
    out: String,
    quoted: bool,
    pending_space: bool,
}

impl Unescaper {
    pub fn new() -> Self {
        Unescaper::default()
    }

    pub fn push(&mut self, text: &str) {
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = match chars.next() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('u') => {
                            let hex: String = chars.by_ref().take(4).collect();
                            match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                                Some(decoded) => decoded,
                                None => continue,
                            }
                        }
                        Some(other) => other,
                        None => continue,
                    };
                    self.push_char(escaped);
                }
                '"' => self.quoted = !self.quoted,
                c if c.is_whitespace() && !self.quoted => {
                    if !self.out.is_empty() {
                        self.pending_space = true;
                    }
                }
                c => self.push_char(c),
            }
        }
    }

    fn push_char(&mut self, c: char) {
        self.flush_space();
        self.out.push(c);
    }

    /// Emits a collapsed space that is still pending.
    pub fn flush_space(&mut self) {
        if self.pending_space {
            self.out.push(' ');
            self.pending_space = false;
        }
    }

    /// Length so far in UTF-16 units, the unit of style span positions.
    pub fn utf16_len(&self) -> u32 {
        self.out.encode_utf16().count() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}

pub fn unescape_string(text: &str) -> String {
    let mut unescaper = Unescaper::new();
    unescaper.push(text);
    unescaper.finish()
}
