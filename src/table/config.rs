//! `ResTable_config`: the device configuration a type chunk applies to.
//!
//! The structure is kept as its raw bytes so that fields added by newer
//! platform versions survive a round trip untouched. Accessors address the
//! well-known offsets and treat anything past the declared size as zero.

use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while_m_n};
use nom::character::complete::{alphanumeric1, digit1};
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::separated_list1;
use nom::sequence::{preceded, terminated, tuple};
use nom::IResult;

use crate::block::error::{ArscError, ArscResult};
use crate::block::reader::BlockReader;
use crate::block::{Block, Segment};

pub const DEFAULT_SIZE: usize = 64;
const MIN_SIZE: usize = 28;

const MCC: usize = 4;
const MNC: usize = 6;
const LANGUAGE: usize = 8;
const COUNTRY: usize = 10;
const ORIENTATION: usize = 12;
const TOUCHSCREEN: usize = 13;
const DENSITY: usize = 14;
const KEYBOARD: usize = 16;
const NAVIGATION: usize = 17;
const INPUT_FLAGS: usize = 18;
const SCREEN_WIDTH: usize = 20;
const SCREEN_HEIGHT: usize = 22;
const SDK_VERSION: usize = 24;
const MINOR_VERSION: usize = 26;
const SCREEN_LAYOUT: usize = 28;
const UI_MODE: usize = 29;
const SMALLEST_WIDTH_DP: usize = 30;
const WIDTH_DP: usize = 32;
const HEIGHT_DP: usize = 34;
const SCRIPT: usize = 36;
const VARIANT: usize = 40;
const SCREEN_LAYOUT2: usize = 48;
const COLOR_MODE: usize = 49;

const SCREEN_SIZE_MASK: u8 = 0x0F;
const SCREEN_LONG_MASK: u8 = 0x30;
const LAYOUT_DIR_MASK: u8 = 0xC0;
const UI_MODE_TYPE_MASK: u8 = 0x0F;
const UI_MODE_NIGHT_MASK: u8 = 0x30;

const SCREEN_SIZES: [(&str, u8); 4] = [("small", 1), ("normal", 2), ("large", 3), ("xlarge", 4)];
const SCREEN_LONG: [(&str, u8); 2] = [("notlong", 0x10), ("long", 0x20)];
const LAYOUT_DIRS: [(&str, u8); 2] = [("ldltr", 0x40), ("ldrtl", 0x80)];
const ORIENTATIONS: [(&str, u8); 3] = [("port", 1), ("land", 2), ("square", 3)];
const UI_MODE_TYPES: [(&str, u8); 6] = [
    ("desk", 2),
    ("car", 3),
    ("television", 4),
    ("appliance", 5),
    ("watch", 6),
    ("vrheadset", 7),
];
const UI_MODE_NIGHT: [(&str, u8); 2] = [("notnight", 0x10), ("night", 0x20)];
const DENSITIES: [(&str, u16); 9] = [
    ("ldpi", 120),
    ("mdpi", 160),
    ("tvdpi", 213),
    ("hdpi", 240),
    ("xhdpi", 320),
    ("xxhdpi", 480),
    ("xxxhdpi", 640),
    ("anydpi", 0xFFFE),
    ("nodpi", 0xFFFF),
];
const TOUCHSCREENS: [(&str, u8); 3] = [("notouch", 1), ("stylus", 2), ("finger", 3)];
const KEYBOARDS: [(&str, u8); 3] = [("nokeys", 1), ("qwerty", 2), ("12key", 3)];
const NAVIGATIONS: [(&str, u8); 4] = [("nonav", 1), ("dpad", 2), ("trackball", 3), ("wheel", 4)];

/// Binary device configuration, compared and hashed by its significant bytes.
#[derive(Clone, Debug)]
pub struct ResConfig {
    bytes: Vec<u8>,
}

impl Default for ResConfig {
    fn default() -> Self {
        ResConfig::with_size(DEFAULT_SIZE)
    }
}

impl PartialEq for ResConfig {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for ResConfig {}

impl std::hash::Hash for ResConfig {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl ResConfig {
    pub fn with_size(size: usize) -> Self {
        let size = size.max(MIN_SIZE);
        let mut bytes = vec![0u8; size];
        bytes[..4].copy_from_slice(&(size as u32).to_le_bytes());
        ResConfig { bytes }
    }

    pub fn read(reader: &mut BlockReader<'_>) -> ArscResult<Self> {
        let start = reader.position();
        let size = reader.read_u32()? as usize;
        if size < MIN_SIZE {
            fail!("config at 0x{:x} declares size {}", start, size);
        }
        reader.seek(start)?;
        let bytes = reader.read_bytes(size)?.to_vec();
        Ok(ResConfig { bytes })
    }

    /// Declared size of the structure in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes after the size field with trailing zeros dropped; two configs
    /// of different declared sizes can still be equal.
    fn significant(&self) -> &[u8] {
        let body = &self.bytes[4..];
        let end = body.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
        &body[..end]
    }

    pub fn is_default(&self) -> bool {
        self.significant().is_empty()
    }

    fn u8_at(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.u8_at(offset), self.u8_at(offset + 1)])
    }

    fn ensure(&mut self, end: usize) {
        if end > self.bytes.len() {
            let size = end.max(DEFAULT_SIZE);
            self.bytes.resize(size, 0);
            self.bytes[..4].copy_from_slice(&(size as u32).to_le_bytes());
        }
    }

    fn set_u8(&mut self, offset: usize, value: u8) {
        self.ensure(offset + 1);
        self.bytes[offset] = value;
    }

    fn set_u16(&mut self, offset: usize, value: u16) {
        self.ensure(offset + 2);
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn set_masked(&mut self, offset: usize, mask: u8, value: u8) {
        let current = self.u8_at(offset);
        self.set_u8(offset, (current & !mask) | (value & mask));
    }

    pub fn mcc(&self) -> u16 {
        self.u16_at(MCC)
    }

    pub fn set_mcc(&mut self, mcc: u16) {
        self.set_u16(MCC, mcc);
    }

    pub fn mnc(&self) -> u16 {
        self.u16_at(MNC)
    }

    pub fn set_mnc(&mut self, mnc: u16) {
        self.set_u16(MNC, mnc);
    }

    pub fn language(&self) -> String {
        unpack_locale_part([self.u8_at(LANGUAGE), self.u8_at(LANGUAGE + 1)], b'a')
    }

    pub fn set_language(&mut self, language: &str) -> ArscResult<()> {
        let packed = pack_locale_part(language, b'a')
            .ok_or_else(|| ArscError::invalid("language", language))?;
        self.set_u8(LANGUAGE, packed[0]);
        self.set_u8(LANGUAGE + 1, packed[1]);
        Ok(())
    }

    pub fn region(&self) -> String {
        unpack_locale_part([self.u8_at(COUNTRY), self.u8_at(COUNTRY + 1)], b'0')
    }

    pub fn set_region(&mut self, region: &str) -> ArscResult<()> {
        let packed =
            pack_locale_part(region, b'0').ok_or_else(|| ArscError::invalid("region", region))?;
        self.set_u8(COUNTRY, packed[0]);
        self.set_u8(COUNTRY + 1, packed[1]);
        Ok(())
    }

    pub fn script(&self) -> String {
        self.ascii_field(SCRIPT, 4)
    }

    pub fn variant(&self) -> String {
        self.ascii_field(VARIANT, 8)
    }

    fn ascii_field(&self, offset: usize, len: usize) -> String {
        (offset..offset + len)
            .map(|i| self.u8_at(i))
            .take_while(|b| *b != 0)
            .map(char::from)
            .collect()
    }

    fn set_ascii_field(&mut self, offset: usize, len: usize, text: &str) {
        self.ensure(offset + len);
        for i in 0..len {
            self.bytes[offset + i] = text.as_bytes().get(i).copied().unwrap_or(0);
        }
    }

    pub fn orientation(&self) -> u8 {
        self.u8_at(ORIENTATION)
    }

    pub fn set_orientation(&mut self, orientation: u8) {
        self.set_u8(ORIENTATION, orientation);
    }

    pub fn touchscreen(&self) -> u8 {
        self.u8_at(TOUCHSCREEN)
    }

    pub fn density(&self) -> u16 {
        self.u16_at(DENSITY)
    }

    pub fn set_density(&mut self, density: u16) {
        self.set_u16(DENSITY, density);
    }

    pub fn keyboard(&self) -> u8 {
        self.u8_at(KEYBOARD)
    }

    pub fn navigation(&self) -> u8 {
        self.u8_at(NAVIGATION)
    }

    pub fn input_flags(&self) -> u8 {
        self.u8_at(INPUT_FLAGS)
    }

    pub fn screen_size(&self) -> (u16, u16) {
        (self.u16_at(SCREEN_WIDTH), self.u16_at(SCREEN_HEIGHT))
    }

    pub fn sdk_version(&self) -> u16 {
        self.u16_at(SDK_VERSION)
    }

    pub fn set_sdk_version(&mut self, sdk: u16) {
        self.set_u16(SDK_VERSION, sdk);
    }

    pub fn minor_version(&self) -> u16 {
        self.u16_at(MINOR_VERSION)
    }

    pub fn screen_layout(&self) -> u8 {
        self.u8_at(SCREEN_LAYOUT)
    }

    pub fn ui_mode(&self) -> u8 {
        self.u8_at(UI_MODE)
    }

    pub fn smallest_width_dp(&self) -> u16 {
        self.u16_at(SMALLEST_WIDTH_DP)
    }

    pub fn width_dp(&self) -> u16 {
        self.u16_at(WIDTH_DP)
    }

    pub fn height_dp(&self) -> u16 {
        self.u16_at(HEIGHT_DP)
    }

    pub fn screen_layout2(&self) -> u8 {
        self.u8_at(SCREEN_LAYOUT2)
    }

    pub fn color_mode(&self) -> u8 {
        self.u8_at(COLOR_MODE)
    }

    /// Qualifier suffix as used in resource directory names, e.g.
    /// `en-rUS-land-xhdpi-v21`. Empty for the default configuration.
    pub fn qualifiers(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if self.mcc() != 0 {
            parts.push(format!("mcc{}", self.mcc()));
        }
        if self.mnc() != 0 {
            parts.push(format!("mnc{}", self.mnc()));
        }
        let language = self.language();
        let region = self.region();
        let script = self.script();
        let variant = self.variant();
        if !script.is_empty() || !variant.is_empty() {
            let mut locale = format!("b+{}", language);
            for part in [&script, &region, &variant] {
                if !part.is_empty() {
                    locale.push('+');
                    locale.push_str(part);
                }
            }
            parts.push(locale);
        } else {
            if !language.is_empty() {
                parts.push(language);
            }
            if !region.is_empty() {
                parts.push(format!("r{}", region));
            }
        }
        let layout = self.screen_layout();
        push_named(&mut parts, &LAYOUT_DIRS, layout & LAYOUT_DIR_MASK);
        if self.smallest_width_dp() != 0 {
            parts.push(format!("sw{}dp", self.smallest_width_dp()));
        }
        if self.width_dp() != 0 {
            parts.push(format!("w{}dp", self.width_dp()));
        }
        if self.height_dp() != 0 {
            parts.push(format!("h{}dp", self.height_dp()));
        }
        push_named(&mut parts, &SCREEN_SIZES, layout & SCREEN_SIZE_MASK);
        push_named(&mut parts, &SCREEN_LONG, layout & SCREEN_LONG_MASK);
        push_named(&mut parts, &ORIENTATIONS, self.orientation());
        let ui_mode = self.ui_mode();
        push_named(&mut parts, &UI_MODE_TYPES, ui_mode & UI_MODE_TYPE_MASK);
        push_named(&mut parts, &UI_MODE_NIGHT, ui_mode & UI_MODE_NIGHT_MASK);
        let density = self.density();
        if density != 0 {
            match DENSITIES.iter().find(|(_, value)| *value == density) {
                Some((name, _)) => parts.push(name.to_string()),
                None => parts.push(format!("{}dpi", density)),
            }
        }
        push_named(&mut parts, &TOUCHSCREENS, self.touchscreen());
        push_named(&mut parts, &KEYBOARDS, self.keyboard());
        push_named(&mut parts, &NAVIGATIONS, self.navigation());
        let (width, height) = self.screen_size();
        if width != 0 && height != 0 {
            parts.push(format!("{}x{}", width, height));
        }
        if self.sdk_version() != 0 {
            parts.push(format!("v{}", self.sdk_version()));
        }
        parts.join("-")
    }

    /// Parses a qualifier suffix (with or without a leading `-`).
    pub fn parse_qualifiers(text: &str) -> ArscResult<Self> {
        let mut config = ResConfig::default();
        let trimmed = text.trim().trim_start_matches('-');
        if trimmed.is_empty() {
            return Ok(config);
        }
        for token in trimmed.split('-') {
            let qualifier = match all_consuming(qualifier)(token) {
                Ok((_, qualifier)) => qualifier,
                Err(_) => return Err(ArscError::invalid("qualifier", token)),
            };
            config.apply(qualifier, token)?;
        }
        Ok(config)
    }

    fn apply(&mut self, qualifier: Qualifier, token: &str) -> ArscResult<()> {
        match qualifier {
            Qualifier::Mcc(mcc) => self.set_mcc(mcc),
            Qualifier::Mnc(mnc) => self.set_mnc(mnc),
            Qualifier::Language(language) => self.set_language(&language)?,
            Qualifier::Region(region) => self.set_region(&region)?,
            Qualifier::Bcp47(parts) => self.apply_bcp47(&parts, token)?,
            Qualifier::Masked(offset, mask, value) => self.set_masked(offset, mask, value),
            Qualifier::Byte(offset, value) => self.set_u8(offset, value),
            Qualifier::Word(offset, value) => self.set_u16(offset, value),
            Qualifier::ScreenSize(width, height) => {
                self.set_u16(SCREEN_WIDTH, width);
                self.set_u16(SCREEN_HEIGHT, height);
            }
        }
        Ok(())
    }

    fn apply_bcp47(&mut self, parts: &[String], token: &str) -> ArscResult<()> {
        let mut parts = parts.iter();
        let language = parts.next().ok_or_else(|| ArscError::invalid("locale", token))?;
        self.set_language(language)?;
        for part in parts {
            match part.len() {
                4 if part.chars().all(|c| c.is_ascii_alphabetic()) => {
                    self.set_ascii_field(SCRIPT, 4, part)
                }
                2 | 3 => self.set_region(part)?,
                5..=8 => self.set_ascii_field(VARIANT, 8, part),
                _ => return Err(ArscError::invalid("locale", token)),
            }
        }
        Ok(())
    }
}

fn push_named<T: PartialEq + Copy>(parts: &mut Vec<String>, table: &[(&str, T)], value: T) {
    if let Some((name, _)) = table.iter().find(|(_, known)| *known == value) {
        parts.push(name.to_string());
    }
}

impl fmt::Display for ResConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qualifiers = self.qualifiers();
        if qualifiers.is_empty() {
            write!(f, "[DEFAULT]")
        } else {
            write!(f, "[{}]", qualifiers)
        }
    }
}

impl Block for ResConfig {
    fn segments(&self) -> Vec<Segment<'_>> {
        vec![Segment::Bytes(std::borrow::Cow::Borrowed(&self.bytes))]
    }
}

/// Two-letter codes are stored as ASCII; three-letter codes are packed into
/// 15 bits with the high bit set.
fn pack_locale_part(text: &str, base: u8) -> Option<[u8; 2]> {
    let bytes = text.as_bytes();
    match bytes.len() {
        0 => Some([0, 0]),
        2 => Some([bytes[0], bytes[1]]),
        3 => {
            let first = bytes[0].checked_sub(base)? & 0x1F;
            let second = bytes[1].checked_sub(base)? & 0x1F;
            let third = bytes[2].checked_sub(base)? & 0x1F;
            Some([0x80 | (third << 2) | (second >> 3), (second << 5) | first])
        }
        _ => None,
    }
}

fn unpack_locale_part(packed: [u8; 2], base: u8) -> String {
    if packed[0] & 0x80 != 0 {
        let first = packed[1] & 0x1F;
        let second = ((packed[1] & 0xE0) >> 5) | ((packed[0] & 0x03) << 3);
        let third = (packed[0] & 0x7C) >> 2;
        return [first, second, third]
            .iter()
            .map(|c| char::from(base + c))
            .collect();
    }
    packed
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| char::from(*b))
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
enum Qualifier {
    Mcc(u16),
    Mnc(u16),
    Language(String),
    Region(String),
    Bcp47(Vec<String>),
    Masked(usize, u8, u8),
    Byte(usize, u8),
    Word(usize, u16),
    ScreenSize(u16, u16),
}

fn number(input: &str) -> IResult<&str, u16> {
    map_res(digit1, str::parse::<u16>)(input)
}

fn keyword<'a, T: Copy + 'static>(
    table: &'static [(&'static str, T)],
) -> impl FnMut(&'a str) -> IResult<&'a str, T> {
    move |input: &'a str| {
        for (name, value) in table {
            if input == *name {
                return Ok(("", *value));
            }
        }
        Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )))
    }
}

fn locale(input: &str) -> IResult<&str, Qualifier> {
    alt((
        map(
            preceded(tag("b+"), separated_list1(tag("+"), alphanumeric1)),
            |parts: Vec<&str>| Qualifier::Bcp47(parts.into_iter().map(str::to_string).collect()),
        ),
        map(
            preceded(
                tag("r"),
                alt((
                    take_while_m_n(2, 2, |c: char| c.is_ascii_uppercase()),
                    take_while_m_n(3, 3, |c: char| c.is_ascii_digit()),
                )),
            ),
            |region: &str| Qualifier::Region(region.to_string()),
        ),
        map(
            take_while_m_n(2, 3, |c: char| c.is_ascii_lowercase()),
            |language: &str| Qualifier::Language(language.to_string()),
        ),
    ))(input)
}

fn qualifier(input: &str) -> IResult<&str, Qualifier> {
    alt((
        map(preceded(tag("mcc"), number), Qualifier::Mcc),
        map(preceded(tag("mnc"), number), Qualifier::Mnc),
        map(keyword(&LAYOUT_DIRS), |v| Qualifier::Masked(SCREEN_LAYOUT, LAYOUT_DIR_MASK, v)),
        map(terminated(preceded(tag("sw"), number), tag("dp")), |v| {
            Qualifier::Word(SMALLEST_WIDTH_DP, v)
        }),
        map(terminated(preceded(tag("w"), number), tag("dp")), |v| Qualifier::Word(WIDTH_DP, v)),
        map(terminated(preceded(tag("h"), number), tag("dp")), |v| Qualifier::Word(HEIGHT_DP, v)),
        map(keyword(&SCREEN_SIZES), |v| Qualifier::Masked(SCREEN_LAYOUT, SCREEN_SIZE_MASK, v)),
        map(keyword(&SCREEN_LONG), |v| Qualifier::Masked(SCREEN_LAYOUT, SCREEN_LONG_MASK, v)),
        map(keyword(&ORIENTATIONS), |v| Qualifier::Byte(ORIENTATION, v)),
        map(keyword(&UI_MODE_TYPES), |v| Qualifier::Masked(UI_MODE, UI_MODE_TYPE_MASK, v)),
        map(keyword(&UI_MODE_NIGHT), |v| Qualifier::Masked(UI_MODE, UI_MODE_NIGHT_MASK, v)),
        map(keyword(&DENSITIES), |v| Qualifier::Word(DENSITY, v)),
        map(terminated(number, tag("dpi")), |v| Qualifier::Word(DENSITY, v)),
        map(keyword(&TOUCHSCREENS), |v| Qualifier::Byte(TOUCHSCREEN, v)),
        map(keyword(&KEYBOARDS), |v| Qualifier::Byte(KEYBOARD, v)),
        map(keyword(&NAVIGATIONS), |v| Qualifier::Byte(NAVIGATION, v)),
        map(tuple((number, tag("x"), number)), |(w, _, h)| Qualifier::ScreenSize(w, h)),
        map(preceded(tag("v"), number), |v| Qualifier::Word(SDK_VERSION, v)),
        locale,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_qualifiers() {
        let config = ResConfig::default();
        assert!(config.is_default());
        assert_eq!(config.qualifiers(), "");
        assert_eq!(config.to_string(), "[DEFAULT]");
        assert_eq!(config.to_bytes().len(), DEFAULT_SIZE);
    }

    #[test]
    fn parses_and_formats_common_qualifiers() {
        let config = ResConfig::parse_qualifiers("-en-rUS-land-xhdpi-v21").unwrap();
        assert_eq!(config.language(), "en");
        assert_eq!(config.region(), "US");
        assert_eq!(config.orientation(), 2);
        assert_eq!(config.density(), 320);
        assert_eq!(config.sdk_version(), 21);
        assert_eq!(config.qualifiers(), "en-rUS-land-xhdpi-v21");
    }

    #[test]
    fn masked_fields_combine() {
        let config = ResConfig::parse_qualifiers("ldrtl-sw600dp-large-long-night").unwrap();
        assert_eq!(config.screen_layout(), 0x80 | 0x03 | 0x20);
        assert_eq!(config.smallest_width_dp(), 600);
        assert_eq!(config.qualifiers(), "ldrtl-sw600dp-large-long-night");
    }

    #[test]
    fn three_letter_language_is_packed() {
        let mut config = ResConfig::default();
        config.set_language("fil").unwrap();
        assert_ne!(config.to_bytes()[LANGUAGE] & 0x80, 0);
        assert_eq!(config.language(), "fil");
    }

    #[test]
    fn equality_ignores_declared_size() {
        let small = ResConfig::with_size(48);
        let large = ResConfig::with_size(64);
        assert_eq!(small, large);
        let hdpi = ResConfig::parse_qualifiers("hdpi").unwrap();
        assert_ne!(hdpi, large);
    }

    #[test]
    fn unknown_qualifier_is_rejected() {
        assert!(matches!(
            ResConfig::parse_qualifiers("en-bogus!"),
            Err(ArscError::InvalidValue { .. })
        ));
    }

    #[test]
    fn read_keeps_unknown_tail_bytes() {
        let mut config = ResConfig::parse_qualifiers("de").unwrap();
        config.bytes[60] = 7;
        let bytes = config.to_bytes();
        let reread = ResConfig::read(&mut BlockReader::new(&bytes)).unwrap();
        assert_eq!(reread.to_bytes(), bytes);
    }
}
