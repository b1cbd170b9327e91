use crate::block::error::ArscResult;
use crate::block::write_u16;

/// Reads one length-prefixed pool string starting at `offset` in `data`.
pub(crate) fn read_string(data: &[u8], offset: usize, utf8: bool) -> ArscResult<String> {
    if utf8 {
        read_utf8_string(data, offset)
    } else {
        read_utf16_string(data, offset)
    }
}

/// Appends `text` in the pool's string encoding, terminator included.
pub(crate) fn write_string(buf: &mut Vec<u8>, text: &str, utf8: bool) {
    if utf8 {
        write_utf8_string(buf, text)
    } else {
        write_utf16_string(buf, text)
    }
}

/// Largest length a UTF-8 pool string header can hold, for both the UTF-16
/// count and the byte count.
pub(crate) const MAX_UTF8_LENGTH: usize = 0x7FFF;

/// True when `text` can be framed in a UTF-8 pool.
pub(crate) fn fits_utf8(text: &str) -> bool {
    text.len() <= MAX_UTF8_LENGTH && text.encode_utf16().count() <= MAX_UTF8_LENGTH
}

fn read_utf8_string(data: &[u8], offset: usize) -> ArscResult<String> {
    let mut cursor = offset;
    // UTF-16 length first, then the encoded byte length
    let (_, len_bytes) = read_utf8_length(data, cursor)?;
    cursor += len_bytes;
    let (byte_len, byte_len_size) = read_utf8_length(data, cursor)?;
    cursor += byte_len_size;
    let bytes = match data.get(cursor..cursor + byte_len) {
        Some(bytes) => bytes,
        None => fail!("UTF-8 string at 0x{:x} exceeds chunk bounds", offset),
    };
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // Some producers emit modified UTF-8 for supplementary characters
        Err(_) => match cesu8::from_java_cesu8(bytes) {
            Ok(text) => text.into_owned(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        },
    };
    Ok(text)
}

fn read_utf16_string(data: &[u8], offset: usize) -> ArscResult<String> {
    let mut cursor = offset;
    let (char_count, header_bytes) = read_utf16_length(data, cursor)?;
    cursor += header_bytes;
    let bytes = match data.get(cursor..cursor + char_count * 2) {
        Some(bytes) => bytes,
        None => fail!("UTF-16 string at 0x{:x} exceeds chunk bounds", offset),
    };
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn read_utf8_length(data: &[u8], offset: usize) -> ArscResult<(usize, usize)> {
    let first = match data.get(offset) {
        Some(first) => *first,
        None => fail!("Invalid UTF-8 length offset 0x{:x}", offset),
    };
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }
    let second = match data.get(offset + 1) {
        Some(second) => *second,
        None => fail!("Truncated UTF-8 length at 0x{:x}", offset),
    };
    Ok(((((first & 0x7F) as usize) << 8) | second as usize, 2))
}

fn read_utf16_length(data: &[u8], offset: usize) -> ArscResult<(usize, usize)> {
    let unit = |at: usize| {
        data.get(at..at + 2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
    };
    let first = match unit(offset) {
        Some(first) => first,
        None => fail!("Invalid UTF-16 length offset 0x{:x}", offset),
    };
    if (first & 0x8000) == 0 {
        return Ok((first as usize, 2));
    }
    let second = match unit(offset + 2) {
        Some(second) => second,
        None => fail!("Truncated UTF-16 length at 0x{:x}", offset),
    };
    Ok(((((first & 0x7FFF) as usize) << 16) | second as usize, 4))
}

fn write_utf8_length(buf: &mut Vec<u8>, len: usize) {
    if len > 0x7F {
        buf.push(0x80 | ((len >> 8) as u8 & 0x7F));
        buf.push((len & 0xFF) as u8);
    } else {
        buf.push(len as u8);
    }
}

fn write_utf8_string(buf: &mut Vec<u8>, text: &str) {
    write_utf8_length(buf, text.encode_utf16().count());
    write_utf8_length(buf, text.len());
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
}

fn write_utf16_string(buf: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    let len = units.len();
    if len < 0x8000 {
        write_u16(buf, len as u16);
    } else {
        write_u16(buf, 0x8000 | ((len >> 16) as u16 & 0x7FFF));
        write_u16(buf, (len & 0xFFFF) as u16);
    }
    for unit in units {
        write_u16(buf, unit);
    }
    write_u16(buf, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_utf8_length_uses_two_bytes() {
        let text = "x".repeat(300);
        let mut buf = Vec::new();
        write_string(&mut buf, &text, true);
        assert_eq!(&buf[..4], &[0x81, 0x2c, 0x81, 0x2c]);
        assert_eq!(read_string(&buf, 0, true).unwrap(), text);
    }

    #[test]
    fn utf8_length_limit_is_inclusive() {
        let text = "x".repeat(MAX_UTF8_LENGTH);
        assert!(fits_utf8(&text));
        let mut buf = Vec::new();
        write_string(&mut buf, &text, true);
        assert_eq!(&buf[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_string(&buf, 0, true).unwrap(), text);
        assert!(!fits_utf8(&"x".repeat(MAX_UTF8_LENGTH + 1)));
        // three bytes per char overflows the byte count first
        assert!(!fits_utf8(&"✓".repeat(0x3000)));
    }

    #[test]
    fn modified_utf8_is_normalized_on_write() {
        let cesu = cesu8::to_java_cesu8("a😀");
        assert_eq!(cesu.len(), 7);
        let mut buf = vec![3, cesu.len() as u8];
        buf.extend_from_slice(&cesu);
        buf.push(0);
        let text = read_string(&buf, 0, true).unwrap();
        assert_eq!(text, "a😀");

        let mut written = Vec::new();
        write_string(&mut written, &text, true);
        assert_eq!(&written[..2], &[3, 5]);
        assert_eq!(&written[2..7], "a😀".as_bytes());
    }

    #[test]
    fn utf16_keeps_non_ascii() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo ✓", false);
        assert_eq!(read_string(&buf, 0, false).unwrap(), "héllo ✓");
        assert_eq!(&buf[buf.len() - 2..], &[0, 0]);
    }

    #[test]
    fn truncated_string_is_malformed() {
        let buf = [0x05, 0x05, b'a', b'b'];
        assert!(read_string(&buf, 0, true).is_err());
    }
}
