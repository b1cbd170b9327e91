use byteorder::{ByteOrder, LittleEndian};

use crate::block::error::{ArscError, ArscResult};
use crate::block::{ChunkHeader, ChunkType};

/// Little-endian cursor over an in-memory chunk stream.
///
/// Positions are relative to the slice the reader was created over, so a
/// reader obtained from [`BlockReader::enter_chunk`] addresses bytes from the
/// start of that chunk.
#[derive(Clone)]
pub struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BlockReader { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_available(&self) -> bool {
        self.remaining() > 0
    }

    fn take(&mut self, count: usize, what: &'static str) -> ArscResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(ArscError::Truncated {
                what,
                offset: self.pos,
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> ArscResult<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn read_u16(&mut self) -> ArscResult<u16> {
        Ok(LittleEndian::read_u16(self.take(2, "u16")?))
    }

    pub fn read_u32(&mut self) -> ArscResult<u32> {
        Ok(LittleEndian::read_u32(self.take(4, "u32")?))
    }

    pub fn read_bytes(&mut self, count: usize) -> ArscResult<&'a [u8]> {
        self.take(count, "bytes")
    }

    pub fn seek(&mut self, offset: usize) -> ArscResult<()> {
        if offset > self.data.len() {
            return Err(ArscError::Truncated {
                what: "seek target",
                offset,
            });
        }
        self.pos = offset;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> ArscResult<()> {
        self.seek(self.pos + count)
    }

    /// Reads a u32 at an absolute offset without moving the cursor.
    pub fn u32_at(&self, offset: usize) -> ArscResult<u32> {
        match self.data.get(offset..offset + 4) {
            Some(bytes) => Ok(LittleEndian::read_u32(bytes)),
            None => Err(ArscError::Truncated {
                what: "u32",
                offset,
            }),
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> ArscResult<&'a [u8]> {
        self.data.get(start..end).ok_or(ArscError::Truncated {
            what: "slice",
            offset: start,
        })
    }

    /// Decodes the next chunk header without consuming it.
    pub fn peek_header(&self) -> ArscResult<ChunkHeader> {
        let mut probe = self.clone();
        probe.read_header()
    }

    pub fn read_header(&mut self) -> ArscResult<ChunkHeader> {
        let start = self.pos;
        if self.remaining() < ChunkHeader::SIZE {
            return Err(ArscError::Truncated {
                what: "chunk header",
                offset: start,
            });
        }
        let chunk_type = ChunkType::from_u16(self.read_u16()?);
        let header_size = self.read_u16()?;
        let chunk_size = self.read_u32()?;
        if (header_size as usize) < ChunkHeader::SIZE || chunk_size < header_size as u32 {
            fail!(
                "invalid sizing for {} at 0x{:x}: header={}, chunk={}",
                chunk_type,
                start,
                header_size,
                chunk_size
            );
        }
        if start + chunk_size as usize > self.data.len() {
            return Err(ArscError::Truncated {
                what: "chunk body",
                offset: start,
            });
        }
        Ok(ChunkHeader {
            chunk_type,
            header_size,
            chunk_size,
        })
    }

    /// Reads the next header, checks its type and returns a reader scoped to
    /// the whole chunk, positioned just past the 8-byte common header. The
    /// parent reader is advanced to the end of the chunk.
    pub fn enter_chunk(&mut self, expected: ChunkType) -> ArscResult<(ChunkHeader, BlockReader<'a>)> {
        let start = self.pos;
        let header = self.read_header()?;
        if header.chunk_type != expected {
            return Err(ArscError::UnexpectedChunk {
                expected: expected.to_string(),
                actual: header.chunk_type,
                offset: start,
            });
        }
        let end = start + header.chunk_size as usize;
        let mut chunk = BlockReader::new(&self.data[start..end]);
        chunk.pos = ChunkHeader::SIZE;
        self.pos = end;
        Ok((header, chunk))
    }

    /// Consumes the next chunk whatever its type and returns its raw bytes.
    pub fn read_raw_chunk(&mut self) -> ArscResult<(ChunkHeader, &'a [u8])> {
        let start = self.pos;
        let header = self.read_header()?;
        let end = start + header.chunk_size as usize;
        self.pos = end;
        Ok((header, &self.data[start..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut reader = BlockReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
        assert_eq!(reader.read_u32().unwrap(), 0x07060504);
        assert!(!reader.is_available());
        assert!(matches!(reader.read_u8(), Err(ArscError::Truncated { .. })));
    }

    #[test]
    fn enter_chunk_rejects_wrong_type() {
        // XML chunk header with no body
        let bytes = [0x03, 0x00, 0x08, 0x00, 0x08, 0x00, 0x00, 0x00];
        let mut reader = BlockReader::new(&bytes);
        let err = reader.enter_chunk(ChunkType::Table).err().unwrap();
        assert!(matches!(
            err,
            ArscError::UnexpectedChunk {
                actual: ChunkType::Xml,
                ..
            }
        ));
    }

    #[test]
    fn header_past_end_is_truncated() {
        let bytes = [0x02, 0x00, 0x0c, 0x00, 0x40, 0x00, 0x00, 0x00, 0, 0, 0, 0];
        let mut reader = BlockReader::new(&bytes);
        assert!(matches!(
            reader.read_header(),
            Err(ArscError::Truncated { .. })
        ));
    }
}
