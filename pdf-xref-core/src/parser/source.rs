//! Seekable byte source
//!
//! Wraps any `Read + Seek` in a buffered cursor that tracks its absolute
//! position and the total source length. Everything above this layer talks
//! in absolute byte offsets.

use super::{ParseError, ParseResult};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

const SEARCH_CHUNK: u64 = 8 * 1024;

/// PDF whitespace characters (ISO 32000-1 Table 1)
pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiter characters (ISO 32000-1 Table 2)
pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(
        byte,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Position of the first occurrence of `needle` in `haystack`
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `haystack`
pub(crate) fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Buffered cursor over a seekable byte source
pub struct SourceCursor<R> {
    reader: BufReader<R>,
    position: u64,
    length: u64,
}

impl<R: Read + Seek> SourceCursor<R> {
    /// Create a cursor positioned at the start of `reader`
    pub fn new(mut reader: R) -> ParseResult<Self> {
        let length = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(reader),
            position: 0,
            length,
        })
    }

    /// Total length of the source in bytes
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Current absolute position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.length
    }

    /// Move to an absolute offset. Seeking to `length()` is allowed.
    pub fn seek(&mut self, offset: u64) -> ParseResult<()> {
        if offset > self.length {
            return Err(ParseError::InvalidOffset {
                offset,
                length: self.length,
            });
        }
        if offset == self.position {
            return Ok(());
        }
        // Relative seeks keep the buffer when the target is already loaded
        let delta = offset as i128 - self.position as i128;
        match i64::try_from(delta) {
            Ok(delta) => self.reader.seek_relative(delta)?,
            Err(_) => {
                self.reader.seek(SeekFrom::Start(offset))?;
            }
        }
        self.position = offset;
        Ok(())
    }

    /// Peek at the next byte without consuming it
    pub fn peek(&mut self) -> ParseResult<Option<u8>> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    /// Consume and return the next byte
    pub fn read_byte(&mut self) -> ParseResult<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.reader.consume(1);
            self.position += 1;
        }
        Ok(byte)
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> ParseResult<Vec<u8>> {
        let remaining = self.length.saturating_sub(self.position);
        if len as u64 > remaining {
            return Err(ParseError::SyntaxError {
                position: self.position,
                message: format!("Requested {len} bytes but only {remaining} remain"),
            });
        }

        let mut bytes = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut bytes) {
            // Resynchronize the inner reader with our bookkeeping
            self.reader.seek(SeekFrom::Start(self.position))?;
            return Err(e.into());
        }
        self.position += len as u64;
        Ok(bytes)
    }

    /// Read up to `len` bytes starting at `offset`. The cursor is left after them.
    pub fn read_at(&mut self, offset: u64, len: usize) -> ParseResult<Vec<u8>> {
        let offset = offset.min(self.length);
        let available = (self.length - offset).min(len as u64) as usize;
        self.seek(offset)?;
        self.read_bytes(available)
    }

    /// Skip whitespace and return the number of bytes skipped
    pub fn skip_whitespace(&mut self) -> ParseResult<usize> {
        let mut count = 0;
        while let Some(byte) = self.peek()? {
            if !is_whitespace(byte) {
                break;
            }
            self.read_byte()?;
            count += 1;
        }
        Ok(count)
    }

    /// Consume the rest of the current line including its end-of-line marker
    pub fn skip_line(&mut self) -> ParseResult<()> {
        while let Some(byte) = self.read_byte()? {
            match byte {
                b'\n' => break,
                b'\r' => {
                    if self.peek()? == Some(b'\n') {
                        self.read_byte()?;
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Read one raw line. Returns its start offset and content without the
    /// end-of-line marker, or `None` at end of input.
    pub fn read_line(&mut self) -> ParseResult<Option<(u64, Vec<u8>)>> {
        if self.is_eof() {
            return Ok(None);
        }
        let start = self.position;
        let mut line = Vec::new();
        while let Some(byte) = self.read_byte()? {
            match byte {
                b'\n' => break,
                b'\r' => {
                    if self.peek()? == Some(b'\n') {
                        self.read_byte()?;
                    }
                    break;
                }
                _ => line.push(byte),
            }
        }
        Ok(Some((start, line)))
    }

    /// Check whether the upcoming bytes equal `keyword` without consuming them
    pub fn is_next(&mut self, keyword: &[u8]) -> ParseResult<bool> {
        let start = self.position;
        let bytes = self.read_at(start, keyword.len())?;
        self.seek(start)?;
        Ok(bytes == keyword)
    }

    /// Find the absolute offset of `pattern` within the next `limit` bytes.
    /// The cursor position is left unchanged.
    pub fn find_forward(&mut self, pattern: &[u8], limit: u64) -> ParseResult<Option<u64>> {
        let start = self.position;
        let end = start.saturating_add(limit).min(self.length);
        let overlap = pattern.len() as u64;
        let mut offset = start;
        let mut found = None;

        while offset < end {
            let chunk_len = (SEARCH_CHUNK + overlap).min(end - offset) as usize;
            let chunk = self.read_at(offset, chunk_len)?;
            if let Some(index) = find_subslice(&chunk, pattern) {
                found = Some(offset + index as u64);
                break;
            }
            if offset + chunk_len as u64 >= end {
                break;
            }
            offset += SEARCH_CHUNK;
        }

        self.seek(start)?;
        Ok(found)
    }
}
