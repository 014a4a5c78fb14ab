//! Raw scan of a PDF for object definitions and xref sections
//!
//! The scan ignores every recorded offset. It walks the file line by line
//! and records each line that starts (after optional blanks) with
//! `<number> <generation> obj` or with the `xref` keyword.

use crate::parser::source::{is_delimiter, is_whitespace, SourceCursor};
use crate::parser::{ObjectKey, ParseResult};
use std::collections::HashMap;
use std::io::{Read, Seek};

/// An object definition found by the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedObject {
    pub key: ObjectKey,
    /// Offset of the first digit of the object number
    pub offset: u64,
}

/// Everything the scan found, in file order
#[derive(Debug, Clone, Default)]
pub struct ScanIndex {
    objects: Vec<ScannedObject>,
    xref_tables: Vec<u64>,
}

impl ScanIndex {
    /// Scan the whole source. The cursor position is not restored.
    pub fn scan<R: Read + Seek>(source: &mut SourceCursor<R>) -> ParseResult<Self> {
        let mut index = Self::default();
        source.seek(0)?;

        while let Some((line_start, line)) = source.read_line()? {
            let lead = line.iter().take_while(|b| matches!(b, b' ' | b'\t' | b'\0' | b'\x0C')).count();
            let content = &line[lead..];
            let offset = line_start + lead as u64;

            if is_xref_keyword(content) {
                index.xref_tables.push(offset);
            } else if let Some(key) = parse_object_marker(content) {
                index.objects.push(ScannedObject { key, offset });
            }
        }

        tracing::debug!(
            "Scanned {} bytes: {} object definitions, {} xref tables",
            source.length(),
            index.objects.len(),
            index.xref_tables.len()
        );
        Ok(index)
    }

    /// Object definitions in file order, duplicates included
    pub fn objects(&self) -> &[ScannedObject] {
        &self.objects
    }

    /// Offsets of line-aligned `xref` keywords
    pub fn xref_tables(&self) -> &[u64] {
        &self.xref_tables
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// One offset per key; the definition furthest into the file wins
    pub fn latest_offsets(&self) -> HashMap<ObjectKey, u64> {
        let mut offsets = HashMap::with_capacity(self.objects.len());
        for object in &self.objects {
            offsets.insert(object.key, object.offset);
        }
        offsets
    }

    /// Offset of the last definition of `key`
    pub fn last_offset_of(&self, key: &ObjectKey) -> Option<u64> {
        self.objects
            .iter()
            .rev()
            .find(|object| object.key == *key)
            .map(|object| object.offset)
    }
}

/// True when `content` is the `xref` keyword followed by a token boundary
fn is_xref_keyword(content: &[u8]) -> bool {
    match content.strip_prefix(b"xref") {
        Some(rest) => rest.first().map_or(true, |b| is_whitespace(*b) || is_delimiter(*b)),
        None => false,
    }
}

/// Match `<digits> <digits> obj` at the start of `content`
fn parse_object_marker(content: &[u8]) -> Option<ObjectKey> {
    let (number, rest) = take_number(content)?;
    let spaces = rest.iter().take_while(|b| is_whitespace(**b)).count();
    if spaces == 0 {
        return None;
    }
    let (generation, rest) = take_number(&rest[spaces..])?;
    let spaces = rest.iter().take_while(|b| is_whitespace(**b)).count();
    let rest = rest[spaces..].strip_prefix(b"obj")?;

    // "obj" must end the token; "object" or "obj2" is something else
    if let Some(next) = rest.first() {
        if !is_whitespace(*next) && !is_delimiter(*next) {
            return None;
        }
    }

    Some(ObjectKey::new(number, u32::try_from(generation).ok()?))
}

/// Leading decimal digits as a number, and the remaining bytes
fn take_number(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let digits = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 20 {
        return None;
    }
    let value = std::str::from_utf8(&bytes[..digits]).ok()?.parse().ok()?;
    Some((value, &bytes[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn scan(data: &[u8]) -> ScanIndex {
        let mut source = SourceCursor::new(Cursor::new(data.to_vec())).unwrap();
        ScanIndex::scan(&mut source).unwrap()
    }

    #[test]
    fn test_object_markers() {
        assert_eq!(parse_object_marker(b"1 0 obj"), Some(ObjectKey::new(1, 0)));
        assert_eq!(
            parse_object_marker(b"12 3 obj<< /Type /Catalog >>"),
            Some(ObjectKey::new(12, 3))
        );
        assert_eq!(parse_object_marker(b"7 0obj"), Some(ObjectKey::new(7, 0)));
        assert_eq!(parse_object_marker(b"1 0 object"), None);
        assert_eq!(parse_object_marker(b"10 obj"), None);
        assert_eq!(parse_object_marker(b"a 0 obj"), None);
        assert_eq!(parse_object_marker(b"1 99999999999 obj"), None);
    }

    #[test]
    fn test_xref_keyword() {
        assert!(is_xref_keyword(b"xref"));
        assert!(is_xref_keyword(b"xref "));
        assert!(!is_xref_keyword(b"xrefs"));
        assert!(!is_xref_keyword(b"startxref"));
    }

    #[test]
    fn test_scan_finds_line_aligned_definitions() {
        let data = b"%PDF-1.4\n1 0 obj\n<< >>\nendobj\n  2 0 obj\r\nnull\r\nendobj\rstream 3 0 obj\nxref\n0 1\n";
        let index = scan(data);

        let keys: Vec<_> = index.objects().iter().map(|o| o.key).collect();
        assert_eq!(keys, vec![ObjectKey::new(1, 0), ObjectKey::new(2, 0)]);
        assert_eq!(index.objects()[0].offset, 9);
        assert_eq!(&data[index.objects()[1].offset as usize..][..7], b"2 0 obj");
        assert_eq!(index.xref_tables().len(), 1);
        assert_eq!(&data[index.xref_tables()[0] as usize..][..4], b"xref");
    }

    #[test]
    fn test_last_definition_wins() {
        let data = b"4 0 obj\n(first)\nendobj\n4 0 obj\n(second)\nendobj\n";
        let index = scan(data);

        assert_eq!(index.objects().len(), 2);
        let latest = index.latest_offsets();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[&ObjectKey::new(4, 0)], 23);
        assert_eq!(index.last_offset_of(&ObjectKey::new(4, 0)), Some(23));
        assert_eq!(index.last_offset_of(&ObjectKey::new(5, 0)), None);
    }

    #[test]
    fn test_scan_empty_source() {
        let index = scan(b"");
        assert!(index.is_empty());
        assert!(index.xref_tables().is_empty());
    }
}
