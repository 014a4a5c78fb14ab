//! Cross-reference streams
//!
//! Decodes (and encodes) the binary xref format introduced in PDF 1.5,
//! ISO 32000-1 Section 7.5.8. Each record is `W[0] + W[1] + W[2]` bytes of
//! big-endian fields; `/Index` lists the object number ranges the records
//! describe, in order.

use super::diagnostics::{DiagnosticKind, Diagnostics};
use super::table::{Xref, XrefEntry};
use super::trailer::TrailerMerger;
use crate::parser::{
    IndirectObject, Lexer, ObjectKey, ParseError, ParseOptions, ParseResult, PdfArray,
    PdfDictionary, PdfName, PdfObject,
};
use std::collections::BTreeMap;
use std::io::{Read, Seek};

/// Largest field width that still fits in a u64
const MAX_FIELD_WIDTH: usize = 8;

/// Record layout described by an xref stream dictionary
#[derive(Debug, Clone, PartialEq)]
pub struct XrefStreamLayout {
    /// Byte widths of the type, second and third fields
    pub widths: [usize; 3],
    /// (first object number, count) subsections
    pub index: Vec<(u64, u64)>,
    /// One past the highest object number
    pub size: u64,
}

impl XrefStreamLayout {
    /// Read /W, /Size and /Index from an xref stream dictionary
    pub fn from_dict(dict: &PdfDictionary) -> ParseResult<Self> {
        let size = dict
            .get("Size")
            .and_then(|obj| obj.as_integer())
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))?;
        let size = u64::try_from(size)
            .map_err(|_| ParseError::StreamDecodeError(format!("Negative /Size {size}")))?;

        let w = dict
            .get("W")
            .and_then(|obj| obj.as_array())
            .ok_or_else(|| ParseError::MissingKey("W".to_string()))?;
        if w.len() != 3 {
            return Err(ParseError::StreamDecodeError(format!(
                "/W must have 3 entries, found {}",
                w.len()
            )));
        }
        let mut widths = [0usize; 3];
        for (slot, obj) in widths.iter_mut().zip(&w.0) {
            *slot = obj
                .as_integer()
                .and_then(|value| usize::try_from(value).ok())
                .filter(|value| *value <= MAX_FIELD_WIDTH)
                .ok_or_else(|| {
                    ParseError::StreamDecodeError(format!("Invalid /W entry {obj:?}"))
                })?;
        }

        let index = match dict.get("Index") {
            None => vec![(0, size)],
            Some(PdfObject::Array(array)) => Self::parse_index(array)?,
            Some(other) => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Invalid /Index {other:?}"
                )))
            }
        };

        Ok(Self {
            widths,
            index,
            size,
        })
    }

    fn parse_index(array: &PdfArray) -> ParseResult<Vec<(u64, u64)>> {
        if array.len() % 2 != 0 {
            return Err(ParseError::StreamDecodeError(format!(
                "/Index has an odd number of entries ({})",
                array.len()
            )));
        }

        array
            .0
            .chunks(2)
            .map(|pair| {
                let start = pair[0].as_integer().and_then(|v| u64::try_from(v).ok());
                let count = pair[1].as_integer().and_then(|v| u64::try_from(v).ok());
                match (start, count) {
                    (Some(start), Some(count)) => Ok((start, count)),
                    _ => Err(ParseError::StreamDecodeError(format!(
                        "Invalid /Index pair {:?} {:?}",
                        pair[0], pair[1]
                    ))),
                }
            })
            .collect()
    }

    /// Bytes per record
    pub fn entry_size(&self) -> usize {
        self.widths.iter().sum()
    }

    /// Number of bytes the records described by /Index occupy
    pub fn expected_len(&self) -> ParseResult<usize> {
        let overflow = || ParseError::StreamDecodeError("/Index describes too many records".to_string());

        let records = self
            .index
            .iter()
            .try_fold(0u64, |total, (_, count)| total.checked_add(*count))
            .ok_or_else(overflow)?;
        records
            .checked_mul(self.entry_size() as u64)
            .and_then(|len| usize::try_from(len).ok())
            .ok_or_else(overflow)
    }

    /// Decode the records in `data`. Bytes past the last record are ignored;
    /// too few bytes is an error.
    pub fn decode_entries(&self, data: &[u8]) -> ParseResult<Vec<(ObjectKey, XrefEntry)>> {
        let entry_size = self.entry_size();
        if entry_size == 0 {
            return Err(ParseError::StreamDecodeError(
                "/W describes empty records".to_string(),
            ));
        }

        let expected = self.expected_len()?;
        if data.len() < expected {
            return Err(ParseError::StreamDecodeError(format!(
                "Stream holds {} bytes but /Index and /W need {}",
                data.len(),
                expected
            )));
        }

        let [w_type, w_second, w_third] = self.widths;
        let mut records = data.chunks_exact(entry_size);
        let mut entries = Vec::with_capacity(expected / entry_size);

        for &(start, count) in &self.index {
            for i in 0..count {
                let record = records.next().ok_or_else(|| {
                    ParseError::StreamDecodeError("Ran out of xref stream records".to_string())
                })?;
                let number = start.checked_add(i).ok_or_else(|| {
                    ParseError::StreamDecodeError("Object number overflow in /Index".to_string())
                })?;

                // A zero-width type field means every record is type 1
                let kind = if w_type == 0 {
                    1
                } else {
                    read_field(&record[..w_type])
                };
                let second = read_field(&record[w_type..w_type + w_second]);
                let third = read_field(&record[w_type + w_second..w_type + w_second + w_third]);
                let third = u32::try_from(third).map_err(|_| {
                    ParseError::StreamDecodeError(format!(
                        "Third field {third} of object {number} does not fit 32 bits"
                    ))
                })?;

                let entry = match kind {
                    0 => (
                        ObjectKey::new(number, third),
                        XrefEntry::Free { next_free: second },
                    ),
                    1 => (
                        ObjectKey::new(number, third),
                        XrefEntry::InUse { offset: second },
                    ),
                    2 => (
                        ObjectKey::new(number, 0),
                        XrefEntry::Compressed {
                            stream_number: second,
                            index: third,
                        },
                    ),
                    other => {
                        // Unknown types are references to the null object
                        tracing::debug!("Ignoring xref stream record type {} for object {}", other, number);
                        continue;
                    }
                };
                entries.push(entry);
            }
        }

        Ok(entries)
    }
}

/// Read a big-endian unsigned field
fn read_field(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |value, &byte| (value << 8) | byte as u64)
}

/// Parses the cross-reference stream of one revision
pub struct XrefStreamDecoder<'a> {
    options: &'a ParseOptions,
}

impl<'a> XrefStreamDecoder<'a> {
    pub fn new(options: &'a ParseOptions) -> Self {
        Self { options }
    }

    /// Parse the xref stream object at `offset`, add its entries to `xref`
    /// and its dictionary to `merger`. Returns the stream dictionary, which
    /// is this revision's trailer.
    ///
    /// Nothing is merged unless the whole stream decodes.
    pub fn parse<R: Read + Seek>(
        &self,
        lexer: &mut Lexer<R>,
        offset: u64,
        xref: &mut Xref,
        merger: &mut TrailerMerger,
        diagnostics: &mut Diagnostics,
    ) -> ParseResult<PdfDictionary> {
        lexer.seek(offset)?;
        let object = IndirectObject::parse(lexer, self.options)?;
        let stream = match object.object {
            PdfObject::Stream(stream) => stream,
            other => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Object {} at {} is not a stream: {:?}",
                    object.key, offset, other
                )))
            }
        };

        match stream.dict.get_type() {
            Some("XRef") => {}
            _ if !self.options.strict_mode && stream.dict.contains_key("W") => {
                diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(offset),
                    format!("Stream {} has /W but no /Type /XRef", object.key),
                );
            }
            found => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Object {} at {} is not an xref stream (type {:?})",
                    object.key, offset, found
                )))
            }
        }

        let layout = XrefStreamLayout::from_dict(&stream.dict)?;
        let data = stream.decode()?;
        let entries = layout.decode_entries(&data)?;

        let expected = layout.expected_len()?;
        if data.len() > expected {
            diagnostics.record(
                DiagnosticKind::StructuralWarning,
                Some(offset),
                format!(
                    "Xref stream has {} bytes after its last record",
                    data.len() - expected
                ),
            );
        }

        let mut revision = Xref::new();
        for (key, entry) in entries {
            revision.add(key, entry);
        }
        tracing::debug!(
            "Xref stream {} at {} contributed {} entries",
            object.key,
            offset,
            revision.len()
        );
        xref.merge(revision);
        merger.merge(&stream.dict, offset);

        Ok(stream.dict)
    }
}

/// Builds xref stream dictionaries and record bytes from a set of entries
#[derive(Debug)]
pub struct XrefStreamEncoder {
    /// Entries keyed by object number; one record per number
    entries: BTreeMap<u64, (u32, XrefEntry)>,
    /// Additional trailer dictionary entries
    trailer_entries: PdfDictionary,
    compress: bool,
}

impl Default for XrefStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl XrefStreamEncoder {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            trailer_entries: PdfDictionary::new(),
            compress: cfg!(feature = "compression"),
        }
    }

    /// Emit raw records without /Filter
    pub fn uncompressed(mut self) -> Self {
        self.compress = false;
        self
    }

    /// Add an entry. A later entry for the same object number replaces the earlier one.
    pub fn add_entry(&mut self, key: ObjectKey, entry: XrefEntry) {
        let generation = match entry {
            XrefEntry::Compressed { .. } => 0,
            _ => key.generation,
        };
        self.entries.insert(key.number, (generation, entry));
    }

    /// Add a trailer dictionary entry
    pub fn add_trailer_entry(&mut self, key: &str, value: PdfObject) {
        self.trailer_entries.insert(key, value);
    }

    /// Build the stream dictionary and its (possibly compressed) data
    pub fn build(self) -> ParseResult<(PdfDictionary, Vec<u8>)> {
        let fields: Vec<(u64, u64, u64)> = self
            .entries
            .values()
            .map(|(generation, entry)| match entry {
                XrefEntry::Free { next_free } => (0, *next_free, *generation as u64),
                XrefEntry::InUse { offset } => (1, *offset, *generation as u64),
                XrefEntry::Compressed {
                    stream_number,
                    index,
                } => (2, *stream_number, *index as u64),
            })
            .collect();

        let widths = [
            1,
            fields.iter().map(|f| bytes_needed(f.1)).max().unwrap_or(0),
            fields.iter().map(|f| bytes_needed(f.2)).max().unwrap_or(0),
        ];

        let mut data = Vec::with_capacity(fields.len() * widths.iter().sum::<usize>());
        for (kind, second, third) in &fields {
            write_field(&mut data, *kind, widths[0]);
            write_field(&mut data, *second, widths[1]);
            write_field(&mut data, *third, widths[2]);
        }

        let mut dict = self.trailer_entries;
        dict.insert("Type", PdfObject::Name(PdfName("XRef".to_string())));
        dict.insert(
            "W",
            PdfObject::Array(PdfArray(
                widths.iter().map(|w| PdfObject::Integer(*w as i64)).collect(),
            )),
        );
        dict.insert(
            "Index",
            PdfObject::Array(PdfArray(
                subsections(self.entries.keys().copied())
                    .into_iter()
                    .flat_map(|(start, count)| {
                        [PdfObject::Integer(start as i64), PdfObject::Integer(count as i64)]
                    })
                    .collect(),
            )),
        );
        let size = self.entries.keys().next_back().map_or(0, |n| n + 1);
        dict.insert("Size", PdfObject::Integer(size as i64));

        if self.compress {
            data = compress_data(&data)?;
            dict.insert("Filter", PdfObject::Name(PdfName("FlateDecode".to_string())));
        }
        dict.insert("Length", PdfObject::Integer(data.len() as i64));

        Ok((dict, data))
    }
}

/// Group sorted object numbers into contiguous (start, count) runs
fn subsections(numbers: impl Iterator<Item = u64>) -> Vec<(u64, u64)> {
    let mut runs: Vec<(u64, u64)> = Vec::new();
    for number in numbers {
        match runs.last_mut() {
            Some((start, count)) if *start + *count == number => *count += 1,
            _ => runs.push((number, 1)),
        }
    }
    runs
}

/// Calculate minimum bytes needed to represent a value
fn bytes_needed(value: u64) -> usize {
    (64 - value.leading_zeros() as usize).div_ceil(8)
}

/// Write a field value with specified width
fn write_field(data: &mut Vec<u8>, value: u64, width: usize) {
    for i in (0..width).rev() {
        data.push((value >> (i * 8)) as u8);
    }
}

#[cfg(feature = "compression")]
fn compress_data(data: &[u8]) -> ParseResult<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(not(feature = "compression"))]
fn compress_data(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::StreamDecodeError(
        "Compressing xref streams requires 'compression' feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> PdfObject {
        PdfObject::Array(PdfArray(values.iter().map(|v| PdfObject::Integer(*v)).collect()))
    }

    fn layout_dict(w: &[i64], index: Option<&[i64]>, size: i64) -> PdfDictionary {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(PdfName("XRef".to_string())));
        dict.insert("W", ints(w));
        dict.insert("Size", PdfObject::Integer(size));
        if let Some(index) = index {
            dict.insert("Index", ints(index));
        }
        dict
    }

    #[test]
    fn test_multiple_index_ranges() {
        let dict = layout_dict(&[1, 2, 1], Some(&[0, 3, 10, 2]), 12);
        let layout = XrefStreamLayout::from_dict(&dict).unwrap();
        assert_eq!(layout.index, vec![(0, 3), (10, 2)]);

        let data = [
            0, 0x00, 0x00, 0xFF, // 0: free
            1, 0x00, 0x0F, 0, // 1: offset 15
            1, 0x01, 0x00, 0, // 2: offset 256
            2, 0x00, 0x05, 0, // 10: in stream 5, index 0
            2, 0x00, 0x05, 1, // 11: in stream 5, index 1
        ];
        let entries = layout.decode_entries(&data).unwrap();

        let numbers: Vec<u64> = entries.iter().map(|(key, _)| key.number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 10, 11]);
        assert_eq!(
            entries[0],
            (ObjectKey::new(0, 255), XrefEntry::Free { next_free: 0 })
        );
        assert_eq!(
            entries[2],
            (ObjectKey::new(2, 0), XrefEntry::InUse { offset: 256 })
        );
        assert_eq!(
            entries[4],
            (
                ObjectKey::new(11, 0),
                XrefEntry::Compressed {
                    stream_number: 5,
                    index: 1
                }
            )
        );
    }

    #[test]
    fn test_default_index_covers_size() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[1, 1, 0], None, 2)).unwrap();
        assert_eq!(layout.index, vec![(0, 2)]);

        let entries = layout.decode_entries(&[1, 9, 1, 12]).unwrap();
        assert_eq!(
            entries,
            vec![
                (ObjectKey::new(0, 0), XrefEntry::InUse { offset: 9 }),
                (ObjectKey::new(1, 0), XrefEntry::InUse { offset: 12 }),
            ]
        );
    }

    #[test]
    fn test_zero_width_type_defaults_to_in_use() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[0, 2, 1], None, 1)).unwrap();
        let entries = layout.decode_entries(&[0x01, 0x00, 3]).unwrap();
        assert_eq!(
            entries,
            vec![(ObjectKey::new(0, 3), XrefEntry::InUse { offset: 256 })]
        );
    }

    #[test]
    fn test_short_data_is_an_error() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[1, 2, 1], None, 3)).unwrap();
        assert!(matches!(
            layout.decode_entries(&[1, 0, 10, 0, 1, 0]),
            Err(ParseError::StreamDecodeError(_))
        ));
    }

    #[test]
    fn test_surplus_data_is_ignored() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[1, 1, 1], None, 1)).unwrap();
        let entries = layout.decode_entries(&[1, 20, 0, 0xAA, 0xBB]).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unknown_record_type_is_skipped() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[1, 1, 1], None, 2)).unwrap();
        let entries = layout.decode_entries(&[7, 1, 1, 1, 30, 0]).unwrap();
        assert_eq!(
            entries,
            vec![(ObjectKey::new(1, 0), XrefEntry::InUse { offset: 30 })]
        );
    }

    #[test]
    fn test_invalid_layouts() {
        // Odd /Index
        assert!(XrefStreamLayout::from_dict(&layout_dict(&[1, 2, 1], Some(&[0, 3, 10]), 12)).is_err());
        // Wrong /W length
        assert!(XrefStreamLayout::from_dict(&layout_dict(&[1, 2], None, 3)).is_err());
        // Field wider than 64 bits
        assert!(XrefStreamLayout::from_dict(&layout_dict(&[1, 9, 1], None, 3)).is_err());
        // Negative /Size
        assert!(XrefStreamLayout::from_dict(&layout_dict(&[1, 2, 1], None, -1)).is_err());
        // Missing /W
        let mut dict = PdfDictionary::new();
        dict.insert("Size", PdfObject::Integer(1));
        assert!(matches!(
            XrefStreamLayout::from_dict(&dict),
            Err(ParseError::MissingKey(key)) if key == "W"
        ));
    }

    #[test]
    fn test_empty_records_are_rejected() {
        let layout = XrefStreamLayout::from_dict(&layout_dict(&[0, 0, 0], None, 1)).unwrap();
        assert!(layout.decode_entries(&[]).is_err());
    }

    #[test]
    fn test_encoder_layout() {
        let mut encoder = XrefStreamEncoder::new().uncompressed();
        encoder.add_entry(ObjectKey::new(0, 65535), XrefEntry::Free { next_free: 0 });
        encoder.add_entry(ObjectKey::new(1, 0), XrefEntry::InUse { offset: 15 });
        encoder.add_entry(ObjectKey::new(2, 0), XrefEntry::InUse { offset: 70000 });
        encoder.add_entry(
            ObjectKey::new(7, 0),
            XrefEntry::Compressed {
                stream_number: 2,
                index: 3,
            },
        );
        encoder.add_trailer_entry("Root", PdfObject::Reference(ObjectKey::new(1, 0)));

        let (dict, data) = encoder.build().unwrap();
        let layout = XrefStreamLayout::from_dict(&dict).unwrap();

        assert_eq!(layout.widths, [1, 3, 2]);
        assert_eq!(layout.index, vec![(0, 3), (7, 1)]);
        assert_eq!(layout.size, 8);
        assert!(dict.get("Filter").is_none());
        assert!(dict.contains_key("Root"));
        assert_eq!(data.len(), 4 * 6);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_encoder_compressed_roundtrip() {
        use crate::parser::PdfStream;

        let mut encoder = XrefStreamEncoder::new();
        encoder.add_entry(ObjectKey::new(3, 2), XrefEntry::InUse { offset: 1234 });
        encoder.add_entry(ObjectKey::new(4, 0), XrefEntry::Free { next_free: 0 });

        let (dict, data) = encoder.build().unwrap();
        assert_eq!(dict.get("Filter").unwrap().as_name().unwrap().as_str(), "FlateDecode");

        let stream = PdfStream { dict, data };
        let layout = XrefStreamLayout::from_dict(&stream.dict).unwrap();
        let entries = layout.decode_entries(&stream.decode().unwrap()).unwrap();
        assert_eq!(
            entries,
            vec![
                (ObjectKey::new(3, 2), XrefEntry::InUse { offset: 1234 }),
                (ObjectKey::new(4, 0), XrefEntry::Free { next_free: 0 }),
            ]
        );
    }

    #[test]
    fn test_bytes_needed() {
        assert_eq!(bytes_needed(0), 0);
        assert_eq!(bytes_needed(255), 1);
        assert_eq!(bytes_needed(256), 2);
        assert_eq!(bytes_needed(u64::MAX), 8);
    }

    #[test]
    fn test_subsections() {
        assert_eq!(
            subsections([0, 1, 2, 5, 6, 9].into_iter()),
            vec![(0, 3), (5, 2), (9, 1)]
        );
        assert!(subsections(std::iter::empty()).is_empty());
    }
}
