//! Brute-force xref reconstruction
//!
//! Used when the recorded cross-reference data cannot be trusted at all.
//! Every line-aligned `n g obj` in the file becomes an in-use entry, with
//! the last definition of a key winning. The trailer is then rebuilt by
//! looking at what the objects are: a `/Type /Catalog` dictionary becomes
//! `/Root` and a dictionary with document information keys becomes `/Info`.
//!
//! Recovered `/Root`, `/Info` and `/Size` replace whatever the chain walk
//! merged. Encryption dictionaries are not recovered; a recovered trailer
//! never carries `/Encrypt` unless the chain walk had already found one.

pub mod scanner;

pub use scanner::{ScanIndex, ScannedObject};

use crate::parser::{
    IndirectObject, Lexer, ObjectKey, ObjectStream, ParseError, ParseOptions, ParseResult,
    PdfObject,
};
use crate::xref::diagnostics::{DiagnosticKind, Diagnostics};
use crate::xref::table::{Xref, XrefEntry};
use crate::xref::trailer::TrailerMerger;
use std::io::{Read, Seek};

/// Keys that identify a document information dictionary
const INFO_KEYS: &[&str] = &[
    "Title",
    "Author",
    "Subject",
    "Keywords",
    "Creator",
    "Producer",
    "CreationDate",
];

/// Recovery statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Object definitions found by the scan, duplicates included
    pub objects_found: usize,
    /// Entries in the rebuilt table
    pub entries_reconstructed: usize,
    /// Entries taken from object streams
    pub compressed_entries: usize,
    /// Objects that could not be parsed
    pub objects_skipped: usize,
    pub root: Option<ObjectKey>,
    pub info: Option<ObjectKey>,
}

/// Rebuilds the xref table and trailer from a [`ScanIndex`]
pub struct BruteForceRecovery<'a> {
    options: &'a ParseOptions,
}

impl<'a> BruteForceRecovery<'a> {
    pub fn new(options: &'a ParseOptions) -> Self {
        Self { options }
    }

    /// Build a fresh table from `index` and fill the gaps of `merger` with a
    /// synthesized `/Root`, `/Info` and `/Size`.
    ///
    /// Fails only when the scan found no object definitions at all.
    pub fn recover<R: Read + Seek>(
        &self,
        lexer: &mut Lexer<R>,
        index: &ScanIndex,
        merger: &mut TrailerMerger,
        diagnostics: &mut Diagnostics,
    ) -> ParseResult<(Xref, RecoveryStats)> {
        if index.is_empty() {
            return Err(ParseError::UnrecoverableInput(format!(
                "no object definitions in {} bytes",
                lexer.length()
            )));
        }

        let mut stats = RecoveryStats {
            objects_found: index.objects().len(),
            ..RecoveryStats::default()
        };

        let mut located: Vec<(ObjectKey, u64)> = index.latest_offsets().into_iter().collect();
        located.sort_by_key(|(_, offset)| *offset);

        let mut xref = Xref::new();
        for (key, offset) in &located {
            xref.add(*key, XrefEntry::InUse { offset: *offset });
        }

        // File order, so a later catalog or info dictionary replaces an earlier one
        for (key, offset) in located {
            lexer.seek(offset)?;
            let object = match IndirectObject::parse(lexer, self.options) {
                Ok(object) if object.key == key => object.object,
                Ok(object) => {
                    stats.objects_skipped += 1;
                    diagnostics.record(
                        DiagnosticKind::ObjectSkipped,
                        Some(offset),
                        format!("Expected object {key}, found {}", object.key),
                    );
                    continue;
                }
                Err(e) => {
                    stats.objects_skipped += 1;
                    diagnostics.record(
                        DiagnosticKind::ObjectSkipped,
                        Some(offset),
                        format!("Skipped object {key}, either it's corrupt or unreadable: {e}"),
                    );
                    continue;
                }
            };

            Self::classify(key, &object, &mut stats);

            if self.options.recover_object_streams {
                if let PdfObject::Stream(stream) = &object {
                    if stream.dict.get_type() == Some("ObjStm") {
                        self.index_object_stream(key, stream, &mut xref, &mut stats, diagnostics);
                    }
                }
            }
        }

        stats.entries_reconstructed = xref.len();

        // The scan describes the file as it is; it overrides what trailers claimed
        match stats.root {
            Some(root) => merger.set("Root", PdfObject::Reference(root)),
            None => diagnostics.record(
                DiagnosticKind::StructuralWarning,
                None,
                "Recovery found no /Type /Catalog dictionary",
            ),
        }
        if let Some(info) = stats.info {
            merger.set("Info", PdfObject::Reference(info));
        }
        let size = xref.highest_object_number().saturating_add(1);
        merger.set("Size", PdfObject::Integer(i64::try_from(size).unwrap_or(i64::MAX)));

        tracing::debug!(
            "Recovered {} entries from {} definitions ({} skipped)",
            stats.entries_reconstructed,
            stats.objects_found,
            stats.objects_skipped
        );
        Ok((xref, stats))
    }

    /// Note catalog and info dictionaries
    fn classify(key: ObjectKey, object: &PdfObject, stats: &mut RecoveryStats) {
        let Some(dict) = object.as_dict() else {
            return;
        };

        if dict.get_type() == Some("Catalog") {
            stats.root = Some(key);
        } else if INFO_KEYS.iter().any(|k| dict.contains_key(k)) {
            stats.info = Some(key);
        }
    }

    /// Add object stream members as compressed entries unless a direct
    /// definition exists, and classify them
    fn index_object_stream(
        &self,
        key: ObjectKey,
        stream: &crate::parser::PdfStream,
        xref: &mut Xref,
        stats: &mut RecoveryStats,
        diagnostics: &mut Diagnostics,
    ) {
        let objstm = match ObjectStream::parse(stream, self.options) {
            Ok(objstm) => objstm,
            Err(e) => {
                diagnostics.record(
                    DiagnosticKind::ObjectSkipped,
                    None,
                    format!("Object stream {key} is unreadable: {e}"),
                );
                return;
            }
        };

        let members: Vec<u64> = objstm.member_numbers().collect();
        for (index, number) in members.into_iter().enumerate() {
            let member = ObjectKey::new(number, 0);
            let Ok(index_in_stream) = u32::try_from(index) else {
                break;
            };
            let entry = XrefEntry::Compressed {
                stream_number: key.number,
                index: index_in_stream,
            };
            if !xref.add(member, entry) {
                continue;
            }
            stats.compressed_entries += 1;

            match objstm.object(index, self.options) {
                Ok(object) => Self::classify(member, &object, stats),
                Err(e) => {
                    stats.objects_skipped += 1;
                    diagnostics.record(
                        DiagnosticKind::ObjectSkipped,
                        None,
                        format!("Skipped object {member} in stream {key}: {e}"),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PdfDictionary;
    use crate::xref::trailer::Trailer;
    use std::io::Cursor;

    fn run(data: &[u8]) -> ParseResult<(Xref, RecoveryStats, Trailer)> {
        run_after(data, TrailerMerger::new())
    }

    /// Recover on top of trailers already merged from a chain walk
    fn run_after(
        data: &[u8],
        mut merger: TrailerMerger,
    ) -> ParseResult<(Xref, RecoveryStats, Trailer)> {
        let options = ParseOptions::default();
        let mut lexer = Lexer::new(Cursor::new(data.to_vec()))?;
        let index = ScanIndex::scan(lexer.source())?;
        let mut diagnostics = Diagnostics::new(true);
        let (xref, stats) =
            BruteForceRecovery::new(&options).recover(&mut lexer, &index, &mut merger, &mut diagnostics)?;
        Ok((xref, stats, merger.result()))
    }

    #[test]
    fn test_recover_catalog_and_info() {
        let data = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
3 0 obj\n<< /Producer (test) >>\nendobj\n";

        let (xref, stats, trailer) = run(data).unwrap();
        assert_eq!(xref.len(), 3);
        assert_eq!(trailer.root().unwrap(), ObjectKey::new(1, 0));
        assert_eq!(trailer.info(), Some(ObjectKey::new(3, 0)));
        assert_eq!(trailer.size().unwrap(), 4);
        assert!(trailer.offsets().is_empty());
        assert_eq!(stats.objects_skipped, 0);
        assert_eq!(
            xref.get(&ObjectKey::new(1, 0)),
            Some(&XrefEntry::InUse { offset: 9 })
        );
    }

    #[test]
    fn test_corrupt_objects_are_skipped() {
        let data = b"1 0 obj\n<< /Type /Catalog >>\nendobj\n2 0 obj\n<< /Broken [ >>\nendobj\n";

        let (xref, stats, trailer) = run(data).unwrap();
        assert_eq!(xref.len(), 2);
        assert_eq!(stats.objects_skipped, 1);
        assert_eq!(trailer.root().unwrap(), ObjectKey::new(1, 0));
    }

    #[test]
    fn test_scan_results_replace_stale_trailer_values() {
        let mut stale = PdfDictionary::new();
        stale.insert("Root", PdfObject::Reference(ObjectKey::new(40, 0)));
        stale.insert("Size", PdfObject::Integer(2));
        stale.insert("ID", PdfObject::Integer(7));
        let mut merger = TrailerMerger::new();
        merger.merge(&stale, 500);

        let data = b"1 0 obj\n<< /Title (t) >>\nendobj\n6 0 obj\n<< /Type /Catalog >>\nendobj\n";
        let (_, _, trailer) = run_after(data, merger).unwrap();

        assert_eq!(trailer.root().unwrap(), ObjectKey::new(6, 0));
        assert_eq!(trailer.info(), Some(ObjectKey::new(1, 0)));
        assert_eq!(trailer.size().unwrap(), 7);
        assert_eq!(trailer.get("ID"), Some(&PdfObject::Integer(7)));
    }

    #[test]
    fn test_stale_root_kept_without_catalog() {
        let mut stale = PdfDictionary::new();
        stale.insert("Root", PdfObject::Reference(ObjectKey::new(3, 0)));
        let mut merger = TrailerMerger::new();
        merger.merge(&stale, 500);

        let (_, _, trailer) = run_after(b"3 0 obj\n<< /Kids [] >>\nendobj\n", merger).unwrap();
        assert_eq!(trailer.root().unwrap(), ObjectKey::new(3, 0));
        assert_eq!(trailer.size().unwrap(), 4);
    }

    #[test]
    fn test_later_catalog_wins() {
        let data = b"1 0 obj\n<< /Type /Catalog >>\nendobj\n5 0 obj\n<< /Type /Catalog >>\nendobj\n";

        let (_, stats, _) = run(data).unwrap();
        assert_eq!(stats.root, Some(ObjectKey::new(5, 0)));
    }

    #[test]
    fn test_object_stream_members() {
        let header = "8 0 9 20 ";
        let body = "<< /Type /Catalog >> << /Title (x) >>";
        let content = format!("{header}{body}");
        let data = format!(
            "7 0 obj\n<< /Type /ObjStm /N 2 /First {} /Length {} >>\nstream\n{}\nendstream\nendobj\n",
            header.len(),
            content.len(),
            content
        );

        let (xref, stats, trailer) = run(data.as_bytes()).unwrap();
        assert_eq!(stats.compressed_entries, 2);
        assert_eq!(
            xref.get(&ObjectKey::new(8, 0)),
            Some(&XrefEntry::Compressed {
                stream_number: 7,
                index: 0
            })
        );
        assert_eq!(trailer.root().unwrap(), ObjectKey::new(8, 0));
        assert_eq!(trailer.info(), Some(ObjectKey::new(9, 0)));
        assert_eq!(trailer.size().unwrap(), 10);
    }

    #[test]
    fn test_nothing_to_recover() {
        assert!(matches!(
            run(b"this is not a pdf\n"),
            Err(ParseError::UnrecoverableInput(_))
        ));
        assert!(matches!(run(b""), Err(ParseError::UnrecoverableInput(_))));
    }
}
