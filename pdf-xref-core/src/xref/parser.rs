//! Cross-reference resolution
//!
//! Finds `startxref`, follows the `/Prev` chain through classic tables and
//! cross-reference streams (and `/XRefStm` in hybrid files), merges every
//! revision newest first, then checks the resulting offsets against the
//! object headers they point to. When the chain yields nothing usable the
//! whole file is scanned instead, see [`crate::recovery`].

use super::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use super::stream::XrefStreamDecoder;
use super::table::{Xref, XrefEntry};
use super::trailer::{Trailer, TrailerMerger};
use crate::parser::objects::parse_indirect_header;
use crate::parser::source::{find_subslice, rfind_subslice};
use crate::parser::{
    Lexer, ObjectKey, ParseError, ParseOptions, ParseResult, PdfDictionary, PdfObject, Token,
};
use crate::recovery::{BruteForceRecovery, RecoveryStats, ScanIndex};
use std::collections::HashSet;
use std::fmt;
use std::io::{Read, Seek};

/// Bytes of an object inspected when looking for xref stream candidates
const CANDIDATE_PREFIX_LEN: usize = 512;

/// Physical form of one cross-reference section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    /// `xref` keyword, subsections and a `trailer` dictionary
    Table,
    /// `/Type /XRef` stream object
    Stream,
}

/// One visited section of the revision chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub xref_offset: u64,
    pub kind: XrefKind,
    /// Offset of the `trailer` keyword, or of the stream object itself
    pub trailer_offset: u64,
}

/// What to do with an offset that failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// Continue from this offset instead
    Substitute(u64),
    /// Stop following this link
    DropLink,
}

/// Where an offset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetRole {
    StartXref,
    Prev,
    XRefStm,
}

impl OffsetRole {
    fn accepts(self, kind: XrefKind) -> bool {
        match self {
            OffsetRole::XRefStm => kind == XrefKind::Stream,
            OffsetRole::StartXref | OffsetRole::Prev => true,
        }
    }
}

impl fmt::Display for OffsetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OffsetRole::StartXref => write!(f, "startxref"),
            OffsetRole::Prev => write!(f, "/Prev"),
            OffsetRole::XRefStm => write!(f, "/XRefStm"),
        }
    }
}

/// Everything one resolution produced
#[derive(Debug)]
pub struct ResolvedXref {
    pub xref: Xref,
    pub trailer: Trailer,
    /// Sections visited, newest first
    pub revisions: Vec<Revision>,
    pub diagnostics: Vec<Diagnostic>,
    /// In-use entries whose offsets did not hold the object they claim
    pub excluded: Vec<(ObjectKey, XrefEntry)>,
    /// Set when the table was rebuilt by scanning the file
    pub recovery: Option<RecoveryStats>,
}

impl ResolvedXref {
    pub fn recovered(&self) -> bool {
        self.recovery.is_some()
    }
}

/// Drives one resolution over one source
pub struct XrefParser<R> {
    lexer: Lexer<R>,
    options: ParseOptions,
    xref: Xref,
    merger: TrailerMerger,
    diagnostics: Diagnostics,
    revisions: Vec<Revision>,
    visited: HashSet<u64>,
    scan: Option<ScanIndex>,
    candidates: Option<Vec<(u64, XrefKind)>>,
    excluded: Vec<(ObjectKey, XrefEntry)>,
}

impl<R: Read + Seek> XrefParser<R> {
    pub fn new(reader: R) -> ParseResult<Self> {
        Self::with_options(reader, ParseOptions::default())
    }

    pub fn with_options(reader: R, options: ParseOptions) -> ParseResult<Self> {
        Ok(Self {
            lexer: Lexer::new(reader)?,
            diagnostics: Diagnostics::new(options.collect_warnings),
            options,
            xref: Xref::new(),
            merger: TrailerMerger::new(),
            revisions: Vec::new(),
            visited: HashSet::new(),
            scan: None,
            candidates: None,
            excluded: Vec::new(),
        })
    }

    /// Resolve the cross-reference data.
    ///
    /// Without brute-force recovery, fails with [`ParseError::InvalidXRef`]
    /// when the chain is unusable or the offset check excluded every in-use
    /// entry. Fails with [`ParseError::UnrecoverableInput`] when recovery
    /// finds nothing.
    pub fn parse(mut self) -> ParseResult<ResolvedXref> {
        let start = match self.find_startxref()? {
            Some(offset) => self.usable_offset(offset, OffsetRole::StartXref),
            None => None,
        };

        if let Some(start) = start {
            self.walk_chain(start);
        }

        let mut unusable = self.xref.is_empty();
        if !unusable && self.options.verify_object_offsets {
            self.verify_offsets();
            // Only a sweep that excluded entries can leave nothing to load
            if !self.excluded.is_empty() && !self.xref.has_in_use_entries() {
                self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    None,
                    "No in-use entry survived the offset check",
                );
                unusable = true;
            }
        }

        let recovery = if !unusable {
            None
        } else if self.options.brute_force_recovery {
            Some(self.recover()?)
        } else {
            return Err(ParseError::InvalidXRef);
        };

        Ok(ResolvedXref {
            xref: self.xref,
            trailer: self.merger.result(),
            revisions: self.revisions,
            diagnostics: self.diagnostics.into_entries(),
            excluded: self.excluded,
            recovery,
        })
    }

    /// Offset recorded after the last `startxref` near the end of the file
    fn find_startxref(&mut self) -> ParseResult<Option<u64>> {
        let length = self.lexer.length();
        let windows = [
            self.options.startxref_search_window,
            self.options.extended_startxref_search_window,
        ];
        let mut searched = 0u64;

        for window in windows {
            let window = (window as u64).min(length);
            if window <= searched {
                continue;
            }
            searched = window;

            let start = length - window;
            let tail = self.lexer.source().read_at(start, window as usize)?;
            // Streams may contain the keyword too; the last one is authoritative
            if let Some(index) = rfind_subslice(&tail, b"startxref") {
                return Ok(self.read_startxref_value(start + index as u64));
            }
            tracing::debug!("No startxref in the last {} bytes", window);
        }

        self.diagnostics.record(
            DiagnosticKind::StructuralWarning,
            None,
            "No startxref keyword found",
        );
        Ok(None)
    }

    fn read_startxref_value(&mut self, keyword_offset: u64) -> Option<u64> {
        let value = self.lexer.seek(keyword_offset).and_then(|_| {
            self.lexer.expect_keyword("startxref")?;
            self.lexer.next_integer()
        });

        match value {
            Ok(offset) if offset >= 0 => Some(offset as u64),
            Ok(offset) => {
                self.diagnostics.record(
                    DiagnosticKind::OffsetInvalid,
                    Some(keyword_offset),
                    format!("Negative startxref offset {offset}"),
                );
                None
            }
            Err(e) => {
                self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(keyword_offset),
                    format!("startxref is not followed by an offset: {e}"),
                );
                None
            }
        }
    }

    /// Validated offset, its substitute, or `None` when the link is dropped
    fn usable_offset(&mut self, offset: u64, role: OffsetRole) -> Option<u64> {
        match self.validate_offset(offset, role) {
            Ok(offset) | Err(FallbackAction::Substitute(offset)) => Some(offset),
            Err(FallbackAction::DropLink) => None,
        }
    }

    fn validate_offset(&mut self, offset: u64, role: OffsetRole) -> Result<u64, FallbackAction> {
        if let Some(kind) = self.xref_kind_at(offset) {
            if role.accepts(kind) {
                return Ok(offset);
            }
        }

        self.diagnostics.record(
            DiagnosticKind::OffsetInvalid,
            Some(offset),
            format!("{role} offset {offset} does not point at cross-reference data"),
        );

        match self.best_guess(offset, role) {
            Some(candidate) => {
                tracing::debug!("Using xref at {} instead of {}", candidate, offset);
                Err(FallbackAction::Substitute(candidate))
            }
            None => {
                tracing::debug!("Dropping {} link to {}", role, offset);
                Err(FallbackAction::DropLink)
            }
        }
    }

    /// What kind of xref section starts at `offset`, if any
    fn xref_kind_at(&mut self, offset: u64) -> Option<XrefKind> {
        if offset >= self.lexer.length() {
            return None;
        }
        self.probe(offset).ok().flatten()
    }

    fn probe(&mut self, offset: u64) -> ParseResult<Option<XrefKind>> {
        self.lexer.seek(offset)?;
        self.lexer.source().skip_whitespace()?;
        if self.lexer.source().is_next(b"xref")? {
            return Ok(Some(XrefKind::Table));
        }

        parse_indirect_header(&mut self.lexer)?;
        let dict = PdfObject::parse_dictionary(&mut self.lexer, &self.options)?;
        let is_xref = dict.get_type() == Some("XRef")
            || (!self.options.strict_mode && dict.contains_key("W"));
        if is_xref && matches!(self.lexer.next_token()?, Token::Stream) {
            Ok(Some(XrefKind::Stream))
        } else {
            Ok(None)
        }
    }

    fn walk_chain(&mut self, start: u64) {
        let mut next = Some(start);
        let mut steps = 0usize;

        while let Some(offset) = next {
            if !self.visited.insert(offset) {
                self.diagnostics.record(
                    DiagnosticKind::RevisionCycle,
                    Some(offset),
                    format!("Xref at {offset} was already visited, stopping the chain"),
                );
                break;
            }
            if steps >= self.options.max_revisions {
                self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(offset),
                    format!("Stopping after {steps} revisions"),
                );
                break;
            }
            steps += 1;

            tracing::debug!("Reading revision {} at {}", steps, offset);
            next = match self.xref_kind_at(offset) {
                Some(XrefKind::Table) => match self.parse_table_revision(offset) {
                    Ok(next) => next,
                    Err(e) => {
                        self.diagnostics.record(
                            DiagnosticKind::StructuralWarning,
                            Some(offset),
                            format!("Xref table is unusable: {e}"),
                        );
                        None
                    }
                },
                Some(XrefKind::Stream) => match self.parse_stream_revision(offset) {
                    Ok(next) => next,
                    Err(e) => {
                        self.diagnostics.record(
                            DiagnosticKind::StreamDecodeError,
                            Some(offset),
                            format!("Xref stream is unusable: {e}"),
                        );
                        None
                    }
                },
                None => {
                    self.diagnostics.record(
                        DiagnosticKind::OffsetInvalid,
                        Some(offset),
                        "No cross-reference data at this offset",
                    );
                    None
                }
            };
        }
    }

    /// Read a classic section and, for hybrid files, its /XRefStm stream.
    /// Returns the validated /Prev offset.
    fn parse_table_revision(&mut self, offset: u64) -> ParseResult<Option<u64>> {
        self.lexer.seek(offset)?;
        self.lexer.expect_keyword("xref")?;

        let mut revision = Xref::new();
        if let Err(e) = self.parse_subsections(&mut revision) {
            self.xref.merge(revision);
            return Err(e);
        }

        let (trailer_offset, trailer) = match self.read_trailer() {
            Ok(trailer) => trailer,
            Err(e) => {
                // Entries read before a broken trailer are still kept
                self.xref.merge(revision);
                return Err(e);
            }
        };

        tracing::debug!(
            "Xref table at {} has {} entries",
            offset,
            revision.len()
        );
        self.merger.merge(&trailer, trailer_offset);
        self.revisions.push(Revision {
            xref_offset: offset,
            kind: XrefKind::Table,
            trailer_offset,
        });

        if let Some(stream_offset) = self.hybrid_stream_offset(&trailer) {
            self.merge_hybrid_stream(stream_offset, &mut revision);
        }
        self.xref.merge(revision);

        Ok(self.next_prev(&trailer))
    }

    fn parse_stream_revision(&mut self, offset: u64) -> ParseResult<Option<u64>> {
        let dict = XrefStreamDecoder::new(&self.options).parse(
            &mut self.lexer,
            offset,
            &mut self.xref,
            &mut self.merger,
            &mut self.diagnostics,
        )?;
        self.revisions.push(Revision {
            xref_offset: offset,
            kind: XrefKind::Stream,
            trailer_offset: offset,
        });

        Ok(self.next_prev(&dict))
    }

    /// Read `start count` headers and their records until something else shows up
    fn parse_subsections(&mut self, revision: &mut Xref) -> ParseResult<()> {
        loop {
            self.lexer.source().skip_whitespace()?;
            if !matches!(self.lexer.source().peek()?, Some(b'0'..=b'9')) {
                return Ok(());
            }
            let Some((line_start, line)) = self.lexer.source().read_line()? else {
                return Ok(());
            };

            match parse_subsection_header(&line) {
                Some((start, count)) => self.parse_records(start, count, revision)?,
                None => self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(line_start),
                    format!(
                        "Skipping unexpected line in xref section: {:?}",
                        String::from_utf8_lossy(&line)
                    ),
                ),
            }
        }
    }

    fn parse_records(&mut self, start: u64, count: u64, revision: &mut Xref) -> ParseResult<()> {
        for i in 0..count {
            self.lexer.source().skip_whitespace()?;
            if !matches!(self.lexer.source().peek()?, Some(b'0'..=b'9')) {
                self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(self.lexer.position()),
                    format!("Subsection {start} {count} ends after {i} entries"),
                );
                return Ok(());
            }
            let Some((line_start, line)) = self.lexer.source().read_line()? else {
                return Ok(());
            };
            let Some(number) = start.checked_add(i) else {
                return Err(ParseError::InvalidXRef);
            };

            match parse_xref_record(&line, self.options.strict_mode) {
                Some((field, generation, in_use)) => {
                    let entry = if in_use {
                        XrefEntry::InUse { offset: field }
                    } else {
                        XrefEntry::Free { next_free: field }
                    };
                    revision.add(ObjectKey::new(number, generation), entry);
                }
                None => self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    Some(line_start),
                    format!(
                        "Skipping malformed entry for object {number}: {:?}",
                        String::from_utf8_lossy(&line)
                    ),
                ),
            }
        }
        Ok(())
    }

    /// Parse `trailer << ... >>`, skipping stray lines in front of it
    fn read_trailer(&mut self) -> ParseResult<(u64, PdfDictionary)> {
        let trailer_offset = self.seek_trailer_keyword()?;
        self.lexer.expect_keyword("trailer")?;
        let dict = PdfObject::parse_dictionary(&mut self.lexer, &self.options)?;
        Ok((trailer_offset, dict))
    }

    fn seek_trailer_keyword(&mut self) -> ParseResult<u64> {
        loop {
            self.lexer.source().skip_whitespace()?;
            let position = self.lexer.position();
            match self.lexer.source().peek()? {
                None => return Err(ParseError::InvalidTrailer),
                Some(b't') => return Ok(position),
                Some(_) => {
                    let line = self
                        .lexer
                        .source()
                        .read_line()?
                        .map(|(_, line)| line)
                        .unwrap_or_default();
                    self.diagnostics.record(
                        DiagnosticKind::StructuralWarning,
                        Some(position),
                        format!(
                            "Skipping stray line before trailer: {:?}",
                            String::from_utf8_lossy(&line)
                        ),
                    );
                }
            }
        }
    }

    fn hybrid_stream_offset(&mut self, trailer: &PdfDictionary) -> Option<u64> {
        let offset = match trailer.get("XRefStm")?.as_integer() {
            Some(offset) if offset > 0 => offset as u64,
            _ => {
                self.diagnostics.record(
                    DiagnosticKind::StructuralWarning,
                    None,
                    "Ignoring /XRefStm that is not a positive integer",
                );
                return None;
            }
        };

        let offset = self.usable_offset(offset, OffsetRole::XRefStm)?;
        if !self.visited.insert(offset) {
            self.diagnostics.record(
                DiagnosticKind::RevisionCycle,
                Some(offset),
                "/XRefStm points at a section that was already read",
            );
            return None;
        }
        Some(offset)
    }

    /// Decode the stream of a hybrid file into the table's revision. Its
    /// /Prev is not followed; the table's /Prev governs the chain.
    fn merge_hybrid_stream(&mut self, offset: u64, revision: &mut Xref) {
        let mut hidden = Xref::new();
        let decoded = XrefStreamDecoder::new(&self.options).parse(
            &mut self.lexer,
            offset,
            &mut hidden,
            &mut self.merger,
            &mut self.diagnostics,
        );

        if let Err(e) = decoded {
            self.diagnostics.record(
                DiagnosticKind::StreamDecodeError,
                Some(offset),
                format!("Hybrid xref stream is unusable: {e}"),
            );
            return;
        }

        // The table lists compressed objects as free
        for (key, entry) in hidden.iter() {
            if revision.get(key).is_some_and(|existing| existing.is_in_use()) {
                continue;
            }
            revision.remove(key);
            revision.add(*key, *entry);
        }

        self.revisions.push(Revision {
            xref_offset: offset,
            kind: XrefKind::Stream,
            trailer_offset: offset,
        });
    }

    fn next_prev(&mut self, trailer: &PdfDictionary) -> Option<u64> {
        let prev = trailer.get("Prev")?;
        match prev.as_integer() {
            Some(0) => None,
            Some(offset) if offset > 0 => self.usable_offset(offset as u64, OffsetRole::Prev),
            _ => {
                self.diagnostics.record(
                    DiagnosticKind::OffsetInvalid,
                    None,
                    format!("Ignoring /Prev {prev:?}"),
                );
                None
            }
        }
    }

    /// Nearest unvisited xref section found by scanning the file
    fn best_guess(&mut self, offset: u64, role: OffsetRole) -> Option<u64> {
        if !self.options.repair_xref_offsets {
            return None;
        }
        if let Err(e) = self.ensure_candidates() {
            tracing::debug!("Could not scan for xref sections: {}", e);
            return None;
        }

        self.candidates
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|(candidate, kind)| role.accepts(*kind) && !self.visited.contains(candidate))
            .min_by_key(|(candidate, _)| candidate.abs_diff(offset))
            .map(|(candidate, _)| *candidate)
    }

    fn ensure_candidates(&mut self) -> ParseResult<()> {
        if self.candidates.is_some() {
            return Ok(());
        }

        let index = self.scan_index()?;
        let tables = index.xref_tables().to_vec();
        let objects: Vec<u64> = index.objects().iter().map(|object| object.offset).collect();

        let mut candidates = Vec::new();
        for offset in tables {
            if self.xref_kind_at(offset) == Some(XrefKind::Table) {
                candidates.push((offset, XrefKind::Table));
            }
        }
        for offset in objects {
            let head = self.lexer.source().read_at(offset, CANDIDATE_PREFIX_LEN)?;
            if find_subslice(&head, b"/XRef").is_some()
                && self.xref_kind_at(offset) == Some(XrefKind::Stream)
            {
                candidates.push((offset, XrefKind::Stream));
            }
        }

        tracing::debug!("Found {} xref section candidates", candidates.len());
        self.candidates = Some(candidates);
        Ok(())
    }

    /// The file scan, computed once per parse
    fn scan_index(&mut self) -> ParseResult<&ScanIndex> {
        let index = match self.scan.take() {
            Some(index) => index,
            None => ScanIndex::scan(self.lexer.source())?,
        };
        Ok(self.scan.insert(index))
    }

    /// Check every in-use offset against the header found there
    fn verify_offsets(&mut self) {
        for (key, offset) in self.xref.in_use_offsets() {
            let found = self.header_at(offset);
            if found == Some(key) {
                continue;
            }

            let relocated = if self.options.repair_xref_offsets {
                self.scan_index()
                    .ok()
                    .and_then(|index| index.last_offset_of(&key))
            } else {
                None
            };

            match relocated {
                Some(actual) => {
                    self.xref.relocate(&key, actual);
                    self.diagnostics.record(
                        DiagnosticKind::OffsetMismatch,
                        Some(offset),
                        format!("Object {key} is not at {offset}, using {actual}"),
                    );
                }
                None => {
                    if let Some(entry) = self.xref.remove(&key) {
                        self.excluded.push((key, entry));
                    }
                    let found = found.map_or("no object header".to_string(), |k| k.to_string());
                    self.diagnostics.record(
                        DiagnosticKind::OffsetMismatch,
                        Some(offset),
                        format!("Excluding object {key}, offset holds {found}"),
                    );
                }
            }
        }
    }

    fn header_at(&mut self, offset: u64) -> Option<ObjectKey> {
        if offset >= self.lexer.length() {
            return None;
        }
        self.lexer.seek(offset).ok()?;
        parse_indirect_header(&mut self.lexer).ok()
    }

    fn recover(&mut self) -> ParseResult<RecoveryStats> {
        tracing::debug!(
            "Rebuilding the xref by scanning {} bytes",
            self.lexer.length()
        );
        let index = match self.scan.take() {
            Some(index) => index,
            None => ScanIndex::scan(self.lexer.source())?,
        };

        let recovered = BruteForceRecovery::new(&self.options).recover(
            &mut self.lexer,
            &index,
            &mut self.merger,
            &mut self.diagnostics,
        );
        self.scan = Some(index);

        let (xref, stats) = recovered?;
        self.xref = xref;
        Ok(stats)
    }
}

/// `start count` on a line of its own
fn parse_subsection_header(line: &[u8]) -> Option<(u64, u64)> {
    let line = std::str::from_utf8(line).ok()?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }
    Some((parts[0].parse().ok()?, parts[1].parse().ok()?))
}

/// Parse `oooooooooo ggggg n|f`; strict mode also checks the field widths
fn parse_xref_record(line: &[u8], strict: bool) -> Option<(u64, u32, bool)> {
    let line = std::str::from_utf8(line).ok()?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    if strict && (parts[0].len() != 10 || parts[1].len() != 5) {
        return None;
    }
    if !parts[0].bytes().chain(parts[1].bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let field = parts[0].parse().ok()?;
    let generation = parts[1].parse().ok()?;
    let in_use = match parts[2] {
        "n" => true,
        "f" => false,
        _ => return None,
    };
    Some((field, generation, in_use))
}
