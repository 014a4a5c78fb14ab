//! Cross-reference resolution
//!
//! Turns the xref sections and trailers of a PDF into one [`Xref`] table and
//! one logical [`Trailer`], recovering from broken offsets where possible.

pub mod diagnostics;
pub mod parser;
pub mod stream;
pub mod table;
pub mod trailer;

pub use self::diagnostics::{Diagnostic, DiagnosticKind};
pub use self::parser::{FallbackAction, ResolvedXref, Revision, XrefKind, XrefParser};
pub use self::stream::{XrefStreamDecoder, XrefStreamEncoder, XrefStreamLayout};
pub use self::table::{Xref, XrefEntry};
pub use self::trailer::{Trailer, TrailerMerger};

use crate::parser::{ParseOptions, ParseResult};
use std::io::{Read, Seek};

/// Resolve the cross-reference data of `reader` with default options
pub fn resolve<R: Read + Seek>(reader: R) -> ParseResult<ResolvedXref> {
    XrefParser::new(reader)?.parse()
}

/// Resolve the cross-reference data of `reader`
pub fn resolve_with_options<R: Read + Seek>(
    reader: R,
    options: ParseOptions,
) -> ParseResult<ResolvedXref> {
    XrefParser::with_options(reader, options)?.parse()
}
