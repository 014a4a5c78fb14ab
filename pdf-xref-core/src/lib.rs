//! # pdf-xref
//!
//! Cross-reference resolution and recovery for PDF files.
//!
//! ## Features
//!
//! - **Revision chains**: follows `startxref`, `/Prev` and `/XRefStm` through
//!   classic tables and cross-reference streams, newest revision first
//! - **Trailer merging**: one logical trailer where newer revisions win
//! - **Offset validation**: bad offsets are dropped or, optionally, replaced
//!   by the nearest xref section found in the file
//! - **Consistency sweep**: every in-use offset is checked against the object
//!   header it points to
//! - **Brute-force recovery**: rebuilds the table and trailer from a full
//!   scan when nothing else works
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_xref::{resolve, ParseOptions};
//! use std::fs::File;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resolved = resolve(File::open("document.pdf")?)?;
//!
//! println!("Catalog: {}", resolved.trailer.root()?);
//! println!("Objects: {}", resolved.xref.len());
//! for diagnostic in &resolved.diagnostics {
//!     println!("{diagnostic}");
//! }
//!
//! // Also repair offsets that point at the wrong place
//! let resolved = pdf_xref::resolve_with_options(
//!     File::open("damaged.pdf")?,
//!     ParseOptions::tolerant(),
//! )?;
//! println!("Recovered: {}", resolved.recovered());
//! # Ok(())
//! # }
//! ```

pub mod parser;
pub mod recovery;
pub mod xref;

// Re-export the resolution API
pub use parser::{ObjectKey, ParseError, ParseOptions, ParseResult, PdfDictionary, PdfObject};
pub use recovery::RecoveryStats;
pub use xref::{
    resolve, resolve_with_options, Diagnostic, DiagnosticKind, ResolvedXref, Revision, Trailer,
    Xref, XrefEntry, XrefKind, XrefParser,
};
