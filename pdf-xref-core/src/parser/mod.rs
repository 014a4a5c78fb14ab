//! PDF Parser Module
//!
//! Low-level building blocks used by the cross-reference engine: a buffered
//! byte cursor, a tokenizer for ISO 32000-1 Section 7.2 syntax, the direct
//! object model, stream filters and object streams.

pub mod filters;
pub mod lexer;
pub mod object_stream;
pub mod objects;
pub mod source;

pub use self::lexer::{Lexer, Token};
pub use self::object_stream::ObjectStream;
pub use self::objects::{
    IndirectObject, ObjectKey, PdfArray, PdfDictionary, PdfName, PdfObject, PdfStream, PdfString,
};
pub use self::source::SourceCursor;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Default limit for nested arrays and dictionaries
pub const MAX_NESTING_DEPTH: usize = 256;

/// Options controlling how tolerant the parser is of malformed input
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Fail instead of falling back when the primary xref path is unusable
    pub strict_mode: bool,
    /// Recover stream bodies whose /Length is missing, indirect or wrong
    pub lenient_streams: bool,
    /// Upper bound on bytes scanned when searching for `endstream`
    pub max_recovery_bytes: usize,
    /// Keep diagnostics in the result (they are always logged)
    pub collect_warnings: bool,
    /// Trailing window searched for `startxref`
    pub startxref_search_window: usize,
    /// Second, larger window searched when the first one misses; 0 disables
    pub extended_startxref_search_window: usize,
    /// Substitute the nearest plausible xref location for an invalid offset
    pub repair_xref_offsets: bool,
    /// Check every in-use offset against the object header it points to
    pub verify_object_offsets: bool,
    /// Rebuild the xref by scanning the whole file when the chain is unusable
    pub brute_force_recovery: bool,
    /// Index members of object streams found during recovery
    pub recover_object_streams: bool,
    /// Maximum number of revisions followed through /Prev
    pub max_revisions: usize,
    /// Deepest array/dictionary nesting accepted inside one object
    pub max_nesting_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParseOptions {
    /// Reject anything that does not follow the file format exactly
    pub fn strict() -> Self {
        Self {
            strict_mode: true,
            lenient_streams: false,
            max_recovery_bytes: 0,
            collect_warnings: true,
            startxref_search_window: 2048,
            extended_startxref_search_window: 0,
            repair_xref_offsets: false,
            verify_object_offsets: true,
            brute_force_recovery: false,
            recover_object_streams: false,
            max_revisions: 1024,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }

    /// Default behaviour: degrade gracefully, drop links that cannot be trusted
    pub fn lenient() -> Self {
        Self {
            strict_mode: false,
            lenient_streams: true,
            max_recovery_bytes: 1024 * 1024,
            collect_warnings: true,
            startxref_search_window: 2048,
            extended_startxref_search_window: 64 * 1024,
            repair_xref_offsets: false,
            verify_object_offsets: true,
            brute_force_recovery: true,
            recover_object_streams: true,
            max_revisions: 1024,
            max_nesting_depth: MAX_NESTING_DEPTH,
        }
    }

    /// Like [`ParseOptions::lenient`], but also repairs bad offsets from a file scan
    pub fn tolerant() -> Self {
        Self {
            repair_xref_offsets: true,
            max_recovery_bytes: 16 * 1024 * 1024,
            ..Self::lenient()
        }
    }
}

/// PDF Parser errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error at position {position}: {message}")]
    SyntaxError { position: u64, message: String },

    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Missing required key: {0}")]
    MissingKey(String),

    #[error("Invalid xref table")]
    InvalidXRef,

    #[error("Invalid trailer")]
    InvalidTrailer,

    #[error("Offset {offset} is outside the file (length {length})")]
    InvalidOffset { offset: u64, length: u64 },

    #[error("Stream decode error: {0}")]
    StreamDecodeError(String),

    #[error("No object definitions could be recovered: {0}")]
    UnrecoverableInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_lenient() {
        let options = ParseOptions::default();
        assert!(!options.strict_mode);
        assert!(options.lenient_streams);
        assert!(options.brute_force_recovery);
        assert!(!options.repair_xref_offsets);
        assert_eq!(options.startxref_search_window, 2048);
    }

    #[test]
    fn test_strict_options_disable_recovery() {
        let options = ParseOptions::strict();
        assert!(options.strict_mode);
        assert!(!options.brute_force_recovery);
        assert!(!options.lenient_streams);
        assert_eq!(options.extended_startxref_search_window, 0);
    }

    #[test]
    fn test_tolerant_options_repair_offsets() {
        let options = ParseOptions::tolerant();
        assert!(options.repair_xref_offsets);
        assert!(options.brute_force_recovery);
        assert!(options.max_recovery_bytes > ParseOptions::lenient().max_recovery_bytes);
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::InvalidOffset {
            offset: 900,
            length: 120,
        };
        assert_eq!(
            err.to_string(),
            "Offset 900 is outside the file (length 120)"
        );

        let err = ParseError::SyntaxError {
            position: 12,
            message: "Unterminated string".to_string(),
        };
        assert!(err.to_string().contains("position 12"));
    }
}
