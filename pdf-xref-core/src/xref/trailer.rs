//! PDF Trailer merging
//!
//! Collapses the trailer of every revision into one logical trailer
//! according to ISO 32000-1 Section 7.5.5 and 7.5.6

use crate::parser::{ObjectKey, ParseError, ParseResult, PdfDictionary, PdfObject};

/// Keys describing the xref section itself rather than the document
const UNMERGED_KEYS: &[&str] = &[
    "Prev",
    "XRefStm",
    "Type",
    "W",
    "Index",
    "Length",
    "Filter",
    "DecodeParms",
];

/// Accumulates trailers while the revision chain is walked newest first
#[derive(Debug, Default)]
pub struct TrailerMerger {
    trailer: PdfDictionary,
    offsets: Vec<u64>,
}

impl TrailerMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy in every key the logical trailer does not have yet and record
    /// where the physical trailer was found
    pub fn merge(&mut self, dict: &PdfDictionary, source_offset: u64) {
        self.fill_missing(dict);
        if !self.offsets.contains(&source_offset) {
            self.offsets.push(source_offset);
        }
    }

    /// Copy in missing keys without recording a source offset
    pub fn fill_missing(&mut self, dict: &PdfDictionary) {
        for (name, value) in dict.iter() {
            if UNMERGED_KEYS.contains(&name.as_str()) || self.trailer.0.contains_key(name) {
                continue;
            }
            self.trailer.0.insert(name.clone(), value.clone());
        }
    }

    /// Replace one key of the logical trailer with a value derived from the
    /// file contents rather than from a physical trailer
    pub fn set(&mut self, key: &str, value: PdfObject) {
        self.trailer.insert(key, value);
    }

    /// The logical trailer merged so far
    pub fn trailer(&self) -> &PdfDictionary {
        &self.trailer
    }

    /// Offsets of the physical trailers merged, in merge order
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn result(self) -> Trailer {
        Trailer {
            dict: self.trailer,
            offsets: self.offsets,
        }
    }
}

/// The logical trailer handed to the document loader
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailer {
    dict: PdfDictionary,
    offsets: Vec<u64>,
}

impl Trailer {
    /// Get the size (one past the highest object number)
    pub fn size(&self) -> ParseResult<u64> {
        self.dict
            .get("Size")
            .and_then(|obj| obj.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(|| ParseError::MissingKey("Size".to_string()))
    }

    /// Get the root object reference (document catalog)
    pub fn root(&self) -> ParseResult<ObjectKey> {
        self.dict
            .get("Root")
            .and_then(|obj| obj.as_reference())
            .ok_or_else(|| ParseError::MissingKey("Root".to_string()))
    }

    /// Get the info object reference (document information dictionary)
    pub fn info(&self) -> Option<ObjectKey> {
        self.dict.get("Info").and_then(|obj| obj.as_reference())
    }

    /// Get the ID array (file identifiers)
    pub fn id(&self) -> Option<&PdfObject> {
        self.dict.get("ID")
    }

    /// Check if this PDF is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.dict.contains_key("Encrypt")
    }

    /// Get the encryption dictionary reference
    pub fn encrypt(&self) -> Option<ObjectKey> {
        self.dict.get("Encrypt").and_then(|obj| obj.as_reference())
    }

    /// Validate the entries every trailer must carry
    pub fn validate(&self) -> ParseResult<()> {
        self.size()?;
        self.root()?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.dict.get(key)
    }

    /// Get access to the trailer dictionary
    pub fn dict(&self) -> &PdfDictionary {
        &self.dict
    }

    /// Offsets of the physical trailers this one was merged from
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}
