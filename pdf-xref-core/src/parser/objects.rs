//! PDF Object Parser
//!
//! Parses PDF objects from tokens according to ISO 32000-1 Section 7.3

use super::lexer::{Lexer, Token};
use super::{ParseError, ParseOptions, ParseResult};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek};

/// Identity of one versioned object slot: object number plus generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub number: u64,
    pub generation: u32,
}

impl ObjectKey {
    pub fn new(number: u64, generation: u32) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// PDF Name object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PdfName(pub String);

/// PDF String object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfString(pub Vec<u8>);

/// PDF Array object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfArray(pub Vec<PdfObject>);

/// PDF Dictionary object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfDictionary(pub HashMap<PdfName, PdfObject>);

/// PDF Stream object
#[derive(Debug, Clone, PartialEq)]
pub struct PdfStream {
    pub dict: PdfDictionary,
    pub data: Vec<u8>,
}

impl PdfStream {
    /// Get the decoded stream data
    pub fn decode(&self) -> ParseResult<Vec<u8>> {
        super::filters::decode_stream(&self.data, &self.dict)
    }

    /// Get the raw (possibly compressed) stream data
    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }
}

/// PDF Object types
#[derive(Debug, Clone, PartialEq)]
pub enum PdfObject {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(PdfString),
    Name(PdfName),
    Array(PdfArray),
    Dictionary(PdfDictionary),
    Stream(PdfStream),
    Reference(ObjectKey),
}

/// An object definition `n g obj ... endobj` read from the file
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub key: ObjectKey,
    pub object: PdfObject,
}

impl IndirectObject {
    /// Parse an indirect object at the current position
    pub fn parse<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
    ) -> ParseResult<Self> {
        let key = parse_indirect_header(lexer)?;
        let object = PdfObject::parse(lexer, options)?;

        // endobj is frequently missing or damaged; its absence is not an error
        let saved = lexer.position();
        if !matches!(lexer.next_token(), Ok(Token::EndObj)) {
            lexer.seek(saved)?;
        }

        Ok(Self { key, object })
    }
}

/// Read an object header `n g obj` and return its key
pub fn parse_indirect_header<R: Read + Seek>(lexer: &mut Lexer<R>) -> ParseResult<ObjectKey> {
    let position = lexer.position();
    let number = lexer.next_integer()?;
    let generation = lexer.next_integer()?;
    lexer.expect_keyword("obj")?;

    match (u64::try_from(number), u32::try_from(generation)) {
        (Ok(number), Ok(generation)) => Ok(ObjectKey::new(number, generation)),
        _ => Err(ParseError::SyntaxError {
            position,
            message: format!("Invalid object header {number} {generation} obj"),
        }),
    }
}

impl PdfObject {
    /// Parse a PDF object from a lexer
    pub fn parse<R: Read + Seek>(lexer: &mut Lexer<R>, options: &ParseOptions) -> ParseResult<Self> {
        Self::parse_nested(lexer, options, 0)
    }

    fn parse_nested<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
        depth: usize,
    ) -> ParseResult<Self> {
        loop {
            match lexer.next_token()? {
                Token::Comment(_) => continue,
                token => return Self::parse_from_token(lexer, token, options, depth),
            }
        }
    }

    /// Parse a dictionary without looking for stream data after it
    pub fn parse_dictionary<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
    ) -> ParseResult<PdfDictionary> {
        loop {
            match lexer.next_token()? {
                Token::DictStart => return Self::parse_dictionary_inner(lexer, options, 1),
                Token::Comment(_) => continue,
                token => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "<<".to_string(),
                        found: format!("{token:?}"),
                    })
                }
            }
        }
    }

    /// Parse a PDF object starting from a specific token
    fn parse_from_token<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        token: Token,
        options: &ParseOptions,
        depth: usize,
    ) -> ParseResult<Self> {
        let nests = matches!(token, Token::ArrayStart | Token::DictStart);
        if nests && depth >= options.max_nesting_depth {
            return Err(ParseError::SyntaxError {
                position: lexer.position(),
                message: format!(
                    "Maximum nesting depth exceeded (limit: {})",
                    options.max_nesting_depth
                ),
            });
        }

        match token {
            Token::Null => Ok(PdfObject::Null),
            Token::Boolean(b) => Ok(PdfObject::Boolean(b)),
            Token::Integer(i) => Self::parse_integer_or_reference(lexer, i),
            Token::Real(r) => Ok(PdfObject::Real(r)),
            Token::String(s) => Ok(PdfObject::String(PdfString(s))),
            Token::Name(n) => Ok(PdfObject::Name(PdfName(n))),
            Token::ArrayStart => Self::parse_array(lexer, options, depth + 1),
            Token::DictStart => Self::parse_dictionary_or_stream(lexer, options, depth + 1),
            Token::Comment(_) => Self::parse_nested(lexer, options, depth),
            Token::Eof => Err(ParseError::SyntaxError {
                position: lexer.position(),
                message: "Unexpected end of file".to_string(),
            }),
            _ => Err(ParseError::UnexpectedToken {
                expected: "PDF object".to_string(),
                found: format!("{token:?}"),
            }),
        }
    }

    /// An integer may be the first part of `n g R`
    fn parse_integer_or_reference<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        value: i64,
    ) -> ParseResult<Self> {
        let saved = lexer.position();

        if let (Ok(number), Ok(Token::Integer(generation))) =
            (u64::try_from(value), lexer.next_token())
        {
            if let Ok(generation) = u32::try_from(generation) {
                if let Ok(Token::Keyword(word)) = lexer.next_token() {
                    if word == "R" {
                        return Ok(PdfObject::Reference(ObjectKey::new(number, generation)));
                    }
                }
            }
        }

        lexer.seek(saved)?;
        Ok(PdfObject::Integer(value))
    }

    /// Parse a PDF array
    fn parse_array<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
        depth: usize,
    ) -> ParseResult<Self> {
        let mut elements = Vec::new();

        loop {
            let token = lexer.next_token()?;
            match token {
                Token::ArrayEnd => break,
                Token::Comment(_) => continue, // Skip comments
                _ => {
                    let obj = Self::parse_from_token(lexer, token, options, depth)?;
                    elements.push(obj);
                }
            }
        }

        Ok(PdfObject::Array(PdfArray(elements)))
    }

    /// Parse a PDF dictionary and check if it's followed by a stream
    fn parse_dictionary_or_stream<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
        depth: usize,
    ) -> ParseResult<Self> {
        let dict = Self::parse_dictionary_inner(lexer, options, depth)?;

        let saved = lexer.position();
        loop {
            match lexer.next_token() {
                Ok(Token::Stream) => {
                    let data = Self::parse_stream_data(lexer, &dict, options)?;
                    return Ok(PdfObject::Stream(PdfStream { dict, data }));
                }
                Ok(Token::Comment(_)) => continue,
                _ => {
                    // Not a stream, just a dictionary
                    lexer.seek(saved)?;
                    return Ok(PdfObject::Dictionary(dict));
                }
            }
        }
    }

    /// Parse the inner dictionary
    fn parse_dictionary_inner<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        options: &ParseOptions,
        depth: usize,
    ) -> ParseResult<PdfDictionary> {
        let mut dict = HashMap::new();

        loop {
            let token = lexer.next_token()?;
            match token {
                Token::DictEnd => break,
                Token::Comment(_) => continue, // Skip comments
                Token::Name(key) => {
                    let value = Self::parse_nested(lexer, options, depth)?;
                    dict.insert(PdfName(key), value);
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "dictionary key (name) or >>".to_string(),
                        found: format!("{token:?}"),
                    });
                }
            }
        }

        Ok(PdfDictionary(dict))
    }

    /// Parse stream data following the `stream` keyword
    fn parse_stream_data<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        dict: &PdfDictionary,
        options: &ParseOptions,
    ) -> ParseResult<Vec<u8>> {
        // The keyword is followed by CRLF or LF; a lone CR is tolerated
        let source = lexer.source();
        match source.peek()? {
            Some(b'\r') => {
                source.read_byte()?;
                if source.peek()? == Some(b'\n') {
                    source.read_byte()?;
                }
            }
            Some(b'\n') => {
                source.read_byte()?;
            }
            _ => {}
        }
        let data_start = lexer.position();

        let declared = match dict.get("Length") {
            Some(PdfObject::Integer(len)) if *len >= 0 => Some(*len as u64),
            _ => None,
        };

        if let Some(length) = declared {
            if let Some(data) = Self::read_declared_stream(lexer, data_start, length)? {
                return Ok(data);
            }
        }

        if !options.lenient_streams {
            return Err(match dict.get("Length") {
                None => ParseError::MissingKey("Length".to_string()),
                Some(_) => ParseError::SyntaxError {
                    position: data_start,
                    message: "Stream /Length does not match the stream data".to_string(),
                },
            });
        }

        tracing::debug!(
            "Recovering stream at {} by searching for endstream",
            data_start
        );
        lexer.seek(data_start)?;
        let end = lexer
            .source()
            .find_forward(b"endstream", options.max_recovery_bytes as u64)?
            .ok_or_else(|| ParseError::SyntaxError {
                position: data_start,
                message: "Could not find endstream".to_string(),
            })?;

        let mut data = lexer.source().read_at(data_start, (end - data_start) as usize)?;
        // Drop the end-of-line marker that precedes endstream
        if data.last() == Some(&b'\n') {
            data.pop();
        }
        if data.last() == Some(&b'\r') {
            data.pop();
        }
        lexer.seek(end)?;
        lexer.expect_keyword("endstream")?;
        Ok(data)
    }

    /// Read a stream using its direct /Length. Returns `None` when the length
    /// is not followed by `endstream`.
    fn read_declared_stream<R: Read + Seek>(
        lexer: &mut Lexer<R>,
        data_start: u64,
        length: u64,
    ) -> ParseResult<Option<Vec<u8>>> {
        if data_start.saturating_add(length) > lexer.length() {
            return Ok(None);
        }

        let data = lexer.source().read_bytes(length as usize)?;
        let after_data = lexer.position();
        if matches!(lexer.next_token(), Ok(Token::EndStream)) {
            return Ok(Some(data));
        }

        lexer.seek(after_data)?;
        Ok(None)
    }

    /// Check if this object is null
    pub fn is_null(&self) -> bool {
        matches!(self, PdfObject::Null)
    }

    /// Get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PdfObject::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as name
    pub fn as_name(&self) -> Option<&PdfName> {
        match self {
            PdfObject::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&PdfArray> {
        match self {
            PdfObject::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as dictionary
    pub fn as_dict(&self) -> Option<&PdfDictionary> {
        match self {
            PdfObject::Dictionary(d) => Some(d),
            PdfObject::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    /// Get as stream
    pub fn as_stream(&self) -> Option<&PdfStream> {
        match self {
            PdfObject::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Get as reference
    pub fn as_reference(&self) -> Option<ObjectKey> {
        match self {
            PdfObject::Reference(key) => Some(*key),
            _ => None,
        }
    }
}

impl PdfDictionary {
    /// Create a new empty dictionary
    pub fn new() -> Self {
        PdfDictionary(HashMap::new())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&PdfObject> {
        self.0.get(&PdfName(key.to_string()))
    }

    /// Insert a key-value pair
    pub fn insert(&mut self, key: impl Into<String>, value: PdfObject) {
        self.0.insert(PdfName(key.into()), value);
    }

    /// Check if dictionary contains a key
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&PdfName(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = (&PdfName, &PdfObject)> {
        self.0.iter()
    }

    /// Get the dictionary type (value of /Type key)
    pub fn get_type(&self) -> Option<&str> {
        self.get("Type")
            .and_then(|obj| obj.as_name())
            .map(|n| n.0.as_str())
    }
}

impl PdfArray {
    /// Get array length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if array is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get element at index
    pub fn get(&self, index: usize) -> Option<&PdfObject> {
        self.0.get(index)
    }
}

impl PdfName {
    /// Get the name as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
