//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2

use super::source::{is_delimiter, is_whitespace, SourceCursor};
use super::{ParseError, ParseResult};
use std::io::{Read, Seek};

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Boolean: true or false
    Boolean(bool),

    /// Integer number
    Integer(i64),

    /// Real number
    Real(f64),

    /// String (literal or hexadecimal)
    String(Vec<u8>),

    /// Name object (e.g., /Type)
    Name(String),

    /// Left square bracket [
    ArrayStart,

    /// Right square bracket ]
    ArrayEnd,

    /// Dictionary start <<
    DictStart,

    /// Dictionary end >>
    DictEnd,

    /// Stream keyword
    Stream,

    /// Endstream keyword
    EndStream,

    /// Obj keyword
    Obj,

    /// Endobj keyword
    EndObj,

    /// Xref keyword
    XRef,

    /// Trailer keyword
    Trailer,

    /// StartXRef keyword
    StartXRef,

    /// Null object
    Null,

    /// Any other bare word (`R`, `n`, `f`, operators, garbage)
    Keyword(String),

    /// Comment (usually ignored)
    Comment(String),

    /// End of file
    Eof,
}

/// PDF Lexer for tokenizing PDF content
///
/// Lookahead is done by saving and restoring the cursor position, so the
/// lexer never holds tokens that the cursor has already moved past.
pub struct Lexer<R> {
    source: SourceCursor<R>,
}

impl<R: Read + Seek> Lexer<R> {
    /// Create a new lexer from a reader
    pub fn new(reader: R) -> ParseResult<Self> {
        Ok(Self::from_source(SourceCursor::new(reader)?))
    }

    pub fn from_source(source: SourceCursor<R>) -> Self {
        Self { source }
    }

    /// Access the underlying byte cursor
    pub fn source(&mut self) -> &mut SourceCursor<R> {
        &mut self.source
    }

    /// Get current position
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    pub fn length(&self) -> u64 {
        self.source.length()
    }

    pub fn seek(&mut self, offset: u64) -> ParseResult<()> {
        self.source.seek(offset)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> ParseResult<Token> {
        self.source.skip_whitespace()?;

        let ch = match self.source.peek()? {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'%' => self.read_comment(),
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.source.read_byte()?;
                if self.source.peek()? == Some(b'>') {
                    self.source.read_byte()?;
                    Ok(Token::DictEnd)
                } else {
                    Err(self.syntax_error("Expected '>' after '>'"))
                }
            }
            b'[' => {
                self.source.read_byte()?;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.source.read_byte()?;
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            _ if is_delimiter(ch) => {
                self.source.read_byte()?;
                Err(self.syntax_error(&format!("Unexpected character: {}", ch as char)))
            }
            _ => {
                let word = self.read_word()?;
                Ok(Self::process_keyword(word))
            }
        }
    }

    /// Peek the next token without consuming it
    pub fn peek_token(&mut self) -> ParseResult<Token> {
        let saved = self.position();
        let token = self.next_token();
        self.seek(saved)?;
        token
    }

    /// Read the next token, which must be an integer
    pub fn next_integer(&mut self) -> ParseResult<i64> {
        match self.next_token()? {
            Token::Integer(value) => Ok(value),
            other => Err(ParseError::UnexpectedToken {
                expected: "integer".to_string(),
                found: format!("{other:?}"),
            }),
        }
    }

    /// Expect a specific keyword token
    pub fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        let token = self.next_token()?;
        let matches = match (keyword, &token) {
            ("stream", Token::Stream)
            | ("endstream", Token::EndStream)
            | ("obj", Token::Obj)
            | ("endobj", Token::EndObj)
            | ("xref", Token::XRef)
            | ("trailer", Token::Trailer)
            | ("startxref", Token::StartXRef) => true,
            (expected, Token::Keyword(word)) => expected == word,
            _ => false,
        };

        if matches {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: format!("keyword '{keyword}'"),
                found: format!("{token:?}"),
            })
        }
    }

    fn syntax_error(&self, message: &str) -> ParseError {
        ParseError::SyntaxError {
            position: self.position(),
            message: message.to_string(),
        }
    }

    /// Read a comment (from % to end of line)
    fn read_comment(&mut self) -> ParseResult<Token> {
        self.source.read_byte()?; // consume '%'
        let mut comment = String::new();

        while let Some(ch) = self.source.peek()? {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.source.read_byte()?;
            comment.push(ch as char);
        }

        Ok(Token::Comment(comment))
    }

    /// Read a name object (e.g., /Type)
    fn read_name(&mut self) -> ParseResult<Token> {
        self.source.read_byte()?; // consume '/'
        let mut name = String::new();

        while let Some(ch) = self.source.peek()? {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.source.read_byte()?;

            // Handle hex codes in names (e.g., /A#20B means /A B)
            if ch == b'#' {
                let hex1 = self.source.read_byte()?;
                let hex2 = self.source.read_byte()?;
                let value = match (hex1.and_then(hex_digit_value), hex2.and_then(hex_digit_value))
                {
                    (Some(high), Some(low)) => (high << 4) | low,
                    _ => return Err(self.syntax_error("Invalid hex code in name")),
                };
                name.push(value as char);
            } else {
                name.push(ch as char);
            }
        }

        Ok(Token::Name(name))
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> ParseResult<Token> {
        self.source.read_byte()?; // consume '('
        let mut string = Vec::new();
        let mut paren_depth = 1;
        let mut escape = false;

        while paren_depth > 0 {
            let ch = self
                .source
                .read_byte()?
                .ok_or_else(|| self.syntax_error("Unterminated string"))?;

            if escape {
                escape = false;
                let escaped = match ch {
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'b' => b'\x08',
                    b'f' => b'\x0C',
                    b'\r' => {
                        // Line continuation
                        if self.source.peek()? == Some(b'\n') {
                            self.source.read_byte()?;
                        }
                        continue;
                    }
                    b'\n' => continue,
                    b'0'..=b'7' => {
                        // Octal escape sequence
                        let mut value = (ch - b'0') as u16;
                        for _ in 0..2 {
                            match self.source.peek()? {
                                Some(next @ b'0'..=b'7') => {
                                    self.source.read_byte()?;
                                    value = value * 8 + (next - b'0') as u16;
                                }
                                _ => break,
                            }
                        }
                        value as u8
                    }
                    _ => ch, // Unknown escape, use literal
                };
                string.push(escaped);
            } else {
                match ch {
                    b'\\' => escape = true,
                    b'(' => {
                        string.push(ch);
                        paren_depth += 1;
                    }
                    b')' => {
                        paren_depth -= 1;
                        if paren_depth > 0 {
                            string.push(ch);
                        }
                    }
                    _ => string.push(ch),
                }
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> ParseResult<Token> {
        self.source.read_byte()?; // consume '<'

        if self.source.peek()? == Some(b'<') {
            self.source.read_byte()?;
            return Ok(Token::DictStart);
        }

        let mut digits = Vec::new();
        loop {
            let ch = self
                .source
                .read_byte()?
                .ok_or_else(|| self.syntax_error("Unterminated hex string"))?;
            match ch {
                b'>' => break,
                _ if is_whitespace(ch) => {}
                _ => match hex_digit_value(ch) {
                    Some(value) => digits.push(value),
                    None => return Err(self.syntax_error("Invalid character in hex string")),
                },
            }
        }

        // Pad with 0 if odd number of digits
        if digits.len() % 2 != 0 {
            digits.push(0);
        }

        let bytes = digits
            .chunks(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect();
        Ok(Token::String(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> ParseResult<Token> {
        let mut number_str = String::new();
        let mut has_dot = false;

        // Handle sign - consume it first
        if let Some(ch @ (b'+' | b'-')) = self.source.peek()? {
            self.source.read_byte()?;
            number_str.push(ch as char);
        }

        // Read digits and decimal point
        while let Some(ch) = self.source.peek()? {
            match ch {
                b'0'..=b'9' => {
                    self.source.read_byte()?;
                    number_str.push(ch as char);
                }
                b'.' if !has_dot => {
                    self.source.read_byte()?;
                    number_str.push(ch as char);
                    has_dot = true;
                }
                _ => break,
            }
        }

        if has_dot {
            let value = number_str
                .parse::<f64>()
                .map_err(|_| self.syntax_error(&format!("Invalid real number: '{number_str}'")))?;
            Ok(Token::Real(value))
        } else {
            let value = number_str
                .parse::<i64>()
                .map_err(|_| self.syntax_error(&format!("Invalid integer: '{number_str}'")))?;
            Ok(Token::Integer(value))
        }
    }

    /// Process a word as a keyword
    fn process_keyword(word: String) -> Token {
        match word.as_str() {
            "true" => Token::Boolean(true),
            "false" => Token::Boolean(false),
            "null" => Token::Null,
            "stream" => Token::Stream,
            "endstream" => Token::EndStream,
            "obj" => Token::Obj,
            "endobj" => Token::EndObj,
            "xref" => Token::XRef,
            "trailer" => Token::Trailer,
            "startxref" => Token::StartXRef,
            _ => Token::Keyword(word),
        }
    }

    /// Read a word (sequence of non-delimiter characters)
    fn read_word(&mut self) -> ParseResult<String> {
        let mut word = String::new();

        while let Some(ch) = self.source.peek()? {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.source.read_byte()?;
            word.push(ch as char);
        }

        Ok(word)
    }
}

/// Get value of hex digit
pub(crate) fn hex_digit_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lexer(input: &[u8]) -> Lexer<Cursor<Vec<u8>>> {
        Lexer::new(Cursor::new(input.to_vec())).unwrap()
    }

    #[test]
    fn test_lexer_basic_tokens() {
        let mut lexer = lexer(b"123 -456 3.14 true false null /Name");

        assert_eq!(lexer.next_token().unwrap(), Token::Integer(123));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(-456));
        assert_eq!(lexer.next_token().unwrap(), Token::Real(3.14));
        assert_eq!(lexer.next_token().unwrap(), Token::Boolean(true));
        assert_eq!(lexer.next_token().unwrap(), Token::Boolean(false));
        assert_eq!(lexer.next_token().unwrap(), Token::Null);
        assert_eq!(lexer.next_token().unwrap(), Token::Name("Name".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_xref_keywords() {
        let mut lexer = lexer(b"xref\n0 1\n0000000000 65535 f \ntrailer startxref");

        assert_eq!(lexer.next_token().unwrap(), Token::XRef);
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(0));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(1));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(0));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(65535));
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Keyword("f".to_string())
        );
        assert_eq!(lexer.next_token().unwrap(), Token::Trailer);
        assert_eq!(lexer.next_token().unwrap(), Token::StartXRef);
    }

    #[test]
    fn test_lexer_references_are_separate_tokens() {
        let mut lexer = lexer(b"12 0 R");

        assert_eq!(lexer.next_token().unwrap(), Token::Integer(12));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(0));
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Keyword("R".to_string())
        );
    }

    #[test]
    fn test_lexer_strings() {
        let mut lexer = lexer(b"(Hello (nested) \\101\\n) <48656C6C6F> <7>");

        assert_eq!(
            lexer.next_token().unwrap(),
            Token::String(b"Hello (nested) A\n".to_vec())
        );
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::String(b"Hello".to_vec())
        );
        assert_eq!(lexer.next_token().unwrap(), Token::String(vec![0x70]));
    }

    #[test]
    fn test_lexer_string_line_continuation() {
        let mut lexer = lexer(b"(ab\\\r\ncd)");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::String(b"abcd".to_vec())
        );
    }

    #[test]
    fn test_lexer_name_hex_escape() {
        let mut lexer = lexer(b"/A#20B /XRefStm");
        assert_eq!(lexer.next_token().unwrap(), Token::Name("A B".to_string()));
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Name("XRefStm".to_string())
        );
    }

    #[test]
    fn test_lexer_dictionaries_and_arrays() {
        let mut lexer = lexer(b"<< /W [1 2 1] >>");

        assert_eq!(lexer.next_token().unwrap(), Token::DictStart);
        assert_eq!(lexer.next_token().unwrap(), Token::Name("W".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::ArrayStart);
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(1));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(2));
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(1));
        assert_eq!(lexer.next_token().unwrap(), Token::ArrayEnd);
        assert_eq!(lexer.next_token().unwrap(), Token::DictEnd);
    }

    #[test]
    fn test_lexer_comments() {
        let mut lexer = lexer(b"%PDF-1.7\n123 %%EOF");

        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Comment("PDF-1.7".to_string())
        );
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(123));
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::Comment("%EOF".to_string())
        );
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_peek_token_restores_position() {
        let mut lexer = lexer(b"  42 obj");

        assert_eq!(lexer.peek_token().unwrap(), Token::Integer(42));
        assert_eq!(lexer.position(), 0);
        assert_eq!(lexer.next_token().unwrap(), Token::Integer(42));
        assert_eq!(lexer.next_token().unwrap(), Token::Obj);
    }

    #[test]
    fn test_expect_keyword() {
        let mut lexer = lexer(b"obj endobj trailer n");

        assert!(lexer.expect_keyword("obj").is_ok());
        assert!(lexer.expect_keyword("endobj").is_ok());
        assert!(lexer.expect_keyword("xref").is_err());
        assert!(lexer.expect_keyword("n").is_ok());
    }

    #[test]
    fn test_errors_always_make_progress() {
        let mut lexer = lexer(b") } +x");

        assert!(lexer.next_token().is_err());
        assert_eq!(lexer.position(), 1);
        assert!(lexer.next_token().is_err());
        assert_eq!(lexer.position(), 3);
        assert!(lexer.next_token().is_err());
        assert_eq!(lexer.position(), 5);
    }

    #[test]
    fn test_next_integer() {
        let mut lexer = lexer(b"17 /Name");
        assert_eq!(lexer.next_integer().unwrap(), 17);
        assert!(lexer.next_integer().is_err());
    }

    #[test]
    fn test_unterminated_hex_string() {
        let mut lexer = lexer(b"<4142");
        assert!(matches!(
            lexer.next_token(),
            Err(ParseError::SyntaxError { .. })
        ));
    }
}
