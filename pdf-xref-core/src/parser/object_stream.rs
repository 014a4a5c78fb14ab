//! PDF Object Stream Parser
//!
//! Handles compressed objects stored in object streams (PDF 1.5+)

use super::lexer::Lexer;
use super::objects::{PdfObject, PdfStream};
use super::{ParseError, ParseOptions, ParseResult};
use std::io::Cursor;

/// Represents a PDF object stream containing compressed objects
#[derive(Debug)]
pub struct ObjectStream {
    /// Decoded stream content
    data: Vec<u8>,
    /// Offset of first object
    first: u64,
    /// (object number, offset relative to `first`) in stream order
    members: Vec<(u64, u64)>,
}

impl ObjectStream {
    /// Parse an object stream header
    pub fn parse(stream: &PdfStream, options: &ParseOptions) -> ParseResult<Self> {
        let dict = &stream.dict;

        let n = dict
            .get("N")
            .and_then(|obj| obj.as_integer())
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| ParseError::MissingKey("N".to_string()))?;

        let first = dict
            .get("First")
            .and_then(|obj| obj.as_integer())
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| ParseError::MissingKey("First".to_string()))?;

        let data = stream.decode()?;
        let members = Self::parse_header(&data, n, options)?;

        Ok(Self {
            data,
            first,
            members,
        })
    }

    fn parse_header(data: &[u8], n: u64, options: &ParseOptions) -> ParseResult<Vec<(u64, u64)>> {
        let mut lexer = Lexer::new(Cursor::new(data))?;
        let mut members = Vec::new();

        for _ in 0..n {
            let pair = lexer.next_integer().and_then(|number| {
                let offset = lexer.next_integer()?;
                match (u64::try_from(number), u64::try_from(offset)) {
                    (Ok(number), Ok(offset)) => Ok((number, offset)),
                    _ => Err(ParseError::SyntaxError {
                        position: lexer.position(),
                        message: "Negative entry in object stream header".to_string(),
                    }),
                }
            });

            match pair {
                Ok(pair) => members.push(pair),
                Err(e) if options.strict_mode => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        "Object stream header truncated after {} of {} entries: {}",
                        members.len(),
                        n,
                        e
                    );
                    break;
                }
            }
        }

        Ok(members)
    }

    /// Number of objects listed in the header
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Object numbers in stream order; the position is the index within the stream
    pub fn member_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.members.iter().map(|(number, _)| *number)
    }

    /// Parse the object stored at `index`
    pub fn object(&self, index: usize, options: &ParseOptions) -> ParseResult<PdfObject> {
        let (number, relative) = *self.members.get(index).ok_or_else(|| {
            ParseError::SyntaxError {
                position: 0,
                message: format!("Object stream has no member at index {index}"),
            }
        })?;

        let offset = self.first.saturating_add(relative);
        let mut lexer = Lexer::new(Cursor::new(self.data.as_slice()))?;
        lexer.seek(offset).map_err(|_| ParseError::SyntaxError {
            position: offset,
            message: format!("Object {number} lies outside its object stream"),
        })?;
        PdfObject::parse(&mut lexer, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::objects::PdfDictionary;

    fn object_stream(header: &str, body: &str, n: i64) -> PdfStream {
        let mut dict = PdfDictionary::new();
        dict.insert("Type", PdfObject::Name(crate::parser::PdfName("ObjStm".to_string())));
        dict.insert("N", PdfObject::Integer(n));
        dict.insert("First", PdfObject::Integer(header.len() as i64));
        PdfStream {
            dict,
            data: format!("{header}{body}").into_bytes(),
        }
    }

    #[test]
    fn test_parse_members() {
        let body = "<< /Type /Catalog >> << /Title (Doc) >>";
        let stream = object_stream("10 0 11 21 ", body, 2);
        let options = ParseOptions::default();

        let objstm = ObjectStream::parse(&stream, &options).unwrap();
        assert_eq!(objstm.len(), 2);
        assert_eq!(objstm.member_numbers().collect::<Vec<_>>(), vec![10, 11]);

        let catalog = objstm.object(0, &options).unwrap();
        assert_eq!(catalog.as_dict().unwrap().get_type(), Some("Catalog"));

        let info = objstm.object(1, &options).unwrap();
        assert!(info.as_dict().unwrap().contains_key("Title"));

        assert!(objstm.object(2, &options).is_err());
    }

    #[test]
    fn test_missing_first() {
        let mut stream = object_stream("1 0 ", "null", 1);
        stream.dict = PdfDictionary::new();
        stream.dict.insert("N", PdfObject::Integer(1));

        assert!(matches!(
            ObjectStream::parse(&stream, &ParseOptions::default()),
            Err(ParseError::MissingKey(key)) if key == "First"
        ));
    }

    #[test]
    fn test_truncated_header() {
        let stream = object_stream("5 0 6 ", "null", 3);

        let lenient = ObjectStream::parse(&stream, &ParseOptions::lenient()).unwrap();
        assert_eq!(lenient.member_numbers().collect::<Vec<_>>(), vec![5]);

        assert!(ObjectStream::parse(&stream, &ParseOptions::strict()).is_err());
    }
}
