//! PDF Stream Filters
//!
//! Handles decompression and decoding of PDF streams according to ISO 32000-1 Section 7.4

use super::lexer::hex_digit_value;
use super::objects::{PdfDictionary, PdfObject};
use super::source::is_whitespace;
use super::{ParseError, ParseResult};

#[cfg(feature = "compression")]
use flate2::read::ZlibDecoder;
#[cfg(feature = "compression")]
use std::io::Read;

/// PDF filters
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// ASCII hex decode
    ASCIIHexDecode,

    /// ASCII 85 decode
    ASCII85Decode,

    /// LZW decode
    LZWDecode,

    /// Flate decode (zlib/deflate compression)
    FlateDecode,

    /// Run length decode
    RunLengthDecode,

    /// Crypt filter
    Crypt,
}

impl Filter {
    /// Parse filter from name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ASCIIHexDecode" | "AHx" => Some(Filter::ASCIIHexDecode),
            "ASCII85Decode" | "A85" => Some(Filter::ASCII85Decode),
            "LZWDecode" | "LZW" => Some(Filter::LZWDecode),
            "FlateDecode" | "Fl" => Some(Filter::FlateDecode),
            "RunLengthDecode" | "RL" => Some(Filter::RunLengthDecode),
            "Crypt" => Some(Filter::Crypt),
            _ => None,
        }
    }
}

/// Decode stream data according to specified filters
pub fn decode_stream(data: &[u8], dict: &PdfDictionary) -> ParseResult<Vec<u8>> {
    // Get filter(s) from dictionary
    let filters = match dict.get("Filter") {
        Some(PdfObject::Name(name)) => vec![name.as_str()],
        Some(PdfObject::Array(array)) => {
            let mut filter_names = Vec::new();
            for obj in &array.0 {
                match obj {
                    PdfObject::Name(name) => filter_names.push(name.as_str()),
                    _ => {
                        return Err(ParseError::StreamDecodeError(
                            "Invalid filter in array".to_string(),
                        ))
                    }
                }
            }
            filter_names
        }
        None | Some(PdfObject::Null) => return Ok(data.to_vec()),
        _ => {
            return Err(ParseError::StreamDecodeError(
                "Invalid Filter type".to_string(),
            ));
        }
    };

    // Apply filters in order
    let mut result = data.to_vec();
    for (index, filter_name) in filters.into_iter().enumerate() {
        let filter = Filter::from_name(filter_name).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Unknown filter: {filter_name}"))
        })?;

        result = apply_filter(&result, &filter)?;

        if let Some(predictor) = decode_params(dict, index).and_then(Predictor::from_params) {
            result = predictor.decode(&result)?;
        }
    }

    Ok(result)
}

/// The /DecodeParms entry that belongs to the filter at `index`
fn decode_params(dict: &PdfDictionary, index: usize) -> Option<&PdfDictionary> {
    match dict.get("DecodeParms").or_else(|| dict.get("DP"))? {
        PdfObject::Dictionary(params) if index == 0 => Some(params),
        PdfObject::Array(array) => match array.get(index)? {
            PdfObject::Dictionary(params) => Some(params),
            _ => None,
        },
        _ => None,
    }
}

/// Apply a single filter to data
fn apply_filter(data: &[u8], filter: &Filter) -> ParseResult<Vec<u8>> {
    match filter {
        Filter::FlateDecode => decode_flate(data),
        Filter::ASCIIHexDecode => decode_ascii_hex(data),
        Filter::ASCII85Decode => decode_ascii85(data),
        _ => Err(ParseError::StreamDecodeError(format!(
            "Filter {filter:?} is not supported"
        ))),
    }
}

/// Decode FlateDecode (zlib/deflate) compressed data
#[cfg(feature = "compression")]
fn decode_flate(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut result = Vec::new();
    match decoder.read_to_end(&mut result) {
        Ok(_) => Ok(result),
        // A damaged tail still leaves the decoded prefix usable
        Err(e) if !result.is_empty() => {
            tracing::debug!("Flate stream truncated after {} bytes: {}", result.len(), e);
            Ok(result)
        }
        Err(e) => Err(ParseError::StreamDecodeError(format!(
            "Flate decode error: {e}"
        ))),
    }
}

#[cfg(not(feature = "compression"))]
fn decode_flate(_data: &[u8]) -> ParseResult<Vec<u8>> {
    Err(ParseError::StreamDecodeError(
        "FlateDecode requires 'compression' feature".to_string(),
    ))
}

/// Decode ASCIIHexDecode data
fn decode_ascii_hex(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut digits = Vec::new();
    for &ch in data {
        if ch == b'>' {
            break;
        }
        if is_whitespace(ch) {
            continue;
        }
        let value = hex_digit_value(ch).ok_or_else(|| {
            ParseError::StreamDecodeError(format!("Invalid hex digit: {}", ch as char))
        })?;
        digits.push(value);
    }

    // Pad with 0 if odd number of digits
    if digits.len() % 2 != 0 {
        digits.push(0);
    }

    Ok(digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

/// Decode ASCII85Decode data
fn decode_ascii85(data: &[u8]) -> ParseResult<Vec<u8>> {
    let mut result = Vec::new();
    let mut group = Vec::with_capacity(5);

    let mut body = data;
    if let Some(rest) = body.strip_prefix(b"<~") {
        body = rest;
    }

    for &c in body.iter().filter(|&&b| !is_whitespace(b)) {
        match c {
            b'~' => break,
            b'z' if group.is_empty() => result.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group.push(c);
                if group.len() == 5 {
                    result.extend_from_slice(&ascii85_group(&group)?);
                    group.clear();
                }
            }
            _ => {
                return Err(ParseError::StreamDecodeError(format!(
                    "Invalid ASCII85 character: {}",
                    c as char
                )));
            }
        }
    }

    // Handle incomplete final group
    if !group.is_empty() {
        let original_len = group.len();
        if original_len == 1 {
            return Err(ParseError::StreamDecodeError(
                "Invalid ASCII85 final group".to_string(),
            ));
        }
        group.resize(5, b'u');
        let bytes = ascii85_group(&group)?;
        result.extend_from_slice(&bytes[..original_len - 1]);
    }

    Ok(result)
}

fn ascii85_group(group: &[u8]) -> ParseResult<[u8; 4]> {
    let value = group
        .iter()
        .try_fold(0u64, |acc, &ch| Some(acc * 85 + (ch - b'!') as u64))
        .filter(|value| *value <= u32::MAX as u64)
        .ok_or_else(|| ParseError::StreamDecodeError("ASCII85 group overflow".to_string()))?;
    Ok((value as u32).to_be_bytes())
}

/// PNG and TIFF predictors applied after decompression (ISO 32000-1 Table 8)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predictor {
    kind: PredictorKind,
    colors: usize,
    bits_per_component: usize,
    columns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PredictorKind {
    Tiff,
    Png,
}

impl Predictor {
    /// Build a predictor from /DecodeParms. Returns `None` for predictor 1 or absent.
    pub fn from_params(params: &PdfDictionary) -> Option<Self> {
        let int = |key: &str, default: i64| {
            params
                .get(key)
                .and_then(|obj| obj.as_integer())
                .unwrap_or(default)
        };

        let kind = match int("Predictor", 1) {
            2 => PredictorKind::Tiff,
            10..=15 => PredictorKind::Png,
            _ => return None,
        };

        Some(Self {
            kind,
            colors: int("Colors", 1).clamp(1, 32) as usize,
            bits_per_component: int("BitsPerComponent", 8).clamp(1, 16) as usize,
            columns: int("Columns", 1).max(1) as usize,
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Row width in bytes; `/Columns` comes from the file, so it is bounded by the data
    fn bytes_per_row(&self, data_len: usize) -> ParseResult<usize> {
        self.columns
            .checked_mul(self.colors * self.bits_per_component)
            .map(|bits| bits.div_ceil(8))
            .filter(|row_len| *row_len <= data_len)
            .ok_or_else(|| {
                ParseError::StreamDecodeError(format!(
                    "Predictor row of {} columns exceeds the {} bytes of stream data",
                    self.columns, data_len
                ))
            })
    }

    pub fn decode(&self, data: &[u8]) -> ParseResult<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        match self.kind {
            PredictorKind::Tiff => self.decode_tiff(data),
            PredictorKind::Png => self.decode_png(data),
        }
    }

    fn decode_tiff(&self, data: &[u8]) -> ParseResult<Vec<u8>> {
        if self.bits_per_component != 8 {
            return Err(ParseError::StreamDecodeError(format!(
                "TIFF predictor with {} bits per component is not supported",
                self.bits_per_component
            )));
        }

        let pixel = self.bytes_per_pixel();
        let row_len = self.bytes_per_row(data.len())?;
        let mut result = Vec::with_capacity(data.len());
        for row in data.chunks(row_len) {
            let start = result.len();
            for (i, &byte) in row.iter().enumerate() {
                let left = if i >= pixel { result[start + i - pixel] } else { 0 };
                result.push(byte.wrapping_add(left));
            }
        }
        Ok(result)
    }

    fn decode_png(&self, data: &[u8]) -> ParseResult<Vec<u8>> {
        let pixel = self.bytes_per_pixel();
        // Each row carries one extra tag byte
        let row_len = self.bytes_per_row(data.len().saturating_sub(1))?;
        let mut previous = vec![0u8; row_len];
        let mut result = Vec::with_capacity(data.len());

        let chunks = data.chunks_exact(row_len + 1);
        if !chunks.remainder().is_empty() {
            tracing::debug!(
                "Ignoring {} trailing bytes after PNG predictor rows",
                chunks.remainder().len()
            );
        }

        for chunk in chunks {
            let row = &chunk[1..];
            let mut decoded = vec![0u8; row_len];

            for i in 0..row_len {
                let left = if i >= pixel { decoded[i - pixel] } else { 0 };
                let up = previous[i];
                let up_left = if i >= pixel { previous[i - pixel] } else { 0 };

                let prediction = match chunk[0] {
                    0 => 0,
                    1 => left,
                    2 => up,
                    3 => ((left as u16 + up as u16) / 2) as u8,
                    4 => paeth(left, up, up_left),
                    other => {
                        return Err(ParseError::StreamDecodeError(format!(
                            "Unknown PNG predictor type: {other}"
                        )))
                    }
                };
                decoded[i] = row[i].wrapping_add(prediction);
            }

            result.extend_from_slice(&decoded);
            previous = decoded;
        }

        Ok(result)
    }
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
