//! In-memory PDF construction for integration tests
//!
//! Every method returns the absolute offset of what it wrote, so tests can
//! assert exact xref entries.

#![allow(dead_code)]

use pdf_xref::parser::{PdfArray, PdfDictionary, PdfName, PdfObject};
use pdf_xref::xref::XrefStreamEncoder;
use pdf_xref::{ObjectKey, XrefEntry};
use std::fmt::Write;

pub struct PdfBuilder {
    data: Vec<u8>,
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self { data }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn raw(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// `number 0 obj body endobj`
    pub fn object(&mut self, number: u64, body: &str) -> u64 {
        self.object_with_generation(number, 0, body)
    }

    pub fn object_with_generation(&mut self, number: u64, generation: u32, body: &str) -> u64 {
        self.raw(format!("{number} {generation} obj\n{body}\nendobj\n").as_bytes())
    }

    /// Classic `xref` section followed by `trailer`. Entries must be sorted
    /// by object number; contiguous numbers share a subsection.
    pub fn xref_table(&mut self, entries: &[(ObjectKey, XrefEntry)], trailer: &str) -> u64 {
        let mut text = String::from("xref\n");
        let mut i = 0;
        while i < entries.len() {
            let start = entries[i].0.number;
            let mut end = i + 1;
            while end < entries.len() && entries[end].0.number == start + (end - i) as u64 {
                end += 1;
            }
            writeln!(text, "{} {}", start, end - i).unwrap();
            for (key, entry) in &entries[i..end] {
                let (field, flag) = match entry {
                    XrefEntry::InUse { offset } => (*offset, 'n'),
                    XrefEntry::Free { next_free } => (*next_free, 'f'),
                    XrefEntry::Compressed { .. } => panic!("tables cannot hold compressed entries"),
                };
                // 20-byte records: the line ends with space + LF
                writeln!(text, "{:010} {:05} {} ", field, key.generation, flag).unwrap();
            }
            i = end;
        }
        writeln!(text, "trailer\n{trailer}").unwrap();
        self.raw(text.as_bytes())
    }

    /// Cross-reference stream object built with [`XrefStreamEncoder`]
    pub fn xref_stream(
        &mut self,
        number: u64,
        entries: &[(ObjectKey, XrefEntry)],
        trailer: &[(&str, PdfObject)],
    ) -> u64 {
        let mut encoder = XrefStreamEncoder::new();
        for (key, entry) in entries {
            encoder.add_entry(*key, *entry);
        }
        for (key, value) in trailer {
            encoder.add_trailer_entry(key, value.clone());
        }
        let (dict, data) = encoder.build().expect("encode xref stream");
        self.stream_object(number, &dict, &data)
    }

    /// `number 0 obj << dict >> stream data endstream endobj`
    pub fn stream_object(&mut self, number: u64, dict: &PdfDictionary, data: &[u8]) -> u64 {
        let offset = self.raw(
            format!(
                "{number} 0 obj\n{}\nstream\n",
                serialize(&PdfObject::Dictionary(dict.clone()))
            )
            .as_bytes(),
        );
        self.raw(data);
        self.raw(b"\nendstream\nendobj\n");
        offset
    }

    /// Append `startxref` and `%%EOF`
    pub fn finish(mut self, startxref: u64) -> Vec<u8> {
        self.raw(format!("startxref\n{startxref}\n%%EOF\n").as_bytes());
        self.data
    }

    /// Return the bytes without a `startxref` section
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Write an object in PDF syntax
pub fn serialize(object: &PdfObject) -> String {
    match object {
        PdfObject::Null => "null".to_string(),
        PdfObject::Boolean(b) => b.to_string(),
        PdfObject::Integer(i) => i.to_string(),
        PdfObject::Real(r) => format!("{r:?}"),
        PdfObject::String(s) => {
            let hex: String = s.0.iter().map(|b| format!("{b:02X}")).collect();
            format!("<{hex}>")
        }
        PdfObject::Name(name) => format!("/{}", name.as_str()),
        PdfObject::Array(array) => {
            let items: Vec<String> = array.0.iter().map(serialize).collect();
            format!("[{}]", items.join(" "))
        }
        PdfObject::Dictionary(dict) => {
            let mut pairs: Vec<_> = dict.iter().collect();
            pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
            let body: Vec<String> = pairs
                .into_iter()
                .map(|(key, value)| format!("/{} {}", key.as_str(), serialize(value)))
                .collect();
            format!("<< {} >>", body.join(" "))
        }
        PdfObject::Stream(_) => panic!("streams are written with stream_object"),
        PdfObject::Reference(key) => key.to_string(),
    }
}

pub fn reference(number: u64, generation: u32) -> PdfObject {
    PdfObject::Reference(ObjectKey::new(number, generation))
}

pub fn name(value: &str) -> PdfObject {
    PdfObject::Name(PdfName(value.to_string()))
}

pub fn ints(values: &[i64]) -> PdfObject {
    PdfObject::Array(PdfArray(values.iter().map(|v| PdfObject::Integer(*v)).collect()))
}

pub fn key(number: u64, generation: u32) -> ObjectKey {
    ObjectKey::new(number, generation)
}

pub fn in_use(offset: u64) -> XrefEntry {
    XrefEntry::InUse { offset }
}

pub fn free(next_free: u64) -> XrefEntry {
    XrefEntry::Free { next_free }
}

/// Replace the first occurrence of `from` with `to`, which must be as long
pub fn patch(data: &mut [u8], from: &[u8], to: &[u8]) {
    assert_eq!(from.len(), to.len());
    let at = data
        .windows(from.len())
        .position(|window| window == from)
        .expect("pattern to patch");
    data[at..at + to.len()].copy_from_slice(to);
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
