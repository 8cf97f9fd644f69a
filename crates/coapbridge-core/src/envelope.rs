//! Versioned binary envelope for messages crossing the bus
//!
//! Layout (big-endian):
//!
//! ```text
//! u8  version
//! u8  kind                     0x01 request, 0x02 response
//! u8  code                     response only
//! u8  flags                    bit0 content-format, bit1 accept, bit2 size1, bit3 if-none-match
//! u16 content-format           if bit0
//! u16 accept                   if bit1
//! u32 size1                    if bit2
//! u8  etag count, then per tag: u8 len, bytes
//! u8  if-match count, then per tag: u8 len, bytes
//! u16 attribute count, then per pair: u16 len, key, u16 len, value    request only
//! u8  payload present, then u32 len, bytes if present
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

use crate::message::{MediaType, Options, RequestMessage, ResponseCode, ResponseMessage};

/// Current envelope version
pub const ENVELOPE_VERSION: u8 = 1;

const KIND_REQUEST: u8 = 0x01;
const KIND_RESPONSE: u8 = 0x02;

const FLAG_CONTENT_FORMAT: u8 = 0x01;
const FLAG_ACCEPT: u8 = 0x02;
const FLAG_SIZE1: u8 = 0x04;
const FLAG_IF_NONE_MATCH: u8 = 0x08;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("Expected envelope kind {expected:#04x}, got {actual:#04x}")]
    WrongKind { expected: u8, actual: u8 },
    #[error("Envelope truncated while reading {0}")]
    Truncated(&'static str),
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("{field} too long for envelope: {len}")]
    TooLong { field: &'static str, len: usize },
}

pub fn encode_request(request: &RequestMessage) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = vec![ENVELOPE_VERSION, KIND_REQUEST];
    write_options(&mut out, &request.options)?;

    let count = u16::try_from(request.attributes.len()).map_err(|_| EnvelopeError::TooLong {
        field: "attributes",
        len: request.attributes.len(),
    })?;
    out.extend_from_slice(&count.to_be_bytes());
    for (key, value) in &request.attributes {
        write_str16(&mut out, key, "attribute key")?;
        write_str16(&mut out, value, "attribute value")?;
    }

    write_payload(&mut out, request.payload.as_deref())?;
    Ok(out)
}

pub fn decode_request(data: &[u8]) -> Result<RequestMessage, EnvelopeError> {
    let mut reader = Reader::new(data);
    reader.header(KIND_REQUEST)?;
    let options = reader.options()?;

    let count = reader.u16("attribute count")?;
    let mut attributes = BTreeMap::new();
    for _ in 0..count {
        let key = reader.str16("attribute key")?;
        let value = reader.str16("attribute value")?;
        attributes.insert(key, value);
    }

    let payload = reader.payload()?;
    reader.finish()?;

    Ok(RequestMessage {
        options,
        attributes,
        payload,
    })
}

pub fn encode_response(response: &ResponseMessage) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = vec![ENVELOPE_VERSION, KIND_RESPONSE, response.code.0];
    write_options(&mut out, &response.options)?;
    write_payload(&mut out, response.payload.as_deref())?;
    Ok(out)
}

pub fn decode_response(data: &[u8]) -> Result<ResponseMessage, EnvelopeError> {
    let mut reader = Reader::new(data);
    reader.header(KIND_RESPONSE)?;
    let code = ResponseCode(reader.u8("code")?);
    let options = reader.options()?;
    let payload = reader.payload()?;
    reader.finish()?;

    Ok(ResponseMessage {
        code,
        options,
        payload,
    })
}

fn write_options(out: &mut Vec<u8>, options: &Options) -> Result<(), EnvelopeError> {
    let mut flags = 0u8;
    if options.content_format.is_some() {
        flags |= FLAG_CONTENT_FORMAT;
    }
    if options.accept.is_some() {
        flags |= FLAG_ACCEPT;
    }
    if options.size1.is_some() {
        flags |= FLAG_SIZE1;
    }
    if options.if_none_match {
        flags |= FLAG_IF_NONE_MATCH;
    }
    out.push(flags);

    if let Some(cf) = options.content_format {
        out.extend_from_slice(&cf.value().to_be_bytes());
    }
    if let Some(accept) = options.accept {
        out.extend_from_slice(&accept.value().to_be_bytes());
    }
    if let Some(size1) = options.size1 {
        out.extend_from_slice(&size1.to_be_bytes());
    }

    write_tags(out, &options.etag, "etag")?;
    write_tags(out, &options.if_match, "if-match")?;
    Ok(())
}

fn write_tags(out: &mut Vec<u8>, tags: &[Vec<u8>], field: &'static str) -> Result<(), EnvelopeError> {
    let count = u8::try_from(tags.len()).map_err(|_| EnvelopeError::TooLong {
        field,
        len: tags.len(),
    })?;
    out.push(count);
    for tag in tags {
        let len = u8::try_from(tag.len()).map_err(|_| EnvelopeError::TooLong {
            field,
            len: tag.len(),
        })?;
        out.push(len);
        out.extend_from_slice(tag);
    }
    Ok(())
}

fn write_str16(out: &mut Vec<u8>, s: &str, field: &'static str) -> Result<(), EnvelopeError> {
    let len = u16::try_from(s.len()).map_err(|_| EnvelopeError::TooLong { field, len: s.len() })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_payload(out: &mut Vec<u8>, payload: Option<&[u8]>) -> Result<(), EnvelopeError> {
    match payload {
        None => out.push(0),
        Some(bytes) => {
            let len = u32::try_from(bytes.len()).map_err(|_| EnvelopeError::TooLong {
                field: "payload",
                len: bytes.len(),
            })?;
            out.push(1);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], EnvelopeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(EnvelopeError::Truncated(what))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, EnvelopeError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, EnvelopeError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, EnvelopeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn header(&mut self, expected: u8) -> Result<(), EnvelopeError> {
        let version = self.u8("version")?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let kind = self.u8("kind")?;
        if kind != expected {
            return Err(EnvelopeError::WrongKind {
                expected,
                actual: kind,
            });
        }
        Ok(())
    }

    fn options(&mut self) -> Result<Options, EnvelopeError> {
        let flags = self.u8("option flags")?;
        let mut options = Options {
            if_none_match: flags & FLAG_IF_NONE_MATCH != 0,
            ..Options::default()
        };
        if flags & FLAG_CONTENT_FORMAT != 0 {
            options.content_format = Some(MediaType::from(self.u16("content-format")?));
        }
        if flags & FLAG_ACCEPT != 0 {
            options.accept = Some(MediaType::from(self.u16("accept")?));
        }
        if flags & FLAG_SIZE1 != 0 {
            options.size1 = Some(self.u32("size1")?);
        }
        options.etag = self.tags("etag")?;
        options.if_match = self.tags("if-match")?;
        Ok(options)
    }

    fn tags(&mut self, what: &'static str) -> Result<Vec<Vec<u8>>, EnvelopeError> {
        let count = self.u8(what)?;
        let mut tags = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = self.u8(what)? as usize;
            tags.push(self.take(len, what)?.to_vec());
        }
        Ok(tags)
    }

    fn str16(&mut self, what: &'static str) -> Result<String, EnvelopeError> {
        let len = self.u16(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| EnvelopeError::InvalidUtf8(what))
    }

    fn payload(&mut self) -> Result<Option<Vec<u8>>, EnvelopeError> {
        match self.u8("payload marker")? {
            0 => Ok(None),
            _ => {
                let len = self.u32("payload length")? as usize;
                Ok(Some(self.take(len, "payload")?.to_vec()))
            }
        }
    }

    fn finish(&self) -> Result<(), EnvelopeError> {
        match self.data.len() - self.pos {
            0 => Ok(()),
            n => Err(EnvelopeError::TrailingBytes(n)),
        }
    }
}
