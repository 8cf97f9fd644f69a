//! CoAP message encoding and decoding (RFC 7252 section 3)

use thiserror::Error;

/// Protocol version carried in every header
pub const COAP_VERSION: u8 = 1;

/// Default CoAP UDP port
pub const COAP_PORT: u16 = 5683;

const PAYLOAD_MARKER: u8 = 0xFF;

/// Option numbers used by the bridge
pub mod option {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const IF_NONE_MATCH: u16 = 5;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const LOCATION_QUERY: u16 = 20;
    pub const SIZE1: u16 = 60;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Message too short: {0} bytes")]
    TooShort(usize),
    #[error("Unsupported CoAP version {0}")]
    BadVersion(u8),
    #[error("Invalid token length {0}")]
    BadTokenLength(u8),
    #[error("Reserved option nibble 15")]
    ReservedNibble,
    #[error("Message truncated in {0}")]
    Truncated(&'static str),
    #[error("Payload marker followed by empty payload")]
    EmptyPayload,
    #[error("Token longer than 8 bytes")]
    TokenTooLong,
    #[error("Option {0} value too long")]
    OptionTooLong(u16),
}

/// Message type (header bits 4-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            Self::Confirmable => 0,
            Self::NonConfirmable => 1,
            Self::Acknowledgement => 2,
            Self::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Confirmable,
            1 => Self::NonConfirmable,
            2 => Self::Acknowledgement,
            _ => Self::Reset,
        }
    }
}

/// A CoAP message with options kept in insertion order per number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub mtype: MessageType,
    /// Raw code byte (class << 5 | detail); 0 for an empty message
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl CoapMessage {
    pub fn new(mtype: MessageType, code: u8, message_id: u16) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Whether this is a request (code class 0, non-empty)
    pub fn is_request(&self) -> bool {
        self.code != 0 && self.code >> 5 == 0
    }

    /// Whether this is an empty message (ACK/RST without content)
    pub fn is_empty(&self) -> bool {
        self.code == 0
    }

    pub fn add_option(&mut self, number: u16, value: impl Into<Vec<u8>>) {
        self.options.push((number, value.into()));
    }

    pub fn add_uint_option(&mut self, number: u16, value: u32) {
        self.add_option(number, encode_uint(value));
    }

    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, v)| v.as_slice())
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.options.iter().any(|(n, _)| *n == number)
    }

    pub fn uint_option(&self, number: u16) -> Option<u32> {
        self.option_values(number).next().map(decode_uint)
    }

    /// Uri-Path segments joined into an absolute path
    pub fn uri_path(&self) -> String {
        let segments: Vec<String> = self
            .option_values(option::URI_PATH)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect();
        format!("/{}", segments.join("/"))
    }

    /// Uri-Query values in order
    pub fn uri_query(&self) -> Vec<String> {
        self.option_values(option::URI_QUERY)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    /// Split an absolute path into Uri-Path options
    pub fn set_uri_path(&mut self, path: &str) {
        self.options.retain(|(n, _)| *n != option::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(option::URI_PATH, segment.as_bytes());
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.token.len() > 8 {
            return Err(CodecError::TokenTooLong);
        }

        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 16);
        out.push((COAP_VERSION << 6) | (self.mtype.bits() << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        // stable sort keeps repeated options in insertion order
        let mut options: Vec<&(u16, Vec<u8>)> = self.options.iter().collect();
        options.sort_by_key(|(n, _)| *n);

        let mut previous = 0u16;
        for (number, value) in options {
            let delta = number - previous;
            if value.len() > u16::MAX as usize + 269 {
                return Err(CodecError::OptionTooLong(*number));
            }
            let (delta_nibble, delta_ext) = split_ext(delta as usize);
            let (len_nibble, len_ext) = split_ext(value.len());
            out.push((delta_nibble << 4) | len_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&len_ext);
            out.extend_from_slice(value);
            previous = *number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 4 {
            return Err(CodecError::TooShort(data.len()));
        }
        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(CodecError::BadVersion(version));
        }
        let mtype = MessageType::from_bits(data[0] >> 4);
        let tkl = data[0] & 0x0F;
        if tkl > 8 {
            return Err(CodecError::BadTokenLength(tkl));
        }
        let code = data[1];
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = 4;
        let token = take(data, &mut pos, tkl as usize, "token")?.to_vec();

        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload = Vec::new();
        while pos < data.len() {
            let byte = data[pos];
            pos += 1;
            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(CodecError::EmptyPayload);
                }
                payload = data[pos..].to_vec();
                break;
            }
            let delta = read_ext(data, &mut pos, byte >> 4, "option delta")?;
            let len = read_ext(data, &mut pos, byte & 0x0F, "option length")?;
            number = u16::try_from(number as usize + delta).map_err(|_| CodecError::Truncated("option number"))?;
            let value = take(data, &mut pos, len, "option value")?.to_vec();
            options.push((number, value));
        }

        Ok(Self {
            mtype,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
    let end = *pos + n;
    if end > data.len() {
        return Err(CodecError::Truncated(what));
    }
    let bytes = &data[*pos..end];
    *pos = end;
    Ok(bytes)
}

/// Nibble and extended bytes for an option delta or length
fn split_ext(value: usize) -> (u8, Vec<u8>) {
    if value < 13 {
        (value as u8, Vec::new())
    } else if value < 269 {
        (13, vec![(value - 13) as u8])
    } else {
        (14, ((value - 269) as u16).to_be_bytes().to_vec())
    }
}

fn read_ext(data: &[u8], pos: &mut usize, nibble: u8, what: &'static str) -> Result<usize, CodecError> {
    match nibble {
        13 => Ok(take(data, pos, 1, what)?[0] as usize + 13),
        14 => {
            let b = take(data, pos, 2, what)?;
            Ok(u16::from_be_bytes([b[0], b[1]]) as usize + 269)
        }
        15 => Err(CodecError::ReservedNibble),
        n => Ok(n as usize),
    }
}

/// Minimal big-endian encoding of an unsigned option value
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub fn decode_uint(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .take(4)
        .rev()
        .fold(0u32, |acc, b| (acc << 8) | *b as u32)
}
