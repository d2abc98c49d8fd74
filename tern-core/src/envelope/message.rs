//! The two record kinds of the chat envelope: the `inv` header and the
//! `message` entry.
//!
//! ## Wire format
//!
//! ```text
//! inv:<count>:
//! message:<payload length>:<nickname>:<payload>
//! ```
//!
//! Lengths are decimal byte counts. The nickname runs up to the next colon;
//! the payload is exactly `<payload length>` bytes and may contain colons.

use crate::error::EnvelopeError;

/// Field separator.
const SEPARATOR: u8 = b':';

// ── Inv ──────────────────────────────────────────────────────────

/// Envelope header announcing how many [`Message`] records follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inv {
    pub count: u32,
}

impl Inv {
    pub const PREFIX: &'static str = "inv";

    pub fn new(count: u32) -> Self {
        Self { count }
    }

    /// Encoded size in bytes.
    pub fn serial_size(&self) -> usize {
        Self::PREFIX.len() + decimal_width(self.count as usize) + 2
    }

    /// Append the encoded header to `out`, returning the bytes written.
    pub fn serialize(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        out.extend_from_slice(Self::PREFIX.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.count.to_string().as_bytes());
        out.push(SEPARATOR);
        out.len() - start
    }

    /// Parse a header from the front of `input`.
    ///
    /// Returns the header and the number of bytes it occupied.
    pub fn parse(input: &[u8]) -> Result<(Self, usize), EnvelopeError> {
        let mut used = literal(input, Self::PREFIX)?;
        let (count, n) = length_field(&input[used..])?;
        if count == 0 {
            return Err(EnvelopeError::InvalidArgument("inv count is zero"));
        }
        used += n;
        Ok((Self { count }, used))
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One chat line: who said it and what they said.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub payload: String,
    pub nickname: String,
}

impl Message {
    pub const PREFIX: &'static str = "message";

    pub fn new(payload: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            nickname: nickname.into(),
        }
    }

    /// Encoded size in bytes.
    pub fn serial_size(&self) -> usize {
        Self::PREFIX.len()
            + decimal_width(self.payload.len())
            + self.nickname.len()
            + self.payload.len()
            + 3
    }

    /// Reject records that would not survive a round trip.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.payload.is_empty() {
            return Err(EnvelopeError::InvalidArgument("message payload is empty"));
        }
        if self.nickname.as_bytes().contains(&SEPARATOR) {
            return Err(EnvelopeError::InvalidArgument("nickname contains ':'"));
        }
        if u32::try_from(self.payload.len()).is_err() {
            return Err(EnvelopeError::InvalidArgument("payload longer than u32::MAX"));
        }
        Ok(())
    }

    /// Append the encoded record to `out`, returning the bytes written.
    ///
    /// Does not validate; callers go through [`Message::validate`] first.
    pub fn serialize(&self, out: &mut Vec<u8>) -> usize {
        let start = out.len();
        out.extend_from_slice(Self::PREFIX.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.payload.len().to_string().as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.nickname.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.payload.as_bytes());
        out.len() - start
    }

    /// Parse one record from the front of `input`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn parse(input: &[u8]) -> Result<(Self, usize), EnvelopeError> {
        let mut used = literal(input, Self::PREFIX)?;

        let (len, n) = length_field(&input[used..])?;
        if len == 0 {
            return Err(EnvelopeError::InvalidArgument("message length is zero"));
        }
        used += n;

        let rest = &input[used..];
        let end = rest
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or(EnvelopeError::BadMessage("nickname is not terminated by ':'"))?;
        let nickname = utf8(&rest[..end])?;
        used += end + 1;

        let len = len as usize;
        let rest = &input[used..];
        if rest.len() < len {
            return Err(EnvelopeError::BadMessage("payload shorter than declared length"));
        }
        let payload = utf8(&rest[..len])?;
        used += len;

        Ok((Self { payload, nickname }, used))
    }
}

// ── Field helpers ────────────────────────────────────────────────

/// Match `<prefix>:` at the front of `input`.
fn literal(input: &[u8], prefix: &'static str) -> Result<usize, EnvelopeError> {
    let prefix = prefix.as_bytes();
    if !input.starts_with(prefix) {
        return Err(EnvelopeError::BadPrefix("unexpected record literal"));
    }
    if input.get(prefix.len()) != Some(&SEPARATOR) {
        return Err(EnvelopeError::BadPrefix("missing ':' after record literal"));
    }
    Ok(prefix.len() + 1)
}

/// Read `<digits>:` from the front of `input`.
///
/// The field must be one or more ASCII digits that fit in a `u32`.
fn length_field(input: &[u8]) -> Result<(u32, usize), EnvelopeError> {
    let end = input
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or(EnvelopeError::BadMessage("length field is not terminated by ':'"))?;
    let digits = &input[..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(EnvelopeError::BadMessage("length field is not a decimal number"));
    }

    // All-ASCII was checked above.
    let text = std::str::from_utf8(digits)
        .map_err(|_| EnvelopeError::BadMessage("length field is not a decimal number"))?;
    let value = text
        .parse::<u32>()
        .map_err(|_| EnvelopeError::BadMessage("length field overflows u32"))?;
    Ok((value, end + 1))
}

fn utf8(bytes: &[u8]) -> Result<String, EnvelopeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| EnvelopeError::BadMessage("text is not utf-8"))
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}

// ── Tests ────────────────────────────────────────────────────────
