//! Chat envelope codec.
//!
//! An envelope is an [`Inv`] header followed by exactly `count`
//! [`Message`] records, all in one text buffer:
//!
//! ```text
//! inv:2:message:5:Ann:Hi!!!message:11:Ann:How are you
//! ```
//!
//! The codec is pure: no I/O, no state beyond the running byte offset, so
//! it can be applied repeatedly to the front of a growing buffer.

mod message;

pub use message::{Inv, Message};

use bytes::BytesMut;
use thiserror::Error;

use crate::error::EnvelopeError;

// ── Serialize ────────────────────────────────────────────────────

/// Encode `messages` as one envelope.
pub fn serialize(messages: &[Message]) -> Result<Vec<u8>, EnvelopeError> {
    let inv = validate(messages)?;
    let size = inv.serial_size() + messages.iter().map(Message::serial_size).sum::<usize>();

    let mut out = Vec::with_capacity(size);
    inv.serialize(&mut out);
    for m in messages {
        m.serialize(&mut out);
    }
    Ok(out)
}

/// Encode `messages` as one envelope appended to `out`.
///
/// Nothing is appended when validation fails. Returns the bytes written.
pub fn serialize_into(messages: &[Message], out: &mut BytesMut) -> Result<usize, EnvelopeError> {
    let encoded = serialize(messages)?;
    out.extend_from_slice(&encoded);
    Ok(encoded.len())
}

fn validate(messages: &[Message]) -> Result<Inv, EnvelopeError> {
    if messages.is_empty() {
        return Err(EnvelopeError::InvalidArgument("envelope has no messages"));
    }
    let count = u32::try_from(messages.len())
        .map_err(|_| EnvelopeError::InvalidArgument("more than u32::MAX messages"))?;
    for m in messages {
        m.validate()?;
    }
    Ok(Inv::new(count))
}

// ── Parse ────────────────────────────────────────────────────────

/// A successfully decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    pub messages: Vec<Message>,
    /// Bytes taken from the front of the input. Anything after this
    /// offset was not looked at.
    pub consumed: usize,
}

/// A decode failure, with whatever was decoded before the bad unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (after {consumed} bytes, {} records)", messages.len())]
pub struct ParseError {
    #[source]
    pub kind: EnvelopeError,
    /// Offset of the first byte of the malformed unit.
    pub consumed: usize,
    /// Records fully decoded before the malformed unit.
    pub messages: Vec<Message>,
}

/// Decode exactly one envelope from the front of `input`.
pub fn parse(input: &[u8]) -> Result<Parsed, ParseError> {
    let (inv, mut consumed) = Inv::parse(input).map_err(|kind| ParseError {
        kind,
        consumed: 0,
        messages: Vec::new(),
    })?;

    // Cap the pre-allocation: the count is attacker controlled.
    let mut messages = Vec::with_capacity((inv.count as usize).min(64));
    while messages.len() < inv.count as usize {
        match Message::parse(&input[consumed..]) {
            Ok((m, n)) => {
                consumed += n;
                messages.push(m);
            }
            Err(kind) => {
                return Err(ParseError {
                    kind,
                    consumed,
                    messages,
                });
            }
        }
    }

    Ok(Parsed { messages, consumed })
}

// ── Envelopes ────────────────────────────────────────────────────

/// Iterates over back-to-back envelopes in one buffer.
///
/// A session that batches several pushes into one write delivers them as
/// concatenated envelopes; this walks them in order and stops after the
/// first malformed one.
#[derive(Debug, Clone)]
pub struct Envelopes<'a> {
    input: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Envelopes<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed by the envelopes yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for Envelopes<'_> {
    type Item = Result<Vec<Message>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.input.len() {
            return None;
        }
        match parse(&self.input[self.offset..]) {
            Ok(parsed) => {
                self.offset += parsed.consumed;
                Some(Ok(parsed.messages))
            }
            Err(mut e) => {
                self.failed = true;
                e.consumed += self.offset;
                Some(Err(e))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
