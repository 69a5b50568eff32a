//! Binary wire format for the trade channel.
//!
//! One message per frame: a one-byte kind tag followed by fixed,
//! little-endian fields. Strings are u16-length-prefixed UTF-8. The
//! codec never serializes item contents itself — the fields describing
//! a non-empty slot are written and read by an [`ItemWire`]
//! implementation supplied by the item system.
//!
//! Decode policy: an unknown tag or a truncated frame is a protocol
//! error (callers log it). A syntactically valid frame carrying a
//! non-positive amount or a zero quantity decodes to `Ok(None)` — it
//! is silently dropped rather than treated as an error, so a buggy or
//! malicious client cannot desync the session with garbage values.

use thiserror::Error;

use crate::network::protocol::{TradeClientMessage, TradeServerMessage};
use crate::trade::item::{ItemKind, ItemStack};

// Client -> server kind tags.
const CLIENT_ACCEPT: u8 = 0x01;
const CLIENT_ADD_INVENTORY_ITEM: u8 = 0x02;
const CLIENT_CANCEL: u8 = 0x03;
const CLIENT_REMOVE_INVENTORY_ITEM: u8 = 0x04;
const CLIENT_ADD_CASH: u8 = 0x05;
const CLIENT_REMOVE_CASH: u8 = 0x06;

// Server -> client kind tags.
const SERVER_OPEN: u8 = 0x10;
const SERVER_UPDATE_ACCEPTED: u8 = 0x11;
const SERVER_UPDATE_CASH: u8 = 0x12;
const SERVER_UPDATE_SLOT: u8 = 0x13;
const SERVER_CANCELED: u8 = 0x14;
const SERVER_CLOSED: u8 = 0x15;
const SERVER_COMPLETED: u8 = 0x16;

/// Wire-format errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Frame ended before the expected fields did.
    #[error("frame truncated at byte {0}")]
    Truncated(usize),

    /// Kind tag not in the message vocabulary.
    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),

    /// String field was not valid UTF-8.
    #[error("malformed string field")]
    BadString,

    /// Frame decoded cleanly but bytes were left over.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Sequential writer over a growable byte buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Start an empty frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a bool as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Append a little-endian u32.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian u64.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a little-endian i64.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a u16-length-prefixed UTF-8 string, truncating at
    /// u16::MAX bytes. Truncation backs off to a character boundary so
    /// the written field stays valid UTF-8.
    pub fn write_string(&mut self, value: &str) {
        let mut len = value.len().min(usize::from(u16::MAX));
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.extend_from_slice(&(len as u16).to_le_bytes());
        self.buf.extend_from_slice(&value.as_bytes()[..len]);
    }

    /// Finish the frame.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential reader over a received frame.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Read from the start of a frame.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a one-byte bool (any non-zero value is true).
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(arr))
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a u16-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadString)
    }
}

/// Item-description (de)serialization, owned by the external item
/// system. The codec only knows where the fields go in the frame, not
/// what they contain.
pub trait ItemWire: Send + Sync {
    /// Append the fields describing a non-empty slot.
    fn write_item(&self, w: &mut ByteWriter, stack: &ItemStack);

    /// Read the fields written by [`write_item`](Self::write_item).
    fn read_item(&self, r: &mut ByteReader<'_>) -> Result<ItemStack, CodecError>;
}

/// Minimal item description: kind id and quantity, nothing else.
/// Stands in for the full item-info schema in servers and tests that
/// do not carry one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainItemWire;

impl ItemWire for PlainItemWire {
    fn write_item(&self, w: &mut ByteWriter, stack: &ItemStack) {
        w.write_u32(stack.kind.0);
        w.write_u32(stack.quantity);
    }

    fn read_item(&self, r: &mut ByteReader<'_>) -> Result<ItemStack, CodecError> {
        let kind = ItemKind(r.read_u32()?);
        let quantity = r.read_u32()?;
        Ok(ItemStack::new(kind, quantity))
    }
}

/// Encode a client-originated trade message (client side and tests).
pub fn encode_client_message(msg: &TradeClientMessage) -> Vec<u8> {
    let mut w = ByteWriter::new();
    match msg {
        TradeClientMessage::Accept => w.write_u8(CLIENT_ACCEPT),
        TradeClientMessage::AddInventoryItem { slot, quantity } => {
            w.write_u8(CLIENT_ADD_INVENTORY_ITEM);
            w.write_u8(*slot);
            w.write_u8(*quantity);
        }
        TradeClientMessage::Cancel => w.write_u8(CLIENT_CANCEL),
        TradeClientMessage::RemoveInventoryItem { slot } => {
            w.write_u8(CLIENT_REMOVE_INVENTORY_ITEM);
            w.write_u8(*slot);
        }
        TradeClientMessage::AddCash { amount } => {
            w.write_u8(CLIENT_ADD_CASH);
            w.write_i64(*amount as i64);
        }
        TradeClientMessage::RemoveCash { amount } => {
            w.write_u8(CLIENT_REMOVE_CASH);
            w.write_i64(*amount as i64);
        }
    }
    w.into_bytes()
}

/// Decode a client-originated trade message.
///
/// `Ok(None)` means the frame was recognized but carried a value the
/// protocol silently drops (non-positive cash amount, zero quantity).
pub fn decode_client_message(frame: &[u8]) -> Result<Option<TradeClientMessage>, CodecError> {
    let mut r = ByteReader::new(frame);
    let tag = r.read_u8()?;
    let msg = match tag {
        CLIENT_ACCEPT => Some(TradeClientMessage::Accept),
        CLIENT_ADD_INVENTORY_ITEM => {
            let slot = r.read_u8()?;
            let quantity = r.read_u8()?;
            (quantity > 0).then_some(TradeClientMessage::AddInventoryItem { slot, quantity })
        }
        CLIENT_CANCEL => Some(TradeClientMessage::Cancel),
        CLIENT_REMOVE_INVENTORY_ITEM => {
            let slot = r.read_u8()?;
            Some(TradeClientMessage::RemoveInventoryItem { slot })
        }
        CLIENT_ADD_CASH => {
            let amount = r.read_i64()?;
            (amount > 0).then(|| TradeClientMessage::AddCash { amount: amount as u64 })
        }
        CLIENT_REMOVE_CASH => {
            let amount = r.read_i64()?;
            (amount > 0).then(|| TradeClientMessage::RemoveCash { amount: amount as u64 })
        }
        other => return Err(CodecError::UnknownKind(other)),
    };
    if r.remaining() > 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

/// Encode a server-originated trade message.
pub fn encode_server_message(msg: &TradeServerMessage, items: &dyn ItemWire) -> Vec<u8> {
    let mut w = ByteWriter::new();
    match msg {
        TradeServerMessage::Open { is_source, other_name } => {
            w.write_u8(SERVER_OPEN);
            w.write_bool(*is_source);
            w.write_string(other_name);
        }
        TradeServerMessage::UpdateAccepted { about_source, accepted } => {
            w.write_u8(SERVER_UPDATE_ACCEPTED);
            w.write_bool(*about_source);
            w.write_bool(*accepted);
        }
        TradeServerMessage::UpdateCash { about_source, total } => {
            w.write_u8(SERVER_UPDATE_CASH);
            w.write_bool(*about_source);
            w.write_u64(*total);
        }
        TradeServerMessage::UpdateSlot { about_source, slot, stack } => {
            w.write_u8(SERVER_UPDATE_SLOT);
            w.write_bool(*about_source);
            w.write_u8(*slot);
            w.write_bool(stack.is_none());
            if let Some(stack) = stack {
                items.write_item(&mut w, stack);
            }
        }
        TradeServerMessage::Canceled { by_source } => {
            w.write_u8(SERVER_CANCELED);
            w.write_bool(*by_source);
        }
        TradeServerMessage::Closed => w.write_u8(SERVER_CLOSED),
        TradeServerMessage::Completed => w.write_u8(SERVER_COMPLETED),
    }
    w.into_bytes()
}

/// Decode a server-originated trade message (client side and tests).
pub fn decode_server_message(
    frame: &[u8],
    items: &dyn ItemWire,
) -> Result<TradeServerMessage, CodecError> {
    let mut r = ByteReader::new(frame);
    let tag = r.read_u8()?;
    let msg = match tag {
        SERVER_OPEN => TradeServerMessage::Open {
            is_source: r.read_bool()?,
            other_name: r.read_string()?,
        },
        SERVER_UPDATE_ACCEPTED => TradeServerMessage::UpdateAccepted {
            about_source: r.read_bool()?,
            accepted: r.read_bool()?,
        },
        SERVER_UPDATE_CASH => TradeServerMessage::UpdateCash {
            about_source: r.read_bool()?,
            total: r.read_u64()?,
        },
        SERVER_UPDATE_SLOT => {
            let about_source = r.read_bool()?;
            let slot = r.read_u8()?;
            let empty = r.read_bool()?;
            let stack = if empty { None } else { Some(items.read_item(&mut r)?) };
            TradeServerMessage::UpdateSlot { about_source, slot, stack }
        }
        SERVER_CANCELED => TradeServerMessage::Canceled { by_source: r.read_bool()? },
        SERVER_CLOSED => TradeServerMessage::Closed,
        SERVER_COMPLETED => TradeServerMessage::Completed,
        other => return Err(CodecError::UnknownKind(other)),
    };
    if r.remaining() > 0 {
        return Err(CodecError::TrailingBytes(r.remaining()));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_roundtrip() {
        let messages = [
            TradeClientMessage::Accept,
            TradeClientMessage::AddInventoryItem { slot: 3, quantity: 12 },
            TradeClientMessage::Cancel,
            TradeClientMessage::RemoveInventoryItem { slot: 7 },
            TradeClientMessage::AddCash { amount: 5000 },
            TradeClientMessage::RemoveCash { amount: 1 },
        ];
        for msg in &messages {
            let frame = encode_client_message(msg);
            let decoded = decode_client_message(&frame).unwrap();
            assert_eq!(decoded.as_ref(), Some(msg));
        }
    }

    #[test]
    fn test_nonpositive_amounts_silently_dropped() {
        // A hand-built AddCash frame carrying zero.
        let mut w = ByteWriter::new();
        w.write_u8(0x05);
        w.write_i64(0);
        assert_eq!(decode_client_message(&w.into_bytes()).unwrap(), None);

        // Negative RemoveCash.
        let mut w = ByteWriter::new();
        w.write_u8(0x06);
        w.write_i64(-250);
        assert_eq!(decode_client_message(&w.into_bytes()).unwrap(), None);

        // Zero-quantity item add.
        let mut w = ByteWriter::new();
        w.write_u8(0x02);
        w.write_u8(0);
        w.write_u8(0);
        assert_eq!(decode_client_message(&w.into_bytes()).unwrap(), None);
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let frame = [0x7f];
        assert_eq!(
            decode_client_message(&frame),
            Err(CodecError::UnknownKind(0x7f))
        );
    }

    #[test]
    fn test_truncated_frame_is_error() {
        // AddCash with only 3 of the 8 amount bytes.
        let frame = [0x05, 1, 2, 3];
        assert!(matches!(
            decode_client_message(&frame),
            Err(CodecError::Truncated(_))
        ));
        assert!(matches!(
            decode_client_message(&[]),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_is_error() {
        let mut frame = encode_client_message(&TradeClientMessage::Accept);
        frame.push(0xaa);
        assert_eq!(decode_client_message(&frame), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_server_roundtrip() {
        let wire = PlainItemWire;
        let messages = [
            TradeServerMessage::Open { is_source: true, other_name: "Kael".into() },
            TradeServerMessage::Open { is_source: false, other_name: String::new() },
            TradeServerMessage::UpdateAccepted { about_source: false, accepted: true },
            TradeServerMessage::UpdateCash { about_source: true, total: 123_456 },
            TradeServerMessage::UpdateSlot { about_source: true, slot: 2, stack: None },
            TradeServerMessage::UpdateSlot {
                about_source: false,
                slot: 0,
                stack: Some(ItemStack::new(ItemKind(42), 6)),
            },
            TradeServerMessage::Canceled { by_source: false },
            TradeServerMessage::Closed,
            TradeServerMessage::Completed,
        ];
        for msg in &messages {
            let frame = encode_server_message(msg, &wire);
            let decoded = decode_server_message(&frame, &wire).unwrap();
            assert_eq!(&decoded, msg);
        }
    }

    #[test]
    fn test_slot_update_delegates_item_fields() {
        // An item system with a richer schema controls its own bytes.
        struct TaggedWire;
        impl ItemWire for TaggedWire {
            fn write_item(&self, w: &mut ByteWriter, stack: &ItemStack) {
                w.write_u8(0xEE);
                w.write_u32(stack.kind.0);
                w.write_u32(stack.quantity);
            }
            fn read_item(&self, r: &mut ByteReader<'_>) -> Result<ItemStack, CodecError> {
                let marker = r.read_u8()?;
                if marker != 0xEE {
                    return Err(CodecError::BadString);
                }
                Ok(ItemStack::new(ItemKind(r.read_u32()?), r.read_u32()?))
            }
        }

        let msg = TradeServerMessage::UpdateSlot {
            about_source: true,
            slot: 5,
            stack: Some(ItemStack::new(ItemKind(9), 3)),
        };
        let frame = encode_server_message(&msg, &TaggedWire);
        // kind tag, about_source, slot, empty flag, then the item
        // system's marker byte.
        assert_eq!(frame[4], 0xEE);
        let decoded = decode_server_message(&frame, &TaggedWire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_long_string_truncates_on_char_boundary() {
        // A multi-byte character straddling the length cap must not be
        // split, or the receiver rejects the whole frame.
        let mut name = "a".repeat(usize::from(u16::MAX) - 1);
        name.push('€');
        let mut w = ByteWriter::new();
        w.write_string(&name);
        let bytes = w.into_bytes();

        let mut r = ByteReader::new(&bytes);
        let decoded = r.read_string().unwrap();
        assert_eq!(decoded.len(), usize::from(u16::MAX) - 1);
        assert!(decoded.chars().all(|c| c == 'a'));
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_string_field_encoding() {
        let mut w = ByteWriter::new();
        w.write_string("ok");
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![2, 0, b'o', b'k']);

        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_string().unwrap(), "ok");
        assert_eq!(r.remaining(), 0);
    }
}
