//! Thrift binary protocol, strict flavour.
//!
//! [`Encoder`] appends to a `BytesMut` that becomes the payload of one frame.
//! [`Decoder`] reads one received frame through a cursor; string and binary
//! fields are handed out as zero-copy slices of the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TransportError;

pub(crate) const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

/// Nesting bound for skipping unknown fields.
const MAX_SKIP_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TType {
    Stop,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

impl TType {
    const fn code(self) -> u8 {
        match self {
            TType::Stop => 0,
            TType::Bool => 2,
            TType::Byte => 3,
            TType::Double => 4,
            TType::I16 => 6,
            TType::I32 => 8,
            TType::I64 => 10,
            TType::String => 11,
            TType::Struct => 12,
            TType::Map => 13,
            TType::Set => 14,
            TType::List => 15,
        }
    }
}

impl TryFrom<u8> for TType {
    type Error = TransportError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => TType::Stop,
            2 => TType::Bool,
            3 => TType::Byte,
            4 => TType::Double,
            6 => TType::I16,
            8 => TType::I32,
            10 => TType::I64,
            11 => TType::String,
            12 => TType::Struct,
            13 => TType::Map,
            14 => TType::Set,
            15 => TType::List,
            other => {
                return Err(TransportError::protocol(format!("unknown field type {other}")))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    const fn code(self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = TransportError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(TransportError::protocol(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// Header of a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MessageHeader {
    pub(crate) name: String,
    pub(crate) kind: MessageType,
    pub(crate) seq: i32,
}

#[derive(Debug, Default)]
pub(crate) struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn message_begin(&mut self, name: &str, kind: MessageType, seq: i32) {
        self.buf.put_u32(VERSION_1 | u32::from(kind.code()));
        self.string(name);
        self.buf.put_i32(seq);
    }

    pub(crate) fn field_begin(&mut self, ty: TType, id: i16) {
        self.buf.put_u8(ty.code());
        self.buf.put_i16(id);
    }

    pub(crate) fn field_stop(&mut self) {
        self.buf.put_u8(TType::Stop.code());
    }

    pub(crate) fn bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub(crate) fn i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub(crate) fn i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub(crate) fn i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub(crate) fn binary(&mut self, value: &[u8]) {
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value);
    }

    pub(crate) fn string(&mut self, value: &str) {
        self.binary(value.as_bytes());
    }

    pub(crate) fn list_begin(&mut self, elem: TType, len: usize) {
        self.buf.put_u8(elem.code());
        self.buf.put_i32(len as i32);
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over one received frame.
#[derive(Debug)]
pub(crate) struct Decoder {
    frame: Bytes,
}

impl Decoder {
    pub(crate) fn new(frame: Bytes) -> Self {
        Self { frame }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.frame.remaining()
    }

    fn need(&self, n: usize) -> Result<(), TransportError> {
        if self.frame.remaining() < n {
            return Err(TransportError::protocol(format!(
                "frame truncated: need {n} bytes, {} left",
                self.frame.remaining()
            )));
        }
        Ok(())
    }

    pub(crate) fn message_begin(&mut self) -> Result<MessageHeader, TransportError> {
        let word = self.i32()? as u32;
        if word & VERSION_MASK != VERSION_1 {
            return Err(TransportError::protocol(format!(
                "bad protocol version {word:#010x}"
            )));
        }
        let kind = MessageType::try_from((word & 0xff) as u8)?;
        let name = self.string()?;
        let seq = self.i32()?;
        Ok(MessageHeader { name, kind, seq })
    }

    /// Next field header, `None` at the end of a struct.
    pub(crate) fn field_begin(&mut self) -> Result<Option<(TType, i16)>, TransportError> {
        let ty = TType::try_from(self.byte()?)?;
        if ty == TType::Stop {
            return Ok(None);
        }
        Ok(Some((ty, self.i16()?)))
    }

    fn byte(&mut self) -> Result<u8, TransportError> {
        self.need(1)?;
        Ok(self.frame.get_u8())
    }

    pub(crate) fn i16(&mut self) -> Result<i16, TransportError> {
        self.need(2)?;
        Ok(self.frame.get_i16())
    }

    pub(crate) fn i32(&mut self) -> Result<i32, TransportError> {
        self.need(4)?;
        Ok(self.frame.get_i32())
    }

    pub(crate) fn i64(&mut self) -> Result<i64, TransportError> {
        self.need(8)?;
        Ok(self.frame.get_i64())
    }

    fn len(&mut self) -> Result<usize, TransportError> {
        let len = self.i32()?;
        usize::try_from(len)
            .map_err(|_| TransportError::protocol(format!("negative length {len}")))
    }

    pub(crate) fn binary(&mut self) -> Result<Bytes, TransportError> {
        let len = self.len()?;
        self.need(len)?;
        Ok(self.frame.split_to(len))
    }

    pub(crate) fn string(&mut self) -> Result<String, TransportError> {
        let raw = self.binary()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| TransportError::protocol("string field is not utf-8"))
    }

    pub(crate) fn list_begin(&mut self) -> Result<(TType, usize), TransportError> {
        let elem = TType::try_from(self.byte()?)?;
        let len = self.len()?;
        Ok((elem, len))
    }

    /// Read a list, checking its element type.
    pub(crate) fn list<T>(
        &mut self,
        elem: TType,
        mut read: impl FnMut(&mut Self) -> Result<T, TransportError>,
    ) -> Result<Vec<T>, TransportError> {
        let (actual, len) = self.list_begin()?;
        if actual != elem && len > 0 {
            return Err(TransportError::protocol(format!(
                "expected list of {elem:?}, got {actual:?}"
            )));
        }
        self.check_elements(elem, len)?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Reject a container header whose elements cannot fit in the rest of
    /// the frame. Every value but `Stop` takes at least one byte, and `Stop`
    /// is not a value.
    fn check_elements(&self, elem: TType, len: usize) -> Result<(), TransportError> {
        if len == 0 {
            return Ok(());
        }
        if elem == TType::Stop {
            return Err(TransportError::protocol("container of Stop elements"));
        }
        if len > self.remaining() {
            return Err(TransportError::protocol(format!(
                "container of {len} elements overruns the frame"
            )));
        }
        Ok(())
    }

    pub(crate) fn skip(&mut self, ty: TType) -> Result<(), TransportError> {
        self.skip_depth(ty, MAX_SKIP_DEPTH)
    }

    fn skip_depth(&mut self, ty: TType, depth: usize) -> Result<(), TransportError> {
        if depth == 0 {
            return Err(TransportError::protocol("value nested too deeply"));
        }
        match ty {
            TType::Stop => Ok(()),
            TType::Bool | TType::Byte => self.byte().map(drop),
            TType::I16 => self.i16().map(drop),
            TType::I32 => self.i32().map(drop),
            TType::Double | TType::I64 => self.i64().map(drop),
            TType::String => self.binary().map(drop),
            TType::Struct => {
                while let Some((field, _)) = self.field_begin()? {
                    self.skip_depth(field, depth - 1)?;
                }
                Ok(())
            }
            TType::Map => {
                let key = TType::try_from(self.byte()?)?;
                let value = TType::try_from(self.byte()?)?;
                let len = self.len()?;
                self.check_elements(key, len)?;
                self.check_elements(value, len)?;
                for _ in 0..len {
                    self.skip_depth(key, depth - 1)?;
                    self.skip_depth(value, depth - 1)?;
                }
                Ok(())
            }
            TType::Set | TType::List => {
                let (elem, len) = self.list_begin()?;
                self.check_elements(elem, len)?;
                for _ in 0..len {
                    self.skip_depth(elem, depth - 1)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_header_layout() {
        let mut enc = Encoder::new();
        enc.message_begin("get_tables", MessageType::Call, 7);
        let bytes = enc.finish();
        assert_eq!(&bytes[..4], &[0x80, 0x01, 0x00, 0x01]);
        assert_eq!(&bytes[4..8], &10i32.to_be_bytes());
        assert_eq!(&bytes[8..18], b"get_tables");
        assert_eq!(&bytes[18..], &7i32.to_be_bytes());

        let header = Decoder::new(bytes).message_begin().unwrap();
        assert_eq!(header.name, "get_tables");
        assert_eq!(header.kind, MessageType::Call);
        assert_eq!(header.seq, 7);
    }

    #[test]
    fn rejects_unversioned_messages() {
        let mut dec = Decoder::new(Bytes::from_static(&[0, 0, 0, 4, b'a', b'b', b'c', b'd']));
        assert!(matches!(
            dec.message_begin(),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn truncated_frames_fail_cleanly() {
        let mut dec = Decoder::new(Bytes::from_static(&[0, 0, 0, 9, b'x']));
        assert!(dec.binary().is_err());
        let mut dec = Decoder::new(Bytes::from_static(&[0, 1]));
        assert!(dec.i32().is_err());
    }

    #[test]
    fn skips_nested_unknown_values() {
        let mut enc = Encoder::new();
        enc.field_begin(TType::List, 1);
        enc.list_begin(TType::String, 2);
        enc.string("a");
        enc.string("bc");
        enc.field_begin(TType::Struct, 2);
        enc.field_begin(TType::I64, 1);
        enc.i64(5);
        enc.field_stop();
        enc.field_begin(TType::I32, 3);
        enc.i32(42);
        enc.field_stop();

        let mut dec = Decoder::new(enc.finish());
        let mut seen = None;
        while let Some((ty, id)) = dec.field_begin().unwrap() {
            if id == 3 {
                seen = Some(dec.i32().unwrap());
            } else {
                dec.skip(ty).unwrap();
            }
        }
        assert_eq!(seen, Some(42));
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn oversized_containers_are_rejected_before_looping() {
        let mut enc = Encoder::new();
        enc.list_begin(TType::Stop, i32::MAX as usize);
        let mut dec = Decoder::new(enc.finish());
        assert!(matches!(
            dec.skip(TType::List),
            Err(TransportError::Protocol(_))
        ));

        let mut enc = Encoder::new();
        enc.list_begin(TType::I64, 1_000_000);
        enc.i64(1);
        let mut dec = Decoder::new(enc.finish());
        assert!(dec.skip(TType::Set).is_err());

        // Map header: key type, value type, i32 length.
        let mut dec = Decoder::new(Bytes::from_static(&[0, 0, 0x7f, 0xff, 0xff, 0xff]));
        assert!(dec.skip(TType::Map).is_err());
        let mut dec = Decoder::new(Bytes::from_static(&[8, 8, 0, 0, 1, 0, 0, 0, 0, 1]));
        assert!(dec.skip(TType::Map).is_err());

        let mut enc = Encoder::new();
        enc.list_begin(TType::Stop, 0);
        let mut dec = Decoder::new(enc.finish());
        dec.skip(TType::List).unwrap();
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn binary_fields_are_slices_of_the_frame() {
        let mut enc = Encoder::new();
        enc.binary(b"payload");
        let frame = enc.finish();
        let base = frame.as_ptr();
        let mut dec = Decoder::new(frame);
        let value = dec.binary().unwrap();
        assert_eq!(&value[..], b"payload");
        assert_eq!(value.as_ptr(), base.wrapping_add(4));
    }
}
