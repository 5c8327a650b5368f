//! Segment framing and serialization.
//!
//! Defines the wire format for transport segments. A datagram is one or
//! more concatenated (header, payload) pairs, each independently
//! parseable; there is no framing envelope and no checksum (the substrate
//! is assumed to checksum).

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Commands a segment can carry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Data segment with payload
    Push = 81,
    /// Acknowledgment for a single sequence number
    Ack = 82,
    /// Window probe: ask the peer to advertise its window
    WindowAsk = 83,
    /// Window advertisement sent in reply to a probe
    WindowTell = 84,
}

impl TryFrom<u8> for Command {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            81 => Ok(Command::Push),
            82 => Ok(Command::Ack),
            83 => Ok(Command::WindowAsk),
            84 => Ok(Command::WindowTell),
            other => Err(Error::UnknownCommand(other)),
        }
    }
}

/// Header size in bytes. The payload follows immediately.
pub const HEADER_SIZE: usize = 24;

/// Difference between two sequence numbers or timestamps, tolerating
/// 32-bit wraparound. Every ordering comparison in the protocol goes
/// through this helper; naive `<`/`>` on the raw u32 values is wrong
/// near the wrap point.
pub(crate) fn seq_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// A transport segment.
///
/// Wire format (all fields little-endian, unaligned):
/// ```text
/// ┌──────────────────────────────────────────────────────────┐
/// │ Conv (4) │ Cmd (1) │ Frg (1) │ Wnd (2) │ Ts (4)          │
/// ├──────────────────────────────────────────────────────────┤
/// │ Sn (4)   │ Una (4) │ Len (4) │ Payload (Len bytes)       │
/// └──────────────────────────────────────────────────────────┘
/// ```
///
/// Queued segments additionally carry retransmission state that never
/// goes on the wire.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Conversation identifier; both endpoints must match
    pub conv: u32,
    /// Segment command
    pub cmd: Command,
    /// Fragment index counting down; 0 marks the last fragment
    pub frg: u8,
    /// Sender's advertised free receive window
    pub wnd: u16,
    /// Timestamp the sender attached (ms)
    pub ts: u32,
    /// Sequence number
    pub sn: u32,
    /// Sender's cumulative-ack point
    pub una: u32,
    /// Payload
    pub data: BytesMut,
    /// Next retransmit deadline (state only)
    pub(crate) resend_at: u32,
    /// This segment's current RTO (state only)
    pub(crate) rto: u32,
    /// Later sequence numbers acked out of order (state only)
    pub(crate) fast_acks: u32,
    /// Times this segment has been transmitted (state only)
    pub(crate) transmits: u32,
}

impl Segment {
    /// Create a data segment holding `data`, header fields zeroed.
    /// Sequencing fields are filled in when the segment is promoted to
    /// the in-flight buffer.
    pub fn payload(data: BytesMut) -> Self {
        Self {
            conv: 0,
            cmd: Command::Push,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            data,
            resend_at: 0,
            rto: 0,
            fast_acks: 0,
            transmits: 0,
        }
    }

    /// Serialize header and payload into `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE + self.data.len());
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_slice(&self.data);
    }

    /// Total wire size of this segment.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

/// A segment parsed out of a datagram, payload borrowed from the input
/// buffer. Only in-window data segments get copied into an owned
/// [`Segment`].
#[derive(Debug)]
pub(crate) struct WireSegment<'a> {
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub payload: &'a [u8],
}

impl<'a> WireSegment<'a> {
    /// Parse one segment off the front of `buf`, advancing it past the
    /// payload. `conv` must match the header's conversation id.
    pub fn parse(buf: &mut &'a [u8], conv: u32) -> Result<WireSegment<'a>> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::HeaderTooShort { len: buf.len() });
        }

        let mut rest = *buf;
        let actual = rest.get_u32_le();
        if actual != conv {
            return Err(Error::ConversationMismatch {
                expected: conv,
                actual,
            });
        }

        let cmd_raw = rest.get_u8();
        let frg = rest.get_u8();
        let wnd = rest.get_u16_le();
        let ts = rest.get_u32_le();
        let sn = rest.get_u32_le();
        let una = rest.get_u32_le();
        let len = rest.get_u32_le() as usize;

        if rest.len() < len {
            return Err(Error::PayloadTruncated {
                declared: len,
                remaining: rest.len(),
            });
        }

        let cmd = Command::try_from(cmd_raw)?;

        let payload = &rest[..len];
        *buf = &rest[len..];

        Ok(WireSegment {
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            payload,
        })
    }

    /// Build an owned queue segment from this wire segment, copying the
    /// payload.
    pub fn to_segment(&self, conv: u32) -> Segment {
        Segment {
            conv,
            cmd: self.cmd,
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn,
            una: self.una,
            data: BytesMut::from(self.payload),
            resend_at: 0,
            rto: 0,
            fast_acks: 0,
            transmits: 0,
        }
    }
}

/// Decode the conversation id from the first 4 bytes of a datagram, so a
/// demultiplexer can route it to the right control block before calling
/// `input`. Returns `None` for datagrams shorter than the field.
pub fn peek_conv(datagram: &[u8]) -> Option<u32> {
    if datagram.len() < 4 {
        return None;
    }
    Some((&datagram[..4]).get_u32_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment() -> Segment {
        let mut seg = Segment::payload(BytesMut::from(&b"hello world"[..]));
        seg.conv = 0x1122_3344;
        seg.cmd = Command::Push;
        seg.frg = 2;
        seg.wnd = 128;
        seg.ts = 1000;
        seg.sn = 42;
        seg.una = 40;
        seg
    }

    #[test]
    fn test_header_round_trip() {
        let original = sample_segment();
        let mut buf = BytesMut::new();
        original.encode_into(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 11);

        let mut slice = &buf[..];
        let parsed = WireSegment::parse(&mut slice, 0x1122_3344).unwrap();
        assert!(slice.is_empty());
        assert_eq!(parsed.cmd, Command::Push);
        assert_eq!(parsed.frg, 2);
        assert_eq!(parsed.wnd, 128);
        assert_eq!(parsed.ts, 1000);
        assert_eq!(parsed.sn, 42);
        assert_eq!(parsed.una, 40);
        assert_eq!(parsed.payload, b"hello world");
    }

    #[test]
    fn test_little_endian_layout() {
        let mut seg = Segment::payload(BytesMut::new());
        seg.conv = 0x0403_0201;
        seg.cmd = Command::Ack;
        seg.wnd = 0x0605;
        seg.ts = 0x0A09_0807;
        seg.sn = 0x0E0D_0C0B;
        seg.una = 0x1211_100F;

        let mut buf = BytesMut::new();
        seg.encode_into(&mut buf);

        assert_eq!(&buf[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buf[4], 82);
        assert_eq!(buf[5], 0);
        assert_eq!(&buf[6..8], &[0x05, 0x06]);
        assert_eq!(&buf[8..12], &[0x07, 0x08, 0x09, 0x0A]);
        assert_eq!(&buf[12..16], &[0x0B, 0x0C, 0x0D, 0x0E]);
        assert_eq!(&buf[16..20], &[0x0F, 0x10, 0x11, 0x12]);
        assert_eq!(&buf[20..24], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_short_header() {
        let mut slice: &[u8] = &[0u8; 10];
        let err = WireSegment::parse(&mut slice, 0).unwrap_err();
        assert_eq!(err, Error::HeaderTooShort { len: 10 });
    }

    #[test]
    fn test_parse_conv_mismatch() {
        let mut buf = BytesMut::new();
        let mut seg = sample_segment();
        seg.conv = 7;
        seg.encode_into(&mut buf);

        let mut slice = &buf[..];
        let err = WireSegment::parse(&mut slice, 9).unwrap_err();
        assert_eq!(
            err,
            Error::ConversationMismatch {
                expected: 9,
                actual: 7
            }
        );
    }

    #[test]
    fn test_parse_truncated_payload() {
        let mut buf = BytesMut::new();
        sample_segment().encode_into(&mut buf);
        buf.truncate(HEADER_SIZE + 5);

        let mut slice = &buf[..];
        let err = WireSegment::parse(&mut slice, 0x1122_3344).unwrap_err();
        assert_eq!(
            err,
            Error::PayloadTruncated {
                declared: 11,
                remaining: 5
            }
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        let mut buf = BytesMut::new();
        sample_segment().encode_into(&mut buf);
        buf[4] = 0x55;

        let mut slice = &buf[..];
        let err = WireSegment::parse(&mut slice, 0x1122_3344).unwrap_err();
        assert_eq!(err, Error::UnknownCommand(0x55));
    }

    #[test]
    fn test_truncation_checked_before_command() {
        // A bad length field rejects the segment even when the command
        // byte is also garbage.
        let mut buf = BytesMut::new();
        sample_segment().encode_into(&mut buf);
        buf[4] = 0xFF;
        buf.truncate(HEADER_SIZE);

        let mut slice = &buf[..];
        let err = WireSegment::parse(&mut slice, 0x1122_3344).unwrap_err();
        assert_eq!(
            err,
            Error::PayloadTruncated {
                declared: 11,
                remaining: 0
            }
        );
    }

    #[test]
    fn test_peek_conv() {
        let mut buf = BytesMut::new();
        sample_segment().encode_into(&mut buf);

        assert_eq!(peek_conv(&buf), Some(0x1122_3344));
        assert_eq!(peek_conv(&buf[..3]), None);
    }

    #[test]
    fn test_seq_diff_wraparound() {
        assert_eq!(seq_diff(5, 3), 2);
        assert_eq!(seq_diff(3, 5), -2);
        assert_eq!(seq_diff(1, u32::MAX), 2);
        assert_eq!(seq_diff(u32::MAX, 1), -2);
        assert_eq!(seq_diff(0x8000_0000, 0), i32::MIN);
    }
}
