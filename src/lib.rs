//! # rapide
//!
//! A reliable, ordered, connection-oriented message transport layered on
//! an unreliable datagram substrate (typically UDP). Compared with TCP's
//! loss recovery it trades bandwidth for latency: retransmission
//! deadlines are per-segment, fast retransmit fires on out-of-order
//! acknowledgments, and the flush cadence is caller-controlled down to
//! 10 ms.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Application                          │
//! ├─────────────────────────────────────────────────────────┤
//! │  Control block (windows, queues, timers, RTT, probing)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Congestion control (slow start / avoidance, fast rtx)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Segment layer (framing, 24-byte little-endian header)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Caller-supplied datagram substrate (UDP, tunnel, ...)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The crate is sans-IO: a [`ControlBlock`] never touches a socket or a
//! clock. The embedder feeds it monotonic millisecond timestamps through
//! [`ControlBlock::update`], incoming datagrams through
//! [`ControlBlock::input`], and installs an output closure that puts
//! emitted datagrams on the wire. [`ControlBlock::check`] reports the
//! next deadline so drive loops can sleep precisely.
//!
//! ## Design Goals
//!
//! 1. **Latency under loss**: retransmit decisions per segment, without
//!    head-of-line blocked timers
//! 2. **Determinism**: no internal threads, timers, or allocator tricks;
//!    behavior is a pure function of calls and timestamps
//! 3. **Embeddability**: one endpoint is one value; thousands can share
//!    a socket, demultiplexed by conversation id ([`peek_conv`])

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod congestion;
mod control;
mod rtt;
mod segment;

pub mod error;
pub mod trace;

pub use control::{
    ControlBlock, OutputSink, DEFAULT_INTERVAL, DEFAULT_MTU, DEFAULT_RECV_WINDOW,
    DEFAULT_SEND_WINDOW, MIN_MTU,
};
pub use error::{Error, Result};
pub use segment::{peek_conv, Command, Segment, HEADER_SIZE};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_consistent() {
        let cb = ControlBlock::new(1);
        assert_eq!(cb.mtu(), DEFAULT_MTU);
        assert_eq!(cb.mss(), DEFAULT_MTU - HEADER_SIZE);
        assert_eq!(
            cb.window_size(),
            (DEFAULT_SEND_WINDOW, DEFAULT_RECV_WINDOW)
        );
    }

    #[test]
    fn test_demux_by_conversation() {
        let mut seg = Segment::payload(Default::default());
        seg.conv = 0xDEAD_BEEF;
        let mut buf = bytes::BytesMut::new();
        seg.encode_into(&mut buf);
        assert_eq!(peek_conv(&buf), Some(0xDEAD_BEEF));
    }
}
