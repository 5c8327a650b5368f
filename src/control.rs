//! The transport control block.
//!
//! A single-endpoint state machine providing reliable, ordered message
//! delivery over an unreliable datagram substrate. The block accepts
//! application payloads, fragments them into numbered segments, stages
//! them through a windowed retransmit buffer, and reassembles the peer's
//! segments back into messages. The caller supplies the clock
//! (monotonic milliseconds), the datagram sink, and the drive loop; the
//! block never blocks and never does I/O of its own.
//!
//! ## Data flow
//!
//! ```text
//! send ──▶ snd_queue ──(flush)──▶ snd_buf ──▶ output sink ──▶ wire
//!
//! wire ──▶ input ──▶ rcv_buf ──(contiguous)──▶ rcv_queue ──▶ recv
//!                └─▶ ack list ──(flush)──▶ output sink
//! ```
//!
//! All operations on one control block must be serialized by the caller;
//! independent blocks are fully isolated from each other.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::congestion::Congestion;
use crate::error::{Error, Result};
use crate::rtt::{RttEstimator, RTO_MIN, RTO_MIN_NODELAY};
use crate::segment::{seq_diff, Command, Segment, WireSegment, HEADER_SIZE};
use crate::trace::{mask, Trace, TraceSink};

/// Default MTU for emitted datagrams (bytes).
pub const DEFAULT_MTU: usize = 1400;
/// Smallest MTU `set_mtu` accepts.
pub const MIN_MTU: usize = 50;
/// Default send window (segments).
pub const DEFAULT_SEND_WINDOW: u32 = 32;
/// Default receive window (segments). Also the floor `set_window_size`
/// enforces, since a single message may occupy up to this many fragments.
pub const DEFAULT_RECV_WINDOW: u32 = 128;
/// Default flush interval (ms).
pub const DEFAULT_INTERVAL: u32 = 100;

/// First window-probe delay (ms).
const PROBE_INIT: u32 = 7_000;
/// Window-probe delay ceiling (ms).
const PROBE_LIMIT: u32 = 120_000;
/// Transmissions of a single segment after which the link is considered
/// dead.
const DEAD_LINK: u32 = 20;
/// Default cap on transmissions triggered by fast retransmit.
const FAST_LIMIT_DEFAULT: u32 = 5;

/// Probe flag: a window probe is due on the next flush.
const ASK_SEND: u32 = 1;
/// Probe flag: a window advertisement is due on the next flush.
const ASK_TELL: u32 = 2;

/// Sink receiving fully-formed datagrams of at most `mtu` bytes. Invoked
/// synchronously from `flush`; it must not re-enter the control block it
/// was installed on.
pub type OutputSink = Box<dyn FnMut(&[u8]) + Send>;

/// Reliable-transport endpoint state.
///
/// ```no_run
/// use rapide::ControlBlock;
///
/// let mut cb = ControlBlock::new(0x11223344);
/// cb.set_output(|datagram| {
///     // hand the datagram to the UDP socket
///     let _ = datagram;
/// });
/// cb.send(b"hello").unwrap();
/// cb.update(0);
/// ```
pub struct ControlBlock {
    conv: u32,
    mtu: usize,
    mss: usize,
    link_dead: bool,

    /// Oldest unacknowledged outbound sequence number
    snd_una: u32,
    /// Next outbound sequence number to assign
    snd_nxt: u32,
    /// Next inbound sequence number expected
    rcv_nxt: u32,

    rtt: RttEstimator,
    congestion: Congestion,

    snd_wnd: u32,
    rcv_wnd: u32,
    /// Peer's most recently advertised free window
    rmt_wnd: u32,
    probe: u32,

    current: u32,
    interval: u32,
    ts_flush: u32,
    /// Cumulative timeout-retransmission count
    xmit: u32,

    nodelay: u32,
    updated: bool,

    ts_probe: u32,
    probe_wait: u32,

    snd_queue: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,

    /// (sn, ts) pairs awaiting an outbound ACK
    acklist: Vec<(u32, u32)>,
    /// Staging buffer for datagram assembly, reused across flushes
    buffer: BytesMut,

    /// Fast-retransmit threshold; 0 disables
    fast_resend: u32,
    /// Max transmissions a fast retransmit may trigger; 0 means no cap
    fast_limit: u32,
    nocwnd: bool,
    stream: bool,

    output: Option<OutputSink>,
    trace: Trace,
}

impl ControlBlock {
    /// Create a control block for conversation `conv`. Both endpoints
    /// must agree on the conversation id out of band.
    pub fn new(conv: u32) -> Self {
        Self {
            conv,
            mtu: DEFAULT_MTU,
            mss: DEFAULT_MTU - HEADER_SIZE,
            link_dead: false,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            rtt: RttEstimator::new(),
            congestion: Congestion::new(),
            snd_wnd: DEFAULT_SEND_WINDOW,
            rcv_wnd: DEFAULT_RECV_WINDOW,
            rmt_wnd: DEFAULT_RECV_WINDOW,
            probe: 0,
            current: 0,
            interval: DEFAULT_INTERVAL,
            ts_flush: DEFAULT_INTERVAL,
            xmit: 0,
            nodelay: 0,
            updated: false,
            ts_probe: 0,
            probe_wait: 0,
            snd_queue: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            acklist: Vec::new(),
            buffer: BytesMut::with_capacity(DEFAULT_MTU + HEADER_SIZE),
            fast_resend: 0,
            fast_limit: FAST_LIMIT_DEFAULT,
            nocwnd: false,
            stream: false,
            output: None,
            trace: Trace::new(),
        }
    }

    /// Install the datagram sink. Without one, flushed datagrams are
    /// discarded.
    pub fn set_output<F>(&mut self, output: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.output = Some(Box::new(output));
    }

    /// The conversation id this block was created with.
    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// Current MTU.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Current maximum segment payload size (`mtu` minus header).
    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Segments queued or in flight, not yet acknowledged. Embedders use
    /// this as the backpressure signal.
    pub fn wait_send(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    /// Whether some segment has been transmitted so many times that the
    /// link should be considered dead. Advisory: the block keeps
    /// operating; tearing down is the embedder's decision.
    pub fn is_dead_link(&self) -> bool {
        self.link_dead
    }

    /// Cumulative count of timeout retransmissions.
    pub fn total_retransmits(&self) -> u32 {
        self.xmit
    }

    /// Smoothed round-trip estimate in milliseconds; 0 until the first
    /// sample has been taken.
    pub fn srtt(&self) -> u32 {
        self.rtt.srtt()
    }

    // ------------------------------------------------------------------
    // application-facing send / receive
    // ------------------------------------------------------------------

    /// Queue a message for transmission, fragmenting it into
    /// `mss`-sized segments.
    ///
    /// In stream mode the tail segment of the queue is topped up first
    /// and fragment boundaries carry no meaning; in message mode each
    /// call produces one message whose boundary the receiver preserves.
    ///
    /// Fails with [`Error::MessageTooLarge`] when the message would need
    /// more fragments than the peer can reassemble. Empty messages are
    /// legal and occupy one segment.
    pub fn send(&mut self, mut data: &[u8]) -> Result<()> {
        self.trace
            .emit(mask::SEND, format_args!("send {} bytes", data.len()));

        if self.stream {
            if let Some(tail) = self.snd_queue.back_mut() {
                if tail.data.len() < self.mss {
                    let extend = data.len().min(self.mss - tail.data.len());
                    tail.data.extend_from_slice(&data[..extend]);
                    tail.frg = 0;
                    data = &data[extend..];
                }
            }
            if data.is_empty() {
                return Ok(());
            }
        }

        let count = if data.len() <= self.mss {
            1
        } else {
            (data.len() + self.mss - 1) / self.mss
        };

        if count >= DEFAULT_RECV_WINDOW as usize {
            return Err(Error::MessageTooLarge {
                fragments: count,
                limit: DEFAULT_RECV_WINDOW as usize,
            });
        }

        for i in 0..count {
            let size = data.len().min(self.mss);
            let mut seg = Segment::payload(BytesMut::from(&data[..size]));
            seg.frg = if self.stream { 0 } else { (count - i - 1) as u8 };
            self.snd_queue.push_back(seg);
            data = &data[size..];
        }

        Ok(())
    }

    /// Total payload size of the message at the head of the receive
    /// queue, without consuming it. Fails while the queue is empty or
    /// the head message is still missing fragments.
    pub fn peek_size(&self) -> Result<usize> {
        let head = self.rcv_queue.front().ok_or(Error::RecvQueueEmpty)?;
        if head.frg == 0 {
            return Ok(head.data.len());
        }
        if self.rcv_queue.len() < head.frg as usize + 1 {
            return Err(Error::IncompleteMessage);
        }
        let mut length = 0;
        for seg in &self.rcv_queue {
            length += seg.data.len();
            if seg.frg == 0 {
                break;
            }
        }
        Ok(length)
    }

    /// Receive the next complete message into `buffer`, consuming it.
    /// Returns the message length. Messages are delivered whole and in
    /// order.
    pub fn recv(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.recv_inner(buffer, false)
    }

    /// Copy the next complete message into `buffer` without consuming
    /// it. A later [`recv`](Self::recv) returns the same message.
    pub fn peek(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.recv_inner(buffer, true)
    }

    /// Receive the next complete message into a freshly allocated
    /// buffer.
    pub fn recv_bytes(&mut self) -> Result<Bytes> {
        let size = self.peek_size()?;
        let mut buf = vec![0u8; size];
        let n = self.recv(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    fn recv_inner(&mut self, buffer: &mut [u8], peek: bool) -> Result<usize> {
        if self.rcv_queue.is_empty() {
            return Err(Error::RecvQueueEmpty);
        }
        let size = self.peek_size()?;
        if size > buffer.len() {
            return Err(Error::BufferTooSmall {
                needed: size,
                capacity: buffer.len(),
            });
        }

        let recover = self.rcv_queue.len() as u32 >= self.rcv_wnd;

        let mut copied = 0;
        if peek {
            for seg in &self.rcv_queue {
                buffer[copied..copied + seg.data.len()].copy_from_slice(&seg.data);
                copied += seg.data.len();
                if seg.frg == 0 {
                    break;
                }
            }
        } else {
            while let Some(seg) = self.rcv_queue.pop_front() {
                buffer[copied..copied + seg.data.len()].copy_from_slice(&seg.data);
                copied += seg.data.len();
                self.trace
                    .emit(mask::RECV, format_args!("recv sn={}", seg.sn));
                if seg.frg == 0 {
                    break;
                }
            }
        }
        debug_assert_eq!(copied, size);

        self.drain_rcv_buf();

        // the queue was full and now has room: advertise the reopened
        // window on the next flush
        if (self.rcv_queue.len() as u32) < self.rcv_wnd && recover {
            self.probe |= ASK_TELL;
        }

        Ok(copied)
    }

    // ------------------------------------------------------------------
    // ingress
    // ------------------------------------------------------------------

    /// Ingest one datagram received from the peer. The datagram may
    /// carry any number of concatenated segments; each is validated and
    /// dispatched. Acknowledgments retire in-flight segments, data
    /// segments enter the reassembly buffer, window probes are latched
    /// for the next flush.
    pub fn input(&mut self, data: &[u8]) -> Result<()> {
        self.trace
            .emit(mask::INPUT, format_args!("rx {} bytes", data.len()));

        if data.len() < HEADER_SIZE {
            return Err(Error::HeaderTooShort { len: data.len() });
        }

        let prev_una = self.snd_una;
        let mut max_ack: Option<u32> = None;

        let mut rest = data;
        while rest.len() >= HEADER_SIZE {
            let wire = match WireSegment::parse(&mut rest, self.conv) {
                Ok(wire) => wire,
                Err(err) => {
                    if let Error::ConversationMismatch { actual, .. } = err {
                        tracing::debug!(
                            conv = self.conv,
                            foreign = actual,
                            "dropping datagram from foreign conversation"
                        );
                    }
                    return Err(err);
                }
            };

            self.rmt_wnd = wire.wnd as u32;
            self.parse_una(wire.una);
            self.shrink_snd_una();

            match wire.cmd {
                Command::Ack => {
                    let rtt = seq_diff(self.current, wire.ts);
                    if rtt >= 0 {
                        let interval = self.interval;
                        self.rtt.sample(rtt as u32, interval);
                    }
                    self.parse_ack(wire.sn);
                    self.shrink_snd_una();
                    max_ack = match max_ack {
                        Some(sn) if seq_diff(wire.sn, sn) <= 0 => Some(sn),
                        _ => Some(wire.sn),
                    };
                    self.trace.emit(
                        mask::IN_ACK,
                        format_args!(
                            "input ack: sn={} rtt={} rto={}",
                            wire.sn,
                            rtt,
                            self.rtt.rto()
                        ),
                    );
                }
                Command::Push => {
                    self.trace.emit(
                        mask::IN_DATA,
                        format_args!("input data: sn={} ts={}", wire.sn, wire.ts),
                    );
                    if seq_diff(wire.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) < 0 {
                        self.acklist.push((wire.sn, wire.ts));
                        if seq_diff(wire.sn, self.rcv_nxt) >= 0 {
                            let seg = wire.to_segment(self.conv);
                            self.parse_data(seg);
                        }
                    }
                }
                Command::WindowAsk => {
                    self.probe |= ASK_TELL;
                    self.trace.emit(mask::IN_PROBE, format_args!("input probe"));
                }
                Command::WindowTell => {
                    self.trace
                        .emit(mask::IN_WINS, format_args!("input window: {}", wire.wnd));
                }
            }
        }

        if let Some(sn) = max_ack {
            self.parse_fast_ack(sn);
        }

        if seq_diff(self.snd_una, prev_una) > 0 {
            self.congestion.on_ack_advance(self.rmt_wnd, self.mss as u32);
        }

        Ok(())
    }

    /// Drop everything at the head of `snd_buf` the peer has
    /// cumulatively acknowledged.
    fn parse_una(&mut self, una: u32) {
        while let Some(front) = self.snd_buf.front() {
            if seq_diff(una, front.sn) > 0 {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    fn shrink_snd_una(&mut self) {
        self.snd_una = match self.snd_buf.front() {
            Some(seg) => seg.sn,
            None => self.snd_nxt,
        };
    }

    /// Retire the in-flight segment a selective acknowledgment names.
    fn parse_ack(&mut self, sn: u32) {
        if seq_diff(sn, self.snd_una) < 0 || seq_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for i in 0..self.snd_buf.len() {
            let seg_sn = self.snd_buf[i].sn;
            if sn == seg_sn {
                self.snd_buf.remove(i);
                break;
            }
            if seq_diff(sn, seg_sn) < 0 {
                break;
            }
        }
    }

    /// Count, for every in-flight segment older than `sn`, that a later
    /// segment was acknowledged ahead of it.
    fn parse_fast_ack(&mut self, sn: u32) {
        if seq_diff(sn, self.snd_una) < 0 || seq_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for seg in self.snd_buf.iter_mut() {
            if seq_diff(sn, seg.sn) < 0 {
                break;
            }
            if sn != seg.sn {
                seg.fast_acks += 1;
            }
        }
    }

    /// Insert a data segment into the reassembly buffer in sequence
    /// order, discarding duplicates, then promote the contiguous prefix
    /// into the receive queue.
    fn parse_data(&mut self, seg: Segment) {
        let sn = seg.sn;
        if seq_diff(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) >= 0
            || seq_diff(sn, self.rcv_nxt) < 0
        {
            return;
        }

        // walk from the tail: segments usually arrive near-in-order
        let mut insert_at = self.rcv_buf.len();
        let mut repeat = false;
        for i in (0..self.rcv_buf.len()).rev() {
            let existing = self.rcv_buf[i].sn;
            if existing == sn {
                repeat = true;
                break;
            }
            if seq_diff(sn, existing) > 0 {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }
        if !repeat {
            self.rcv_buf.insert(insert_at, seg);
        }

        self.drain_rcv_buf();
    }

    /// Move segments from `rcv_buf` into `rcv_queue` while the head is
    /// the next expected sequence number and the queue has room.
    fn drain_rcv_buf(&mut self) {
        while self
            .rcv_buf
            .front()
            .is_some_and(|seg| seg.sn == self.rcv_nxt && (self.rcv_queue.len() as u32) < self.rcv_wnd)
        {
            if let Some(seg) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    // ------------------------------------------------------------------
    // egress
    // ------------------------------------------------------------------

    fn window_unused(&self) -> u16 {
        let queued = self.rcv_queue.len() as u32;
        if queued < self.rcv_wnd {
            (self.rcv_wnd - queued).min(u16::MAX as u32) as u16
        } else {
            0
        }
    }

    /// Hand the staged datagram to the output sink and reset staging.
    fn emit(&mut self, buf: &mut BytesMut) {
        if buf.is_empty() {
            return;
        }
        self.trace
            .emit(mask::OUTPUT, format_args!("tx {} bytes", buf.len()));
        if let Some(output) = self.output.as_mut() {
            output(&buf[..]);
        }
        buf.clear();
    }

    /// Assemble and transmit everything currently due: pending
    /// acknowledgments, window probes, and data segments that are new,
    /// timed out, or fast-retransmittable. Multiple segments are packed
    /// into each datagram up to the MTU.
    ///
    /// Does nothing until [`update`](Self::update) has been called once.
    pub fn flush(&mut self) {
        if !self.updated {
            return;
        }

        let current = self.current;
        let wnd_unused = self.window_unused();
        let mut buf = std::mem::take(&mut self.buffer);

        // a reusable header for ACK and probe segments
        let mut head = Segment::payload(BytesMut::new());
        head.conv = self.conv;
        head.cmd = Command::Ack;
        head.wnd = wnd_unused;
        head.una = self.rcv_nxt;

        // pending acknowledgments
        if !self.acklist.is_empty() {
            self.trace.emit(
                mask::OUT_ACK,
                format_args!("flush {} acks", self.acklist.len()),
            );
        }
        let acks = std::mem::take(&mut self.acklist);
        for (sn, ts) in acks {
            if buf.len() + HEADER_SIZE > self.mtu {
                self.emit(&mut buf);
            }
            head.sn = sn;
            head.ts = ts;
            head.encode_into(&mut buf);
        }

        // when the peer's window is closed, probe it on an exponential
        // backoff schedule
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if seq_diff(current, self.ts_probe) >= 0 {
                if self.probe_wait < PROBE_INIT {
                    self.probe_wait = PROBE_INIT;
                }
                self.probe_wait += self.probe_wait / 2;
                if self.probe_wait > PROBE_LIMIT {
                    self.probe_wait = PROBE_LIMIT;
                }
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe |= ASK_SEND;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        if self.probe & ASK_SEND != 0 {
            head.cmd = Command::WindowAsk;
            if buf.len() + HEADER_SIZE > self.mtu {
                self.emit(&mut buf);
            }
            head.encode_into(&mut buf);
            self.trace
                .emit(mask::OUT_PROBE, format_args!("probe peer window"));
        }
        if self.probe & ASK_TELL != 0 {
            head.cmd = Command::WindowTell;
            if buf.len() + HEADER_SIZE > self.mtu {
                self.emit(&mut buf);
            }
            head.encode_into(&mut buf);
            self.trace.emit(
                mask::OUT_WINS,
                format_args!("advertise window {}", wnd_unused),
            );
        }
        self.probe = 0;

        // effective window: configured send window, peer's advertised
        // window, and (unless disabled) the congestion window
        let mut cwnd_eff = self.snd_wnd.min(self.rmt_wnd);
        if !self.nocwnd {
            cwnd_eff = cwnd_eff.min(self.congestion.cwnd);
        }

        // promote queued segments into the in-flight buffer
        while seq_diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd_eff)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.conv = self.conv;
            seg.cmd = Command::Push;
            seg.wnd = wnd_unused;
            seg.ts = current;
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            seg.una = self.rcv_nxt;
            seg.resend_at = current;
            seg.rto = self.rtt.rto();
            seg.fast_acks = 0;
            seg.transmits = 0;
            self.snd_buf.push_back(seg);
        }

        let resent = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        // first transmissions get a little slack on top of the RTO to
        // absorb scheduling jitter, unless nodelay is on
        let rtomin = if self.nodelay == 0 {
            self.rtt.rto() >> 3
        } else {
            0
        };
        let mut lost = false;
        let mut change = false;

        for i in 0..self.snd_buf.len() {
            let rto_base = self.rtt.rto();
            let rcv_nxt = self.rcv_nxt;
            let nodelay = self.nodelay;
            let (need, sn, transmits);
            {
                let seg = &mut self.snd_buf[i];
                let needsend = if seg.transmits == 0 {
                    seg.transmits = 1;
                    seg.rto = rto_base;
                    seg.resend_at = current.wrapping_add(seg.rto).wrapping_add(rtomin);
                    true
                } else if seq_diff(current, seg.resend_at) >= 0 {
                    seg.transmits += 1;
                    self.xmit += 1;
                    seg.rto += match nodelay {
                        0 => seg.rto.max(rto_base),
                        1 => seg.rto / 2,
                        _ => rto_base / 2,
                    };
                    seg.resend_at = current.wrapping_add(seg.rto);
                    lost = true;
                    true
                } else if seg.fast_acks >= resent
                    && (seg.transmits <= self.fast_limit || self.fast_limit == 0)
                {
                    seg.transmits += 1;
                    seg.fast_acks = 0;
                    seg.resend_at = current.wrapping_add(seg.rto);
                    change = true;
                    true
                } else {
                    false
                };

                if !needsend {
                    continue;
                }
                seg.ts = current;
                seg.wnd = wnd_unused;
                seg.una = rcv_nxt;
                need = HEADER_SIZE + seg.data.len();
                sn = seg.sn;
                transmits = seg.transmits;
            }

            if buf.len() + need > self.mtu {
                self.emit(&mut buf);
            }
            self.snd_buf[i].encode_into(&mut buf);
            self.trace
                .emit(mask::OUT_DATA, format_args!("flush data sn={}", sn));

            if transmits >= DEAD_LINK && !self.link_dead {
                self.link_dead = true;
                tracing::warn!(conv = self.conv, sn, transmits, "link marked dead");
            }
        }

        self.emit(&mut buf);
        self.buffer = buf;

        // congestion response for this flush
        if change {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            self.congestion
                .on_fast_resend(inflight, resent, self.mss as u32);
        }
        if lost {
            self.congestion.on_timeout_loss(cwnd_eff, self.mss as u32);
        }
        self.congestion.apply_floor(self.mss as u32);
    }

    // ------------------------------------------------------------------
    // timer driver
    // ------------------------------------------------------------------

    /// Drive the block forward to `current` (monotonic milliseconds).
    /// Flushes when the tick deadline has been reached, and resyncs the
    /// deadline after clock jumps of ten seconds or more. Call
    /// repeatedly, or sleep until [`check`](Self::check) says the next
    /// call is due.
    pub fn update(&mut self, current: u32) {
        self.current = current;

        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut slack = seq_diff(current, self.ts_flush);
        if !(-10_000..10_000).contains(&slack) {
            self.ts_flush = current;
            slack = 0;
        }

        if slack >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if seq_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// When the next [`update`](Self::update) is due, as an absolute
    /// time: the earlier of the tick deadline and every in-flight
    /// segment's retransmit deadline, at most one interval away.
    /// Returns `current` itself when a deadline has already passed, so
    /// callers can sleep exactly `check(now) - now`.
    pub fn check(&self, current: u32) -> u32 {
        if !self.updated {
            return current;
        }

        let mut ts_flush = self.ts_flush;
        if !(-10_000..10_000).contains(&seq_diff(current, ts_flush)) {
            ts_flush = current;
        }
        if seq_diff(current, ts_flush) >= 0 {
            return current;
        }

        let tm_flush = seq_diff(ts_flush, current);
        let mut tm_packet = i32::MAX;
        for seg in &self.snd_buf {
            let diff = seq_diff(seg.resend_at, current);
            if diff <= 0 {
                return current;
            }
            tm_packet = tm_packet.min(diff);
        }

        let minimal = (tm_packet.min(tm_flush) as u32).min(self.interval);
        current.wrapping_add(minimal)
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    /// Change the MTU. Values below the header size or the protocol
    /// minimum of 50 bytes are rejected. Recomputes `mss` and resizes
    /// the staging buffer.
    pub fn set_mtu(&mut self, mtu: usize) -> Result<()> {
        if mtu < MIN_MTU || mtu < HEADER_SIZE {
            return Err(Error::InvalidMtu(mtu));
        }
        if mtu == self.mtu {
            return Ok(());
        }
        self.mtu = mtu;
        self.mss = mtu - HEADER_SIZE;
        self.buffer = BytesMut::with_capacity(mtu + HEADER_SIZE);
        Ok(())
    }

    /// Set the send and receive windows, in segments. Zero leaves a
    /// side unchanged. The receive window never drops below
    /// [`DEFAULT_RECV_WINDOW`], which bounds fragments per message.
    pub fn set_window_size(&mut self, send: u32, recv: u32) {
        if send > 0 {
            self.snd_wnd = send;
        }
        if recv > 0 {
            self.rcv_wnd = recv.max(DEFAULT_RECV_WINDOW);
        }
    }

    /// Current (send, receive) window configuration.
    pub fn window_size(&self) -> (u32, u32) {
        (self.snd_wnd, self.rcv_wnd)
    }

    /// Set the flush cadence in milliseconds, clamped to 10..=5000.
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.clamp(10, 5000);
    }

    /// Tune latency-related behavior. `None` leaves a knob unchanged.
    ///
    /// - `nodelay`: 0 for conservative RTO growth with first-transmit
    ///   slack, 1 to grow each segment's RTO by half of itself, 2 to
    ///   grow it by half the base RTO. Nonzero also drops the RTO floor
    ///   from 100 ms to 30 ms.
    /// - `interval`: flush cadence, clamped to 10..=5000 ms.
    /// - `resend`: fast-retransmit threshold, 0 to disable. 3 is a
    ///   common choice.
    /// - `nocwnd`: `true` disables the congestion window, leaving only
    ///   the configured and advertised windows.
    pub fn set_nodelay(
        &mut self,
        nodelay: Option<u32>,
        interval: Option<u32>,
        resend: Option<u32>,
        nocwnd: Option<bool>,
    ) {
        if let Some(nd) = nodelay {
            self.nodelay = nd;
            self.rtt
                .set_min_rto(if nd != 0 { RTO_MIN_NODELAY } else { RTO_MIN });
        }
        if let Some(iv) = interval {
            self.interval = iv.clamp(10, 5000);
        }
        if let Some(rs) = resend {
            self.fast_resend = rs;
        }
        if let Some(nc) = nocwnd {
            self.nocwnd = nc;
        }
    }

    /// Switch between message mode (boundaries preserved, counting-down
    /// fragment indices) and stream mode (trailing segments coalesced,
    /// all fragments final). Do not switch while data is in flight.
    pub fn set_stream_mode(&mut self, stream: bool) {
        self.stream = stream;
    }

    /// Override the RTO floor directly.
    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.rtt.set_min_rto(min_rto);
    }

    /// Cap the number of transmissions fast retransmit may trigger for
    /// one segment; 0 removes the cap.
    pub fn set_fast_limit(&mut self, limit: u32) {
        self.fast_limit = limit;
    }

    /// Select which protocol events reach the trace sink.
    pub fn set_trace_mask(&mut self, mask: u32) {
        self.trace.set_mask(mask);
    }

    /// Currently selected trace mask.
    pub fn trace_mask(&self) -> u32 {
        self.trace.mask()
    }

    /// Install or remove the trace sink.
    pub fn set_trace_sink(&mut self, sink: Option<TraceSink>) {
        self.trace.set_sink(sink);
    }
}

impl std::fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlBlock")
            .field("conv", &self.conv)
            .field("snd_una", &self.snd_una)
            .field("snd_nxt", &self.snd_nxt)
            .field("rcv_nxt", &self.rcv_nxt)
            .field("snd_queue", &self.snd_queue.len())
            .field("snd_buf", &self.snd_buf.len())
            .field("rcv_buf", &self.rcv_buf.len())
            .field("rcv_queue", &self.rcv_queue.len())
            .field("rmt_wnd", &self.rmt_wnd)
            .field("link_dead", &self.link_dead)
            .finish()
    }
}
