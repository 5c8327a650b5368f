//! Protocol event tracing.
//!
//! A control block can report its wire-level activity through an
//! embedder-supplied sink. Each event class has a mask bit; the sink is
//! only invoked (and the message only formatted) when the corresponding
//! bit is set.

use std::fmt;

/// Event mask bits. Combine with `|` to select event classes.
pub mod mask {
    /// A datagram was handed to the output sink
    pub const OUTPUT: u32 = 1 << 0;
    /// A datagram entered `input`
    pub const INPUT: u32 = 1 << 1;
    /// The application queued a message to send
    pub const SEND: u32 = 1 << 2;
    /// The application consumed a message
    pub const RECV: u32 = 1 << 3;
    /// A data segment arrived
    pub const IN_DATA: u32 = 1 << 4;
    /// An acknowledgment arrived
    pub const IN_ACK: u32 = 1 << 5;
    /// A window probe arrived
    pub const IN_PROBE: u32 = 1 << 6;
    /// A window advertisement arrived
    pub const IN_WINS: u32 = 1 << 7;
    /// A data segment was staged for transmission
    pub const OUT_DATA: u32 = 1 << 8;
    /// Acknowledgments were staged for transmission
    pub const OUT_ACK: u32 = 1 << 9;
    /// A window probe was staged for transmission
    pub const OUT_PROBE: u32 = 1 << 10;
    /// A window advertisement was staged for transmission
    pub const OUT_WINS: u32 = 1 << 11;
}

/// Sink receiving formatted trace lines.
pub type TraceSink = Box<dyn FnMut(&str) + Send>;

/// Mask + optional sink pair owned by a control block.
pub(crate) struct Trace {
    mask: u32,
    sink: Option<TraceSink>,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            mask: 0,
            sink: None,
        }
    }

    pub fn set_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn set_sink(&mut self, sink: Option<TraceSink>) {
        self.sink = sink;
    }

    /// Check whether events of this class would be reported.
    pub fn enabled(&self, bit: u32) -> bool {
        self.mask & bit != 0 && self.sink.is_some()
    }

    /// Report one event. The message is only rendered when the class is
    /// enabled.
    pub fn emit(&mut self, bit: u32, args: fmt::Arguments<'_>) {
        if !self.enabled(bit) {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink(&args.to_string());
        }
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("mask", &self.mask)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capture() -> (Trace, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let mut trace = Trace::new();
        trace.set_sink(Some(Box::new(move |line| {
            captured.lock().unwrap().push(line.to_string());
        })));
        (trace, lines)
    }

    #[test]
    fn test_mask_gates_events() {
        let (mut trace, lines) = capture();
        trace.set_mask(mask::INPUT);

        trace.emit(mask::INPUT, format_args!("rx {} bytes", 24));
        trace.emit(mask::OUTPUT, format_args!("tx {} bytes", 24));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.as_slice(), ["rx 24 bytes"]);
    }

    #[test]
    fn test_no_sink_is_silent() {
        let mut trace = Trace::new();
        trace.set_mask(u32::MAX);
        assert!(!trace.enabled(mask::SEND));
        // Must not panic with no sink installed.
        trace.emit(mask::SEND, format_args!("send"));
    }

    #[test]
    fn test_bits_disjoint() {
        let bits = [
            mask::OUTPUT,
            mask::INPUT,
            mask::SEND,
            mask::RECV,
            mask::IN_DATA,
            mask::IN_ACK,
            mask::IN_PROBE,
            mask::IN_WINS,
            mask::OUT_DATA,
            mask::OUT_ACK,
            mask::OUT_PROBE,
            mask::OUT_WINS,
        ];
        let mut seen = 0u32;
        for bit in bits {
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
    }
}
