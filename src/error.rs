//! Error types for the transport.

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a control block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A message would need more fragments than the peer can reassemble
    #[error("message needs {fragments} fragments, reassembly limit is {limit}")]
    MessageTooLarge {
        /// Fragments the message would occupy
        fragments: usize,
        /// Per-message reassembly bound (the receive-window floor)
        limit: usize,
    },

    /// No message is waiting in the receive queue
    #[error("receive queue is empty")]
    RecvQueueEmpty,

    /// The head message is still missing fragments
    #[error("head message is incomplete")]
    IncompleteMessage,

    /// Caller-provided buffer cannot hold the head message
    #[error("buffer too small: message is {needed} bytes, buffer holds {capacity}")]
    BufferTooSmall {
        /// Total payload bytes of the head message
        needed: usize,
        /// Capacity the caller supplied
        capacity: usize,
    },

    /// Datagram is shorter than a segment header
    #[error("datagram too short for header: {len} bytes")]
    HeaderTooShort {
        /// Bytes actually present
        len: usize,
    },

    /// Datagram belongs to a different conversation
    #[error("conversation mismatch: expected {expected}, got {actual}")]
    ConversationMismatch {
        /// This control block's conversation id
        expected: u32,
        /// Conversation id found on the wire
        actual: u32,
    },

    /// A segment declared more payload than the datagram carries
    #[error("payload truncated: declared {declared} bytes, {remaining} remain")]
    PayloadTruncated {
        /// Length field from the header
        declared: usize,
        /// Bytes left in the datagram
        remaining: usize,
    },

    /// Unrecognized command byte in a segment header
    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    /// MTU below the protocol minimum
    #[error("invalid mtu: {0}")]
    InvalidMtu(usize),
}

impl Error {
    /// Check if this error means "try again later" rather than a hard
    /// failure (nothing deliverable in the receive queue yet).
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::RecvQueueEmpty | Error::IncompleteMessage)
    }

    /// Check if this error indicates a malformed or foreign datagram.
    pub fn is_input_rejected(&self) -> bool {
        matches!(
            self,
            Error::HeaderTooShort { .. }
                | Error::ConversationMismatch { .. }
                | Error::PayloadTruncated { .. }
                | Error::UnknownCommand(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RecvQueueEmpty;
        assert_eq!(err.to_string(), "receive queue is empty");

        let err = Error::BufferTooSmall {
            needed: 4000,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "buffer too small: message is 4000 bytes, buffer holds 1024"
        );

        let err = Error::UnknownCommand(0x55);
        assert_eq!(err.to_string(), "unknown command: 85");
    }

    #[test]
    fn test_would_block() {
        assert!(Error::RecvQueueEmpty.is_would_block());
        assert!(Error::IncompleteMessage.is_would_block());
        assert!(!Error::UnknownCommand(7).is_would_block());
    }

    #[test]
    fn test_input_rejected() {
        assert!(Error::HeaderTooShort { len: 3 }.is_input_rejected());
        assert!(
            Error::ConversationMismatch {
                expected: 1,
                actual: 2
            }
            .is_input_rejected()
        );
        assert!(!Error::RecvQueueEmpty.is_input_rejected());
    }
}
