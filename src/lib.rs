//! RDTP is a small file transfer protocol that adds reliability guarantees on top of UDP
//!  (or any other transport that delivers datagrams atomically, without ordering or delivery
//!  guarantees):
//!
//! * Every byte of the input stream arrives at the receiver exactly once, in order, or the
//!    transfer does not complete at all
//! * Each frame carries a CRC-32 checksum over header and payload, so corrupted datagrams
//!    are indistinguishable from lost ones
//! * The sender keeps a fixed-size sliding window of unacknowledged DATA frames and
//!    retransmits the whole window when the oldest frame's timer expires (go-back-N)
//! * The receiver accepts only the next expected sequence number and acknowledges
//!    cumulatively - it never buffers out-of-order frames, keeping its state to a single
//!    cursor and pushing all recovery work to the sender
//! * End of stream is an explicit FIN/ACK handshake; the FIN is retransmitted until
//!    acknowledged
//!
//! It is deliberately *not* a general-purpose transport: one sender, one receiver, one byte
//!  stream per run, a fixed window, and no congestion control.
//!
//! ## Frame layout
//!
//! All multi-byte integers are in network byte order (BE):
//!
//! ```ascii
//!  0: magic (u32)        - 0x52445450, "RDTP"
//!  4: version (u8)       - currently 1
//!  5: type (u8)          - 1 DATA, 2 ACK, 3 FIN
//!  6: reserved (u16)     - zero on send, ignored on receive
//!  8: seq (u32)          - sequence number; for ACK the cumulative ack number
//! 12: payload_len (u16)  - 0 for ACK and FIN
//! 14: header_len (u16)   - always 20
//! 16: crc32 (u32)        - over the whole frame with this field zeroed
//! 20: payload
//! ```
//!
//! Sequence numbers start at 0 and increase by 1 per DATA frame; the FIN carries the
//!  sequence one past the last DATA frame. An ACK with sequence `n` acknowledges every DATA
//!  frame up to and including `n`.

pub mod config;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod stats;
pub mod test_util;
