use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::frame::{Frame, FrameType, HEADER_LEN, MAX_DATAGRAM_LEN};
use crate::socket::FrameSocket;
use crate::stats::ReceiverStats;

/// Accepts DATA frames strictly in sequence order, writes their payload to the byte sink,
///  and acknowledges cumulatively. Out-of-order frames are never buffered - a duplicate or
///  future frame only triggers a repeat of the last cumulative ACK, so the peer's
///  retransmission fills any gap. A FIN matching the expected sequence completes the run.
///
/// All state beyond the sink is a single cursor: the next expected sequence and the last
///  acknowledged one (`None` until the first in-order DATA frame was accepted).
pub struct Receiver<W> {
    socket: Arc<dyn FrameSocket>,
    sink: W,

    expected: u32,
    last_delivered: Option<u32>,
    /// ACKs go to the source address of the first valid frame; it is never rebound, but
    ///  frames from other addresses are still processed
    peer_addr: Option<SocketAddr>,

    stats: ReceiverStats,
}

impl<W: AsyncWrite + Unpin> Receiver<W> {
    pub fn new(socket: Arc<dyn FrameSocket>, sink: W) -> Receiver<W> {
        Receiver {
            socket,
            sink,
            expected: 0,
            last_delivered: None,
            peer_addr: None,
            stats: ReceiverStats::default(),
        }
    }

    /// Runs until the stream is complete, i.e. the FIN one past the last delivered DATA
    ///  frame has arrived and been acknowledged. The sink is flushed before returning;
    ///  transport and sink errors are fatal.
    pub async fn run(&mut self) -> anyhow::Result<ReceiverStats> {
        let mut recv_buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            let (num_read, from) = self.socket.recv_from(&mut recv_buf).await?;
            let frame = match Frame::deser(&recv_buf[..num_read]) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("dropping invalid frame from {:?}: {}", from, e);
                    continue;
                }
            };

            if self.peer_addr.is_none() {
                debug!("first valid frame - acknowledging to {:?}", from);
                self.peer_addr = Some(from);
            }

            match frame.frame_type {
                FrameType::Data => self.on_data(&frame).await?,
                FrameType::Fin => {
                    if self.on_fin(&frame).await? {
                        break;
                    }
                }
                FrameType::Ack => trace!("ignoring ACK frame from {:?}", from),
            }
        }

        self.sink.flush().await.context("flushing byte sink")?;
        Ok(self.stats)
    }

    /// recovers the sink, e.g. to inspect what was written
    pub fn into_sink(self) -> W {
        self.sink
    }

    async fn on_data(&mut self, frame: &Frame) -> anyhow::Result<()> {
        if frame.seq != self.expected {
            trace!("DATA #{} out of order, expected #{}", frame.seq, self.expected);
            return self.repeat_last_ack().await;
        }

        if !frame.payload.is_empty() {
            self.sink
                .write_all(&frame.payload)
                .await
                .context("writing to byte sink")?;
            self.stats.bytes_written += frame.payload.len() as u64;
        }
        trace!("accepted DATA #{} with {} payload bytes", frame.seq, frame.payload.len());

        self.last_delivered = Some(self.expected);
        self.expected += 1;
        self.send_ack(frame.seq).await
    }

    /// returns true when the stream is complete
    async fn on_fin(&mut self, frame: &Frame) -> anyhow::Result<bool> {
        if frame.seq != self.expected {
            trace!("FIN #{} out of order, expected #{}", frame.seq, self.expected);
            self.repeat_last_ack().await?;
            return Ok(false);
        }

        debug!("FIN #{} completes the stream", frame.seq);
        self.send_ack(frame.seq).await?;
        Ok(true)
    }

    /// Re-sends the last cumulative ACK, if there is one yet. Before the first in-order
    ///  DATA frame there is nothing meaningful to acknowledge, so early stray frames are
    ///  dropped without a reply.
    async fn repeat_last_ack(&mut self) -> anyhow::Result<()> {
        match self.last_delivered {
            Some(ackno) => self.send_ack(ackno).await,
            None => Ok(()),
        }
    }

    async fn send_ack(&mut self, ackno: u32) -> anyhow::Result<()> {
        let Some(peer_addr) = self.peer_addr else {
            return Ok(());
        };
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        Frame::ack(ackno).ser(&mut buf);
        self.socket.send_to(&buf, peer_addr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MockFrameSocket;
    use bytes::Bytes;
    use mockall::Sequence;
    use tokio::runtime::Builder;

    fn frame_bytes(frame: Frame) -> Bytes {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        buf.freeze()
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 8))
    }

    fn expect_ack(socket: &mut MockFrameSocket, sequence: &mut Sequence, ackno: u32) {
        let expected = frame_bytes(Frame::ack(ackno));
        socket
            .expect_send_to()
            .once()
            .in_sequence(sequence)
            .withf(move |buf, to| buf == &expected[..] && to == &peer())
            .returning(|_, _| Ok(()));
    }

    fn expect_recv(socket: &mut MockFrameSocket, sequence: &mut Sequence, delivered: Bytes) {
        socket
            .expect_recv_from()
            .once()
            .in_sequence(sequence)
            .returning(move |buf| {
                buf[..delivered.len()].copy_from_slice(&delivered);
                Ok((delivered.len(), peer()))
            });
    }

    fn run_scripted(socket: MockFrameSocket) -> (ReceiverStats, Vec<u8>) {
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let mut receiver = Receiver::new(Arc::new(socket), Vec::new());
            let stats = receiver.run().await.unwrap();
            (stats, receiver.into_sink())
        })
    }

    #[test]
    fn test_in_order_delivery_with_cumulative_acks() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(0, Bytes::from_static(b"ab"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(1, Bytes::from_static(b"cd"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(2)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);
        expect_ack(&mut socket, &mut acks, 1);
        expect_ack(&mut socket, &mut acks, 2);

        let (stats, written) = run_scripted(socket);
        assert_eq!(written, b"abcd");
        assert_eq!(stats.bytes_written, 4);
    }

    #[test]
    fn test_duplicate_data_is_reacked_but_delivered_once() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(0, Bytes::from_static(b"ab"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(0, Bytes::from_static(b"ab"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(1)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);
        expect_ack(&mut socket, &mut acks, 0);
        expect_ack(&mut socket, &mut acks, 1);

        let (stats, written) = run_scripted(socket);
        assert_eq!(written, b"ab");
        assert_eq!(stats.bytes_written, 2);
    }

    #[test]
    fn test_future_data_is_dropped_silently_before_first_accept() {
        // DATA #1 arrives first: nothing was delivered yet, so there is no ACK to repeat
        //  and the frame must not be buffered for later
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(1, Bytes::from_static(b"cd"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(0, Bytes::from_static(b"ab"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(1, Bytes::from_static(b"cd"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(2)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);
        expect_ack(&mut socket, &mut acks, 1);
        expect_ack(&mut socket, &mut acks, 2);

        let (stats, written) = run_scripted(socket);
        assert_eq!(written, b"abcd");
        assert_eq!(stats.bytes_written, 4);
    }

    #[test]
    fn test_out_of_order_fin_repeats_last_ack() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(0, Bytes::from_static(b"ab"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(2)));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::data(1, Bytes::from_static(b"cd"))));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(2)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);
        expect_ack(&mut socket, &mut acks, 0); // repeat for the premature FIN
        expect_ack(&mut socket, &mut acks, 1);
        expect_ack(&mut socket, &mut acks, 2);

        let (stats, written) = run_scripted(socket);
        assert_eq!(written, b"abcd");
        assert_eq!(stats.bytes_written, 4);
    }

    #[test]
    fn test_empty_stream_is_a_lone_fin() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(0)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);

        let (stats, written) = run_scripted(socket);
        assert!(written.is_empty());
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn test_stray_ack_frames_are_ignored() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::ack(17)));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(0)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);

        let (stats, written) = run_scripted(socket);
        assert!(written.is_empty());
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn test_garbage_datagrams_are_dropped() {
        let mut socket = MockFrameSocket::new();
        let mut recvs = Sequence::new();
        expect_recv(&mut socket, &mut recvs, Bytes::from_static(b"not a frame at all"));
        expect_recv(&mut socket, &mut recvs, frame_bytes(Frame::fin(0)));

        let mut acks = Sequence::new();
        expect_ack(&mut socket, &mut acks, 0);

        let (stats, written) = run_scripted(socket);
        assert!(written.is_empty());
        assert_eq!(stats.bytes_written, 0);
    }
}
