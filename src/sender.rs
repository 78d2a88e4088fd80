use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::config::SenderConfig;
use crate::frame::{Frame, FrameType, HEADER_LEN, MAX_DATAGRAM_LEN};
use crate::socket::FrameSocket;
use crate::stats::SenderStats;

/// One unacknowledged DATA frame. The serialized bytes are kept so a retransmission goes
///  straight to the socket without rebuilding (or re-checksumming) the frame.
struct InFlight {
    seq: u32,
    frame_buf: Bytes,
    payload_len: usize,
    last_send: Instant,
}

/// Streams a byte source to the peer as sequence-numbered DATA frames with a sliding
///  window, retransmitting the whole window whenever the oldest unacknowledged frame's
///  timer expires, and closes with a FIN/ACK handshake once everything is acknowledged.
///
/// Single logical thread of control: the only suspension points are the timed datagram
///  wait and reads from the byte source.
pub struct Sender<R> {
    config: SenderConfig,
    socket: Arc<dyn FrameSocket>,
    peer_addr: SocketAddr,
    source: R,

    /// contiguous range of unacknowledged frames; new entries appended at the tail,
    ///  acknowledged entries removed from the head
    window: VecDeque<InFlight>,
    next_seq: u32,
    eof: bool,

    stats: SenderStats,
}

impl<R: AsyncRead + Unpin> Sender<R> {
    pub fn new(
        socket: Arc<dyn FrameSocket>,
        peer_addr: SocketAddr,
        source: R,
        config: SenderConfig,
    ) -> anyhow::Result<Sender<R>> {
        config.validate()?;

        Ok(Sender {
            config,
            socket,
            peer_addr,
            source,
            window: VecDeque::new(),
            next_seq: 0,
            eof: false,
            stats: SenderStats::default(),
        })
    }

    /// Runs the transfer to completion: every byte of the source is acknowledged by the
    ///  peer and the closing FIN has been acknowledged when this returns. Socket and byte
    ///  source errors are fatal; there is no bound on retransmission attempts, so an
    ///  unreachable peer stalls the transfer indefinitely.
    pub async fn run(&mut self) -> anyhow::Result<SenderStats> {
        self.fill_window().await?;

        let mut recv_buf = vec![0u8; MAX_DATAGRAM_LEN];
        while !self.eof || !self.window.is_empty() {
            let wait = match self.window.front() {
                Some(oldest) => self
                    .config
                    .retransmit_timeout
                    .saturating_sub(oldest.last_send.elapsed()),
                None => self.config.retransmit_timeout,
            };

            match time::timeout(wait, self.socket.recv_from(&mut recv_buf)).await {
                Err(_elapsed) => self.retransmit_window().await?,
                Ok(received) => {
                    let (num_read, from) = received?;
                    let frame = match Frame::deser(&recv_buf[..num_read]) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("dropping invalid frame from {:?}: {}", from, e);
                            continue;
                        }
                    };
                    if frame.frame_type != FrameType::Ack {
                        debug!("ignoring {:?} frame from {:?}", frame.frame_type, from);
                        continue;
                    }
                    if self.on_ack(frame.seq) {
                        self.fill_window().await?;
                    }
                }
            }
        }

        self.close().await?;
        Ok(self.stats)
    }

    /// Reads chunks from the byte source and sends them as DATA frames until the window is
    ///  full or the source is exhausted.
    async fn fill_window(&mut self) -> anyhow::Result<()> {
        while !self.eof && self.window.len() < self.config.window {
            let chunk = self.read_chunk().await?;
            if chunk.is_empty() {
                trace!("byte source exhausted, {} DATA frames total", self.next_seq);
                self.eof = true;
                break;
            }

            let seq = self.next_seq;
            let payload_len = chunk.len();
            let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
            Frame::data(seq, chunk.freeze()).ser(&mut buf);
            let frame_buf = buf.freeze();

            trace!("sending DATA #{} with {} payload bytes", seq, payload_len);
            self.socket.send_to(&frame_buf, self.peer_addr).await?;
            self.stats.payload_bytes += payload_len as u64;
            self.window.push_back(InFlight {
                seq,
                frame_buf,
                payload_len,
                last_send: Instant::now(),
            });
            self.next_seq += 1;
        }
        Ok(())
    }

    /// Fills a chunk to exactly MSS bytes unless end-of-stream intervenes; a final short
    ///  chunk becomes a full (short) frame, never a padded one.
    async fn read_chunk(&mut self) -> anyhow::Result<BytesMut> {
        let mut chunk = BytesMut::zeroed(self.config.mss);
        let mut filled = 0;
        while filled < chunk.len() {
            let num_read = self
                .source
                .read(&mut chunk[filled..])
                .await
                .context("reading from byte source")?;
            if num_read == 0 {
                break;
            }
            filled += num_read;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }

    /// Cumulative acknowledgement: drops every in-flight frame up to and including `ackno`
    ///  from the head of the window. Returns whether the window slid, i.e. whether there is
    ///  room to refill.
    fn on_ack(&mut self, ackno: u32) -> bool {
        let Some(oldest) = self.window.front() else {
            return false;
        };
        if ackno < oldest.seq {
            trace!("ignoring ACK #{} below window base #{}", ackno, oldest.seq);
            return false;
        }

        while self.window.front().map(|f| f.seq <= ackno).unwrap_or(false) {
            self.window.pop_front();
        }
        trace!("ACK #{} slid the window, {} frames in flight", ackno, self.window.len());
        true
    }

    /// Go-back-N: the timer of the oldest unacknowledged frame expired, so every frame in
    ///  the window is retransmitted, in ascending sequence order.
    async fn retransmit_window(&mut self) -> anyhow::Result<()> {
        let Some(oldest) = self.window.front() else {
            return Ok(());
        };
        let in_flight_bytes: usize = self.window.iter().map(|f| f.payload_len).sum();
        debug!(
            "retransmission timer expired, re-sending {} frames ({} payload bytes) from #{}",
            self.window.len(),
            in_flight_bytes,
            oldest.seq
        );

        for in_flight in self.window.iter_mut() {
            self.socket.send_to(&in_flight.frame_buf, self.peer_addr).await?;
            in_flight.last_send = Instant::now();
            self.stats.retransmits += 1;
        }
        Ok(())
    }

    /// FIN/ACK handshake: the FIN carries the sequence one past the last DATA frame and is
    ///  re-sent every timeout until the matching ACK arrives. Everything else received in
    ///  this phase is ignored.
    async fn close(&mut self) -> anyhow::Result<()> {
        let fin_seq = self.next_seq;
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        Frame::fin(fin_seq).ser(&mut buf);
        let fin_buf = buf.freeze();

        debug!("window drained, closing with FIN #{}", fin_seq);
        self.socket.send_to(&fin_buf, self.peer_addr).await?;
        let mut last_fin_send = Instant::now();
        let mut fin_resends = 0u64;

        let mut recv_buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            if last_fin_send.elapsed() >= self.config.retransmit_timeout {
                trace!("re-sending FIN #{}", fin_seq);
                self.socket.send_to(&fin_buf, self.peer_addr).await?;
                last_fin_send = Instant::now();
                fin_resends += 1;
            }

            let wait = self
                .config
                .retransmit_timeout
                .saturating_sub(last_fin_send.elapsed());
            let (num_read, from) = match time::timeout(wait, self.socket.recv_from(&mut recv_buf)).await
            {
                Ok(received) => received?,
                Err(_elapsed) => continue,
            };

            match Frame::deser(&recv_buf[..num_read]) {
                Ok(frame) if frame.frame_type == FrameType::Ack && frame.seq == fin_seq => {
                    debug!("FIN acknowledged after {} re-sends", fin_resends);
                    return Ok(());
                }
                Ok(frame) => {
                    trace!("ignoring {:?} #{} while closing", frame.frame_type, frame.seq)
                }
                Err(e) => debug!("dropping invalid frame from {:?}: {}", from, e),
            }
        }
    }
}
