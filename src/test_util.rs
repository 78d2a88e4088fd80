//! An in-memory datagram transport with deterministic fault injection, for exercising the
//!  protocol loops without real sockets or real time. It is part of the crate's regular
//!  (non-#[cfg(test)]) code so that applications embedding the sender or receiver can reuse
//!  it in their own tests.

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tracing::trace;

use crate::frame::Frame;
use crate::socket::FrameSocket;

/// What the simulated wire does with one outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// deliver normally
    Pass,
    /// lose the frame
    Drop,
    /// deliver the frame twice, back to back
    Duplicate,
    /// deliver the frame after the given delay - frames sent in the meantime overtake it,
    ///  which is how the wire reorders
    Delay(Duration),
}

/// Decides the fate of each outgoing frame. Policies see the parsed frame, so they can
///  target frame types and count occurrences.
pub type FaultPolicy = Box<dyn FnMut(&Frame) -> Fault + Send>;

pub fn faultless() -> FaultPolicy {
    Box::new(|_| Fault::Pass)
}

/// A connected pair of in-memory datagram sockets. Each direction applies its own fault
///  policy; everything that passes is delivered in send order through an unbounded queue.
pub struct SimulatedNet;

impl SimulatedNet {
    /// `a_to_b` is applied to frames sent by the first socket, `b_to_a` to frames sent by
    ///  the second.
    pub fn pair(a_to_b: FaultPolicy, b_to_a: FaultPolicy) -> (Arc<SimulatedSocket>, Arc<SimulatedSocket>) {
        let addr_a = SocketAddr::from(([127, 0, 0, 1], 40001));
        let addr_b = SocketAddr::from(([127, 0, 0, 1], 40002));

        let (tx_to_b, rx_at_b) = mpsc::unbounded_channel();
        let (tx_to_a, rx_at_a) = mpsc::unbounded_channel();

        let a = SimulatedSocket {
            local_addr: addr_a,
            peer_addr: addr_b,
            outbox: tx_to_b,
            inbox: Mutex::new(rx_at_a),
            policy: StdMutex::new(a_to_b),
        };
        let b = SimulatedSocket {
            local_addr: addr_b,
            peer_addr: addr_a,
            outbox: tx_to_a,
            inbox: Mutex::new(rx_at_b),
            policy: StdMutex::new(b_to_a),
        };
        (Arc::new(a), Arc::new(b))
    }
}

pub struct SimulatedSocket {
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    outbox: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    inbox: Mutex<mpsc::UnboundedReceiver<(Bytes, SocketAddr)>>,
    policy: StdMutex<FaultPolicy>,
}

impl SimulatedSocket {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn deliver(&self, frame_buf: Bytes) {
        // a peer that already shut down just makes the frame vanish, like the real wire
        let _ = self.outbox.send((frame_buf, self.local_addr));
    }
}

#[async_trait]
impl FrameSocket for SimulatedSocket {
    async fn send_to(&self, frame_buf: &[u8], _to: SocketAddr) -> anyhow::Result<()> {
        let frame = Frame::deser(frame_buf)?;
        let fault = (self.policy.lock().unwrap())(&frame);
        let bytes = Bytes::copy_from_slice(frame_buf);

        match fault {
            Fault::Pass => self.deliver(bytes),
            Fault::Drop => trace!("dropping {:?} #{}", frame.frame_type, frame.seq),
            Fault::Duplicate => {
                self.deliver(bytes.clone());
                self.deliver(bytes);
            }
            Fault::Delay(delay) => {
                trace!("delaying {:?} #{} by {:?}", frame.frame_type, frame.seq, delay);
                let outbox = self.outbox.clone();
                let from = self.local_addr;
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = outbox.send((bytes, from));
                });
            }
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> anyhow::Result<(usize, SocketAddr)> {
        let (bytes, from) = self
            .inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow!("simulated transport closed"))?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok((bytes.len(), from))
    }
}
