use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const MAGIC: u32 = 0x5244_5450; // "RDTP"
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = 1400;
/// upper bound for receive buffers - no valid frame is larger than this
pub const MAX_DATAGRAM_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

const CRC_OFFSET: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 1,
    Ack = 2,
    Fin = 3,
}

/// The single wire entity. For DATA and FIN, `seq` is the sender's sequence number; for ACK
///  it is the cumulative acknowledgement number, i.e. the highest sequence delivered in
///  order. ACK and FIN frames have an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub seq: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn data(seq: u32, payload: Bytes) -> Frame {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        Frame {
            frame_type: FrameType::Data,
            seq,
            payload,
        }
    }

    pub fn ack(ackno: u32) -> Frame {
        Frame {
            frame_type: FrameType::Ack,
            seq: ackno,
            payload: Bytes::new(),
        }
    }

    pub fn fin(seq: u32) -> Frame {
        Frame {
            frame_type: FrameType::Fin,
            seq,
            payload: Bytes::new(),
        }
    }

    /// Appends the serialized frame at the buffer's current end, then patches the checksum
    ///  into its placeholder.
    pub fn ser(&self, buf: &mut BytesMut) {
        let start = buf.len();

        buf.put_u32(MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.frame_type.into());
        buf.put_u16(0); // reserved
        buf.put_u32(self.seq);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(HEADER_LEN as u16);
        buf.put_u32(0); // checksum placeholder
        buf.put_slice(&self.payload);

        let crc = frame_crc(&buf[start..]);
        buf[start + CRC_OFFSET..start + CRC_OFFSET + 4].copy_from_slice(&crc.to_be_bytes());
    }

    /// Parses and validates one datagram. Anything that is not a well-formed frame of the
    ///  current protocol version with an intact checksum is an error for the caller to drop;
    ///  adversarial input never panics.
    pub fn deser(buf: &[u8]) -> anyhow::Result<Frame> {
        if buf.len() < HEADER_LEN {
            bail!("datagram shorter than frame header: {} bytes", buf.len());
        }

        let mut header = &buf[..HEADER_LEN];
        let magic = header.get_u32();
        if magic != MAGIC {
            bail!("magic mismatch: {:08x}", magic);
        }
        let version = header.get_u8();
        if version != PROTOCOL_VERSION {
            bail!("unsupported protocol version {}", version);
        }
        let frame_type = FrameType::try_from(header.get_u8())
            .map_err(|e| anyhow!("unknown frame type tag {}", e.number))?;
        let _reserved = header.get_u16();
        let seq = header.get_u32();
        let payload_len = header.get_u16() as usize;
        let header_len = header.get_u16() as usize;
        if header_len != HEADER_LEN {
            bail!("unsupported header length {}", header_len);
        }
        if HEADER_LEN + payload_len != buf.len() {
            bail!(
                "length mismatch: header declares {} payload bytes, datagram has {}",
                payload_len,
                buf.len() - HEADER_LEN
            );
        }
        let carried_crc = header.get_u32();
        let computed_crc = frame_crc(buf);
        if carried_crc != computed_crc {
            bail!(
                "checksum mismatch: carried {:08x}, computed {:08x}",
                carried_crc,
                computed_crc
            );
        }

        Ok(Frame {
            frame_type,
            seq,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        })
    }
}

/// CRC-32 (reflected IEEE polynomial 0xEDB88320, init and final XOR all-ones) over the
///  whole frame, with the checksum field substituted by zero bytes.
fn frame_crc(frame_buf: &[u8]) -> u32 {
    let hasher = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    let mut digest = hasher.digest();
    digest.update(&frame_buf[..CRC_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&frame_buf[CRC_OFFSET + 4..]);
    digest.finalize()
}
