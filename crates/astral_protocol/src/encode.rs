use anyhow::ensure;
use bytes::{BufMut, BytesMut};

use crate::{Encode, Packet, MAX_FRAME_SIZE};

/// Accumulates outgoing frames.
///
/// Each appended packet is framed with a `u16` size (opcode + body) and its
/// `u16` opcode. [`PacketEncoder::take`] drains everything written so far
/// for a single write to the transport.
#[derive(Default)]
pub struct PacketEncoder {
    buf: BytesMut,
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        let start = self.buf.len();

        // Reserve the size field, then write opcode + body over it.
        self.buf.put_u16_le(0);
        self.buf.put_u16_le(P::OPCODE);
        pkt.encode((&mut self.buf).writer())?;

        let frame_len = self.buf.len() - start - 2;
        ensure!(
            frame_len <= MAX_FRAME_SIZE,
            "packet '{}' of {frame_len} bytes exceeds the maximum frame size",
            P::NAME
        );

        self.buf[start..start + 2].copy_from_slice(&(frame_len as u16).to_le_bytes());
        Ok(())
    }

    /// Appends an already-framed byte sequence, for relaying.
    pub fn append_frame_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Encodes a single packet as one framed byte sequence.
pub fn encode_frame<P>(pkt: &P) -> anyhow::Result<BytesMut>
where
    P: Packet + Encode,
{
    let mut enc = PacketEncoder::new();
    enc.append_packet(pkt)?;
    Ok(enc.take())
}
