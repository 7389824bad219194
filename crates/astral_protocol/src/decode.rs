use anyhow::{bail, ensure};
use bytes::{Buf, BytesMut};

use crate::{Decode, Packet, MAX_FRAME_SIZE};

/// Reassembles frames from a byte stream.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, or `None` if more data is needed.
    pub fn try_next_packet(&mut self) -> anyhow::Result<Option<PacketFrame>> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let frame_len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if frame_len < 2 {
            bail!("frame of {frame_len} bytes cannot hold an opcode");
        }
        if frame_len > MAX_FRAME_SIZE {
            bail!("frame length of {frame_len} is out of bounds");
        }

        if self.buf.len() < 2 + frame_len {
            // Not enough data arrived yet.
            return Ok(None);
        }

        self.buf.advance(2);
        let mut body = self.buf.split_to(frame_len);
        let opcode = body.get_u16_le();

        Ok(Some(PacketFrame { opcode, body }))
    }

    pub fn take_capacity(&mut self) -> BytesMut {
        self.buf.split_off(self.buf.len())
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }
}

/// One decoded frame: the opcode and the raw packet body.
#[derive(Clone, Debug)]
pub struct PacketFrame {
    pub opcode: u16,
    pub body: BytesMut,
}

impl PacketFrame {
    /// Attempts to decode this frame as packet type `P`. An error is
    /// returned if the opcode does not match, the body fails to decode, or
    /// input is left over.
    pub fn decode<P>(&self) -> anyhow::Result<P>
    where
        P: Packet + Decode,
    {
        ensure!(
            P::OPCODE == self.opcode,
            "opcode mismatch while decoding '{}': expected {:#06x}, got {:#06x}",
            P::NAME,
            P::OPCODE,
            self.opcode
        );

        let mut r = &self.body[..];
        let pkt = P::decode(&mut r)?;

        ensure!(
            r.is_empty(),
            "missed {} bytes while decoding '{}'",
            r.len(),
            P::NAME
        );

        Ok(pkt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_frame;
    use crate::packets::game::KeepAlive;

    #[test]
    fn frame_round_trip() {
        let frame_bytes = encode_frame(&KeepAlive { token: 0xA1B2C3D4 }).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&frame_bytes);

        let frame = dec.try_next_packet().unwrap().expect("complete frame");
        assert_eq!(frame.opcode, KeepAlive::OPCODE);
        assert_eq!(frame.decode::<KeepAlive>().unwrap().token, 0xA1B2C3D4);

        assert!(dec.try_next_packet().unwrap().is_none());
    }

    #[test]
    fn partial_frame_waits_for_more_data() {
        let frame_bytes = encode_frame(&KeepAlive { token: 7 }).unwrap();

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&frame_bytes[..3]);
        assert!(dec.try_next_packet().unwrap().is_none());

        dec.queue_slice(&frame_bytes[3..]);
        assert!(dec.try_next_packet().unwrap().is_some());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&(MAX_FRAME_SIZE as u16 + 1).to_le_bytes());
        dec.queue_slice(&[0; 4]);
        assert!(dec.try_next_packet().is_err());
    }

    #[test]
    fn trailing_bytes_fail_typed_decode() {
        let mut frame_bytes = encode_frame(&KeepAlive { token: 7 }).unwrap().to_vec();
        // Grow the body by one byte and patch the size field.
        frame_bytes.push(0xFF);
        let new_len = (frame_bytes.len() - 2) as u16;
        frame_bytes[..2].copy_from_slice(&new_len.to_le_bytes());

        let mut dec = PacketDecoder::new();
        dec.queue_slice(&frame_bytes);
        let frame = dec.try_next_packet().unwrap().unwrap();
        assert!(frame.decode::<KeepAlive>().is_err());
    }
}
