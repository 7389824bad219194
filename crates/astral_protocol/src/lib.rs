#![doc = include_str!("../README.md")]

pub mod decode;
pub mod encode;
mod impls;
pub mod packets;
pub mod string;

use std::io::Write;

pub use decode::{PacketDecoder, PacketFrame};
pub use encode::PacketEncoder;

/// The maximum size in bytes of a single frame, including the opcode but
/// not the leading size field.
pub const MAX_FRAME_SIZE: usize = 16384;

/// The `Encode` trait allows objects to be written to the wire. It is the
/// inverse of [`Decode`].
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to
    /// this function must produce data that decodes back to an equal value,
    /// consuming exactly the bytes that were written.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;
}

/// The `Decode` trait allows objects to be read from the wire.
pub trait Decode: Sized {
    /// Reads this object from the provided byte slice, shrinking it from
    /// the front as bytes are consumed.
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self>;
}

/// Types that are complete packets.
///
/// In serialized form a packet body is preceded by its `u16` opcode; the
/// [`Encode`] and [`Decode`] implementations cover only the body.
pub trait Packet {
    /// The opcode identifying this packet on the wire.
    const OPCODE: u16;
    /// The name of this packet for debugging purposes.
    const NAME: &'static str;
}

/// Remaining unstructured bytes of a packet body.
///
/// Used by relay packets whose payload is forwarded without inspection.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RawBytes(pub Vec<u8>);

impl Encode for RawBytes {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(&self.0)?)
    }
}

impl Decode for RawBytes {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let bytes = r.to_vec();
        *r = &[];
        Ok(Self(bytes))
    }
}
