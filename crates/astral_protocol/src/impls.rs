//! `Encode`/`Decode` for primitives and common containers. All integers are
//! little-endian with explicit widths.

use std::io::Write;

use anyhow::ensure;
use bytes::Buf;

use crate::{Decode, Encode};

macro_rules! int_impl {
    ($ty:ty, $get:ident) => {
        impl Encode for $ty {
            fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
                Ok(w.write_all(&self.to_le_bytes())?)
            }
        }

        impl Decode for $ty {
            fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
                ensure!(
                    r.remaining() >= std::mem::size_of::<$ty>(),
                    concat!("not enough data to decode ", stringify!($ty))
                );
                Ok(r.$get())
            }
        }
    };
}

int_impl!(i8, get_i8);
int_impl!(u8, get_u8);
int_impl!(i16, get_i16_le);
int_impl!(u16, get_u16_le);
int_impl!(i32, get_i32_le);
int_impl!(u32, get_u32_le);
int_impl!(i64, get_i64_le);
int_impl!(u64, get_u64_le);
int_impl!(f32, get_f32_le);
int_impl!(f64, get_f64_le);

impl Encode for bool {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        Ok(w.write_all(&[u8::from(*self)])?)
    }
}

impl Decode for bool {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        ensure!(r.remaining() >= 1, "not enough data to decode bool");
        Ok(r.get_u8() != 0)
    }
}

/// Lists are length-prefixed with a `u32` element count.
impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        (self.len() as u32).encode(&mut w)?;
        for item in self {
            item.encode(&mut w)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let len = u32::decode(r)? as usize;
        // Element size is at least one byte; reject counts the body cannot
        // possibly hold before allocating.
        ensure!(r.remaining() >= len, "list length {len} exceeds packet body");

        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(r)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let mut buf = Vec::new();
        value.encode(&mut buf).unwrap();

        let mut r = &buf[..];
        assert_eq!(T::decode(&mut r).unwrap(), value);
        assert!(r.is_empty());
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(0x1234u16);
        round_trip(-5i16);
        round_trip(0xDEADBEEFu32);
        round_trip(-1i64);
        round_trip(1.5f32);
        round_trip(true);
        round_trip(vec![1u32, 2, 3]);
    }

    #[test]
    fn little_endian_layout() {
        let mut buf = Vec::new();
        0x0102u16.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x01]);
    }

    #[test]
    fn truncated_input_errors() {
        let mut r: &[u8] = &[0x01];
        assert!(u32::decode(&mut r).is_err());
    }

    #[test]
    fn oversized_list_count_rejected() {
        let mut buf = Vec::new();
        0xFFFF_FFFFu32.encode(&mut buf).unwrap();
        let mut r = &buf[..];
        assert!(Vec::<u8>::decode(&mut r).is_err());
    }
}
