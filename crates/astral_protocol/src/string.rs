//! Length-prefixed wire strings.
//!
//! Japanese-origin fields (names, chat) travel as CP932 (Shift-JIS); system
//! messages are UTF-8. Both carry a `u16` byte-count prefix. A string that
//! fails to decode, or a CP932 encode with unmappable characters, is a
//! malformed-packet error rather than a lossy substitution.

use std::io::Write;

use anyhow::{bail, ensure};
use bytes::Buf;
use encoding_rs::SHIFT_JIS;

fn write_prefixed(mut w: impl Write, bytes: &[u8]) -> anyhow::Result<()> {
    ensure!(
        bytes.len() <= u16::MAX as usize,
        "string of {} bytes exceeds the u16 length prefix",
        bytes.len()
    );
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_prefixed<'a>(r: &mut &'a [u8]) -> anyhow::Result<&'a [u8]> {
    ensure!(r.remaining() >= 2, "missing string length");
    let len = r.get_u16_le() as usize;
    ensure!(r.remaining() >= len, "string length {len} exceeds packet body");

    let (head, tail) = r.split_at(len);
    *r = tail;
    Ok(head)
}

pub fn write_utf8(w: impl Write, s: &str) -> anyhow::Result<()> {
    write_prefixed(w, s.as_bytes())
}

pub fn read_utf8(r: &mut &[u8]) -> anyhow::Result<String> {
    let bytes = read_prefixed(r)?;
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_owned()),
        Err(_) => bail!("string is not valid UTF-8"),
    }
}

pub fn write_cp932(w: impl Write, s: &str) -> anyhow::Result<()> {
    let (bytes, _, had_unmappable) = SHIFT_JIS.encode(s);
    if had_unmappable {
        bail!("string contains characters not representable in CP932");
    }
    write_prefixed(w, &bytes)
}

pub fn read_cp932(r: &mut &[u8]) -> anyhow::Result<String> {
    let bytes = read_prefixed(r)?;
    let (s, _, had_errors) = SHIFT_JIS.decode(bytes);
    if had_errors {
        bail!("string is not valid CP932");
    }
    Ok(s.into_owned())
}

/// A wire string carried in CP932 (names, chat).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Cp932String(pub String);

impl crate::Encode for Cp932String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        write_cp932(w, &self.0)
    }
}

impl crate::Decode for Cp932String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        read_cp932(r).map(Self)
    }
}

impl From<&str> for Cp932String {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A wire string carried in UTF-8 (system messages, session keys).
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Utf8String(pub String);

impl crate::Encode for Utf8String {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        write_utf8(w, &self.0)
    }
}

impl crate::Decode for Utf8String {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        read_utf8(r).map(Self)
    }
}

impl From<&str> for Utf8String {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_round_trip() {
        let mut buf = Vec::new();
        write_utf8(&mut buf, "system message").unwrap();

        let mut r = &buf[..];
        assert_eq!(read_utf8(&mut r).unwrap(), "system message");
        assert!(r.is_empty());
    }

    #[test]
    fn cp932_round_trip() {
        let mut buf = Vec::new();
        write_cp932(&mut buf, "ピクシー").unwrap();
        // CP932 katakana is two bytes per character.
        assert_eq!(buf[0], 8);

        let mut r = &buf[..];
        assert_eq!(read_cp932(&mut r).unwrap(), "ピクシー");
    }

    #[test]
    fn unmappable_cp932_is_an_error() {
        let mut buf = Vec::new();
        assert!(write_cp932(&mut buf, "\u{1F980}").is_err());
    }

    #[test]
    fn bad_length_prefix_is_an_error() {
        let mut r: &[u8] = &[0x10, 0x00, b'a'];
        assert!(read_utf8(&mut r).is_err());
    }
}
