//! Encode call arguments and decode responses.
//!
//! Integers are big-endian. Variable-length values (byte strings and vectors) carry a
//! `u32` length prefix.

use crate::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use lanes_utils::{sha256::DIGEST_LENGTH, Digest};

/// Types that can be written to a buffer.
pub trait Encode {
    /// Exact number of bytes [Encode::write] produces.
    fn len_encoded(&self) -> usize;

    /// Write this value to `buf`.
    fn write(&self, buf: &mut impl BufMut);

    /// Encode this value into a fresh buffer.
    fn encode(&self) -> Bytes {
        let len = self.len_encoded();
        let mut buffer = BytesMut::with_capacity(len);
        self.write(&mut buffer);
        assert_eq!(buffer.len(), len, "write() did not write expected bytes");
        buffer.freeze()
    }
}

/// Types that can be read from a buffer.
pub trait Read: Sized {
    /// Read a value from `buf`, consuming exactly the bytes it occupies.
    fn read(buf: &mut impl Buf) -> Result<Self, Error>;
}

/// Types that can be decoded from a complete buffer.
pub trait Decode: Read {
    /// Decode a value, failing if any bytes remain afterwards.
    fn decode(mut buf: impl Buf) -> Result<Self, Error> {
        let value = Self::read(&mut buf)?;
        if buf.has_remaining() {
            return Err(Error::Decode("extra data"));
        }
        Ok(value)
    }
}

impl<T: Read> Decode for T {}

fn ensure(buf: &impl Buf, len: usize) -> Result<(), Error> {
    if buf.remaining() < len {
        return Err(Error::Decode("unexpected end of buffer"));
    }
    Ok(())
}

fn read_len(buf: &mut impl Buf) -> Result<usize, Error> {
    ensure(buf, 4)?;
    Ok(buf.get_u32() as usize)
}

impl Encode for () {
    fn len_encoded(&self) -> usize {
        0
    }

    fn write(&self, _: &mut impl BufMut) {}
}

impl Read for () {
    fn read(_: &mut impl Buf) -> Result<Self, Error> {
        Ok(())
    }
}

impl Encode for bool {
    fn len_encoded(&self) -> usize {
        1
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Read for bool {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        ensure(buf, 1)?;
        match buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::Decode("invalid bool")),
        }
    }
}

impl Encode for u32 {
    fn len_encoded(&self) -> usize {
        4
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(*self);
    }
}

impl Read for u32 {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        ensure(buf, 4)?;
        Ok(buf.get_u32())
    }
}

impl Encode for u64 {
    fn len_encoded(&self) -> usize {
        8
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u64(*self);
    }
}

impl Read for u64 {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        ensure(buf, 8)?;
        Ok(buf.get_u64())
    }
}

impl Encode for Digest {
    fn len_encoded(&self) -> usize {
        DIGEST_LENGTH
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.as_ref());
    }
}

impl Read for Digest {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        ensure(buf, DIGEST_LENGTH)?;
        let mut value = [0u8; DIGEST_LENGTH];
        buf.copy_to_slice(&mut value);
        Ok(Self::from(value))
    }
}

impl Encode for Bytes {
    fn len_encoded(&self) -> usize {
        4 + self.len()
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.len() as u32);
        buf.put_slice(self);
    }
}

impl Read for Bytes {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        let len = read_len(buf)?;
        ensure(buf, len)?;
        Ok(buf.copy_to_bytes(len))
    }
}

impl<T: Encode> Encode for Option<T> {
    fn len_encoded(&self) -> usize {
        1 + self.as_ref().map_or(0, Encode::len_encoded)
    }

    fn write(&self, buf: &mut impl BufMut) {
        match self {
            Some(value) => {
                buf.put_u8(1);
                value.write(buf);
            }
            None => buf.put_u8(0),
        }
    }
}

impl<T: Read> Read for Option<T> {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        if bool::read(buf)? {
            Ok(Some(T::read(buf)?))
        } else {
            Ok(None)
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn len_encoded(&self) -> usize {
        4 + self.iter().map(Encode::len_encoded).sum::<usize>()
    }

    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.len() as u32);
        for item in self {
            item.write(buf);
        }
    }
}

impl<T: Read> Read for Vec<T> {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        let len = read_len(buf)?;
        // Cap preallocation by the bytes actually present
        let mut items = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            items.push(T::read(buf)?);
        }
        Ok(items)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn len_encoded(&self) -> usize {
        self.0.len_encoded() + self.1.len_encoded()
    }

    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
        self.1.write(buf);
    }
}

impl<A: Read, B: Read> Read for (A, B) {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        Ok((A::read(buf)?, B::read(buf)?))
    }
}
