use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Error, ErrorKind, Result};

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - everything multi-byte is big endian
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;

    /// Serialize into a fresh buffer
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![];
        self.serialize(&mut buffer)?;
        Ok(buffer)
    }
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

macro_rules! serialize_big_endian {
    ($($ty:ty => $write:ident,)*) => {
        $(
            impl Serialize for $ty {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    writer.$write::<BigEndian>(*self)
                }
            }
        )*
    };
}

serialize_big_endian! {
    u16 => write_u16,
    u32 => write_u32,
    i16 => write_i16,
    i32 => write_i32,
    i64 => write_i64,
    f32 => write_f32,
    f64 => write_f64,
}

/// Size in `u16` is the first thing serialized
///
/// Tables which outgrow the `u16` count can't be represented at all.
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        let len = u16::try_from(self.len()).map_err(|_| {
            Error::new(
                ErrorKind::InvalidData,
                format!("table of {} entries is too long for a class file", self.len()),
            )
        })?;
        len.serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_byte_values_are_big_endian() {
        assert_eq!(0x1234u16.to_bytes().unwrap(), vec![0x12, 0x34]);
        assert_eq!((-2i32).to_bytes().unwrap(), vec![0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(1.0f32.to_bytes().unwrap(), vec![0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn vectors_are_length_prefixed() {
        assert_eq!(
            vec![7u16, 8u16].to_bytes().unwrap(),
            vec![0x00, 0x02, 0x00, 0x07, 0x00, 0x08]
        );
        assert!(vec![0u8; 70_000].to_bytes().is_err());
    }
}
