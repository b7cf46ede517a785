use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode or decode a checkpoint field: {0}")]
    Codec(#[from] bincode::Error),
    #[error("unknown type tag {tag} for {kind}")]
    UnknownTag { tag: u8, kind: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

/// State that can be written to and restored from a checkpoint stream.
///
/// Fields are written and read in the same fixed order; that order is the wire format.
pub trait Checkpoint: Sized {
    fn write<W: io::Write>(&self, writer: &mut W) -> Result<()>;
    fn read<R: io::Read>(reader: &mut R) -> Result<Self>;
}

pub fn write_value<T, W>(writer: &mut W, value: &T) -> Result<()>
where
    T: serde::Serialize + ?Sized,
    W: io::Write,
{
    bincode::serialize_into(&mut *writer, value)?;
    Ok(())
}

pub fn read_value<T, R>(reader: &mut R) -> Result<T>
where
    T: for<'a> serde::Deserialize<'a>,
    R: io::Read,
{
    Ok(bincode::deserialize_from(&mut *reader)?)
}

pub fn write_tag<W: io::Write>(writer: &mut W, tag: u8) -> Result<()> {
    write_value(writer, &tag)
}

pub fn read_tag<R: io::Read>(reader: &mut R) -> Result<u8> {
    read_value(reader)
}

macro_rules! serde_checkpoint {
    ($($t:ty),*) => {
        $(
            impl Checkpoint for $t {
                fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
                    write_value(writer, self)
                }

                fn read<R: io::Read>(reader: &mut R) -> Result<Self> {
                    read_value(reader)
                }
            }
        )*
    };
}

serde_checkpoint!(bool, u8, u32, u64, usize, i32, f64, String);

impl<T: Checkpoint> Checkpoint for Vec<T> {
    fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        write_value(writer, &(self.len() as u64))?;
        for v in self {
            v.write(writer)?;
        }
        Ok(())
    }

    fn read<R: io::Read>(reader: &mut R) -> Result<Self> {
        let len: u64 = read_value(reader)?;
        let mut vs = Vec::with_capacity(len as usize);
        for _ in 0..len {
            vs.push(T::read(reader)?);
        }
        Ok(vs)
    }
}

// serde only covers arrays up to 32 elements, so arrays are written element-wise
impl<T: Checkpoint + Default + Copy, const N: usize> Checkpoint for [T; N] {
    fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        for v in self {
            v.write(writer)?;
        }
        Ok(())
    }

    fn read<R: io::Read>(reader: &mut R) -> Result<Self> {
        let mut vs = [T::default(); N];
        for v in vs.iter_mut() {
            *v = T::read(reader)?;
        }
        Ok(vs)
    }
}

impl<T: Checkpoint> Checkpoint for Option<T> {
    fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        match self {
            Some(v) => {
                write_value(writer, &true)?;
                v.write(writer)
            }
            None => write_value(writer, &false),
        }
    }

    fn read<R: io::Read>(reader: &mut R) -> Result<Self> {
        if read_value::<bool, _>(reader)? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }
}

impl<A: Checkpoint, B: Checkpoint> Checkpoint for (A, B) {
    fn write<W: io::Write>(&self, writer: &mut W) -> Result<()> {
        self.0.write(writer)?;
        self.1.write(writer)
    }

    fn read<R: io::Read>(reader: &mut R) -> Result<Self> {
        Ok((A::read(reader)?, B::read(reader)?))
    }
}

/// Writes `value` into a fresh buffer.
pub fn to_bytes<T: Checkpoint>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.write(&mut buf)?;
    Ok(buf)
}

pub fn from_bytes<T: Checkpoint>(mut data: &[u8]) -> Result<T> {
    T::read(&mut data)
}
