use crate::codec::CodecError;
use std::io::{Read, Write};

///
/// Writer
///
/// Little-endian primitive writer over any byte sink. Widths are the
/// value's natural widths; multi-byte values are always little-endian.
///

pub struct Writer<'a> {
    out: &'a mut dyn Write,
}

impl<'a> Writer<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> Result<(), CodecError> {
        self.out.write_all(v)?;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), CodecError> {
        self.write_bytes(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), CodecError> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// u32 length prefix followed by the raw bytes.
    pub fn write_len_prefixed(&mut self, v: &[u8]) -> Result<(), CodecError> {
        self.write_u32(v.len() as u32)?;
        self.write_bytes(v)
    }
}

///
/// Reader
///
/// Mirror of `Writer`. A short read is reported as `InsufficientStream`
/// and is fatal; the format has no soft end-of-record marker.
///

pub struct Reader<'a> {
    input: &'a mut dyn Read,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a mut dyn Read) -> Self {
        Self { input }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        self.input.read_exact(buf).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::InsufficientStream { needed: buf.len() }
            } else {
                CodecError::Io(err)
            }
        })
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Inverse of `write_len_prefixed`.
    pub fn read_len_prefixed(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}
