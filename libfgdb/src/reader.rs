use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Random-access little-endian reader over a seekable byte source.
///
/// Every multi-byte quantity of the File Geodatabase disk format is
/// little-endian; strings are either UTF-16LE or UTF-8 depending on the
/// table flags. [`ByteReader`] is the single place where raw bytes are
/// turned into integers, doubles, strings and the two varint encodings.
#[derive(Debug)]
pub struct ByteReader<R> {
    inner: R,
    len: u64,
}

impl ByteReader<BufReader<File>> {
    /// Opens `path` for buffered read access.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or its length cannot be queried.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> ByteReader<R> {
    /// Wraps an already-open byte source.
    ///
    /// # Errors
    ///
    /// Fails if the source cannot be seeked to determine its length.
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.rewind()?;
        Ok(Self { inner, len })
    }

    /// Total length of the byte source in bytes
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` if the byte source is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor position
    ///
    /// # Errors
    ///
    /// Fails if the underlying source cannot report its position.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Moves the cursor to an absolute byte offset
    ///
    /// # Errors
    ///
    /// Fails if the underlying source rejects the seek.
    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Moves the cursor forward by `n` bytes
    ///
    /// # Errors
    ///
    /// Fails if the underlying source rejects the seek.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Current(i64::try_from(n).map_err(|_| {
            Error::malformed(format!("skip of {n} bytes out of range"))
        })?))?;
        Ok(())
    }

    /// Reads one byte
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.inner.read_u8()?)
    }

    /// Reads a little-endian `i16`
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.inner.read_i16::<LittleEndian>()?)
    }

    /// Reads a little-endian `i32`
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.inner.read_i32::<LittleEndian>()?)
    }

    /// Reads a little-endian `u32`
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.inner.read_u32::<LittleEndian>()?)
    }

    /// Reads a little-endian `i64`
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.inner.read_i64::<LittleEndian>()?)
    }

    /// Reads a little-endian IEEE-754 single
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.inner.read_f32::<LittleEndian>()?)
    }

    /// Reads a little-endian IEEE-754 double
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(self.inner.read_f64::<LittleEndian>()?)
    }

    /// Reads a 40-bit little-endian unsigned offset
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_u40(&mut self) -> Result<u64> {
        Ok(self.inner.read_uint::<LittleEndian>(5)?)
    }

    /// Reads a 48-bit little-endian unsigned offset
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_u48(&mut self) -> Result<u64> {
        Ok(self.inner.read_uint::<LittleEndian>(6)?)
    }

    /// Reads exactly `n` bytes
    ///
    /// # Errors
    ///
    /// Fails on a short read.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads `code_units` UTF-16LE code units and decodes them to a [`String`]
    ///
    /// # Errors
    ///
    /// Fails on a short read or invalid UTF-16.
    pub fn read_utf16(&mut self, code_units: usize) -> Result<String> {
        let mut units = vec![0u16; code_units];
        for unit in &mut units {
            *unit = self.inner.read_u16::<LittleEndian>()?;
        }
        String::from_utf16(&units).map_err(|_| Error::malformed("invalid utf-16 string"))
    }

    /// Reads `bytes` bytes and decodes them as UTF-8
    ///
    /// # Errors
    ///
    /// Fails on a short read or invalid UTF-8.
    pub fn read_utf8(&mut self, bytes: usize) -> Result<String> {
        let buf = self.read_bytes(bytes)?;
        String::from_utf8(buf).map_err(|_| Error::malformed("invalid utf-8 string"))
    }

    /// Reads an unsigned LEB128 varint: 7 payload bits per byte, top bit is
    /// the continuation bit, little-endian payload order.
    ///
    /// # Errors
    ///
    /// Fails on a short read, or if the encoding runs past 63 payload bits.
    pub fn read_varuint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if shift > 56 {
                return Err(Error::malformed("unsigned varint overflows 63 bits"));
            }
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a signed varint.
    ///
    /// The first byte carries the continuation bit (bit 7), the sign
    /// (bit 6) and six payload bits; continuation bytes are plain LEB128
    /// bytes whose payloads land at shifts 6, 13, 20, … The sign applies
    /// to the accumulated magnitude.
    ///
    /// # Errors
    ///
    /// Fails on a short read, or if the encoding runs past 63 payload bits.
    pub fn read_varint(&mut self) -> Result<i64> {
        let first = self.read_u8()?;
        let negative = first & 0x40 != 0;
        let mut magnitude = u64::from(first & 0x3F);
        let mut more = first & 0x80 != 0;
        let mut shift = 6u32;
        while more {
            if shift > 55 {
                return Err(Error::malformed("signed varint overflows 63 bits"));
            }
            let byte = self.read_u8()?;
            magnitude |= u64::from(byte & 0x7F) << shift;
            more = byte & 0x80 != 0;
            shift += 7;
        }
        // magnitude occupies at most 62 bits here
        let signed =
            i64::try_from(magnitude).map_err(|_| Error::malformed("signed varint overflow"))?;
        Ok(if negative { -signed } else { signed })
    }
}
