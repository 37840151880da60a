//! Utilities for reading and writing little-endian values.

use std::io::{self, BufRead, Write};

///
/// READERS
///

/// Read a fixed-size array of bytes from a reader.
pub fn read_bytes<const N: usize>(reader: &mut dyn BufRead) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Read a `i8` from a reader.
pub fn read_i8(reader: &mut dyn BufRead) -> io::Result<i8> {
    Ok(i8::from_le_bytes(read_bytes::<1>(reader)?))
}

/// Read a `u8` from a reader.
pub fn read_u8(reader: &mut dyn BufRead) -> io::Result<u8> {
    Ok(u8::from_le_bytes(read_bytes::<1>(reader)?))
}

/// Read a `i16` from a reader.
pub fn read_i16(reader: &mut dyn BufRead) -> io::Result<i16> {
    Ok(i16::from_le_bytes(read_bytes::<2>(reader)?))
}

/// Read a `u16` from a reader.
pub fn read_u16(reader: &mut dyn BufRead) -> io::Result<u16> {
    Ok(u16::from_le_bytes(read_bytes::<2>(reader)?))
}

/// Read a `i32` from a reader.
pub fn read_i32(reader: &mut dyn BufRead) -> io::Result<i32> {
    Ok(i32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `u32` from a reader.
pub fn read_u32(reader: &mut dyn BufRead) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `i64` from a reader.
pub fn read_i64(reader: &mut dyn BufRead) -> io::Result<i64> {
    Ok(i64::from_le_bytes(read_bytes::<8>(reader)?))
}

/// Read a `u64` from a reader.
pub fn read_u64(reader: &mut dyn BufRead) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_bytes::<8>(reader)?))
}

/// Read a `f32` from a reader.
pub fn read_f32(reader: &mut dyn BufRead) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `f64` from a reader.
pub fn read_f64(reader: &mut dyn BufRead) -> io::Result<f64> {
    Ok(f64::from_le_bytes(read_bytes::<8>(reader)?))
}

/// Read a length (32-bit or 64-bit depending on the container version) from a reader.
pub fn read_length(reader: &mut dyn BufRead, use_64_bit_length: bool) -> io::Result<u64> {
    if use_64_bit_length {
        read_u64(reader)
    } else {
        read_u32(reader).map(u64::from)
    }
}

/// Read a `bool` represented as a single byte from a reader.
pub fn read_bool(reader: &mut dyn BufRead) -> io::Result<bool> {
    match read_u8(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        val => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid u8 value for bool: '{val}'"),
        )),
    }
}

/// Read a variable-length array of bytes from a reader.
pub fn read_bytes_with_len(reader: &mut dyn BufRead, len: usize) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

///
/// WRITERS
///

/// Write a `u8` to a writer.
pub fn write_u8(writer: &mut dyn Write, value: u8) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i8` to a writer.
pub fn write_i8(writer: &mut dyn Write, value: i8) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `u16` to a writer.
pub fn write_u16(writer: &mut dyn Write, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i16` to a writer.
pub fn write_i16(writer: &mut dyn Write, value: i16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `u32` to a writer.
pub fn write_u32(writer: &mut dyn Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i32` to a writer.
pub fn write_i32(writer: &mut dyn Write, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `u64` to a writer.
pub fn write_u64(writer: &mut dyn Write, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i64` to a writer.
pub fn write_i64(writer: &mut dyn Write, value: i64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `f32` to a writer.
pub fn write_f32(writer: &mut dyn Write, value: f32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `f64` to a writer.
pub fn write_f64(writer: &mut dyn Write, value: f64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `bool` represented as a single byte to a writer.
pub fn write_bool(writer: &mut dyn Write, value: bool) -> io::Result<()> {
    write_u8(writer, u8::from(value))
}

/// Write a length (32-bit or 64-bit depending on the container version) to a writer.
pub fn write_length(writer: &mut dyn Write, use_64_bit_length: bool, len: u64) -> io::Result<()> {
    if use_64_bit_length {
        write_u64(writer, len)
    } else {
        write_u32(
            writer,
            u32::try_from(len).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "length does not fit in 32 bits")
            })?,
        )
    }
}

/// Write a length-prefixed string to a writer.
pub fn write_string(
    writer: &mut dyn Write,
    use_64_bit_length: bool,
    value: &str,
) -> io::Result<()> {
    write_length(writer, use_64_bit_length, value.len() as u64)?;
    writer.write_all(value.as_bytes())
}

/// Write N zero bytes to a writer.
pub fn write_zero_bytes(writer: &mut dyn Write, n: usize) -> io::Result<()> {
    writer.write_all(&vec![0u8; n])
}
