//! Low-level RDB length/string primitives (subset of the real format — see
//! `crate::store::load_rdb` for the opcode-level loader built on top of
//! these). Only two length-encoding variants are recognized; anything else
//! yields `None` rather than guessing.

use std::io::Read;

use crate::error::RdbError;

pub enum Length {
    Len(u32),
    Byte(u8),
}

/// Reads one length-encoding byte. Top bits `00` mean the remaining six
/// bits are the length; `11` selects a special encoding, of which only the
/// 8-bit integer variant (low six bits `000000`) is recognized here.
/// Anything else is unsupported in this subset.
pub fn read_length<R: Read>(reader: &mut R) -> Result<Option<Length>, RdbError> {
    let head = read_byte(reader)?;
    match head & 0b1100_0000 {
        0b0000_0000 => Ok(Some(Length::Len((head & 0b0011_1111) as u32))),
        0b1100_0000 => match head & 0b0011_1111 {
            0 => Ok(Some(Length::Byte(read_byte(reader)?))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

pub fn read_string<R: Read>(reader: &mut R) -> Result<Option<String>, RdbError> {
    Ok(match read_length(reader)? {
        Some(Length::Len(len)) => {
            let mut buf = vec![0u8; len as usize];
            reader.read_exact(&mut buf)?;
            Some(String::from_utf8(buf)?)
        }
        Some(Length::Byte(b)) => Some(b.to_string()),
        None => None,
    })
}

pub fn read_length_int<R: Read>(reader: &mut R) -> Result<Option<u32>, RdbError> {
    Ok(match read_length(reader)? {
        Some(Length::Len(len)) => Some(len),
        Some(Length::Byte(b)) => Some(b as u32),
        None => None,
    })
}

pub fn read_byte<R: Read>(reader: &mut R) -> Result<u8, RdbError> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u64_le<R: Read>(reader: &mut R) -> Result<u64, RdbError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_checksum<R: Read>(reader: &mut R) -> Result<[u8; 8], RdbError> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Fixed 88-byte empty-database snapshot (`REDIS0011...`) emitted verbatim
/// by the master in reply to PSYNC.
const EMPTY_RDB_HEX: &str = "524544495330303131fa0972656469732d76657205372e322e30fa0a72656469732d62697473c040fa056374696d65c26d08bc65fa08757365642d6d656dc2b0c41000fa08616f662d62617365c000fff06e3bfec0ff5aa2";

pub fn empty_rdb() -> Vec<u8> {
    (0..EMPTY_RDB_HEX.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&EMPTY_RDB_HEX[i..i + 2], 16).unwrap())
        .collect()
}
