//! The persisted-format primitives (spec §6): the "size" varint codec and the
//! `AddrKey` wire encoding. Byte order is little-endian throughout except the
//! `AddrKey` port, which is big-endian to match the existing `netaddr`
//! encoder's convention.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::net::AddrKey;

/// Single-byte length up to 252, else a 0xFD/0xFE/0xFF prefix with a
/// 2/4/8-byte little-endian length.
pub fn write_varint<W: Write>(w: &mut W, n: u64) -> io::Result<()> {
    if n < 0xFD {
        w.write_u8(n as u8)
    } else if n <= 0xFFFF {
        w.write_u8(0xFD)?;
        w.write_u16::<byteorder::LittleEndian>(n as u16)
    } else if n <= 0xFFFF_FFFF {
        w.write_u8(0xFE)?;
        w.write_u32::<byteorder::LittleEndian>(n as u32)
    } else {
        w.write_u8(0xFF)?;
        w.write_u64::<byteorder::LittleEndian>(n)
    }
}

pub fn read_varint<R: Read>(r: &mut R) -> io::Result<u64> {
    let first = r.read_u8()?;
    match first {
        0xFD => Ok(u64::from(r.read_u16::<byteorder::LittleEndian>()?)),
        0xFE => Ok(u64::from(r.read_u32::<byteorder::LittleEndian>()?)),
        0xFF => r.read_u64::<byteorder::LittleEndian>(),
        n => Ok(u64::from(n)),
    }
}

pub fn write_addr_key<W: Write>(w: &mut W, key: &AddrKey) -> io::Result<()> {
    w.write_all(&key.ip)?;
    w.write_u16::<BigEndian>(key.port)
}

pub fn read_addr_key<R: Read>(r: &mut R) -> io::Result<AddrKey> {
    let mut ip = [0u8; 16];
    r.read_exact(&mut ip)?;
    let port = r.read_u16::<BigEndian>()?;
    Ok(AddrKey { ip, port })
}
