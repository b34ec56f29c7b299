//! Parser for Git's binary staging index (the `DIRC` file).
//!
//! Supports on-disk versions 2 through 4. Only the fields needed to
//! recover object hashes and working-tree file names are surfaced, but
//! the full stat block is decoded so that malformed entries fail loudly
//! instead of desynchronizing the reader.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::errors::ParseError;

const INDEX_MAGIC: &[u8; 4] = b"DIRC";

/// Bit in the entry flags marking an extended entry (one extra byte of
/// flags in version 3 and later).
const FLAG_EXTENDED: u16 = 0x4000;

/// Low twelve bits of the flags carry the name length; `0xFFF` means
/// the name did not fit and is NUL-terminated instead.
const NAME_LENGTH_MASK: u16 = 0x0FFF;

#[derive(Debug)]
pub struct GitIndexEntry {
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub dev: u32,
    pub ino: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    /// Hex-encoded object SHA-1.
    pub sha1: String,
    pub flags: u16,
    pub file_name: String,
}

#[derive(Debug)]
pub struct GitIndex {
    pub version: u32,
    pub entries: Vec<GitIndexEntry>,
}

pub fn parse_index_file(path: &Path) -> Result<GitIndex, ParseError> {
    let mut reader = BufReader::new(File::open(path)?);
    parse_index(&mut reader)
}

pub fn parse_index<R: Read>(reader: &mut R) -> Result<GitIndex, ParseError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != INDEX_MAGIC {
        return Err(ParseError::BadMagic(
            String::from_utf8_lossy(&magic).into_owned(),
        ));
    }

    let version = reader.read_u32::<BigEndian>()?;
    if !(2..=4).contains(&version) {
        return Err(ParseError::UnsupportedVersion(version));
    }

    let entry_count = reader.read_u32::<BigEndian>()?;
    let mut entries = Vec::with_capacity(entry_count.min(1024) as usize);
    for _ in 0..entry_count {
        entries.push(read_entry(reader, version)?);
    }

    Ok(GitIndex { version, entries })
}

fn read_entry<R: Read>(reader: &mut R, version: u32) -> Result<GitIndexEntry, ParseError> {
    let ctime_sec = reader.read_u32::<BigEndian>()?;
    let ctime_nsec = reader.read_u32::<BigEndian>()?;
    let mtime_sec = reader.read_u32::<BigEndian>()?;
    let mtime_nsec = reader.read_u32::<BigEndian>()?;
    let dev = reader.read_u32::<BigEndian>()?;
    let ino = reader.read_u32::<BigEndian>()?;
    let mode = reader.read_u32::<BigEndian>()?;
    let uid = reader.read_u32::<BigEndian>()?;
    let gid = reader.read_u32::<BigEndian>()?;
    let size = reader.read_u32::<BigEndian>()?;

    let mut sha1 = [0u8; 20];
    reader.read_exact(&mut sha1)?;

    let flags = reader.read_u16::<BigEndian>()?;
    let extended = flags & FLAG_EXTENDED != 0;
    let name_length = flags & NAME_LENGTH_MASK;

    // Fixed part: 40 bytes of stat data, 20 of SHA-1, 2 of flags.
    let mut entry_length = 62usize;
    if extended && version > 2 {
        let _extended_flags = reader.read_u8()?;
        entry_length += 1;
    }

    let file_name = if name_length < NAME_LENGTH_MASK {
        let mut name = vec![0u8; name_length as usize];
        reader.read_exact(&mut name)?;
        entry_length += name.len();
        String::from_utf8_lossy(&name).into_owned()
    } else {
        // Overlong name: read up to the NUL terminator, which counts
        // toward the entry length.
        let mut name = Vec::with_capacity(256);
        loop {
            let byte = reader.read_u8()?;
            entry_length += 1;
            if byte == 0 {
                break;
            }
            name.push(byte);
        }
        String::from_utf8_lossy(&name).into_owned()
    };

    // Entries are padded with NULs to a multiple of eight bytes; an
    // already aligned entry still carries eight bytes of padding.
    let mut padding = 8 - entry_length % 8;
    if padding == 0 {
        padding = 8;
    }
    let mut skip = [0u8; 8];
    reader.read_exact(&mut skip[..padding])?;

    Ok(GitIndexEntry {
        ctime_sec,
        ctime_nsec,
        mtime_sec,
        mtime_nsec,
        dev,
        ino,
        mode,
        uid,
        gid,
        size,
        sha1: hex::encode(sha1),
        flags,
        file_name,
    })
}
