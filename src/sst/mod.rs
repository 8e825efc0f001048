pub mod reader;
pub mod writer;

use std::io::Write;

use anyhow::bail;

use crate::encoding::{Decode, Encode, KeyReader, KeyWriter};

// This package provides facilities to both read and write Sorted-String Tables
// (SSTs), the immutable files the build stage hands to the store.
//
// Logically, an SST contains a set of cells in cell order (row, family,
// qualifier, value). Every cell of one partition lives in exactly one SST and
// no two SSTs of a build overlap.
//
// Physically, an SST is stored as a sequence of _blocks_. Each entry in a
// block is written as (u32, u32, [u8]): the length of the new suffix, the
// length of the prefix shared with the previous entry of the same block, and
// the suffix itself. The first entry of a block shares nothing, so a block
// can be decoded on its own. A block is closed once it holds at least
// BLOCK_SIZE bytes.
//
// After the data blocks comes the _index block_, written with the same entry
// format, with one entry per data block: the first row key in the block and
// the block's (offset, length) within the file.
//
// Then the _meta block_ holds a single entry: the first row key, the last row
// key and the number of cells.
//
// Finally, a fixed footer of three little-endian u64s gives the lengths of
// the data region, the index block and the meta block.

pub const BLOCK_SIZE: usize = 4 * 1024;
pub const FOOTER_LEN: usize = 3 * 8;

/// What a reader (or the manifest) needs to know about a written SST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    pub first_row: Vec<u8>,
    pub last_row: Vec<u8>,
    pub cells: u64,
    pub size: u64,
}

struct Writer<W>
where
    W: Write,
{
    w: W,
    kw: KeyWriter,
    prev_val: Vec<u8>,
    written: usize,
}

impl<W> Writer<W>
where
    W: Write,
{
    fn new(w: W) -> Self {
        Writer {
            w,
            kw: KeyWriter::new(),
            prev_val: Vec::with_capacity(1024),
            written: 0,
        }
    }

    fn write<T: Encode>(&mut self, t: &T) -> anyhow::Result<()> {
        self.kw.clear();
        t.write_bytes(&mut self.kw);
        let mut buf = self.kw.replace(Vec::new());

        let shared_prefix_len = buf
            .iter()
            .zip(self.prev_val.iter())
            .take_while(|(a, b)| a == b)
            .count();

        self.w
            .write_all(&u32::try_from(buf.len() - shared_prefix_len)?.to_le_bytes())?;
        self.w
            .write_all(&u32::try_from(shared_prefix_len)?.to_le_bytes())?;
        self.w.write_all(&buf[shared_prefix_len..])?;
        self.written += 8 + buf.len() - shared_prefix_len;

        std::mem::swap(&mut buf, &mut self.prev_val);
        buf.clear();
        self.kw.replace(buf);
        Ok(())
    }
}

/// Decodes every entry of one prefix-compressed region (a block, the index
/// block or the meta block).
fn read_entries<T: Decode>(mut data: &[u8]) -> anyhow::Result<Vec<T>> {
    let mut out = Vec::new();
    let mut buf = Vec::with_capacity(1024);
    let mut kr = KeyReader::new();
    while !data.is_empty() {
        if data.len() < 8 {
            bail!("truncated entry header");
        }
        let len = u32::from_le_bytes(data[0..4].try_into()?) as usize;
        let prefix = u32::from_le_bytes(data[4..8].try_into()?) as usize;
        if prefix > buf.len() || data.len() - 8 < len {
            bail!("corrupt entry: prefix {} suffix {}", prefix, len);
        }
        buf.truncate(prefix);
        buf.extend_from_slice(&data[8..8 + len]);
        data = &data[8 + len..];

        kr.load(&buf);
        out.push(T::decode(&mut kr)?);
    }
    Ok(out)
}
