use anyhow::bail;

use crate::{fs::DbFile, schema::Cell};

use super::{read_entries, SstMeta, FOOTER_LEN};

type IndexEntry = (Vec<u8>, (u64, u64));

/// A fully loaded SST. Output files are small enough to verify in memory,
/// which is all the reader is used for.
#[derive(Debug)]
pub struct SstReader {
    data: Vec<u8>,
    index: Vec<IndexEntry>,
    meta: SstMeta,
}

impl SstReader {
    pub fn load<D: DbFile>(file: &D) -> anyhow::Result<Self> {
        Self::from_bytes(file.read_all()?)
    }

    pub fn from_bytes(data: Vec<u8>) -> anyhow::Result<Self> {
        if data.len() < FOOTER_LEN {
            bail!("sst too short: {} bytes", data.len());
        }
        let footer = &data[data.len() - FOOTER_LEN..];
        let mut lens = [0_usize; 3];
        for (i, len) in lens.iter_mut().enumerate() {
            *len = u64::from_le_bytes(footer[i * 8..(i + 1) * 8].try_into()?) as usize;
        }
        let [data_len, index_len, meta_len] = lens;
        let total = data_len
            .checked_add(index_len)
            .and_then(|n| n.checked_add(meta_len))
            .and_then(|n| n.checked_add(FOOTER_LEN));
        if total != Some(data.len()) {
            bail!(
                "sst footer does not match file size: {} + {} + {} + {} != {}",
                data_len,
                index_len,
                meta_len,
                FOOTER_LEN,
                data.len()
            );
        }

        let index: Vec<IndexEntry> = read_entries(&data[data_len..data_len + index_len])?;
        for (_, (offset, len)) in &index {
            if offset.checked_add(*len).map_or(true, |end| end > data_len as u64) {
                bail!("index entry points past the data region");
            }
        }

        let meta_start = data_len + index_len;
        let mut meta: Vec<(Vec<u8>, (Vec<u8>, u64))> =
            read_entries(&data[meta_start..meta_start + meta_len])?;
        let (first_row, (last_row, cells)) = match (meta.pop(), meta.is_empty()) {
            (Some(m), true) => m,
            _ => bail!("sst meta block must hold exactly one entry"),
        };

        let size = data.len() as u64;
        Ok(SstReader {
            data,
            index,
            meta: SstMeta {
                first_row,
                last_row,
                cells,
                size,
            },
        })
    }

    pub fn meta(&self) -> &SstMeta {
        &self.meta
    }

    pub fn scan(&self) -> SstIter<'_> {
        SstIter {
            reader: self,
            next_block: 0,
            current: Vec::new().into_iter(),
            lower_bound: None,
        }
    }

    /// Iterates the cells whose row is at least `row`.
    pub fn scan_from(&self, row: &[u8]) -> SstIter<'_> {
        // A row can straddle a block boundary, so start one block before the
        // first block that begins at or after it.
        let first = self
            .index
            .partition_point(|(first_row, _)| first_row.as_slice() < row)
            .saturating_sub(1);
        SstIter {
            reader: self,
            next_block: first,
            current: Vec::new().into_iter(),
            lower_bound: Some(row.to_vec()),
        }
    }
}

pub struct SstIter<'a> {
    reader: &'a SstReader,
    next_block: usize,
    current: std::vec::IntoIter<Cell>,
    lower_bound: Option<Vec<u8>>,
}

impl Iterator for SstIter<'_> {
    type Item = anyhow::Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cell) = self.current.next() {
                if let Some(bound) = &self.lower_bound {
                    if cell.row < *bound {
                        continue;
                    }
                    self.lower_bound = None;
                }
                return Some(Ok(cell));
            }

            let (_, (offset, len)) = self.reader.index.get(self.next_block)?;
            let (offset, len) = (*offset as usize, *len as usize);
            self.next_block += 1;
            match read_entries(&self.reader.data[offset..offset + len]) {
                Ok(cells) => self.current = cells.into_iter(),
                Err(e) => {
                    self.next_block = self.reader.index.len();
                    return Some(Err(e));
                }
            }
        }
    }
}
