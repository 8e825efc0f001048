use anyhow::bail;

use crate::{fs::DbFile, schema::Cell};

use super::{SstMeta, Writer, BLOCK_SIZE};

pub struct SstWriter<I, D>
where
    I: Iterator<Item = anyhow::Result<Cell>>,
    D: DbFile,
{
    file: D,
    it: I,
    pending: Option<Cell>,
    last: Option<Cell>,
    cells: u64,
}

impl<I, D> SstWriter<I, D>
where
    I: Iterator<Item = anyhow::Result<Cell>>,
    D: DbFile,
{
    pub fn new(it: I, file: D) -> Self {
        SstWriter {
            file,
            it,
            pending: None,
            last: None,
            cells: 0,
        }
    }

    fn next_cell(&mut self) -> anyhow::Result<Option<Cell>> {
        match self.pending.take() {
            Some(cell) => Ok(Some(cell)),
            None => self.it.next().transpose(),
        }
    }

    fn build_block(&mut self, data: &mut Vec<u8>) -> anyhow::Result<()> {
        let mut writer = Writer::new(data);
        while let Some(cell) = self.next_cell()? {
            if let Some(last) = &self.last {
                if cell < *last {
                    bail!("cells out of order: {} after {}", cell, last);
                }
            }
            writer.write(&cell)?;
            self.cells += 1;
            self.last = Some(cell);
            if writer.written >= BLOCK_SIZE {
                break;
            }
        }

        Ok(())
    }

    /// Writes every cell of the iterator, which must be in cell order, and
    /// syncs the file. An error from the iterator aborts the write.
    pub fn write(mut self) -> anyhow::Result<SstMeta> {
        let mut index = Vec::new();
        let mut index_writer = Writer::new(&mut index);

        let mut bytes_written = 0;
        let mut block_buffer = Vec::with_capacity(BLOCK_SIZE * 2);

        let mut first_row = None;
        while let Some(header) = self.next_cell()? {
            let row = header.row.clone();
            first_row.get_or_insert_with(|| row.clone());
            self.pending = Some(header);

            self.build_block(&mut block_buffer)?;
            self.file.write(&block_buffer)?;

            let index_entry = (row, (bytes_written as u64, block_buffer.len() as u64));
            index_writer.write(&index_entry)?;

            bytes_written += block_buffer.len();
            block_buffer.clear();
        }

        let (first_row, last_row) = match (first_row, self.last.take()) {
            (Some(first_row), Some(cell)) => (first_row, cell.row),
            _ => bail!("will only write non-empty SST"),
        };

        self.file.write(&index)?;

        let mut meta = Vec::new();
        Writer::new(&mut meta).write(&(first_row.clone(), (last_row.clone(), self.cells)))?;
        self.file.write(&meta)?;

        for len in [bytes_written, index.len(), meta.len()] {
            self.file.write(&(len as u64).to_le_bytes())?;
        }

        self.file.sync()?;

        Ok(SstMeta {
            first_row,
            last_row,
            cells: self.cells,
            size: (bytes_written + index.len() + meta.len() + super::FOOTER_LEN) as u64,
        })
    }
}
