use std::{
    io::{self, BufReader, Cursor, Read},
    marker::PhantomData,
};

use anyhow::bail;

use crate::{
    encoding::{Decode, Encode, KeyReader, KeyWriter},
    fs::DbFile,
};

// A seqfile is the hand-off format between pipeline stages: a flat sequence
// of entries, each a little-endian u32 length followed by that many bytes of
// `encoding` output. There is no index and no footer; readers walk it front
// to back.

const FLUSH_THRESHOLD: usize = 64 * 1024;

#[derive(Debug)]
pub struct SeqFileWriter<D, E>
where
    D: DbFile,
    E: Encode,
{
    file: D,
    kw: KeyWriter,
    buf: Vec<u8>,
    entries: usize,
    _marker: PhantomData<E>,
}

impl<D, E> SeqFileWriter<D, E>
where
    D: DbFile,
    E: Encode,
{
    pub fn new(file: D) -> Self {
        Self {
            file,
            kw: KeyWriter::new(),
            buf: Vec::with_capacity(FLUSH_THRESHOLD),
            entries: 0,
            _marker: PhantomData,
        }
    }

    pub fn append(&mut self, e: &E) -> anyhow::Result<()> {
        self.kw.clear();
        e.write_bytes(&mut self.kw);
        let encoded = self.kw.as_bytes();
        self.buf
            .extend_from_slice(&u32::try_from(encoded.len())?.to_le_bytes());
        self.buf.extend_from_slice(encoded);
        self.entries += 1;

        if self.buf.len() >= FLUSH_THRESHOLD {
            self.file.write(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Writes out anything still buffered and syncs. Returns the number of
    /// entries in the file.
    pub fn finish(mut self) -> anyhow::Result<usize> {
        if !self.buf.is_empty() {
            self.file.write(&self.buf)?;
        }
        self.file.sync()?;
        Ok(self.entries)
    }
}

/// Walks a seqfile front to back through a buffered reader, so only the
/// entries actually consumed are read from the file.
pub struct SeqFileReader<R, E>
where
    R: Read,
    E: Decode,
{
    input: BufReader<R>,
    offset: usize,
    buf: Vec<u8>,
    reader: KeyReader,
    done: bool,
    _marker: PhantomData<E>,
}

impl<D, E> SeqFileReader<D, E>
where
    D: DbFile,
    E: Decode,
{
    pub fn open(file: D) -> Self {
        Self::new(file)
    }
}

impl<E> SeqFileReader<Cursor<Vec<u8>>, E>
where
    E: Decode,
{
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(Cursor::new(data))
    }
}

impl<R, E> SeqFileReader<R, E>
where
    R: Read,
    E: Decode,
{
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
            offset: 0,
            buf: Vec::new(),
            reader: KeyReader::new(),
            done: false,
            _marker: PhantomData,
        }
    }

    /// Fills `header`, returning false on a clean end of file before its
    /// first byte.
    fn read_header(&mut self, header: &mut [u8; 4]) -> anyhow::Result<bool> {
        let mut filled = 0;
        while filled < header.len() {
            match self.input.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => bail!("truncated entry header at offset {}", self.offset),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn read_entry(&mut self) -> anyhow::Result<Option<E>> {
        let mut header = [0; 4];
        if !self.read_header(&mut header)? {
            return Ok(None);
        }
        let len = u32::from_le_bytes(header) as usize;
        self.buf.clear();
        let got = (&mut self.input).take(len as u64).read_to_end(&mut self.buf)?;
        if got < len {
            bail!(
                "entry at offset {} claims {} bytes, only {} remain",
                self.offset,
                len,
                got
            );
        }
        self.offset += 4 + len;
        self.reader.load(&self.buf);
        Ok(Some(E::decode(&mut self.reader)?))
    }
}

impl<R, E> Iterator for SeqFileReader<R, E>
where
    R: Read,
    E: Decode,
{
    type Item = anyhow::Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_entry() {
            Ok(Some(e)) => Some(Ok(e)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                // Stop after the first corrupt entry; nothing after it can be
                // located.
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
