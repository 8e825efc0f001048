// Every on-disk format in this crate (prepared cell files, the splits file,
// sorted files) stores its entries with this encoding. Fields are written one
// after another, joined by the two-byte SEPARATOR. Any 0x00 inside a field is
// followed by an 0xff, so a field never contains SEPARATOR and the reader can
// find field boundaries without length prefixes.
const SEPARATOR: [u8; 2] = [0x00, 0x01];
const ESCAPED_00: [u8; 2] = [0x00, 0xff];

fn copy_escaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.iter().position(|x| *x == 0x00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                to.push(0xff);
                from = &from[(idx + 1)..];
            }
            None => {
                to.extend(from);
                return;
            }
        }
    }
}

fn copy_unescaped(mut from: &[u8], to: &mut Vec<u8>) {
    while !from.is_empty() {
        match from.windows(2).position(|w| w == ESCAPED_00) {
            Some(idx) => {
                to.extend(&from[..idx + 1]);
                from = &from[(idx + 2)..];
            }
            None => {
                to.extend(from);
                return;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct KeyWriter {
    pub(crate) buf: Vec<u8>,
}

impl KeyWriter {
    pub fn new() -> Self {
        KeyWriter { buf: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.buf.clear()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn replace(&mut self, mut v: Vec<u8>) -> Vec<u8> {
        std::mem::swap(&mut v, &mut self.buf);
        v
    }

    fn write(&mut self, buf: &[u8]) {
        copy_escaped(buf, &mut self.buf);
    }

    fn separator(&mut self) {
        self.buf.extend(SEPARATOR);
    }
}

#[derive(Debug, Default)]
pub struct KeyReader {
    buf: Vec<u8>,
    from: usize,
    scratch: Vec<u8>,
}

impl KeyReader {
    pub fn new() -> Self {
        KeyReader {
            buf: Vec::new(),
            from: 0,
            scratch: Vec::new(),
        }
    }

    pub fn load(&mut self, buf: &[u8]) {
        self.buf.clear();
        self.buf.extend(buf);
        self.from = 0;
        self.scratch.clear();
    }

    pub fn next(&mut self) -> anyhow::Result<&[u8]> {
        if self.from > self.buf.len() {
            anyhow::bail!("read past the last field of an encoded entry");
        }
        let split_position = self.buf[self.from..]
            .windows(2)
            .position(|x| x == SEPARATOR)
            .unwrap_or(self.buf.len() - self.from);

        self.scratch.clear();
        copy_unescaped(
            &self.buf[self.from..self.from + split_position],
            &mut self.scratch,
        );
        self.from += split_position + 2;

        Ok(&self.scratch)
    }
}

pub trait Encode: std::fmt::Debug {
    fn write_bytes(&self, kw: &mut KeyWriter);
}

pub trait Decode: Sized {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self>;
}

/// Encodes `t` into a fresh buffer.
pub fn to_bytes<T: Encode>(t: &T) -> Vec<u8> {
    let mut kw = KeyWriter::new();
    t.write_bytes(&mut kw);
    kw.buf
}

/// Decodes a value previously produced by [`to_bytes`].
pub fn from_bytes<T: Decode>(buf: &[u8]) -> anyhow::Result<T> {
    let mut kr = KeyReader::new();
    kr.load(buf);
    T::decode(&mut kr)
}

impl Encode for Vec<u8> {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        kw.write(self)
    }
}

impl Decode for Vec<u8> {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        Ok(kr.next()?.to_vec())
    }
}

impl Encode for String {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        kw.write(self.as_bytes())
    }
}

impl Decode for String {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let result = String::from_utf8(kr.next()?.to_vec())?;
        Ok(result)
    }
}

impl Encode for usize {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (*self as u64).write_bytes(kw)
    }
}

impl Decode for usize {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        Ok(u64::decode(kr)?.try_into()?)
    }
}

impl Encode for u64 {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        kw.write(&self.to_le_bytes())
    }
}

impl Decode for u64 {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        Ok(Self::from_le_bytes(kr.next()?.try_into()?))
    }
}

impl Encode for u32 {
    fn write_bytes(&self, kw: &mut KeyWriter) {
        kw.write(&self.to_le_bytes())
    }
}

impl Decode for u32 {
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        Ok(Self::from_le_bytes(kr.next()?.try_into()?))
    }
}

impl<A> Encode for &A
where
    A: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) {
        (*self).write_bytes(kw)
    }
}

impl<A, B> Encode for (A, B)
where
    A: Encode,
    B: Encode,
{
    fn write_bytes(&self, kw: &mut KeyWriter) {
        self.0.write_bytes(kw);
        kw.separator();
        self.1.write_bytes(kw);
    }
}

impl<A, B> Decode for (A, B)
where
    A: Decode,
    B: Decode,
{
    fn decode(kr: &mut KeyReader) -> anyhow::Result<Self> {
        let a = A::decode(kr)?;
        let b = B::decode(kr)?;
        Ok((a, b))
    }
}
