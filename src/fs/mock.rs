use std::{
    collections::BTreeMap,
    io::{self, Read},
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::bail;

use super::{DbDir, DbFile};

#[derive(Default, Debug)]
struct MockData {
    synced: Vec<u8>,
    unsynced: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MockFile {
    idx: usize,
    pub file_id: FileId,
    path: String,
    fs: Arc<Mutex<MockFs>>,
}

impl MockFile {
    pub fn read_all_synced(&self) -> Vec<u8> {
        lock(&self.fs).data[self.file_id].synced.clone()
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = lock(&self.fs).read(self.file_id, self.idx, buf);
        self.idx += n;
        Ok(n)
    }
}

impl DbFile for MockFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        lock(&self.fs).write(self.file_id, &self.path, self.idx, buf)?;
        self.idx += buf.len();
        Ok(())
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        lock(&self.fs).sync(self.file_id, &self.path)?;
        Ok(())
    }

    fn read_all(&self) -> anyhow::Result<Vec<u8>> {
        Ok(lock(&self.fs).data[self.file_id].unsynced.clone())
    }
}

fn lock(fs: &Arc<Mutex<MockFs>>) -> MutexGuard<'_, MockFs> {
    fs.lock().expect("mock fs lock poisoned")
}

/// An in-memory directory tree. Clones share the same underlying fs, so a
/// test can hold one handle while the pipeline works through others.
#[derive(Clone, Debug)]
pub struct MockDir {
    pub fs: Arc<Mutex<MockFs>>,
    prefix: Vec<String>,
}

impl MockDir {
    pub fn new() -> Self {
        MockDir {
            fs: Arc::new(Mutex::new(MockFs::new())),
            prefix: Vec::new(),
        }
    }

    pub fn fs(&self) -> MutexGuard<'_, MockFs> {
        lock(&self.fs)
    }

    fn full_path<P>(&self, p: &P) -> String
    where
        P: AsRef<Path>,
    {
        self.prefix
            .iter()
            .cloned()
            .chain(
                p.as_ref()
                    .iter()
                    .map(|s| s.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join("/")
    }

    fn dir_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix.join("/"))
        }
    }
}

impl DbDir for MockDir {
    type DbFile = MockFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>,
    {
        MockDir {
            fs: self.fs.clone(),
            prefix: self
                .prefix
                .iter()
                .cloned()
                .chain(
                    dir_name
                        .as_ref()
                        .iter()
                        .map(|s| s.to_string_lossy().into_owned()),
                )
                .collect(),
        }
    }

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        let path = self.full_path(fname);
        lock(&self.fs).unlink(&path)
    }

    fn ls(&mut self) -> anyhow::Result<Vec<String>> {
        let prefix = self.dir_prefix();
        let mut fs = lock(&self.fs);
        let fnames: Vec<String> = fs
            .names
            .keys()
            .filter_map(|f| f.strip_prefix(prefix.as_str()))
            .filter(|f| !f.contains('/'))
            .map(|f| f.to_owned())
            .collect();
        fs.record(Event::Ls(prefix, fnames.clone()));
        Ok(fnames)
    }

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        let path = self.full_path(fname);
        Ok(lock(&self.fs).create(&path)?.map(|file_id| MockFile {
            fs: self.fs.clone(),
            file_id,
            path,
            idx: 0,
        }))
    }

    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        let path = self.full_path(fname);
        Ok(lock(&self.fs).open(&path).map(|file_id| MockFile {
            fs: self.fs.clone(),
            file_id,
            path,
            idx: 0,
        }))
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let from = self.full_path(from);
        let to = self.full_path(to);
        lock(&self.fs).rename(&from, &to)
    }

    fn remove_all(&mut self) -> anyhow::Result<()> {
        let prefix = self.dir_prefix();
        lock(&self.fs).remove_all(&prefix)
    }

    fn location(&self) -> String {
        format!("mock:/{}", self.prefix.join("/"))
    }
}

pub type FileId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(String, FileId),
    Write(FileId, usize, usize),
    Read(FileId, usize, usize),
    Sync(FileId),
    Rename(String, String),
    Unlink(String),
    RemoveAll(String),
    Open(String),
    Ls(String, Vec<String>),
}

#[derive(Debug)]
pub struct MockFs {
    names: BTreeMap<String, FileId>,
    data: Vec<MockData>,
    events: Vec<Event>,

    // After this many "things happen," "crash" the FS, meaning stop accepting
    // writes and discard any unsynced data.
    time_to_crash: Option<usize>,

    // Writes to any path under one of these prefixes fail.
    failing_prefixes: Vec<String>,
}

impl MockFs {
    fn new() -> Self {
        MockFs {
            names: BTreeMap::new(),
            data: Vec::new(),
            events: Vec::new(),
            time_to_crash: None,
            failing_prefixes: Vec::new(),
        }
    }

    fn check_crashed(&self) -> anyhow::Result<()> {
        if self.time_to_crash == Some(0) {
            bail!("filesystem is down")
        } else {
            Ok(())
        }
    }

    pub fn schedule_crash(&mut self, ops: usize) {
        self.time_to_crash = Some(ops);
    }

    pub fn fail_writes_under(&mut self, prefix: &str) {
        self.failing_prefixes.push(prefix.to_owned());
    }

    // Discard all unsynced state, become uncrashed.
    pub fn reboot(&mut self) {
        for f in self.data.iter_mut() {
            f.unsynced.clear();
            f.unsynced.extend(&f.synced);
        }
        self.time_to_crash = None;
        self.failing_prefixes.clear();
    }

    fn perform_op(&mut self, path: &str) -> anyhow::Result<()> {
        self.check_crashed()?;
        if let Some(p) = self.failing_prefixes.iter().find(|p| path.starts_with(p.as_str())) {
            bail!("injected write failure under {}", p);
        }
        if let Some(x) = self.time_to_crash {
            self.time_to_crash = Some(x - 1);
        }
        Ok(())
    }

    fn record(&mut self, e: Event) {
        self.events.push(e);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn paths(&self) -> Vec<String> {
        self.names.keys().cloned().collect()
    }

    fn create(&mut self, path: &str) -> anyhow::Result<Option<FileId>> {
        self.perform_op(path)?;

        if self.names.contains_key(path) {
            return Ok(None);
        }
        let id = self.data.len();
        self.record(Event::Create(path.to_owned(), id));
        self.names.insert(path.to_owned(), id);
        self.data.push(MockData::default());
        Ok(Some(id))
    }

    fn unlink(&mut self, path: &str) -> anyhow::Result<bool> {
        self.perform_op(path)?;

        self.record(Event::Unlink(path.to_owned()));
        Ok(self.names.remove(path).is_some())
    }

    fn remove_all(&mut self, prefix: &str) -> anyhow::Result<()> {
        self.perform_op(prefix)?;

        self.record(Event::RemoveAll(prefix.to_owned()));
        self.names.retain(|name, _| !name.starts_with(prefix));
        Ok(())
    }

    fn open(&mut self, path: &str) -> Option<FileId> {
        self.record(Event::Open(path.to_owned()));
        self.names.get(path).cloned()
    }

    // Reads don't count towards a crash; they can't lose anything.
    fn read(&mut self, file: FileId, idx: usize, buf: &mut [u8]) -> usize {
        let data = self.data[file].unsynced.get(idx..).unwrap_or_default();
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.record(Event::Read(file, idx, n));
        n
    }

    /// Total bytes handed out by reads of `file`.
    pub fn bytes_read(&self, file: FileId) -> usize {
        self.events
            .iter()
            .map(|e| match e {
                Event::Read(f, _, n) if *f == file => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn file_len(&self, path: &str) -> Option<usize> {
        self.names.get(path).map(|&id| self.data[id].unsynced.len())
    }

    pub fn file_id(&self, path: &str) -> Option<FileId> {
        self.names.get(path).cloned()
    }

    fn rename(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        self.perform_op(to)?;

        self.record(Event::Rename(from.to_owned(), to.to_owned()));
        if let Some(d) = self.names.remove(from) {
            self.names.insert(to.to_owned(), d);
        }
        Ok(())
    }

    fn write(&mut self, file: FileId, path: &str, idx: usize, data: &[u8]) -> anyhow::Result<()> {
        self.perform_op(path)?;

        let unsynced = &mut self.data[file].unsynced;
        if unsynced.len() < idx + data.len() {
            unsynced.resize(idx + data.len(), 0);
        }
        unsynced[idx..idx + data.len()].copy_from_slice(data);

        self.record(Event::Write(file, idx, data.len()));
        Ok(())
    }

    fn sync(&mut self, file: FileId, path: &str) -> anyhow::Result<()> {
        self.perform_op(path)?;

        self.record(Event::Sync(file));
        let d = &mut self.data[file];
        d.synced = d.unsynced.clone();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::{Event, MockDir};
    use crate::fs::{DbDir, DbFile};

    #[test]
    fn test_mock_file() -> anyhow::Result<()> {
        let mut dir = MockDir::new();

        let mut a = dir.create(&"a")?.unwrap();

        a.write(&[1, 2, 3, 4])?;

        assert_eq!(Vec::<u8>::new(), a.read_all_synced());
        assert_eq!(vec![1, 2, 3, 4], a.read_all()?);

        a.sync()?;

        assert_eq!(vec![1, 2, 3, 4], a.read_all_synced());
        assert_eq!(vec![1, 2, 3, 4], a.read_all()?);

        let mut b = dir.open(&"a")?.unwrap();
        let mut buf = [0; 3];
        assert_eq!(b.read(&mut buf)?, 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(b.read(&mut buf)?, 1);
        assert_eq!(b.read(&mut buf)?, 0);
        assert_eq!(dir.fs().bytes_read(b.file_id), 4);

        Ok(())
    }

    #[test]
    fn test_mock_dirs() -> anyhow::Result<()> {
        let root = MockDir::new();
        let mut working = root.cd(&"working");
        let mut sorted = working.cd(&"sorted");
        sorted.create(&"part-00000.sst")?.unwrap();
        working.create(&"stray")?.unwrap();

        assert_eq!(sorted.ls()?, vec!["part-00000.sst".to_owned()]);
        assert_eq!(working.ls()?, vec!["stray".to_owned()]);
        assert_eq!(sorted.location(), "mock:/working/sorted");

        sorted.remove_all()?;
        assert!(sorted.ls()?.is_empty());
        assert_eq!(working.ls()?, vec!["stray".to_owned()]);

        let events = root.fs().take_events();
        assert!(events.contains(&Event::RemoveAll("working/sorted/".to_owned())));
        Ok(())
    }

    #[test]
    fn test_injected_failures() -> anyhow::Result<()> {
        let root = MockDir::new();
        root.fs().fail_writes_under("working/sorted/");

        let mut sorted = root.cd(&"working").cd(&"sorted");
        assert!(sorted.create(&"part-00000.sst").is_err());
        let mut prepared = root.cd(&"working").cd(&"prepared");
        assert!(prepared.create(&"part-m-00000")?.is_some());

        root.fs().reboot();
        root.fs().schedule_crash(1);
        let mut f = prepared.create(&"part-m-00001")?.unwrap();
        assert!(f.write(b"x").is_err());
        Ok(())
    }
}
