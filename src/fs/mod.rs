use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

#[cfg(test)]
pub mod mock;

/// A file handle. Reads go through `Read` from the start of the file, so a
/// large file can be walked front to back without loading all of it.
pub trait DbFile: std::fmt::Debug + Read + Send {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()>;
    fn sync(&mut self) -> anyhow::Result<()>;
    fn read_all(&self) -> anyhow::Result<Vec<u8>>;
}

/// A directory handle. Every stage of the pipeline reads and writes through
/// one of these, so handles are cloned freely into worker threads.
pub trait DbDir: Clone + Send + Sync + std::fmt::Debug {
    type DbFile: DbFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>;

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>;

    /// Names of the files directly inside this directory, sorted.
    fn ls(&mut self) -> anyhow::Result<Vec<String>>;

    /// Creates a new file. Returns `None` if the name is already taken.
    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>;

    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>;

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>;

    /// Deletes this directory and everything below it. Missing is fine.
    fn remove_all(&mut self) -> anyhow::Result<()>;

    fn location(&self) -> String;
}

#[derive(Debug)]
pub struct OsFile {
    file: File,
    path: PathBuf,
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl DbFile for OsFile {
    fn write(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        self.file.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> anyhow::Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn read_all(&self) -> anyhow::Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }
}

#[derive(Clone, Debug)]
pub struct OsDir {
    root: PathBuf,
}

impl OsDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        OsDir { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl DbDir for OsDir {
    type DbFile = OsFile;

    fn cd<P>(&self, dir_name: &P) -> Self
    where
        P: AsRef<Path>,
    {
        OsDir {
            root: self.root.join(dir_name),
        }
    }

    fn unlink<P>(&mut self, fname: &P) -> anyhow::Result<bool>
    where
        P: AsRef<Path>,
    {
        match fs::remove_file(self.root.join(fname)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn ls(&mut self) -> anyhow::Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn create<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        let path = self.root.join(fname);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => Ok(Some(OsFile { file, path })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open<P>(&mut self, fname: &P) -> anyhow::Result<Option<Self::DbFile>>
    where
        P: AsRef<Path>,
    {
        let path = self.root.join(fname);
        match File::open(&path) {
            Ok(file) => Ok(Some(OsFile { file, path })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn rename<P, Q>(&mut self, from: &P, to: &Q) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        fs::rename(self.root.join(from), self.root.join(to))?;
        Ok(())
    }

    fn remove_all(&mut self) -> anyhow::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

/// Creates `fname` in `dir`, failing if it is already there.
pub fn create_new<D, P>(dir: &mut D, fname: &P) -> anyhow::Result<D::DbFile>
where
    D: DbDir,
    P: AsRef<Path>,
{
    match dir.create(fname)? {
        Some(f) => Ok(f),
        None => anyhow::bail!(
            "{}/{} already exists",
            dir.location(),
            fname.as_ref().display()
        ),
    }
}

/// Opens `fname` in `dir`, failing if it is missing.
pub fn open_existing<D, P>(dir: &mut D, fname: &P) -> anyhow::Result<D::DbFile>
where
    D: DbDir,
    P: AsRef<Path>,
{
    match dir.open(fname)? {
        Some(f) => Ok(f),
        None => anyhow::bail!(
            "{}/{} does not exist",
            dir.location(),
            fname.as_ref().display()
        ),
    }
}

/// Creates `fname` in `dir` and writes `contents` to it, synced.
pub fn write_file<D, P>(dir: &mut D, fname: &P, contents: &[u8]) -> anyhow::Result<()>
where
    D: DbDir,
    P: AsRef<Path>,
{
    let mut file = create_new(dir, fname)?;
    file.write(contents)?;
    file.sync()?;
    Ok(())
}
