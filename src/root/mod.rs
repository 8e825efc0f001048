use serde::{de::DeserializeOwned, Serialize};

use crate::fs::{DbDir, DbFile};

const MANIFEST: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST_TMP";

/// A small JSON document kept in a directory's `MANIFEST` file. Writes go to
/// a temporary file first and are renamed into place, so readers see either
/// the old document or the new one.
#[derive(Debug)]
pub struct Root<T, D>
where
    T: Serialize + DeserializeOwned + Default,
    D: DbDir,
{
    dir: D,
    pub(crate) data: T,
}

impl<T, D> Root<T, D>
where
    T: Serialize + DeserializeOwned + Default,
    D: DbDir,
{
    /// Loads the document, or the default one if the directory has none yet.
    pub fn load(mut dir: D) -> anyhow::Result<Self> {
        let data = match Self::read(&mut dir)? {
            Some(data) => data,
            None => T::default(),
        };
        Ok(Root { dir, data })
    }

    pub fn read(dir: &mut D) -> anyhow::Result<Option<T>> {
        match dir.open(&MANIFEST)? {
            Some(file) => Ok(Some(serde_json::from_slice(&file.read_all()?)?)),
            None => Ok(None),
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn write(&mut self, t: T) -> anyhow::Result<()> {
        self.dir.unlink(&MANIFEST_TMP)?;
        let encoded = serde_json::to_vec_pretty(&t)?;
        crate::fs::write_file(&mut self.dir, &MANIFEST_TMP, &encoded)?;
        self.dir.rename(&MANIFEST_TMP, &MANIFEST)?;
        self.data = t;

        Ok(())
    }
}
