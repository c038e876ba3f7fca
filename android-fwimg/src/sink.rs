use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Output that can be sized explicitly, so skipped regions at the end of an
/// image still count towards its length.
pub trait ImageSink: Write + Seek {
    fn set_len(&mut self, size: u64) -> io::Result<()>;
}

impl ImageSink for File {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }
}

impl ImageSink for Cursor<Vec<u8>> {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size).map_err(io::Error::other)?;
        self.get_mut().resize(size, 0);
        Ok(())
    }
}

/// A file that only appears at its destination once [`AtomicFile::commit`]
/// succeeds. Dropping it uncommitted removes the partial data.
pub struct AtomicFile {
    path: PathBuf,
    temp: NamedTempFile,
}

impl AtomicFile {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = NamedTempFile::new_in(&dir).map_err(|e| Error::file(&dir, e))?;
        Ok(Self { path, temp })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        self.temp
            .as_file_mut()
            .sync_all()
            .map_err(|e| Error::file(&self.path, e))?;
        self.temp
            .persist(&self.path)
            .map_err(|e| Error::file(&self.path, e.error))?;
        Ok(self.path)
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.temp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.temp.flush()
    }
}

impl Seek for AtomicFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.temp.seek(pos)
    }
}

impl ImageSink for AtomicFile {
    fn set_len(&mut self, size: u64) -> io::Result<()> {
        self.temp.as_file().set_len(size)
    }
}
