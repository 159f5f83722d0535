use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoResultExt, Result};

/// attempts at finding an unused temporary file name
const MAX_TEMP_ATTEMPTS: usize = 10;

/// a file write that becomes visible at its target only on commit
///
/// with copy-on-write the bytes are staged in a hidden sibling file and renamed
/// over the target on `commit`. without it the target is written in place.
pub struct AtomicFile {
    target: PathBuf,
    tmp: Option<PathBuf>,
    file: Option<File>,
}

impl AtomicFile {
    /// open a writer for `target`, creating parent directories as needed
    pub fn create(target: &Path, copy_on_write: bool) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_path(parent)?;
        }

        if !copy_on_write {
            let file = File::create(target).with_path(target)?;
            return Ok(Self {
                target: target.to_path_buf(),
                tmp: None,
                file: Some(file),
            });
        }

        let (tmp, file) = create_temp_sibling(target)?;
        debug!(target = %target.display(), tmp = %tmp.display(), "staging write");
        Ok(Self {
            target: target.to_path_buf(),
            tmp: Some(tmp),
            file: Some(file),
        })
    }

    /// final location of the written bytes
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// false once committed or discarded
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// flush, sync and publish the bytes at the target
    ///
    /// returns false if the file was already closed.
    pub fn commit(&mut self) -> Result<bool> {
        let Some(mut file) = self.file.take() else {
            return Ok(false);
        };
        let staged = self.tmp.as_deref().unwrap_or(&self.target);
        file.flush().with_path(staged)?;
        file.sync_all().with_path(staged)?;
        drop(file);

        if let Some(tmp) = self.tmp.take() {
            publish(&tmp, &self.target)?;
            if let Some(parent) = self.target.parent() {
                super::fsync_dir(parent)?;
            }
        }
        Ok(true)
    }

    /// drop the staged bytes, leaving the target untouched
    pub fn discard(&mut self) -> Result<()> {
        self.file.take();
        if let Some(tmp) = self.tmp.take() {
            match fs::remove_file(&tmp) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_path(tmp),
            }
        }
        Ok(())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                Error::WriterClosed(self.target.clone()),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        // uncommitted staging files are never published
        if let Err(e) = self.discard() {
            warn!(error = %e, "failed to remove staged file");
        }
    }
}

/// write `content` to `target` through a staged rename
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    let mut file = AtomicFile::create(target, true)?;
    file.write_all(content).with_path(target)?;
    file.commit()?;
    Ok(())
}

/// hidden, uniquely named file in the target's directory
fn create_temp_sibling(target: &Path) -> Result<(PathBuf, File)> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    for _ in 0..MAX_TEMP_ATTEMPTS {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let tmp = dir.join(format!(".{}.{}.tmp", name, &suffix[..12]));
        match OpenOptions::new().write(true).create_new(true).open(&tmp) {
            Ok(file) => return Ok((tmp, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_path(tmp),
        }
    }
    Err(Error::TempFileExhausted(target.to_path_buf()))
}

/// move the staged file over the target
///
/// tries a plain rename first, then removes the target and renames again,
/// and finally copies the bytes across.
fn publish(tmp: &Path, target: &Path) -> Result<()> {
    let err = match fs::rename(tmp, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(target = %target.display(), error = %err, "atomic rename failed, replacing target");

    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_path(target),
    }
    let err = match fs::rename(tmp, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!(target = %target.display(), error = %err, "rename failed, copying staged bytes");

    copy_into_place(tmp, target)
}

/// last-resort publish: copy the bytes, then drop the staged file
///
/// after a successful copy, a staged file that cannot be removed is logged,
/// not returned.
fn copy_into_place(tmp: &Path, target: &Path) -> Result<()> {
    fs::copy(tmp, target).with_path(target)?;
    remove_staged(tmp);
    Ok(())
}

fn remove_staged(tmp: &Path) {
    if let Err(e) = fs::remove_file(tmp) {
        warn!(tmp = %tmp.display(), error = %e, "failed to remove staged file after copy");
    }
}
