//! Filesystem journal with best-effort undo.
//!
//! Every mutation applied to a working tree during a multi-step operation is
//! recorded together with its inverse. If a later step (or the commit) fails,
//! [`Journal::rollback`] unwinds the recorded steps in reverse order. The
//! filesystem offers no multi-operation atomicity, so rollback is
//! best-effort: undo failures are logged and skipped, never raised.
//!
//! Removed directories are parked under `<workspace>/.git/repoyard-trash/`
//! rather than deleted, so undoing a recursive removal is a single rename.

use std::fs::Permissions;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Trash directory inside the git directory, out of the working tree's view.
pub const TRASH_DIR: &str = "repoyard-trash";

#[derive(Debug)]
enum Undo {
    /// A file was removed; write it back.
    RestoreFile {
        path: PathBuf,
        data: Vec<u8>,
        permissions: Permissions,
    },
    /// A symlink was removed; recreate it.
    RestoreLink { path: PathBuf, target: PathBuf },
    /// A directory was parked in the trash; move it back.
    RestoreDir { parked: PathBuf, path: PathBuf },
    /// A file did not exist before; remove it.
    RemoveFile { path: PathBuf },
    /// A directory did not exist before; remove it (it is empty again by the
    /// time this runs).
    RemoveDir { path: PathBuf },
    /// An entry was moved; move it back.
    MoveBack { from: PathBuf, to: PathBuf },
}

/// Content used to create a file.
#[derive(Debug, Clone)]
pub enum FileSource {
    Data {
        data: Vec<u8>,
        permissions: Option<Permissions>,
    },
    Link(PathBuf),
}

impl FileSource {
    /// Capture the entry at `path` (symlinks are captured as links).
    pub fn read(path: &Path) -> Result<Self> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::io(path, e))?;
        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(path).map_err(|e| Error::io(path, e))?;
            return Ok(Self::Link(target));
        }
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::Data {
            data,
            permissions: Some(meta.permissions()),
        })
    }
}

/// Recorded filesystem steps of one operation.
#[derive(Debug)]
pub struct Journal {
    root: PathBuf,
    trash: PathBuf,
    undo: Vec<Undo>,
    parked: usize,
}

impl Journal {
    /// Start a journal for the workspace at `root`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            trash: root.join(".git").join(TRASH_DIR),
            undo: Vec::new(),
            parked: 0,
        }
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// Remove the file, symlink or directory at `rel`.
    pub fn remove(&mut self, rel: &str) -> Result<()> {
        let path = self.abs(rel);
        let meta = std::fs::symlink_metadata(&path).map_err(|e| Error::io(&path, e))?;

        if meta.is_dir() {
            std::fs::create_dir_all(&self.trash).map_err(|e| Error::io(&self.trash, e))?;
            let parked = self.trash.join(format!("{}-{}", std::process::id(), self.parked));
            self.parked += 1;
            std::fs::rename(&path, &parked).map_err(|e| Error::io(&path, e))?;
            self.undo.push(Undo::RestoreDir { parked, path });
        } else if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            self.undo.push(Undo::RestoreLink { path, target });
        } else {
            let data = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
            self.undo.push(Undo::RestoreFile {
                path,
                data,
                permissions: meta.permissions(),
            });
        }
        Ok(())
    }

    /// Create the directory `rel`; its parent must exist.
    pub fn make_dir(&mut self, rel: &str) -> Result<()> {
        let path = self.abs(rel);
        std::fs::create_dir(&path).map_err(|e| Error::io(&path, e))?;
        self.undo.push(Undo::RemoveDir { path });
        Ok(())
    }

    /// Create every missing ancestor directory of `rel`.
    pub fn make_parents(&mut self, rel: &str) -> Result<()> {
        let mut prefix = String::new();
        let segments: Vec<&str> = rel.split('/').collect();
        for seg in &segments[..segments.len().saturating_sub(1)] {
            prefix = crate::paths::join(&prefix, seg);
            let path = self.abs(&prefix);
            match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(Error::invalid_path(format!("{} is not a directory", prefix))),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.make_dir(&prefix)?,
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        Ok(())
    }

    /// Write `source` at `rel`, replacing an existing file. A replaced
    /// regular file keeps its permissions unless `source` carries its own.
    pub fn write(&mut self, rel: &str, source: &FileSource) -> Result<()> {
        let path = self.abs(rel);
        let mut inherited = None;
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::invalid_path(format!("{} is a directory", rel)));
            }
            Ok(meta) => {
                if meta.is_file() {
                    inherited = Some(meta.permissions());
                }
                self.remove(rel)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&path, e)),
        }

        match source {
            FileSource::Data { data, permissions } => {
                std::fs::write(&path, data).map_err(|e| Error::io(&path, e))?;
                self.undo.push(Undo::RemoveFile { path: path.clone() });
                if let Some(permissions) = permissions.as_ref().or(inherited.as_ref()) {
                    std::fs::set_permissions(&path, permissions.clone())
                        .map_err(|e| Error::io(&path, e))?;
                }
            }
            FileSource::Link(target) => {
                make_symlink(target, &path)?;
                self.undo.push(Undo::RemoveFile { path });
            }
        }
        Ok(())
    }

    /// Move `from` to `to` (both relative, `to` must not exist).
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let src = self.abs(from);
        let dst = self.abs(to);
        std::fs::rename(&src, &dst).map_err(|e| Error::io(&src, e))?;
        self.undo.push(Undo::MoveBack { from: dst, to: src });
        Ok(())
    }

    /// Remove the ancestors of `rel` that are now empty, deepest first.
    ///
    /// Git cannot record an empty directory, so one left behind would make
    /// the working tree disagree with the committed snapshot.
    pub fn remove_empty_parents(&mut self, rel: &str) -> Result<()> {
        let mut current = rel;
        while let Some((parent, _)) = current.rsplit_once('/') {
            let path = self.abs(parent);
            let mut entries = std::fs::read_dir(&path).map_err(|e| Error::io(&path, e))?;
            if entries.next().is_some() {
                break;
            }
            self.remove(parent)?;
            current = parent;
        }
        Ok(())
    }

    /// Keep every change and drop the parked directories.
    pub fn commit(self) {
        if self.parked > 0 {
            if let Err(e) = std::fs::remove_dir_all(&self.trash) {
                log::warn!("could not empty {}: {}", self.trash.display(), e);
            }
        }
    }

    /// Undo every recorded step in reverse order.
    pub fn rollback(mut self) {
        log::warn!(
            "rolling back {} filesystem step(s) in {}",
            self.undo.len(),
            self.root.display()
        );
        while let Some(step) = self.undo.pop() {
            if let Err(e) = undo_step(&step) {
                log::warn!("undo of {:?} failed: {}", step, e);
            }
        }
        if self.parked > 0 {
            let _ = std::fs::remove_dir_all(&self.trash);
        }
    }
}

fn undo_step(step: &Undo) -> std::io::Result<()> {
    match step {
        Undo::RestoreFile {
            path,
            data,
            permissions,
        } => {
            std::fs::write(path, data)?;
            std::fs::set_permissions(path, permissions.clone())
        }
        Undo::RestoreLink { path, target } => make_symlink(target, path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string())),
        Undo::RestoreDir { parked, path } => std::fs::rename(parked, path),
        Undo::RemoveFile { path } => std::fs::remove_file(path),
        Undo::RemoveDir { path } => std::fs::remove_dir(path),
        Undo::MoveBack { from, to } => std::fs::rename(from, to),
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| Error::io(link, e))
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    // Without symlink support the link text is stored as file content.
    std::fs::write(link, target.to_string_lossy().as_bytes()).map_err(|e| Error::io(link, e))
}
