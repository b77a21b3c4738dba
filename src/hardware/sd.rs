// src/hardware/sd.rs - SD card backed by a host directory
use std::fs::{self, File, OpenOptions, ReadDir};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Mode argument of `SD.open`. Both modes open read-write and create the
/// file when missing, like the device library does for the supported sketches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    Read,
    #[default]
    Write,
}

impl OpenMode {
    pub fn from_raw(mode: i32) -> Self {
        match mode {
            0 => OpenMode::Read,
            _ => OpenMode::Write,
        }
    }
}

/// Emulated SD card. All paths resolve under a host directory, the root,
/// which can be changed at any time; a change only affects later calls.
#[derive(Debug, Default)]
pub struct SdCard {
    root: RwLock<Option<String>>,
}

impl SdCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_root(&self, path: &str) {
        tracing::info!("SD root set to {}", path);
        *self.root.write().unwrap_or_else(|e| e.into_inner()) = Some(path.to_string());
    }

    pub fn root(&self) -> Option<String> {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Succeeds iff a root has been set; the root itself is not checked.
    pub fn begin(&self) -> bool {
        let root = self.root();
        tracing::debug!("SD.begin() with root {:?}", root);
        root.is_some()
    }

    /// `exists` joins root and path with a separator.
    pub fn exists(&self, path: &str) -> bool {
        match self.root() {
            Some(root) => Path::new(&format!("{}/{}", root, path)).exists(),
            None => false,
        }
    }

    /// `open` appends the path to the root as is; callers pass a leading `/`.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        self.root().map(|root| PathBuf::from(format!("{}{}", root, path)))
    }

    /// Open a directory read-only, anything else read-write (created when
    /// missing). Failures give an invalid handle.
    pub fn open(&self, path: &str, mode: OpenMode) -> SdFile {
        let Some(full) = self.resolve(path) else {
            tracing::debug!("SD.open({}) without a root", path);
            return SdFile::invalid();
        };
        let file = SdFile::open(&full);
        tracing::debug!("Opened {} ({:?}) @ {}", full.display(), mode, file.fd());
        file
    }
}

/// Open file or directory on the card.
///
/// Directory handles iterate their entries with
/// [`open_next_file`](Self::open_next_file); the iteration state lives in the
/// handle and is dropped when the directory is exhausted or the handle closed.
#[derive(Debug, Default)]
pub struct SdFile {
    file: Option<File>,
    path: PathBuf,
    entries: Option<ReadDir>,
    exhausted: bool,
}

impl SdFile {
    pub fn invalid() -> Self {
        Self::default()
    }

    fn open(path: &Path) -> SdFile {
        let opened = if path.is_dir() {
            File::open(path)
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(0o644)
                .open(path)
        };
        match opened {
            Ok(file) => SdFile {
                file: Some(file),
                path: path.to_path_buf(),
                entries: None,
                exhausted: false,
            },
            Err(e) => {
                tracing::debug!("Failed to open {}: {}", path.display(), e);
                SdFile::invalid()
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    /// Host descriptor, negative for an invalid handle.
    pub fn fd(&self) -> RawFd {
        self.file.as_ref().map_or(-1, |f| f.as_raw_fd())
    }

    fn handle(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "invalid SD file handle"))
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.handle()?;
        file.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.handle()?;
        file.write(buf)
    }

    /// Forces written data to the host disk.
    pub fn flush(&mut self) -> io::Result<()> {
        self.handle()?.sync_all()
    }

    pub fn is_directory(&self) -> bool {
        self.handle()
            .and_then(|f| f.metadata())
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Base name of the file, resolved from the descriptor.
    pub fn name(&self) -> Option<String> {
        let fd = self.fd();
        if fd < 0 {
            return None;
        }
        let path = fs::read_link(format!("/proc/self/fd/{}", fd)).unwrap_or_else(|_| self.path.clone());
        path.file_name().map(|n| n.to_string_lossy().into_owned())
    }

    /// Next entry of a directory handle, opened as a new handle.
    ///
    /// Returns an invalid handle for non-directories and once the directory
    /// is exhausted, and on every call after that. An entry that cannot be
    /// opened also yields an invalid handle but does not end the iteration.
    pub fn open_next_file(&mut self) -> SdFile {
        if self.exhausted || !self.is_directory() {
            return SdFile::invalid();
        }
        if self.entries.is_none() {
            tracing::debug!("No directory stream for fd {}, creating", self.fd());
            match fs::read_dir(&self.path) {
                Ok(entries) => self.entries = Some(entries),
                Err(e) => {
                    tracing::warn!("Cannot list {}: {}", self.path.display(), e);
                    return SdFile::invalid();
                }
            }
        }
        let Some(entries) = self.entries.as_mut() else {
            return SdFile::invalid();
        };
        loop {
            match entries.next() {
                Some(Ok(entry)) => {
                    tracing::debug!("Directory entry {:?}", entry.file_name());
                    return SdFile::open(&entry.path());
                }
                Some(Err(e)) => {
                    tracing::warn!("Unreadable entry in {}: {}", self.path.display(), e);
                }
                None => {
                    self.entries = None;
                    self.exhausted = true;
                    return SdFile::invalid();
                }
            }
        }
    }

    /// Release the descriptor and any directory stream.
    pub fn close(&mut self) {
        self.entries = None;
        self.file = None;
    }
}
