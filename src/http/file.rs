use memmap2::Mmap;

use std::fs::File;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Why a static file cannot be served.
#[derive(Debug, PartialEq, Eq)]
pub enum FileError {
    /// The path does not exist.
    Missing,

    /// The file is not world-readable, or opening it was refused.
    Forbidden,

    /// The path names a directory.
    Directory,

    /// Opening or mapping failed for another reason.
    Io(io::ErrorKind),
}

/// A read-only memory map of a file served as a response body.
///
/// The mapping lives as long as the value; the file descriptor is closed
/// right after mapping. Empty files are not mapped.
#[derive(Debug)]
pub struct MappedFile {
    map: Option<Mmap>,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(FileError::Missing),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(FileError::Forbidden);
            }
            Err(e) => return Err(FileError::Io(e.kind())),
        };

        if metadata.permissions().mode() & 0o004 == 0 {
            return Err(FileError::Forbidden);
        }
        if metadata.is_dir() {
            return Err(FileError::Directory);
        }
        if metadata.len() == 0 {
            return Ok(Self { map: None });
        }

        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => FileError::Forbidden,
            kind => FileError::Io(kind),
        })?;

        // The file may change underneath the mapping; we only ever read it.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| FileError::Io(e.kind()))?;

        Ok(Self { map: Some(map) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("beacon-file-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn maps_readable_file() {
        let dir = scratch("readable");
        let path = dir.join("index.html");
        fs::write(&path, b"<p>hi</p>").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let file = MappedFile::open(&path).unwrap();
        assert_eq!(file.as_bytes(), b"<p>hi</p>");
        assert_eq!(file.len(), 9);
    }

    #[test]
    fn classifies_failures() {
        let dir = scratch("failures");
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(
            MappedFile::open(&dir.join("nope")).unwrap_err(),
            FileError::Missing
        );
        assert_eq!(MappedFile::open(&dir).unwrap_err(), FileError::Directory);

        let private = dir.join("private.html");
        fs::write(&private, b"x").unwrap();
        fs::set_permissions(&private, fs::Permissions::from_mode(0o600)).unwrap();
        assert_eq!(MappedFile::open(&private).unwrap_err(), FileError::Forbidden);
    }

    #[test]
    fn empty_file_is_not_mapped() {
        let dir = scratch("empty");
        let path = dir.join("empty.html");
        fs::write(&path, b"").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let file = MappedFile::open(&path).unwrap();
        assert!(file.is_empty());
        assert!(file.as_bytes().is_empty());
    }
}
