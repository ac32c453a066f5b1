//! In-memory virtual filesystem.
//!
//! Each engine handle owns exactly one [`MemFs`]. Jobs pass their input and
//! output buffers through it; guest engines reach it through the `media::fs_*`
//! host functions. Nothing is ever written to disk.

use bytes::Bytes;
use dashmap::DashMap;

use toolkit_media_common::VfsError;

/// Flat, in-memory file store keyed by file name.
#[derive(Debug, Default)]
pub struct MemFs {
    files: DashMap<String, Bytes>,
}

impl MemFs {
    /// Create an empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write (or replace) a file.
    pub fn write_file(&self, name: &str, data: impl Into<Bytes>) -> Result<(), VfsError> {
        validate_name(name)?;
        self.files.insert(name.to_string(), data.into());
        Ok(())
    }

    /// Read a whole file.
    pub fn read_file(&self, name: &str) -> Result<Bytes, VfsError> {
        self.files
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| VfsError::NotFound {
                name: name.to_string(),
            })
    }

    /// Delete a file.
    pub fn delete_file(&self, name: &str) -> Result<(), VfsError> {
        self.files
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VfsError::NotFound {
                name: name.to_string(),
            })
    }

    /// Size of a file in bytes, if it exists.
    pub fn file_size(&self, name: &str) -> Option<usize> {
        self.files.get(name).map(|entry| entry.value().len())
    }

    /// Whether a file exists.
    pub fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Names of all files, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns `true` if no files are stored.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total bytes held.
    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|e| e.value().len()).sum()
    }

    /// Remove every file.
    pub fn clear(&self) {
        self.files.clear();
    }
}

fn validate_name(name: &str) -> Result<(), VfsError> {
    if name.is_empty() || name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(VfsError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_delete() {
        let fs = MemFs::new();
        fs.write_file("input.png", vec![1u8, 2, 3]).unwrap();

        assert!(fs.exists("input.png"));
        assert_eq!(fs.file_size("input.png"), Some(3));
        assert_eq!(fs.read_file("input.png").unwrap().as_ref(), &[1, 2, 3]);

        fs.delete_file("input.png").unwrap();
        assert!(fs.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_contents() {
        let fs = MemFs::new();
        fs.write_file("a", vec![0u8; 10]).unwrap();
        fs.write_file("a", vec![1u8; 2]).unwrap();

        assert_eq!(fs.len(), 1);
        assert_eq!(fs.total_bytes(), 2);
    }

    #[test]
    fn test_missing_file() {
        let fs = MemFs::new();
        assert_eq!(
            fs.read_file("nope").unwrap_err(),
            VfsError::NotFound {
                name: "nope".into()
            }
        );
        assert!(fs.delete_file("nope").is_err());
        assert_eq!(fs.file_size("nope"), None);
    }

    #[test]
    fn test_invalid_names() {
        let fs = MemFs::new();
        for name in ["", "dir/file", "..", "a\0b"] {
            assert!(
                matches!(fs.write_file(name, Vec::new()), Err(VfsError::InvalidName { .. })),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn test_list_and_clear() {
        let fs = MemFs::new();
        fs.write_file("output.jpg", Vec::new()).unwrap();
        fs.write_file("input.png", Vec::new()).unwrap();

        assert_eq!(fs.list(), vec!["input.png", "output.jpg"]);
        fs.clear();
        assert!(fs.is_empty());
    }
}
