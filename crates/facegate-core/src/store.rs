//! Directory-backed gallery of enrolled face images.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<label>/<uuid>.<ext>   one folder per identity, any number of samples
//! <root>/<label>.<ext>          legacy flat file, one sample, label = file stem
//! ```
//!
//! The store is the source of truth; the in-memory index is rebuilt from it.

use crate::types::Identity;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Image file extensions the gallery accepts (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery root {}: {source}", .path.display())]
    Root { path: PathBuf, source: io::Error },
    #[error("writing sample {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("removing {}: {source}", .path.display())]
    Remove { path: PathBuf, source: io::Error },
    #[error("extension {0:?} is not an accepted gallery image type")]
    UnsupportedExtension(String),
}

/// Where a gallery image was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<root>/<label>/<file>`
    Folder,
    /// `<root>/<label>.<ext>`
    Flat,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::Folder => "folder",
            Layout::Flat => "flat",
        }
    }
}

/// One image file in the store and the identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub path: PathBuf,
    pub identity: Identity,
    pub layout: Layout,
}

pub struct GalleryStore {
    root: PathBuf,
}

impl GalleryStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Root {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every accepted image: identity folders first, then legacy flat
    /// files, each in name order.
    ///
    /// Only the root listing is fatal. An identity folder that cannot be
    /// read is logged and skipped.
    pub fn scan(&self) -> Result<Vec<GalleryEntry>, StoreError> {
        let top = sorted_entries(&self.root).map_err(|source| StoreError::Root {
            path: self.root.clone(),
            source,
        })?;

        let mut entries = Vec::new();

        for dir in top.iter().filter(|p| p.is_dir()) {
            let Some(label) = dir.file_name() else { continue };
            let identity = Identity::from_store(label.to_string_lossy());
            let files = match sorted_entries(dir) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable identity folder");
                    continue;
                }
            };
            entries.extend(
                files
                    .into_iter()
                    .filter(|p| p.is_file() && has_image_extension(p))
                    .map(|path| GalleryEntry {
                        path,
                        identity: identity.clone(),
                        layout: Layout::Folder,
                    }),
            );
        }

        for file in top.iter().filter(|p| p.is_file() && has_image_extension(p)) {
            let Some(stem) = file.file_stem() else { continue };
            entries.push(GalleryEntry {
                path: file.clone(),
                identity: Identity::from_store(stem.to_string_lossy()),
                layout: Layout::Flat,
            });
        }

        Ok(entries)
    }

    /// Labels that currently own at least one image, sorted and deduplicated.
    pub fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let labels: BTreeSet<Identity> = self.scan()?.into_iter().map(|e| e.identity).collect();
        Ok(labels.into_iter().collect())
    }

    /// Write an encoded image into the identity's folder under a fresh
    /// `<uuid>.<extension>` name, creating the folder if absent.
    ///
    /// The bytes land in a hidden `.part` file first and are renamed into
    /// place, so a concurrent scan never sees a partially written image.
    pub fn write_sample(
        &self,
        identity: &Identity,
        bytes: &[u8],
        extension: &str,
    ) -> Result<PathBuf, StoreError> {
        let extension = extension.to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(StoreError::UnsupportedExtension(extension));
        }

        let dir = self.identity_dir(identity);
        fs::create_dir_all(&dir).map_err(|source| StoreError::Write {
            path: dir.clone(),
            source,
        })?;

        let name = format!("{}.{extension}", Uuid::new_v4());
        let path = dir.join(&name);
        let partial = dir.join(format!(".{name}.part"));

        let write = fs::write(&partial, bytes).and_then(|()| fs::rename(&partial, &path));
        if let Err(source) = write {
            let _ = fs::remove_file(&partial);
            return Err(StoreError::Write { path, source });
        }

        tracing::debug!(identity = %identity, path = %path.display(), "gallery sample written");
        Ok(path)
    }

    /// Delete the identity's folder and every sample in it.
    ///
    /// Returns `Ok(false)` if there was no folder. Legacy flat files are not
    /// touched. Something other than a directory at the folder's path is an
    /// error.
    pub fn remove_identity(&self, identity: &Identity) -> Result<bool, StoreError> {
        let dir = self.identity_dir(identity);
        match fs::metadata(&dir) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(StoreError::Remove { path: dir, source }),
            Ok(meta) if !meta.is_dir() => {
                return Err(StoreError::Remove {
                    path: dir,
                    source: io::Error::other("not a directory"),
                })
            }
            Ok(_) => {}
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Remove { path: dir, source }),
        }
    }

    fn identity_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.as_str())
    }
}

/// True if the file has one of [`IMAGE_EXTENSIONS`], ignoring case.
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn id(label: &str) -> Identity {
        Identity::parse(label).unwrap()
    }

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension(Path::new("a.jpg")));
        assert!(has_image_extension(Path::new("a.JPEG")));
        assert!(has_image_extension(Path::new("a.Png")));
        assert!(has_image_extension(Path::new("a.bmp")));
        assert!(!has_image_extension(Path::new("a.gif")));
        assert!(!has_image_extension(Path::new("a")));
        assert!(!has_image_extension(Path::new(".a.jpg.part")));
    }

    #[test]
    fn test_open_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("database");
        let store = GalleryStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn test_scan_folders_before_flat_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("Carol/b.png"));
        touch(&root.join("Carol/a.JPG"));
        touch(&root.join("Carol/notes.txt"));
        touch(&root.join("Carol/nested/deep.jpg"));
        touch(&root.join("Dave.jpg"));
        touch(&root.join("readme.md"));

        let store = GalleryStore::open(root).unwrap();
        let entries = store.scan().unwrap();

        let summary: Vec<(String, Layout)> = entries
            .iter()
            .map(|e| (e.identity.to_string(), e.layout))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Carol".to_string(), Layout::Folder),
                ("Carol".to_string(), Layout::Folder),
                ("Dave".to_string(), Layout::Flat),
            ]
        );
        assert!(entries[0].path.ends_with("Carol/a.JPG"));
    }

    #[test]
    fn test_identities_merge_layouts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Erin/1.jpg"));
        touch(&dir.path().join("Erin.png"));
        touch(&dir.path().join("Frank.bmp"));
        std::fs::create_dir(dir.path().join("Empty")).unwrap();

        let store = GalleryStore::open(dir.path()).unwrap();
        assert_eq!(store.identities().unwrap(), vec![id("Erin"), id("Frank")]);
    }

    #[test]
    fn test_write_sample_uses_uuid_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();

        let path = store.write_sample(&id("Alice"), b"bytes", "JPG").unwrap();
        assert_eq!(path.parent().unwrap(), dir.path().join("Alice"));
        assert_eq!(path.extension().unwrap(), "jpg");
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(stem).is_ok(), "{stem} is not a uuid");
        assert_eq!(fs::read(&path).unwrap(), b"bytes");

        let second = store.write_sample(&id("Alice"), b"more", "png").unwrap();
        assert_ne!(path, second);
        assert_eq!(fs::read_dir(dir.path().join("Alice")).unwrap().count(), 2);
    }

    #[test]
    fn test_write_sample_rejects_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let err = store.write_sample(&id("Alice"), b"x", "gif").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedExtension(_)));
        assert!(!dir.path().join("Alice").exists());
    }

    #[test]
    fn test_remove_identity() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alice/1.jpg"));
        touch(&dir.path().join("Alice/2.jpg"));
        touch(&dir.path().join("Alice.jpg"));
        let store = GalleryStore::open(dir.path()).unwrap();

        assert!(store.remove_identity(&id("Alice")).unwrap());
        assert!(!dir.path().join("Alice").exists());
        assert!(dir.path().join("Alice.jpg").exists(), "flat files are left alone");
        assert!(!store.remove_identity(&id("Alice")).unwrap());
    }

    #[test]
    fn test_remove_identity_blocked_by_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alice"));
        let store = GalleryStore::open(dir.path()).unwrap();

        let err = store.remove_identity(&id("Alice")).unwrap_err();
        assert!(matches!(err, StoreError::Remove { .. }));
        assert!(dir.path().join("Alice").is_file());
    }

    #[test]
    fn test_write_sample_blocked_by_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("Alice"));
        let store = GalleryStore::open(dir.path()).unwrap();

        let err = store.write_sample(&id("Alice"), b"x", "png").unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }
}
