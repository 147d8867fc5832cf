//! Identity registry backed by a directory of reference images.
//!
//! One image per identity, file stem = identity name. The directory is the
//! source of truth across restarts; the in-memory list is rebuilt on load.
//! Writes land on disk before the entry is added, and entries leave memory
//! before their file is deleted.

use crate::error::ErrorKind;
use crate::recognizer::{Recognizer, RecognizerError};
use crate::types::{Embedding, Identity};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const STORED_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face found in {0}")]
    NoFace(PathBuf),
    #[error("encoding {path} failed: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: RecognizerError,
    },
    #[error("identity already exists: {0}")]
    Duplicate(String),
    #[error("invalid identity name: {0:?}")]
    InvalidName(String),
    #[error("identity not found: {0}")]
    NotFound(String),
    #[error("faces directory I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Decode { .. } | RegistryError::NoFace(_) | RegistryError::Encode { .. } => {
                ErrorKind::DecodeFailure
            }
            RegistryError::Duplicate(_) => ErrorKind::DuplicateNameCollision,
            RegistryError::InvalidName(_) | RegistryError::NotFound(_) => ErrorKind::InvalidInput,
            RegistryError::Io { .. } => ErrorKind::PersistenceFailure,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        RegistryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A reference image that was left out of the registry, and why.
#[derive(Debug)]
pub struct SkippedImage {
    pub path: PathBuf,
    pub error: RegistryError,
}

/// Outcome of a bulk import.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub registered: Vec<String>,
    /// Names that already existed; the source image was not imported.
    pub skipped: Vec<String>,
    pub failed: Vec<SkippedImage>,
}

/// Known identities, in insertion order.
pub struct Registry {
    dir: PathBuf,
    identities: Vec<Identity>,
}

impl Registry {
    /// Empty registry over `dir`, creating the directory if needed.
    pub fn create(dir: &Path) -> Result<Self, RegistryError> {
        fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            identities: Vec::new(),
        })
    }

    /// Scan `dir` for reference images and encode each one.
    ///
    /// Images that fail to decode, contain no face, or repeat an existing
    /// name are skipped and returned alongside the registry. Files are
    /// visited in name order so the result is stable across runs.
    pub fn load(dir: &Path, recognizer: &mut dyn Recognizer) -> Result<(Self, Vec<SkippedImage>), RegistryError> {
        let mut registry = Self::create(dir)?;
        let mut skipped = Vec::new();

        for path in image_files(dir)? {
            let Some(name) = stem(&path) else {
                continue;
            };
            if registry.contains(&name) {
                tracing::warn!(path = %path.display(), name = %name, "duplicate identity name, skipping");
                skipped.push(SkippedImage {
                    path,
                    error: RegistryError::Duplicate(name),
                });
                continue;
            }
            match encode_file(&path, recognizer) {
                Ok((_, encoding)) => registry.identities.push(Identity {
                    name,
                    encoding,
                    image_path: path,
                }),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping reference image");
                    skipped.push(SkippedImage { path, error });
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            loaded = registry.len(),
            skipped = skipped.len(),
            "identity registry loaded"
        );
        Ok((registry, skipped))
    }

    /// Register a new identity from the image at `source`.
    ///
    /// A taken name is disambiguated with a numeric suffix (`name_1`,
    /// `name_2`, ...); an existing file is never overwritten. The image is
    /// stored as `<dir>/<name>.jpg`.
    pub fn register(
        &mut self,
        name: &str,
        source: &Path,
        recognizer: &mut dyn Recognizer,
    ) -> Result<&Identity, RegistryError> {
        let base = validate_name(name)?;
        let (image, encoding) = encode_file(source, recognizer)?;

        let (name, image_path) = loop {
            let candidate = self.free_name(&base)?;
            let path = self.dir.join(format!("{candidate}.jpg"));
            match write_new_jpeg(&path, &image) {
                Ok(()) => break (candidate, path),
                // Lost a race with another writer; pick the next suffix.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(RegistryError::io(&path, e)),
            }
        };

        tracing::info!(name = %name, path = %image_path.display(), "identity registered");
        let idx = self.identities.len();
        self.identities.push(Identity {
            name,
            encoding,
            image_path,
        });
        Ok(&self.identities[idx])
    }

    /// Register every supported image in `src`, name = file stem.
    ///
    /// Unlike [`register`](Self::register), a name that already exists is
    /// skipped rather than suffixed.
    pub fn import_dir(&mut self, src: &Path, recognizer: &mut dyn Recognizer) -> Result<ImportReport, RegistryError> {
        let mut report = ImportReport::default();
        for path in image_files(src)? {
            let Some(name) = stem(&path) else {
                continue;
            };
            if self.contains(&name) || self.stem_on_disk(&name)? {
                report.skipped.push(name);
                continue;
            }
            match self.register(&name, &path, recognizer) {
                Ok(identity) => report.registered.push(identity.name.clone()),
                Err(error) if error.kind() == ErrorKind::PersistenceFailure => return Err(error),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "import failed");
                    report.failed.push(SkippedImage { path, error });
                }
            }
        }
        tracing::info!(
            src = %src.display(),
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bulk import finished"
        );
        Ok(report)
    }

    /// Remove an identity and delete its backing image.
    pub fn remove(&mut self, name: &str) -> Result<Identity, RegistryError> {
        let idx = self
            .identities
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let identity = self.identities.remove(idx);

        match fs::remove_file(&identity.image_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %identity.image_path.display(), "backing image already gone");
            }
            Err(e) => return Err(RegistryError::io(&identity.image_path, e)),
        }
        tracing::info!(name = %name, "identity removed");
        Ok(identity)
    }

    pub fn all(&self) -> &[Identity] {
        &self.identities
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First of `base`, `base_1`, `base_2`, ... unused in memory and on disk.
    fn free_name(&self, base: &str) -> Result<String, RegistryError> {
        let mut candidate = base.to_string();
        let mut counter = 1u32;
        while self.contains(&candidate) || self.stem_on_disk(&candidate)? {
            candidate = format!("{base}_{counter}");
            counter += 1;
        }
        Ok(candidate)
    }

    /// Whether any supported image in the faces directory has this stem.
    fn stem_on_disk(&self, name: &str) -> Result<bool, RegistryError> {
        for ext in IMAGE_EXTENSIONS {
            for candidate in [ext.to_string(), ext.to_uppercase()] {
                let path = self.dir.join(format!("{name}.{candidate}"));
                match path.try_exists() {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(e) => return Err(RegistryError::io(&path, e)),
                }
            }
        }
        Ok(false)
    }
}

fn validate_name(name: &str) -> Result<String, RegistryError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Supported image files directly inside `dir`, sorted by file name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let entries = fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RegistryError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && is_image(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reference images in `dir` as `(name, path)`, without decoding them.
///
/// Names repeated under another extension are listed once, first file wins,
/// matching what [`Registry::load`] keeps.
pub fn stored_identities(dir: &Path) -> Result<Vec<(String, PathBuf)>, RegistryError> {
    let mut out: Vec<(String, PathBuf)> = Vec::new();
    for path in image_files(dir)? {
        let Some(name) = stem(&path) else {
            continue;
        };
        if out.iter().all(|(n, _)| *n != name) {
            out.push((name, path));
        }
    }
    Ok(out)
}

/// Delete the reference image stored for `name` without loading the registry.
///
/// Works for images that no longer decode or contain no face, which
/// [`Registry::load`] would have skipped.
pub fn remove_stored(dir: &Path, name: &str) -> Result<PathBuf, RegistryError> {
    let (_, path) = stored_identities(dir)?
        .into_iter()
        .find(|(n, _)| n == name)
        .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
    fs::remove_file(&path).map_err(|e| RegistryError::io(&path, e))?;
    tracing::info!(name, path = %path.display(), "reference image removed");
    Ok(path)
}

/// Decode an image and encode the first (strongest) face in it.
fn encode_file(path: &Path, recognizer: &mut dyn Recognizer) -> Result<(RgbImage, Embedding), RegistryError> {
    let image = image::open(path)
        .map_err(|source| RegistryError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let detections = recognizer
        .detect_and_encode(&image)
        .map_err(|source| RegistryError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    let detection = detections
        .into_iter()
        .next()
        .ok_or_else(|| RegistryError::NoFace(path.to_path_buf()))?;
    Ok((image, detection.encoding))
}

/// Encode as JPEG and write to a path that must not exist yet.
///
/// A partially written file is removed before returning the error.
fn write_new_jpeg(path: &Path, image: &RgbImage) -> io::Result<()> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, STORED_JPEG_QUALITY)
        .encode_image(image)
        .map_err(io::Error::other)?;

    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let written = file.write_all(&bytes).and_then(|()| file.sync_all());
    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Detection, Region};
    use image::Rgb;
    use tempfile::tempdir;

    /// Encodes the colour of the top-left pixel; pure black means no face.
    struct ColorRecognizer;

    impl Recognizer for ColorRecognizer {
        fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<Detection>, RecognizerError> {
            let p = image.get_pixel(0, 0);
            if p.0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(vec![Detection {
                region: Region { top: 0, right: image.width(), bottom: image.height(), left: 0 },
                encoding: Embedding::new(p.0.iter().map(|&c| c as f32 / 255.0).collect()),
                confidence: 1.0,
            }])
        }
    }

    fn write_png(dir: &Path, file: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(file);
        RgbImage::from_pixel(8, 8, Rgb(color)).save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_skips_faceless_and_corrupt() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "alice.png", [255, 0, 0]);
        write_png(dir.path(), "blank.png", [0, 0, 0]);
        fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        write_png(dir.path(), "bob.png", [0, 255, 0]);

        let (registry, skipped) = Registry::load(dir.path(), &mut ColorRecognizer).unwrap();

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().all(|s| s.error.kind() == ErrorKind::DecodeFailure));
    }

    #[test]
    fn test_load_creates_missing_dir() {
        let dir = tempdir().unwrap();
        let faces = dir.path().join("faces");
        let (registry, skipped) = Registry::load(&faces, &mut ColorRecognizer).unwrap();
        assert!(registry.is_empty());
        assert!(skipped.is_empty());
        assert!(faces.is_dir());
    }

    #[test]
    fn test_load_duplicate_stem_skipped() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "alice.png", [255, 0, 0]);
        let jpg = dir.path().join("alice.jpg");
        RgbImage::from_pixel(8, 8, Rgb([10, 10, 200])).save(&jpg).unwrap();

        let (registry, skipped) = Registry::load(dir.path(), &mut ColorRecognizer).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].error.kind(), ErrorKind::DuplicateNameCollision);
    }

    #[test]
    fn test_register_collision_suffixes_and_keeps_original() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let first = write_png(src.path(), "a.png", [200, 0, 0]);
        let second = write_png(src.path(), "b.png", [0, 0, 200]);

        let mut registry = Registry::create(faces.path()).unwrap();
        registry.register("alice", &first, &mut ColorRecognizer).unwrap();
        let original = fs::read(faces.path().join("alice.jpg")).unwrap();

        let id = registry.register("alice", &second, &mut ColorRecognizer).unwrap();
        assert_eq!(id.name, "alice_1");
        let id = registry.register("alice", &second, &mut ColorRecognizer).unwrap();
        assert_eq!(id.name, "alice_2");

        assert_eq!(fs::read(faces.path().join("alice.jpg")).unwrap(), original);
        assert!(faces.path().join("alice_1.jpg").exists());
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["alice", "alice_1", "alice_2"]);
    }

    #[test]
    fn test_register_avoids_untracked_file_on_disk() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let img = write_png(src.path(), "x.png", [90, 90, 90]);
        fs::write(faces.path().join("carol.png"), b"someone else's file").unwrap();

        let mut registry = Registry::create(faces.path()).unwrap();
        let id = registry.register("carol", &img, &mut ColorRecognizer).unwrap();
        assert_eq!(id.name, "carol_1");
        assert_eq!(fs::read(faces.path().join("carol.png")).unwrap(), b"someone else's file");
    }

    #[test]
    fn test_register_no_face_writes_nothing() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let img = write_png(src.path(), "dark.png", [0, 0, 0]);

        let mut registry = Registry::create(faces.path()).unwrap();
        let err = registry.register("dave", &img, &mut ColorRecognizer).unwrap_err();
        assert!(matches!(err, RegistryError::NoFace(_)));
        assert!(registry.is_empty());
        assert_eq!(fs::read_dir(faces.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let img = write_png(src.path(), "x.png", [90, 90, 90]);
        let mut registry = Registry::create(faces.path()).unwrap();
        for bad in ["", "   ", "../evil", "a/b", ".hidden"] {
            let err = registry.register(bad, &img, &mut ColorRecognizer).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{bad:?}");
        }
    }

    #[test]
    fn test_remove_deletes_file() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let img = write_png(src.path(), "x.png", [90, 90, 90]);
        let mut registry = Registry::create(faces.path()).unwrap();
        let path = registry.register("erin", &img, &mut ColorRecognizer).unwrap().image_path.clone();

        let removed = registry.remove("erin").unwrap();
        assert_eq!(removed.name, "erin");
        assert!(!path.exists());
        assert!(registry.is_empty());
        assert!(matches!(registry.remove("erin"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_registered_identity_survives_reload() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        let img = write_png(src.path(), "x.png", [250, 250, 250]);
        let mut registry = Registry::create(faces.path()).unwrap();
        registry.register("frank", &img, &mut ColorRecognizer).unwrap();

        let (reloaded, skipped) = Registry::load(faces.path(), &mut ColorRecognizer).unwrap();
        assert!(skipped.is_empty());
        assert!(reloaded.contains("frank"));
    }

    #[test]
    fn test_import_dir_skips_existing_and_counts_failures() {
        let src = tempdir().unwrap();
        let faces = tempdir().unwrap();
        write_png(src.path(), "gina.png", [10, 200, 10]);
        write_png(src.path(), "hank.png", [200, 10, 10]);
        write_png(src.path(), "empty.png", [0, 0, 0]);

        let mut registry = Registry::create(faces.path()).unwrap();
        let existing = write_png(src.path(), "seed.png", [1, 2, 3]);
        registry.register("hank", &existing, &mut ColorRecognizer).unwrap();
        fs::remove_file(&existing).unwrap();

        let report = registry.import_dir(src.path(), &mut ColorRecognizer).unwrap();
        assert_eq!(report.registered, vec!["gina".to_string()]);
        assert_eq!(report.skipped, vec!["hank".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_stored_identities_without_models() {
        let dir = tempdir().unwrap();
        write_png(dir.path(), "bob.png", [0, 255, 0]);
        write_png(dir.path(), "alice.png", [255, 0, 0]);
        write_png(dir.path(), "alice.jpg", [255, 0, 0]);
        fs::write(dir.path().join("readme.md"), b"x").unwrap();

        let stored = stored_identities(dir.path()).unwrap();
        let names: Vec<&str> = stored.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(stored[0].1, dir.path().join("alice.jpg"));
    }

    #[test]
    fn test_remove_stored_handles_unencodable_image() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        write_png(dir.path(), "alice.png", [255, 0, 0]);

        let removed = remove_stored(dir.path(), "broken").unwrap();
        assert_eq!(removed, dir.path().join("broken.jpg"));
        assert!(!removed.exists());
        assert!(dir.path().join("alice.png").exists());
        assert!(matches!(remove_stored(dir.path(), "broken"), Err(RegistryError::NotFound(_))));
    }
}
