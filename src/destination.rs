//! Destination path derivation and completion checks
//!
//! The on-disk file is the only completion marker: a destination that exists
//! with nonzero size is never fetched or written again.

use crate::config::LayoutMode;
use crate::error::{FetchError, Result};
use std::path::{Path, PathBuf};

/// Separator between image id and basename in flattened layout
pub const FLATTENED_SEPARATOR: &str = "____";

/// File extensions accepted as image filenames (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

/// Final on-disk location for one row's image
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    directory: PathBuf,
    filename: String,
}

impl Destination {
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the destination file
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    /// Lowercased file extension, used to pick the re-encode format
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    /// Whether the destination holds a completed image
    #[must_use]
    pub fn exists(&self) -> bool {
        std::fs::metadata(self.path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Remove a zero-length file left at the final path, if any
    ///
    /// Such a file is not a completed image, but would block the no-clobber
    /// rename used to publish the real one.
    pub fn clear_incomplete(&self) -> Result<()> {
        let path = self.path();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() == 0 => std::fs::remove_file(&path)
                .map_err(|e| FetchError::file_io_error("remove empty file", &path, &e)),
            _ => Ok(()),
        }
    }
}

/// Derives destinations from `(id, url)` under one output root
#[derive(Debug, Clone)]
pub struct DestinationResolver {
    root: PathBuf,
    layout: LayoutMode,
}

impl DestinationResolver {
    pub fn new<P: Into<PathBuf>>(root: P, layout: LayoutMode) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    /// Derive the destination for an image id and URL
    ///
    /// # Errors
    /// `UnparsableFilename` when the URL has no image basename or the id is not
    /// usable as a path component.
    pub fn resolve(&self, id: &str, url: &str) -> Result<Destination> {
        if !is_safe_component(id) {
            return Err(FetchError::UnparsableFilename(format!(
                "{} (image id '{}' is not a valid path component)",
                url, id
            )));
        }

        let basename = url_basename(url)?;

        let destination = match self.layout {
            LayoutMode::Nested => Destination {
                directory: self.root.join(id),
                filename: basename,
            },
            LayoutMode::Flattened => Destination {
                directory: self.root.clone(),
                filename: format!("{}{}{}", id, FLATTENED_SEPARATOR, basename),
            },
        };

        Ok(destination)
    }

    /// Resolve the first candidate URL whose filename parses
    ///
    /// Returns the chosen URL alongside its destination, or the last resolution
    /// error when no candidate parses.
    pub fn resolve_first<'a>(
        &self,
        id: &str,
        urls: &'a [String],
    ) -> Result<(&'a str, Destination)> {
        let mut last_error =
            FetchError::UnparsableFilename(format!("row '{}' has no candidate URL", id));

        for url in urls {
            match self.resolve(id, url) {
                Ok(destination) => return Ok((url.as_str(), destination)),
                Err(e) => {
                    tracing::debug!(image_id = %id, url = %url, error = %e, "Candidate URL rejected");
                    last_error = e;
                },
            }
        }

        Err(last_error)
    }

    /// Create the destination directory if it does not exist yet
    pub fn prepare(&self, destination: &Destination) -> Result<()> {
        std::fs::create_dir_all(&destination.directory).map_err(|e| {
            FetchError::file_io_error("create directory", &destination.directory, &e)
        })
    }
}

/// Extract the trailing path segment of `url` as an image filename
///
/// Query strings and fragments are ignored. The segment must carry one of
/// [`IMAGE_EXTENSIONS`].
///
/// # Errors
/// `UnparsableFilename` if the URL does not parse or the segment is not an
/// image filename.
pub fn url_basename(url: &str) -> Result<String> {
    let parsed =
        url::Url::parse(url).map_err(|_| FetchError::UnparsableFilename(url.to_string()))?;

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| is_safe_component(segment))
        .ok_or_else(|| FetchError::UnparsableFilename(url.to_string()))?;

    if !has_image_extension(segment) {
        return Err(FetchError::UnparsableFilename(url.to_string()));
    }

    Ok(segment.to_string())
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_url_basename() {
        assert_eq!(url_basename("http://x/img.jpg").unwrap(), "img.jpg");
        assert_eq!(
            url_basename("https://farm3.staticflickr.com/1/2/abc_o.JPG?zz=1#top").unwrap(),
            "abc_o.JPG"
        );
        assert_eq!(url_basename("http://x/a/b/c.png").unwrap(), "c.png");
    }

    #[test]
    fn test_url_basename_rejects_non_images() {
        let cases = [
            "http://x/",
            "http://x/page.html",
            "http://x/noextension",
            "not a url",
            "http://x/dir/",
            "",
        ];
        for url in cases {
            let err = url_basename(url).unwrap_err();
            assert!(
                matches!(err, FetchError::UnparsableFilename(_)),
                "expected UnparsableFilename for {url:?}"
            );
        }
    }

    #[test]
    fn test_nested_layout() {
        let resolver = DestinationResolver::new("/out/train", LayoutMode::Nested);
        let dest = resolver.resolve("42", "http://x/img.jpg").unwrap();
        assert_eq!(dest.path(), PathBuf::from("/out/train/42/img.jpg"));
        assert_eq!(dest.extension().as_deref(), Some("jpg"));
    }

    #[test]
    fn test_flattened_layout() {
        let resolver = DestinationResolver::new("/out/train", LayoutMode::Flattened);
        let dest = resolver.resolve("42", "http://x/img.jpg").unwrap();
        assert_eq!(dest.path(), PathBuf::from("/out/train/42____img.jpg"));
    }

    #[test]
    fn test_unsafe_ids_rejected() {
        let resolver = DestinationResolver::new("/out", LayoutMode::Nested);
        assert!(resolver.resolve("..", "http://x/a.jpg").is_err());
        assert!(resolver.resolve("a/b", "http://x/a.jpg").is_err());
        assert!(resolver.resolve("", "http://x/a.jpg").is_err());
    }

    #[test]
    fn test_distinct_rows_get_distinct_paths() {
        for layout in [LayoutMode::Nested, LayoutMode::Flattened] {
            let resolver = DestinationResolver::new("/out", layout);
            let mut seen = HashSet::new();
            for id in ["a", "b", "c"] {
                for name in ["img.jpg", "other.jpg", "img.png"] {
                    let url = format!("http://host/{}", name);
                    let path = resolver.resolve(id, &url).unwrap().path();
                    assert!(seen.insert(path), "duplicate path in {layout} layout");
                }
            }
        }
    }

    #[test]
    fn test_resolve_first_falls_back_on_unparsable_primary() {
        let resolver = DestinationResolver::new("/out", LayoutMode::Nested);
        let urls = vec![
            "http://x/thumb".to_string(),
            "http://x/original.jpg".to_string(),
        ];
        let (url, dest) = resolver.resolve_first("7", &urls).unwrap();
        assert_eq!(url, "http://x/original.jpg");
        assert_eq!(dest.filename(), "original.jpg");

        let err = resolver.resolve_first("7", &[]).unwrap_err();
        assert!(matches!(err, FetchError::UnparsableFilename(_)));
    }

    #[test]
    fn test_exists_requires_nonzero_file() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = DestinationResolver::new(temp_dir.path(), LayoutMode::Nested);
        let dest = resolver.resolve("1", "http://x/a.jpg").unwrap();
        assert!(!dest.exists());

        resolver.prepare(&dest).unwrap();
        std::fs::write(dest.path(), b"").unwrap();
        assert!(!dest.exists());

        dest.clear_incomplete().unwrap();
        assert!(!dest.path().exists());

        std::fs::write(dest.path(), b"jpeg").unwrap();
        assert!(dest.exists());

        // A completed file is left untouched
        dest.clear_incomplete().unwrap();
        assert!(dest.exists());
    }
}
