//! Image Batch Layer
//!
//! Turns document paths into page images. Loading is best-effort per
//! document: a document that cannot be read is reported alongside the pages
//! that were loaded, never silently dropped.

pub mod page;

pub use page::{PageImage, PageRef};

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DriftError, Result};

/// File extensions treated as page images
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Capability that yields the ordered pages of a document
pub trait ImageSource {
    /// Load every page of `document`, in page order
    fn images(&self, document: &str) -> Result<Vec<PageImage>>;
}

/// Image source backed by the local filesystem
///
/// A document that is a directory yields its image files in sorted order;
/// a document that is a file yields a single page.
#[derive(Debug, Clone, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn images(&self, document: &str) -> Result<Vec<PageImage>> {
        let path = Path::new(document);
        if path.is_dir() {
            let files = find_images(path)?;
            if files.is_empty() {
                return Err(DriftError::InvalidImage(format!(
                    "no images found in {:?}",
                    path
                )));
            }
            files.iter().map(|file| PageImage::open(file)).collect()
        } else {
            Ok(vec![PageImage::open(path)?])
        }
    }
}

/// A document that could not be turned into pages
#[derive(Debug, Clone)]
pub struct DocumentFailure {
    /// Document path or key
    pub document: String,
    /// Why loading failed
    pub reason: String,
}

/// Result of loading a batch of documents
#[derive(Debug, Default)]
pub struct BatchLoad {
    /// Pages of every document that loaded
    pub pages: Vec<PageRef>,
    /// Documents that failed to load
    pub failures: Vec<DocumentFailure>,
}

impl BatchLoad {
    /// Iterate over the loaded page images
    pub fn images(&self) -> impl Iterator<Item = &PageImage> + '_ {
        self.pages.iter().map(|page| &page.image)
    }

    /// True if every document loaded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Load the pages of several documents, collecting per-document failures
pub fn load_batch<S, I, D>(source: &S, documents: I) -> BatchLoad
where
    S: ImageSource + ?Sized,
    I: IntoIterator<Item = D>,
    D: AsRef<str>,
{
    let mut batch = BatchLoad::default();

    for document in documents {
        let document = document.as_ref();
        debug!("Loading pages of {}", document);

        match source.images(document) {
            Ok(images) => {
                for (page_number, image) in images.into_iter().enumerate() {
                    batch.pages.push(PageRef {
                        document: document.to_string(),
                        page_number: page_number as u32,
                        image,
                    });
                }
            }
            Err(e) => {
                warn!("Error processing {}: {}", document, e);
                batch.failures.push(DocumentFailure {
                    document: document.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Loaded {} pages ({} documents failed)",
        batch.pages.len(),
        batch.failures.len()
    );
    batch
}

/// Recursively find image files below `dir`, sorted by path
pub fn find_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_images(dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_images(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_images(&path, found)?;
        } else if is_image_file(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Check whether a path has a supported image extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_page(path: &Path, shade: u8) {
        GrayImage::from_pixel(8, 6, Luma([shade])).save(path).unwrap();
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("scan/page-1.PNG")));
        assert!(is_image_file(Path::new("a.tiff")));
        assert!(!is_image_file(Path::new("invoice.pdf")));
        assert!(!is_image_file(Path::new("README")));
    }

    #[test]
    fn test_find_images_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_page(&dir.path().join("b.png"), 10);
        write_page(&dir.path().join("a.png"), 10);
        write_page(&dir.path().join("nested").join("c.png"), 10);
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let found = find_images(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    }

    #[test]
    fn test_load_batch_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("invoice");
        std::fs::create_dir(&doc).unwrap();
        write_page(&doc.join("0001.png"), 0);
        write_page(&doc.join("0002.png"), 255);

        let single = dir.path().join("receipt.png");
        write_page(&single, 128);

        let missing = dir.path().join("missing.png");

        let documents = vec![
            doc.to_string_lossy().to_string(),
            missing.to_string_lossy().to_string(),
            single.to_string_lossy().to_string(),
        ];
        let batch = load_batch(&FileImageSource, &documents);

        assert_eq!(batch.pages.len(), 3);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].document, documents[1]);
        assert!(!batch.is_complete());

        assert_eq!(batch.pages[0].page_number, 0);
        assert_eq!(batch.pages[1].page_number, 1);
        assert_eq!(batch.pages[1].image.to_luma().get_pixel(0, 0).0[0], 255);
        assert_eq!(batch.pages[2].document, documents[2]);
        assert_eq!(batch.pages[2].page_number, 0);
    }

    #[test]
    fn test_empty_directory_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let batch = load_batch(&FileImageSource, [dir.path().to_string_lossy()]);
        assert!(batch.pages.is_empty());
        assert_eq!(batch.failures.len(), 1);
    }
}
