//! Table and image lookup services
//!
//! Translators resolve data tables and images through these traits so a
//! host can serve them from somewhere other than the project file.

use crate::assets::{AssetLibrary, DataTable};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait TableService {
    fn resolve_table(&self, name: &str) -> Option<&DataTable>;
}

/// Image as the compiled graph references it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

pub trait ImageService {
    fn resolve_image(&self, name: &str) -> Option<ImageHandle>;
}

/// Services backed by the project's asset library
pub struct LibraryServices<'a> {
    assets: &'a AssetLibrary,
    /// Directory image paths are relative to
    base_dir: Option<PathBuf>,
}

impl<'a> LibraryServices<'a> {
    pub fn new(assets: &'a AssetLibrary) -> Self {
        Self {
            assets,
            base_dir: None,
        }
    }

    pub fn with_base_dir(assets: &'a AssetLibrary, base_dir: &Path) -> Self {
        Self {
            assets,
            base_dir: Some(base_dir.to_path_buf()),
        }
    }

    fn image_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl TableService for LibraryServices<'_> {
    fn resolve_table(&self, name: &str) -> Option<&DataTable> {
        self.assets.table(name)
    }
}

impl ImageService for LibraryServices<'_> {
    fn resolve_image(&self, name: &str) -> Option<ImageHandle> {
        let asset = self.assets.image(name)?;
        let (mut width, mut height) = (asset.width, asset.height);

        if width == 0 || height == 0 {
            if let Some(path) = &asset.path {
                let path = self.image_path(path);
                match image::image_dimensions(&path) {
                    Ok((w, h)) => {
                        debug!("Image [{}] is {}x{} ({})", name, w, h, path.display());
                        width = w;
                        height = h;
                    }
                    Err(e) => warn!("Failed to read image header {}: {}", path.display(), e),
                }
            }
        }

        Some(ImageHandle {
            name: asset.name.clone(),
            width,
            height,
        })
    }
}
