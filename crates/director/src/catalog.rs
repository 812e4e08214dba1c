//! Image catalog — the set of image descriptors the director knows how to
//! build and run. Refreshed on an interval via mark-and-sweep, the same
//! approach the teacher uses to keep its container inventory cache in sync
//! with the engine without flickering entries that are still present.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::ImageDescriptor;
use crate::error::DirectorError;

/// Discovers the current set of image descriptors. The on-disk descriptor
/// format itself is out of scope; this trait is the seam a real source
/// (filesystem scan, registry listing, ...) would implement.
pub trait ImageSource: Send + Sync {
    fn discover(&self) -> Result<Vec<ImageDescriptor>, DirectorError>;
}

/// An `ImageSource` backed by a fixed, in-memory list — used by tests and by
/// the demonstration binary, which takes its image list straight from
/// `DirectorConfig`.
pub struct StaticImageSource {
    descriptors: Vec<ImageDescriptor>,
}

impl StaticImageSource {
    pub fn new(descriptors: Vec<ImageDescriptor>) -> Self {
        Self { descriptors }
    }
}

impl ImageSource for StaticImageSource {
    fn discover(&self) -> Result<Vec<ImageDescriptor>, DirectorError> {
        Ok(self.descriptors.clone())
    }
}

pub struct ImageCatalog {
    source: Arc<dyn ImageSource>,
    descriptors: DashMap<String, ImageDescriptor>,
}

impl ImageCatalog {
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self {
            source,
            descriptors: DashMap::new(),
        }
    }

    /// (Re)scan the image source. Idempotent; safe to call on a fixed
    /// interval. Readers of `get`/`iterator` see either the pre- or
    /// post-refresh snapshot, never a partially-updated one.
    pub fn load(&self) -> Result<(), DirectorError> {
        let fresh = self.source.discover()?;
        let seen: HashSet<String> = fresh.iter().map(|d| d.name.clone()).collect();

        for descriptor in fresh {
            self.descriptors.insert(descriptor.name.clone(), descriptor);
        }
        self.descriptors.retain(|name, _| seen.contains(name));

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ImageDescriptor> {
        self.descriptors.get(name).map(|entry| entry.value().clone())
    }

    pub fn is_native(&self, name: &str) -> bool {
        self.get(name).map(|d| d.native).unwrap_or(false)
    }

    pub fn iterator(&self) -> Vec<ImageDescriptor> {
        self.descriptors.iter().map(|entry| entry.value().clone()).collect()
    }
}
