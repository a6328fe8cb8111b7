//! Identity-to-file artwork cache with JSON persistence.
//!
//! The cache stores resolved file paths, never decoded pixels; images are
//! rebuilt at whatever size the caller asks for. Entries may go stale when
//! files disappear, so readers re-check existence and evict on a miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::DynamicImage;
use log::{debug, error, info};

use crate::config::CoverStyle;
use crate::image_pipeline;
use crate::protocol::ArtworkIdentity;

const CACHE_SCHEMA_VERSION: u32 = 1;

/// Cache handle shared by the worker thread and the consumer thread.
pub type SharedArtworkCache = Arc<Mutex<ArtworkCache>>;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct ArtworkCacheEntry {
    identity: ArtworkIdentity,
    path: PathBuf,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct ArtworkCacheFile {
    schema_version: u32,
    entries: Vec<ArtworkCacheEntry>,
}

#[derive(Debug)]
pub struct ArtworkCache {
    entries: HashMap<ArtworkIdentity, PathBuf>,
    path: PathBuf,
    style: CoverStyle,
}

impl ArtworkCache {
    pub fn new(path: PathBuf, style: CoverStyle) -> Self {
        Self {
            entries: HashMap::new(),
            path,
            style,
        }
    }

    pub fn into_shared(self) -> SharedArtworkCache {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set(&mut self, key: ArtworkIdentity, value: PathBuf) {
        debug!("ArtCache: Setting {} to {}", key.label(), value.display());
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &ArtworkIdentity) -> Option<PathBuf> {
        debug!("ArtCache: Requesting {}", key.label());
        self.entries.get(key).cloned()
    }

    /// Builds the cached image for `key` at `size`x`size`.
    ///
    /// A cached file that no longer exists is evicted and reported as absent.
    /// A file that exists but cannot be decoded is an `Err`: the cache then
    /// holds a reference it should never have accepted.
    pub fn get_image(
        &mut self,
        key: &ArtworkIdentity,
        size: u32,
    ) -> Result<Option<DynamicImage>, String> {
        debug!("ArtCache: Requesting image for {}", key.label());
        let Some(path) = self.entries.get(key).cloned() else {
            return Ok(None);
        };

        if !path.exists() {
            debug!(
                "ArtCache: Evicting stale entry {} -> {}",
                key.label(),
                path.display()
            );
            self.entries.remove(key);
            return Ok(None);
        }

        match image_pipeline::render(&path, size, self.style) {
            Ok(image) => Ok(Some(image)),
            Err(err) => {
                error!(
                    "ArtCache: Unable to load {} at size ({}, {}): {}",
                    path.display(),
                    size,
                    size,
                    err
                );
                Err(err)
            }
        }
    }

    /// Writes the whole mapping to disk. Failures leave memory authoritative.
    pub fn save(&self) -> Result<(), String> {
        debug!("ArtCache: Saving to {}", self.path.display());
        let result = self.write_file();
        if let Err(err) = result.as_ref() {
            info!("ArtCache: Unable to save: {}", err);
        }
        result
    }

    fn write_file(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                format!("Failed creating cache directory {}: {}", parent.display(), err)
            })?;
        }
        let file = ArtworkCacheFile {
            schema_version: CACHE_SCHEMA_VERSION,
            entries: self
                .entries
                .iter()
                .map(|(identity, path)| ArtworkCacheEntry {
                    identity: identity.clone(),
                    path: path.clone(),
                })
                .collect(),
        };
        let serialized = serde_json::to_string_pretty(&file)
            .map_err(|err| format!("Failed serializing artwork cache: {err}"))?;
        fs::write(&self.path, serialized)
            .map_err(|err| format!("Failed writing {}: {}", self.path.display(), err))
    }

    /// Replaces the in-memory mapping with the file's contents.
    ///
    /// A missing or unreadable file leaves the cache empty.
    pub fn load(&mut self) -> Result<(), String> {
        debug!("ArtCache: Loading from {}", self.path.display());
        self.entries.clear();
        let result = self.read_file();
        match result {
            Ok(entries) => {
                self.entries = entries;
                Ok(())
            }
            Err(err) => {
                info!("ArtCache: Unable to load: {}", err);
                Err(err)
            }
        }
    }

    fn read_file(&self) -> Result<HashMap<ArtworkIdentity, PathBuf>, String> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|err| format!("Failed reading {}: {}", self.path.display(), err))?;
        let parsed: ArtworkCacheFile = serde_json::from_str(&contents)
            .map_err(|err| format!("Failed parsing {}: {}", self.path.display(), err))?;
        if parsed.schema_version != CACHE_SCHEMA_VERSION {
            return Err(format!(
                "Unsupported cache schema version {}",
                parsed.schema_version
            ));
        }
        Ok(parsed
            .entries
            .into_iter()
            .map(|entry| (entry.identity, entry.path))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageBuffer, Rgba};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "coverkeeper_cache_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn write_png(path: &Path) {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(20, 20, Rgba([200, 10, 10, 255])))
            .save(path)
            .expect("png should be writable");
    }

    fn key(artist: &str, album: &str) -> ArtworkIdentity {
        ArtworkIdentity::new(Some(artist), Some(album), Some("dir"))
    }

    #[test]
    fn test_cache_roundtrip_through_fresh_instance() {
        let dir = unique_temp_dir("roundtrip");
        let cache_path = dir.join("nested").join("art_cache.json");
        let mut cache = ArtworkCache::new(cache_path.clone(), CoverStyle::Plain);
        let absent_fields = ArtworkIdentity::new(None, Some(""), Some("dir"));
        cache.set(key("Opeth", "Damnation"), PathBuf::from("/covers/opeth.jpg"));
        cache.set(absent_fields.clone(), PathBuf::from("/covers/unknown.jpg"));
        cache.save().expect("save should succeed");

        let mut reloaded = ArtworkCache::new(cache_path, CoverStyle::Plain);
        reloaded.load().expect("load should succeed");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.get(&key("Opeth", "Damnation")),
            Some(PathBuf::from("/covers/opeth.jpg"))
        );
        assert_eq!(
            reloaded.get(&absent_fields),
            Some(PathBuf::from("/covers/unknown.jpg"))
        );
        assert_eq!(
            reloaded.get(&ArtworkIdentity::new(Some(""), Some(""), Some("dir"))),
            None
        );

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_load_missing_or_corrupt_file_yields_empty_cache() {
        let dir = unique_temp_dir("corrupt");
        let cache_path = dir.join("art_cache.json");
        let mut cache = ArtworkCache::new(cache_path.clone(), CoverStyle::Plain);
        cache.set(key("a", "b"), PathBuf::from("/x.jpg"));
        assert!(cache.load().is_err());
        assert!(cache.is_empty());

        fs::write(&cache_path, "{not json").expect("write should succeed");
        cache.set(key("a", "b"), PathBuf::from("/x.jpg"));
        assert!(cache.load().is_err());
        assert!(cache.is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_save_failure_keeps_memory_authoritative() {
        let dir = unique_temp_dir("save_fail");
        let blocker = dir.join("blocker");
        fs::write(&blocker, b"file").expect("write should succeed");
        let mut cache = ArtworkCache::new(blocker.join("art_cache.json"), CoverStyle::Plain);
        cache.set(key("a", "b"), PathBuf::from("/x.jpg"));
        assert!(cache.save().is_err());
        assert_eq!(cache.get(&key("a", "b")), Some(PathBuf::from("/x.jpg")));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_get_image_evicts_deleted_file() {
        let dir = unique_temp_dir("evict");
        let image_path = dir.join("cover.png");
        write_png(&image_path);
        let mut cache = ArtworkCache::new(dir.join("art_cache.json"), CoverStyle::Plain);
        cache.set(key("a", "b"), image_path.clone());

        let image = cache
            .get_image(&key("a", "b"), 10)
            .expect("decode should succeed")
            .expect("image should be present");
        assert_eq!(image.dimensions(), (10, 10));

        fs::remove_file(&image_path).expect("remove should succeed");
        assert!(cache
            .get_image(&key("a", "b"), 10)
            .expect("missing file is not an error")
            .is_none());
        assert_eq!(cache.get(&key("a", "b")), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_get_image_surfaces_decode_failure() {
        let dir = unique_temp_dir("decode_fail");
        let bogus = dir.join("cover.jpg");
        fs::write(&bogus, b"not an image").expect("write should succeed");
        let mut cache = ArtworkCache::new(dir.join("art_cache.json"), CoverStyle::Plain);
        cache.set(key("a", "b"), bogus.clone());

        assert!(cache.get_image(&key("a", "b"), 10).is_err());
        assert_eq!(cache.get(&key("a", "b")), Some(bogus));

        let _ = fs::remove_dir_all(dir);
    }
}
