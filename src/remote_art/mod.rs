//! Remote cover providers and the fan-out that drives them.

pub mod theaudiodb;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use image::DynamicImage;
use log::{debug, info, warn};

use crate::config::{ArtworkConfig, CoverStyle};
use crate::image_pipeline::{self, REMOTE_THUMB_EDGE_PX};

/// Placeholder replaced by the image counter in collect-all destinations.
pub const IMAGE_NUMBER_PLACEHOLDER: &str = "<imagenum>";
/// Cap on accepted images when collecting every candidate.
pub const MAX_COLLECTED_IMAGES: usize = 50;

/// Interface implemented by remote cover sources.
///
/// A provider calls `on_save` once per candidate image with a readable stream
/// and stops as soon as it returns `false`. Failures are reported through
/// `on_error`, which returns `true` when the provider should stop.
pub trait CoverFetchProvider: Send + Sync {
    fn name(&self) -> &str;
    fn fetch_covers(
        &self,
        artist: &str,
        album: &str,
        on_save: &mut dyn FnMut(&mut dyn Read) -> bool,
        on_error: &mut dyn FnMut(&str) -> bool,
    ) -> Result<(), String>;
}

/// Ordered provider list registered at startup.
#[derive(Clone, Default)]
pub struct ArtworkProviders {
    providers: Vec<Arc<dyn CoverFetchProvider>>,
}

impl ArtworkProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in providers enabled by `config`.
    pub fn from_config(config: &ArtworkConfig) -> Self {
        let mut providers = Self::new();
        if config.remote.theaudiodb_enabled {
            providers.register(Arc::new(theaudiodb::TheAudioDbProvider::new(
                config.remote.request_timeout_ms,
            )));
        }
        providers
    }

    pub fn register(&mut self, provider: Arc<dyn CoverFetchProvider>) {
        info!("RemoteArt: Registered cover provider {}", provider.name());
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn CoverFetchProvider>> {
        self.providers.iter()
    }
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Walks the provider list until one of them yields artwork.
pub struct RemoteArtworkDownloader {
    providers: ArtworkProviders,
    style: CoverStyle,
    destination: PathBuf,
    max_images: usize,
    current: usize,
    saved: Vec<PathBuf>,
}

impl RemoteArtworkDownloader {
    /// `destination` is a fixed file in single-image mode, or a template
    /// containing [`IMAGE_NUMBER_PLACEHOLDER`] when `collect_all` is set.
    pub fn new(
        providers: ArtworkProviders,
        style: CoverStyle,
        destination: PathBuf,
        collect_all: bool,
    ) -> Self {
        Self {
            providers,
            style,
            destination,
            max_images: if collect_all { MAX_COLLECTED_IMAGES } else { 1 },
            current: 0,
            saved: Vec::new(),
        }
    }

    /// Files written and decoded successfully so far.
    pub fn saved(&self) -> &[PathBuf] {
        &self.saved
    }

    /// Runs the fan-out, reporting each accepted image through `output`.
    ///
    /// Returns the number of accepted images.
    pub fn fetch(
        &mut self,
        artist: &str,
        album: &str,
        should_stop: &dyn Fn() -> bool,
        output: &mut dyn FnMut(PathBuf, DynamicImage),
    ) -> usize {
        let providers = self.providers.clone();
        for provider in providers.iter() {
            info!(
                "RemoteArt: Looking for covers for {:?} from {:?} (using {})",
                album,
                artist,
                provider.name()
            );

            let outcome = {
                let mut on_save =
                    |content: &mut dyn Read| self.on_save(content, should_stop, &mut *output);
                let mut on_error = |reason: &str| {
                    debug!("RemoteArt: {} reported: {}", provider.name(), reason);
                    should_stop()
                };
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    provider.fetch_covers(artist, album, &mut on_save, &mut on_error)
                }))
            };
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    "RemoteArt: Error while downloading covers from {}: {}",
                    provider.name(),
                    err
                ),
                Err(payload) => warn!(
                    "RemoteArt: Provider {} panicked: {}",
                    provider.name(),
                    panic_payload_to_string(payload.as_ref())
                ),
            }

            if self.current > 0 || should_stop() {
                break;
            }
        }
        debug!("RemoteArt: Finished with {} image(s)", self.current);
        self.current
    }

    fn destination_for_next(&self) -> PathBuf {
        if self.max_images > 1 {
            let template = self.destination.to_string_lossy();
            PathBuf::from(template.replace(IMAGE_NUMBER_PLACEHOLDER, &(self.current + 1).to_string()))
        } else {
            self.destination.clone()
        }
    }

    /// Returns `true` to keep receiving candidates.
    fn on_save(
        &mut self,
        content: &mut dyn Read,
        should_stop: &dyn Fn() -> bool,
        output: &mut dyn FnMut(PathBuf, DynamicImage),
    ) -> bool {
        if self.current >= self.max_images || should_stop() {
            return false;
        }

        let path = self.destination_for_next();
        match write_stream(&path, content) {
            Ok(0) => {
                // An empty download must not turn into a "no artwork" marker.
                debug!("RemoteArt: Provider sent an empty cover for {}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    warn!("RemoteArt: Failed removing empty cover {}: {}", path.display(), err);
                }
                return !should_stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!("RemoteArt: Failed saving cover to {}: {}", path.display(), err);
                return !should_stop();
            }
        }

        match image_pipeline::render(&path, REMOTE_THUMB_EDGE_PX, self.style) {
            Ok(image) => {
                self.current += 1;
                debug!("RemoteArt: Found artwork {}", path.display());
                self.saved.push(path.clone());
                output(path, image);
            }
            Err(err) => {
                warn!("RemoteArt: Discarding undecodable cover {}: {}", path.display(), err);
                image_pipeline::discard_corrupt_image(&path);
            }
        }

        self.current < self.max_images && !should_stop()
    }
}

fn write_stream(path: &Path, content: &mut dyn Read) -> io::Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    io::copy(content, &mut file)
}

/// Background collect-all fetch, e.g. for a "choose artwork" dialog.
pub struct RemoteArtworkDownloaderWorker {
    stop_flag: Arc<AtomicBool>,
    results: Receiver<(PathBuf, DynamicImage)>,
}

impl RemoteArtworkDownloaderWorker {
    pub fn spawn(
        providers: ArtworkProviders,
        style: CoverStyle,
        artist: String,
        album: String,
        destination: PathBuf,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (results_tx, results) = mpsc::channel();
        let thread_stop_flag = Arc::clone(&stop_flag);
        let spawned = thread::Builder::new()
            .name("RemoteArtworkDownloaderThread".to_string())
            .spawn(move || {
                let mut downloader =
                    RemoteArtworkDownloader::new(providers, style, destination, true);
                let should_stop = || thread_stop_flag.load(Ordering::Relaxed);
                downloader.fetch(&artist, &album, &should_stop, &mut |path: PathBuf, image: DynamicImage| {
                    let _ = results_tx.send((path, image));
                });
            });
        if let Err(err) = spawned {
            warn!("RemoteArt: Failed to spawn downloader thread: {}", err);
        }
        Self { stop_flag, results }
    }

    /// Asks the providers to stop at their next callback.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn results(&self) -> &Receiver<(PathBuf, DynamicImage)> {
        &self.results
    }
}
