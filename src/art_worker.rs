//! Background artwork resolution worker.
//!
//! One dedicated thread consumes [`ArtworkJob`]s, resolves each identity
//! locally (and, when the policy allows, through the remote providers), and
//! posts an [`ArtworkResult`] for the consumer thread to validate and apply.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use image::DynamicImage;
use log::{debug, info, warn};

use crate::art_cache::SharedArtworkCache;
use crate::art_locator::{self, LocationRule};
use crate::config::ArtworkConfig;
use crate::image_pipeline;
use crate::protocol::{ArtworkIdentity, ArtworkJob, ArtworkResult, ArtworkTarget};
use crate::remote_art::{ArtworkProviders, RemoteArtworkDownloader};

/// How a job finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    ResolvedLocal,
    ResolvedRemote,
    NotFound,
}

pub struct ArtworkUpdateWorker {
    jobs: Receiver<ArtworkJob>,
    results: Sender<ArtworkResult>,
    config: ArtworkConfig,
    cache: SharedArtworkCache,
    providers: ArtworkProviders,
    pending: VecDeque<ArtworkIdentity>,
    /// Identities accepted but not yet completed, with every target waiting on them.
    in_process: HashMap<ArtworkIdentity, Vec<ArtworkTarget>>,
    disconnected: bool,
}

impl ArtworkUpdateWorker {
    pub fn new(
        jobs: Receiver<ArtworkJob>,
        results: Sender<ArtworkResult>,
        config: ArtworkConfig,
        cache: SharedArtworkCache,
        providers: ArtworkProviders,
    ) -> Self {
        Self {
            jobs,
            results,
            config,
            cache,
            providers,
            pending: VecDeque::new(),
            in_process: HashMap::new(),
            disconnected: false,
        }
    }

    /// Starts the detached worker thread.
    pub fn spawn(mut self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("ArtworkUpdateWorker".to_string())
            .spawn(move || self.run())
    }

    /// Blocking job loop; returns once the job sender is gone and the backlog is empty.
    pub fn run(&mut self) {
        info!("ArtWorker: started");
        loop {
            if self.pending.is_empty() {
                if self.disconnected {
                    break;
                }
                match self.jobs.recv() {
                    Ok(job) => self.accept(job),
                    Err(_) => break,
                }
                continue;
            }

            self.drain_jobs_nonblocking();
            let Some(identity) = self.pending.pop_front() else {
                continue;
            };
            let outcome = self.resolve(&identity);
            debug!("ArtWorker: {} -> {:?}", identity.label(), outcome);
            self.complete(&identity, outcome);
        }
        info!("ArtWorker: job queue closed, exiting");
    }

    /// Clears the in-flight marker for `identity`.
    ///
    /// After a miss, duplicates queued during the lookup are dropped with it.
    /// After a hit they stay queued: the result has already been sent, so
    /// they are resolved again rather than merged into it.
    fn complete(&mut self, identity: &ArtworkIdentity, outcome: ResolutionOutcome) {
        if outcome == ResolutionOutcome::NotFound {
            self.drain_jobs_nonblocking();
        }
        self.in_process.remove(identity);
    }

    fn drain_jobs_nonblocking(&mut self) {
        loop {
            match self.jobs.try_recv() {
                Ok(job) => self.accept(job),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
    }

    fn accept(&mut self, job: ArtworkJob) {
        // Untagged entries and streams have no album directory to search.
        if job.identity.song_dir().is_none() {
            debug!("ArtWorker: Dropping job without path {}", job.identity.label());
            return;
        }
        if let Some(targets) = self.in_process.get_mut(&job.identity) {
            debug!(
                "ArtWorker: {} already in flight, dropping duplicate",
                job.identity.label()
            );
            if !targets.contains(&job.target) {
                targets.push(job.target);
            }
            return;
        }
        self.in_process
            .insert(job.identity.clone(), vec![job.target]);
        self.pending.push_back(job.identity);
    }

    fn resolve(&mut self, identity: &ArtworkIdentity) -> ResolutionOutcome {
        if self.find_local(identity) {
            return ResolutionOutcome::ResolvedLocal;
        }
        if self.config.remote.fallback_enabled
            && !self.providers.is_empty()
            && self.find_remote(identity)
        {
            return ResolutionOutcome::ResolvedRemote;
        }
        ResolutionOutcome::NotFound
    }

    fn find_local(&mut self, identity: &ArtworkIdentity) -> bool {
        let Some(song_dir) = identity.song_dir() else {
            return false;
        };
        let Some((rule, cover_file)) = art_locator::find_local_image(
            &self.config,
            identity.artist.as_deref(),
            identity.album.as_deref(),
            song_dir,
        ) else {
            debug!("ArtWorker: No local artwork for {}", identity.label());
            return false;
        };

        let Some(image) = self.build_image(&cover_file) else {
            return false;
        };
        debug!(
            "ArtWorker: Found local artwork '{}' ({:?}) for {}",
            cover_file.display(),
            rule,
            identity.label()
        );
        self.publish(identity, image, cover_file);
        true
    }

    fn remote_destination(&self, identity: &ArtworkIdentity) -> Option<PathBuf> {
        let song_dir = identity.song_dir()?;
        let artist = identity.artist.as_deref();
        let album = identity.album.as_deref();
        art_locator::artwork_path_from_data(
            &self.config,
            artist,
            album,
            song_dir,
            self.config.locations.preferred_location.into(),
        )
        .or_else(|| {
            art_locator::artwork_path_from_data(
                &self.config,
                artist,
                album,
                song_dir,
                LocationRule::HomeCovers,
            )
        })
    }

    fn find_remote(&mut self, identity: &ArtworkIdentity) -> bool {
        let Some(destination) = self.remote_destination(identity) else {
            return false;
        };
        if is_empty_marker(&destination) {
            debug!(
                "ArtWorker: {} is marked as having no artwork, skipping remote lookup",
                identity.label()
            );
            return false;
        }
        let mut downloader = RemoteArtworkDownloader::new(
            self.providers.clone(),
            self.config.display.cover_style,
            destination.clone(),
            false,
        );
        let found = downloader.fetch(
            identity.artist_or_empty(),
            identity.album_or_empty(),
            &|| false,
            &mut |_path: PathBuf, _image: DynamicImage| {},
        );
        if found == 0 {
            debug!("ArtWorker: No remote artwork for {}", identity.label());
            return false;
        }

        let Some(image) = self.build_image(&destination) else {
            return false;
        };
        debug!(
            "ArtWorker: Found remote artwork '{}' for {}",
            destination.display(),
            identity.label()
        );
        self.publish(identity, image, destination);
        true
    }

    /// Renders a library-sized image; corrupt files are deleted and count as a miss.
    fn build_image(&self, cover_file: &Path) -> Option<DynamicImage> {
        match image_pipeline::render(
            cover_file,
            self.config.display.library_thumb_size,
            self.config.display.cover_style,
        ) {
            Ok(image) => Some(image),
            Err(err) => {
                warn!(
                    "ArtWorker: Unable to load image from '{}': {}",
                    cover_file.display(),
                    err
                );
                image_pipeline::discard_corrupt_image(cover_file);
                None
            }
        }
    }

    fn publish(&mut self, identity: &ArtworkIdentity, image: DynamicImage, source: PathBuf) {
        match self.cache.lock() {
            Ok(mut cache) => cache.set(identity.clone(), source.clone()),
            Err(_) => warn!("ArtWorker: Artwork cache lock poisoned, skipping cache update"),
        }

        // Pick up late duplicates so their targets ride along with this result.
        self.drain_jobs_nonblocking();
        let targets = self.in_process.get(identity).cloned().unwrap_or_default();
        let result = ArtworkResult {
            identity: identity.clone(),
            image,
            source,
            targets,
        };
        if self.results.send(result).is_err() {
            debug!("ArtWorker: Result consumer is gone, dropping result");
        }
    }
}

fn is_empty_marker(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|metadata| metadata.is_file() && metadata.len() == 0)
}
