//! Consumer-side artwork coordinator.
//!
//! Owns everything the UI thread touches: the current song, the last
//! displayed cover, pending library submissions and the result pump. All
//! [`ArtworkEvent`]s are emitted from here, on the consumer thread.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use image::DynamicImage;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::art_cache::SharedArtworkCache;
use crate::art_locator::{self, LocationRule};
use crate::config::ArtworkConfig;
use crate::image_pipeline;
use crate::protocol::{
    ArtworkEvent, ArtworkIdentity, ArtworkJob, ArtworkResult, ArtworkTarget, SongInfo,
};
use crate::remote_art::{ArtworkProviders, RemoteArtworkDownloaderWorker, IMAGE_NUMBER_PLACEHOLDER};
use crate::result_pump::{self, LibraryArtworkView, LibrarySubmission, ResultPump};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Player status queried before any now-playing update is applied.
pub trait PlaybackState: Send + Sync {
    /// `true` while a song is playing or paused.
    fn is_playing(&self) -> bool;
}

pub struct ArtworkManager {
    config: ArtworkConfig,
    cache: SharedArtworkCache,
    jobs: Sender<ArtworkJob>,
    pump: ResultPump,
    events: broadcast::Sender<ArtworkEvent>,
    playback: Arc<dyn PlaybackState>,
    providers: ArtworkProviders,
    songinfo: Option<SongInfo>,
    last_album_art: Option<PathBuf>,
    submission: Option<LibrarySubmission>,
    /// Identities whose cache entry changed outside a worker result.
    rows_to_refresh: Vec<ArtworkIdentity>,
}

impl ArtworkManager {
    pub fn new(
        config: ArtworkConfig,
        cache: SharedArtworkCache,
        jobs: Sender<ArtworkJob>,
        pump: ResultPump,
        playback: Arc<dyn PlaybackState>,
        providers: ArtworkProviders,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            cache,
            jobs,
            pump,
            events,
            playback,
            providers,
            songinfo: None,
            last_album_art: None,
            submission: None,
            rows_to_refresh: Vec::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArtworkEvent> {
        self.events.subscribe()
    }

    pub fn update_songinfo(&mut self, song: Option<SongInfo>) {
        self.songinfo = song;
    }

    pub fn songinfo(&self) -> Option<&SongInfo> {
        self.songinfo.as_ref()
    }

    pub fn have_last(&self) -> bool {
        self.last_album_art.is_some()
    }

    pub fn last_artwork(&self) -> Option<&Path> {
        self.last_album_art.as_deref()
    }

    /// Refreshes the now-playing artwork for the current song.
    ///
    /// Cached art is shown immediately; anything else becomes a worker job
    /// whose result arrives through [`ArtworkManager::tick`].
    pub fn artwork_update(&mut self, force: bool) -> Result<(), String> {
        if !self.config.display.show_covers {
            return Ok(());
        }

        let song = match self.songinfo.clone() {
            Some(song) if self.playback.is_playing() => song,
            _ => {
                self.set_default_icon(None);
                return Ok(());
            }
        };

        if let Some(name) = song.name.as_deref() {
            self.show_stream_artwork(name);
            return Ok(());
        }

        if song.artist.is_none() && song.album.is_none() {
            self.set_default_icon(Some(&song.identity()));
            return Ok(());
        }

        let preferred = art_locator::artwork_path(&self.config, &song);
        if !force && preferred.is_some() && preferred == self.last_album_art {
            return Ok(());
        }

        let identity = song.identity();
        if !force {
            if let Some((image, source)) = self.cached_now_playing(&identity)? {
                self.show_now_playing(&identity, image, source);
                return Ok(());
            }
        }

        if self.last_album_art.is_some() {
            self.set_default_icon(None);
        }
        debug!("ArtworkManager: Requesting artwork for {}", identity.label());
        self.jobs
            .send(ArtworkJob {
                identity,
                target: ArtworkTarget::NowPlaying,
            })
            .map_err(|_| "artwork worker is not running".to_string())
    }

    fn cached_now_playing(
        &self,
        identity: &ArtworkIdentity,
    ) -> Result<Option<(DynamicImage, PathBuf)>, String> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| "artwork cache lock poisoned".to_string())?;
        let Some(source) = cache.get(identity) else {
            return Ok(None);
        };
        Ok(cache
            .get_image(identity, self.config.display.now_playing_size)?
            .map(|image| (image, source)))
    }

    fn show_stream_artwork(&mut self, name: &str) {
        let path = art_locator::artwork_stream_path(&self.config, name);
        if !path.is_file() {
            self.set_default_icon(None);
            return;
        }
        if self.last_album_art.as_deref() == Some(path.as_path()) {
            return;
        }
        match image_pipeline::render(
            &path,
            self.config.display.now_playing_size,
            self.config.display.cover_style,
        ) {
            Ok(image) => {
                debug!("ArtworkManager: Showing stream artwork {}", path.display());
                self.emit(ArtworkEvent::Changed {
                    image: Arc::new(image),
                    source: path.clone(),
                });
                self.last_album_art = Some(path);
            }
            Err(err) => {
                warn!(
                    "ArtworkManager: Unable to load stream artwork {}: {}",
                    path.display(),
                    err
                );
                image_pipeline::discard_corrupt_image(&path);
                self.set_default_icon(None);
            }
        }
    }

    /// Shows the placeholder for the now-playing slot.
    ///
    /// With an identity, the placeholder is also cached for it (when one is
    /// configured) so library rows stop asking for the same album.
    pub fn set_default_icon(&mut self, identity: Option<&ArtworkIdentity>) {
        self.emit(ArtworkEvent::Reset);
        self.last_album_art = None;

        let Some(identity) = identity else {
            return;
        };
        let Some(placeholder) = self.config.display.placeholder_image.clone() else {
            return;
        };
        match self.cache.lock() {
            Ok(mut cache) => cache.set(identity.clone(), placeholder),
            Err(_) => {
                warn!("ArtworkManager: Artwork cache lock poisoned, placeholder not cached");
                return;
            }
        }
        self.rows_to_refresh.push(identity.clone());
    }

    /// Drops the current song's artwork files and looks it up again.
    ///
    /// A zero-byte home-covers file is left behind so local rules stop
    /// matching until new art is chosen.
    pub fn reset_image(&mut self) -> Result<(), String> {
        let Some(song) = self.songinfo.clone() else {
            return Ok(());
        };

        if let Some(name) = song.name.as_deref() {
            remove_artwork_file(&art_locator::artwork_stream_path(&self.config, name));
        } else {
            let song_dir = song.song_dir();
            let preferred = art_locator::artwork_path(&self.config, &song);
            let home_covers = art_locator::artwork_path_from_data(
                &self.config,
                song.artist.as_deref(),
                song.album.as_deref(),
                &song_dir,
                LocationRule::HomeCovers,
            );
            if let Some(path) = preferred.as_deref() {
                remove_artwork_file(path);
            }
            if let Some(path) = home_covers.as_deref() {
                remove_artwork_file(path);
                if let Err(err) = write_empty_marker(path) {
                    warn!(
                        "ArtworkManager: Unable to write empty cover marker {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }

        info!("ArtworkManager: Artwork reset for {}", song.identity().label());
        self.last_album_art = None;
        self.artwork_update(true)
    }

    /// Queues every library row for artwork.
    pub fn library_artwork_init(&mut self, view: &dyn LibraryArtworkView) {
        self.library_artwork_update(view, 0, 0);
    }

    /// Queues the visible rows first, then the whole library.
    pub fn library_artwork_update(
        &mut self,
        view: &dyn LibraryArtworkView,
        visible_start: usize,
        visible_end: usize,
    ) {
        if !self.config.display.show_covers {
            return;
        }
        let submission = LibrarySubmission::new(
            view.row_count(),
            visible_start..visible_end,
            self.config.pump.submission_chunk,
        );
        debug!(
            "ArtworkManager: Queued {} library row(s) for artwork",
            submission.remaining()
        );
        self.submission = Some(submission);
    }

    pub fn has_pending_submission(&self) -> bool {
        self.submission.is_some()
    }

    /// Applies the cached artwork for `identity` to every matching row.
    pub fn library_set_image_for_current_song(
        &mut self,
        view: &mut dyn LibraryArtworkView,
        identity: &ArtworkIdentity,
    ) -> Result<usize, String> {
        if identity.artist.is_none() && identity.album.is_none() {
            return Ok(0);
        }
        let image = {
            let mut cache = self
                .cache
                .lock()
                .map_err(|_| "artwork cache lock poisoned".to_string())?;
            cache.get_image(identity, self.config.display.library_thumb_size)?
        };
        Ok(image
            .map(|image| result_pump::refresh_matching_rows(view, identity, &image))
            .unwrap_or(0))
    }

    /// One consumer turn: refreshes rows, advances the pending library
    /// submission by one chunk and drains one batch of worker results.
    ///
    /// Returns the number of results taken off the queue.
    pub fn tick(&mut self, view: &mut dyn LibraryArtworkView) -> Result<usize, String> {
        for identity in std::mem::take(&mut self.rows_to_refresh) {
            self.library_set_image_for_current_song(view, &identity)?;
        }

        self.advance_submission(view)?;

        let batch = self.pump.drain_batch();
        let drained = batch.len();
        for result in batch {
            ResultPump::apply_library_targets(view, &result);
            if result.targets.contains(&ArtworkTarget::NowPlaying) {
                self.apply_now_playing(view, &result);
            }
        }
        Ok(drained)
    }

    fn advance_submission(&mut self, view: &mut dyn LibraryArtworkView) -> Result<(), String> {
        let Some(submission) = self.submission.as_mut() else {
            return Ok(());
        };
        let cache = &self.cache;
        let size = self.config.display.library_thumb_size;
        let mut cached = |identity: &ArtworkIdentity| -> Result<Option<DynamicImage>, String> {
            let mut cache = cache
                .lock()
                .map_err(|_| "artwork cache lock poisoned".to_string())?;
            cache.get_image(identity, size)
        };

        let outcome = submission.advance(view, &mut cached, &self.jobs);
        if outcome.is_err() || submission.is_finished() {
            self.submission = None;
        }
        let submitted = outcome?;
        if submitted > 0 {
            debug!("ArtworkManager: Submitted {} library job(s)", submitted);
        }
        Ok(())
    }

    /// Whether `source` is a file that may hold art for `song`.
    fn source_belongs_to_song(&self, song: &SongInfo, source: &Path) -> bool {
        if art_locator::candidate_paths_for_song(&self.config, song)
            .iter()
            .any(|candidate| candidate == source)
        {
            return true;
        }
        // Misc and lone images are found directly in the song's folder.
        let song_folder = self.config.locations.music_dir.join(song.song_dir());
        source.parent() == Some(song_folder.as_path()) && image_pipeline::is_image_file(source)
    }

    fn apply_now_playing(&mut self, view: &mut dyn LibraryArtworkView, result: &ArtworkResult) {
        if !self.playback.is_playing() {
            debug!("ArtworkManager: Player stopped, dropping now-playing result");
            return;
        }
        let Some(song) = self.songinfo.clone().filter(|song| !song.is_stream()) else {
            return;
        };
        let identity = song.identity();
        if !identity.matches_display(&result.identity)
            || !self.source_belongs_to_song(&song, &result.source)
        {
            debug!(
                "ArtworkManager: Dropping stale now-playing result {}",
                result.source.display()
            );
            return;
        }

        match image_pipeline::render(
            &result.source,
            self.config.display.now_playing_size,
            self.config.display.cover_style,
        ) {
            Ok(image) => {
                match self.cache.lock() {
                    Ok(mut cache) => cache.set(identity.clone(), result.source.clone()),
                    Err(_) => warn!("ArtworkManager: Artwork cache lock poisoned"),
                }
                result_pump::refresh_matching_rows(view, &identity, &result.image);
                self.show_now_playing(&identity, image, result.source.clone());
            }
            Err(err) => {
                error!(
                    "ArtworkManager: Unable to load now-playing artwork {}: {}",
                    result.source.display(),
                    err
                );
                image_pipeline::discard_corrupt_image(&result.source);
            }
        }
    }

    fn show_now_playing(&mut self, identity: &ArtworkIdentity, image: DynamicImage, source: PathBuf) {
        debug!(
            "ArtworkManager: Now playing artwork for {} is {}",
            identity.label(),
            source.display()
        );
        self.emit(ArtworkEvent::Changed {
            image: Arc::new(image),
            source: source.clone(),
        });
        self.last_album_art = Some(source);
    }

    fn emit(&self, event: ArtworkEvent) {
        // No subscribers is fine: the headless runner may not listen.
        let _ = self.events.send(event);
    }

    pub fn save_cache(&self) -> Result<(), String> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| "artwork cache lock poisoned".to_string())?;
        cache.save()
    }

    /// Starts a collect-all remote fetch into the covers temp directory.
    pub fn choose_remote_artwork(&self, artist: &str, album: &str) -> RemoteArtworkDownloaderWorker {
        let destination = self
            .config
            .covers_temp_dir()
            .join(format!("{IMAGE_NUMBER_PLACEHOLDER}.jpg"));
        info!(
            "ArtworkManager: Fetching remote artwork choices for {:?} / {:?}",
            artist, album
        );
        RemoteArtworkDownloaderWorker::spawn(
            self.providers.clone(),
            self.config.display.cover_style,
            artist.to_string(),
            album.to_string(),
            destination,
        )
    }
}

fn remove_artwork_file(path: &Path) {
    if !path.exists() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!("ArtworkManager: Removed {}", path.display()),
        Err(err) => warn!("ArtworkManager: Unable to remove {}: {}", path.display(), err),
    }
}

fn write_empty_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::art_cache::ArtworkCache;
    use crate::config::CoverStyle;
    use crate::remote_art::test_support::{FakeBehavior, FakeProvider};
    use crate::result_pump::test_support::FakeLibraryView;
    use image::{GenericImageView, ImageBuffer, Rgb};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
    use tokio::sync::broadcast::error::TryRecvError;

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after UNIX_EPOCH")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "coverkeeper_manager_{}_{}_{}",
            test_name,
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    struct FakePlayback {
        playing: AtomicBool,
    }

    impl PlaybackState for FakePlayback {
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::Relaxed)
        }
    }

    struct ManagerHarness {
        root: PathBuf,
        config: ArtworkConfig,
        manager: ArtworkManager,
        playback: Arc<FakePlayback>,
        jobs: Receiver<ArtworkJob>,
        results: Sender<ArtworkResult>,
        events: broadcast::Receiver<ArtworkEvent>,
    }

    impl ManagerHarness {
        fn new(test_name: &str) -> Self {
            let root = unique_temp_dir(test_name);
            let mut config = ArtworkConfig::default();
            config.locations.music_dir = root.join("music");
            config.locations.covers_dir = root.join("covers");
            config.display.library_thumb_size = 16;
            config.display.now_playing_size = 32;
            config.display.cover_style = CoverStyle::Plain;
            config.pump.submission_chunk = 2;
            fs::create_dir_all(&config.locations.covers_dir).expect("covers dir");

            let cache = ArtworkCache::new(root.join("art_cache.json"), CoverStyle::Plain)
                .into_shared();
            let (jobs_tx, jobs) = mpsc::channel();
            let (results, results_rx) = mpsc::channel();
            let playback = Arc::new(FakePlayback {
                playing: AtomicBool::new(true),
            });
            let manager = ArtworkManager::new(
                config.clone(),
                cache,
                jobs_tx,
                ResultPump::new(results_rx, config.pump.batch_size),
                playback.clone(),
                ArtworkProviders::new(),
            );
            let events = manager.subscribe();
            Self {
                root,
                config,
                manager,
                playback,
                jobs,
                results,
                events,
            }
        }

        fn write_cover(&self, song_dir: &str, name: &str) -> PathBuf {
            let dir = self.config.locations.music_dir.join(song_dir);
            fs::create_dir_all(&dir).expect("album dir should be creatable");
            let path = dir.join(name);
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 40, Rgb([5, 5, 5])))
                .save(&path)
                .expect("cover should be writable");
            path
        }

        fn result(&self, song: &SongInfo, source: PathBuf, targets: Vec<ArtworkTarget>) -> ArtworkResult {
            ArtworkResult {
                identity: song.identity(),
                image: DynamicImage::ImageRgb8(ImageBuffer::from_pixel(16, 16, Rgb([5, 5, 5]))),
                source,
                targets,
            }
        }

        fn next_event(&mut self) -> Option<ArtworkEvent> {
            match self.events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
                Err(TryRecvError::Lagged(_)) => self.next_event(),
            }
        }
    }

    impl Drop for ManagerHarness {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    fn song() -> SongInfo {
        SongInfo::song(Some("Moonspell"), Some("Wolfheart"), "Moonspell/Wolfheart/01.flac")
    }

    #[test]
    fn test_artwork_update_submits_now_playing_job() {
        let mut harness = ManagerHarness::new("submit");
        harness.manager.update_songinfo(Some(song()));
        harness.manager.artwork_update(false).expect("update should succeed");

        let job = harness.jobs.try_recv().expect("job should be queued");
        assert_eq!(job.target, ArtworkTarget::NowPlaying);
        assert_eq!(job.identity, song().identity());
        assert!(harness.next_event().is_none());
    }

    #[test]
    fn test_artwork_update_without_playback_resets() {
        let mut harness = ManagerHarness::new("stopped");
        harness.playback.playing.store(false, Ordering::Relaxed);
        harness.manager.update_songinfo(Some(song()));
        harness.manager.artwork_update(false).expect("update should succeed");

        assert!(harness.jobs.try_recv().is_err());
        assert!(matches!(harness.next_event(), Some(ArtworkEvent::Reset)));
    }

    #[test]
    fn test_untagged_song_falls_back_to_default_icon() {
        let mut harness = ManagerHarness::new("untagged");
        harness
            .manager
            .update_songinfo(Some(SongInfo::song(None, None, "loose/track.flac")));
        harness.manager.artwork_update(false).expect("update should succeed");
        assert!(harness.jobs.try_recv().is_err());
        assert!(matches!(harness.next_event(), Some(ArtworkEvent::Reset)));
    }

    #[test]
    fn test_untagged_song_caches_placeholder_for_its_rows() {
        let mut harness = ManagerHarness::new("untagged_placeholder");
        let placeholder = harness.config.locations.covers_dir.join("placeholder.png");
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([0, 0, 0])))
            .save(&placeholder)
            .expect("placeholder should be writable");
        harness.manager.config.display.placeholder_image = Some(placeholder.clone());

        let untagged = SongInfo::song(None, None, "loose/track.flac");
        harness.manager.update_songinfo(Some(untagged.clone()));
        harness.manager.artwork_update(false).expect("update should succeed");

        assert!(harness.jobs.try_recv().is_err());
        assert!(matches!(harness.next_event(), Some(ArtworkEvent::Reset)));
        assert_eq!(
            harness
                .manager
                .cache
                .lock()
                .expect("cache lock")
                .get(&untagged.identity()),
            Some(placeholder)
        );

        let mut view = FakeLibraryView::with_rows(&[("", "", "loose"), ("A", "B", "A/B")]);
        harness.manager.tick(&mut view).expect("tick should succeed");
        assert_eq!(view.rows[0].image, Some((16, 16)));
        assert!(view.rows[1].image.is_none());
    }

    #[test]
    fn test_now_playing_result_is_applied_once_validated() {
        let mut harness = ManagerHarness::new("apply");
        let cover = harness.write_cover("Moonspell/Wolfheart", "cover.jpg");
        let mut view = FakeLibraryView::with_rows(&[
            ("moonspell", "WOLFHEART", "Moonspell/Wolfheart"),
            ("Opeth", "Damnation", "Opeth/Damnation"),
        ]);
        harness.manager.update_songinfo(Some(song()));
        harness
            .results
            .send(harness.result(&song(), cover.clone(), vec![ArtworkTarget::NowPlaying]))
            .expect("result channel should accept");

        assert_eq!(harness.manager.tick(&mut view), Ok(1));
        match harness.next_event() {
            Some(ArtworkEvent::Changed { image, source }) => {
                assert_eq!(source, cover);
                assert_eq!(image.dimensions(), (32, 32));
            }
            other => panic!("expected changed event, got {:?}", other),
        }
        assert_eq!(harness.manager.last_artwork(), Some(cover.as_path()));
        assert_eq!(view.updates, vec![0]);

        // Same art again is not re-requested.
        harness.manager.artwork_update(false).expect("update should succeed");
        assert!(harness.jobs.try_recv().is_err());
    }

    #[test]
    fn test_now_playing_result_for_previous_song_is_dropped() {
        let mut harness = ManagerHarness::new("stale");
        let old_song = SongInfo::song(Some("Opeth"), Some("Damnation"), "Opeth/Damnation/01.flac");
        let old_cover = harness.write_cover("Opeth/Damnation", "folder.jpg");
        let mut view = FakeLibraryView::default();

        harness.manager.update_songinfo(Some(old_song.clone()));
        harness.manager.artwork_update(false).expect("update should succeed");
        harness.manager.update_songinfo(Some(song()));
        harness
            .results
            .send(harness.result(&old_song, old_cover, vec![ArtworkTarget::NowPlaying]))
            .expect("result channel should accept");

        assert_eq!(harness.manager.tick(&mut view), Ok(1));
        assert!(harness.next_event().is_none());
        assert!(!harness.manager.have_last());
    }

    #[test]
    fn test_now_playing_result_from_foreign_path_is_dropped() {
        let mut harness = ManagerHarness::new("foreign");
        let elsewhere = harness.write_cover("Other/Place", "cover.jpg");
        let mut view = FakeLibraryView::default();
        harness.manager.update_songinfo(Some(song()));
        harness
            .results
            .send(harness.result(&song(), elsewhere, vec![ArtworkTarget::NowPlaying]))
            .expect("result channel should accept");

        assert_eq!(harness.manager.tick(&mut view), Ok(1));
        assert!(harness.next_event().is_none());
    }

    #[test]
    fn test_corrupt_now_playing_art_is_deleted() {
        let mut harness = ManagerHarness::new("corrupt");
        let dir = harness.config.locations.music_dir.join("Moonspell/Wolfheart");
        fs::create_dir_all(&dir).expect("album dir");
        let bogus = dir.join("front.jpg");
        fs::write(&bogus, b"garbage").expect("write should succeed");
        let mut view = FakeLibraryView::default();
        harness.manager.update_songinfo(Some(song()));
        harness
            .results
            .send(harness.result(&song(), bogus.clone(), vec![ArtworkTarget::NowPlaying]))
            .expect("result channel should accept");

        assert_eq!(harness.manager.tick(&mut view), Ok(1));
        assert!(!bogus.exists());
        assert!(harness.next_event().is_none());
    }

    #[test]
    fn test_cached_art_is_shown_without_a_job() {
        let mut harness = ManagerHarness::new("cached");
        let cover = harness.write_cover("Moonspell/Wolfheart", "album.jpg");
        harness
            .manager
            .cache
            .lock()
            .expect("cache lock")
            .set(song().identity(), cover.clone());

        harness.manager.update_songinfo(Some(song()));
        harness.manager.artwork_update(false).expect("update should succeed");
        assert!(harness.jobs.try_recv().is_err());
        assert!(matches!(
            harness.next_event(),
            Some(ArtworkEvent::Changed { source, .. }) if source == cover
        ));
    }

    #[test]
    fn test_corrupt_cached_art_is_an_error() {
        let mut harness = ManagerHarness::new("cached_corrupt");
        let bogus = harness.config.locations.covers_dir.join("bogus.jpg");
        fs::write(&bogus, b"garbage").expect("write should succeed");
        harness
            .manager
            .cache
            .lock()
            .expect("cache lock")
            .set(song().identity(), bogus);

        harness.manager.update_songinfo(Some(song()));
        assert!(harness.manager.artwork_update(false).is_err());
    }

    #[test]
    fn test_stream_art_is_rendered_directly() {
        let mut harness = ManagerHarness::new("stream");
        let stream_art = art_locator::artwork_stream_path(&harness.config, "Radio Caroline");
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(10, 10, Rgb([1, 1, 1])))
            .save(&stream_art)
            .expect("stream art should be writable");

        harness
            .manager
            .update_songinfo(Some(SongInfo::stream("Radio Caroline")));
        harness.manager.artwork_update(false).expect("update should succeed");
        assert!(harness.jobs.try_recv().is_err());
        assert!(matches!(
            harness.next_event(),
            Some(ArtworkEvent::Changed { source, .. }) if source == stream_art
        ));

        harness
            .manager
            .update_songinfo(Some(SongInfo::stream("Unknown FM")));
        harness.manager.artwork_update(false).expect("update should succeed");
        assert!(matches!(harness.next_event(), Some(ArtworkEvent::Reset)));
    }

    #[test]
    fn test_reset_image_leaves_empty_marker_and_requeues() {
        let mut harness = ManagerHarness::new("reset");
        let home_cover = harness
            .config
            .locations
            .covers_dir
            .join("Moonspell-Wolfheart.jpg");
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(10, 10, Rgb([1, 1, 1])))
            .save(&home_cover)
            .expect("cover should be writable");

        harness.manager.update_songinfo(Some(song()));
        harness.manager.reset_image().expect("reset should succeed");

        let metadata = fs::metadata(&home_cover).expect("marker should exist");
        assert_eq!(metadata.len(), 0);
        let job = harness.jobs.try_recv().expect("forced update should queue a job");
        assert_eq!(job.target, ArtworkTarget::NowPlaying);
    }

    #[test]
    fn test_default_icon_with_identity_caches_placeholder() {
        let mut harness = ManagerHarness::new("placeholder");
        let placeholder = harness.config.locations.covers_dir.join("placeholder.png");
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([0, 0, 0])))
            .save(&placeholder)
            .expect("placeholder should be writable");
        harness.manager.config.display.placeholder_image = Some(placeholder.clone());

        let identity = song().identity();
        harness.manager.set_default_icon(Some(&identity));
        assert!(matches!(harness.next_event(), Some(ArtworkEvent::Reset)));
        assert_eq!(
            harness.manager.cache.lock().expect("cache lock").get(&identity),
            Some(placeholder)
        );

        let mut view = FakeLibraryView::with_rows(&[("Moonspell", "Wolfheart", "Moonspell/Wolfheart")]);
        harness.manager.tick(&mut view).expect("tick should succeed");
        assert_eq!(view.rows[0].image, Some((16, 16)));
    }

    #[test]
    fn test_library_submission_is_chunked_across_ticks() {
        let mut harness = ManagerHarness::new("chunked");
        let mut view = FakeLibraryView::with_rows(&[
            ("A", "1", "A/1"),
            ("B", "2", "B/2"),
            ("C", "3", "C/3"),
            ("D", "4", "D/4"),
            ("E", "5", "E/5"),
        ]);
        harness.manager.library_artwork_update(&view, 3, 5);
        assert!(harness.manager.has_pending_submission());

        harness.manager.tick(&mut view).expect("tick should succeed");
        let first: Vec<ArtworkTarget> = harness.jobs.try_iter().map(|job| job.target).collect();
        assert_eq!(
            first,
            vec![ArtworkTarget::LibraryRow(3), ArtworkTarget::LibraryRow(4)]
        );

        harness.manager.tick(&mut view).expect("tick should succeed");
        harness.manager.tick(&mut view).expect("tick should succeed");
        assert!(!harness.manager.has_pending_submission());
        let rest: Vec<ArtworkTarget> = harness.jobs.try_iter().map(|job| job.target).collect();
        assert_eq!(
            rest,
            vec![
                ArtworkTarget::LibraryRow(0),
                ArtworkTarget::LibraryRow(1),
                ArtworkTarget::LibraryRow(2),
            ]
        );
    }

    #[test]
    fn test_save_cache_persists_resolved_entries() {
        let mut harness = ManagerHarness::new("save");
        let cover = harness.write_cover("Moonspell/Wolfheart", "cover.jpg");
        let mut view = FakeLibraryView::default();
        harness.manager.update_songinfo(Some(song()));
        harness
            .results
            .send(harness.result(&song(), cover.clone(), vec![ArtworkTarget::NowPlaying]))
            .expect("result channel should accept");
        harness.manager.tick(&mut view).expect("tick should succeed");
        harness.manager.save_cache().expect("save should succeed");

        let mut reloaded =
            ArtworkCache::new(harness.root.join("art_cache.json"), CoverStyle::Plain);
        reloaded.load().expect("load should succeed");
        assert_eq!(reloaded.get(&song().identity()), Some(cover));
    }

    #[test]
    fn test_choose_remote_artwork_collects_into_temp_dir() {
        let mut harness = ManagerHarness::new("choose");
        let mut providers = ArtworkProviders::new();
        providers.register(FakeProvider::new("first", FakeBehavior::Images(3)));
        harness.manager.providers = providers;

        let worker = harness.manager.choose_remote_artwork("Moonspell", "Wolfheart");
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < 3 && Instant::now() < deadline {
            if let Ok((path, _image)) = worker.results().recv_timeout(Duration::from_millis(50)) {
                received.push(path);
            }
        }
        worker.stop();

        let temp_dir = harness.config.covers_temp_dir();
        assert_eq!(
            received,
            vec![
                temp_dir.join("1.jpg"),
                temp_dir.join("2.jpg"),
                temp_dir.join("3.jpg"),
            ]
        );
    }
}
