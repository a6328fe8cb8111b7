use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::DynamicImage;
use log::{debug, info, warn};
use tokio::sync::broadcast::error::TryRecvError;

use coverkeeper::art_cache::ArtworkCache;
use coverkeeper::art_worker::ArtworkUpdateWorker;
use coverkeeper::artwork_manager::{ArtworkManager, PlaybackState};
use coverkeeper::config::{self, ArtworkConfig};
use coverkeeper::protocol::{ArtworkEvent, ArtworkIdentity, SongInfo};
use coverkeeper::remote_art::ArtworkProviders;
use coverkeeper::result_pump::{LibraryArtworkView, ResultPump};

const USAGE: &str = "usage:
  coverkeeper [--config FILE] song <file> [artist] [album]
  coverkeeper [--config FILE] library <dir>...
  coverkeeper [--config FILE] choose <artist> <album>";

const LOCAL_RESOLVE_WAIT: Duration = Duration::from_secs(3);
const CHOOSE_WAIT: Duration = Duration::from_secs(30);

enum Command {
    Song(SongInfo),
    Library(Vec<String>),
    Choose { artist: String, album: String },
}

struct CliArgs {
    config_file: PathBuf,
    command: Command,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut config_file = config::default_config_file();
    let mut rest: Vec<String> = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config requires a file".to_string())?;
            config_file = PathBuf::from(value);
        } else {
            rest.push(arg);
        }
    }

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        Some("song") => {
            let file = rest.next().ok_or_else(|| "song requires a file".to_string())?;
            let artist = rest.next();
            let album = rest.next();
            Command::Song(SongInfo::song(artist.as_deref(), album.as_deref(), &file))
        }
        Some("library") => {
            let dirs: Vec<String> = rest.collect();
            if dirs.is_empty() {
                return Err("library requires at least one directory".to_string());
            }
            Command::Library(dirs)
        }
        Some("choose") => match (rest.next(), rest.next()) {
            (Some(artist), Some(album)) => Command::Choose { artist, album },
            _ => return Err("choose requires an artist and an album".to_string()),
        },
        _ => return Err(USAGE.to_string()),
    };
    Ok(CliArgs {
        config_file,
        command,
    })
}

/// The headless runner is always "playing" the song it was asked about.
struct AlwaysPlaying;

impl PlaybackState for AlwaysPlaying {
    fn is_playing(&self) -> bool {
        true
    }
}

/// Library rows derived from `artist/album` directory names.
struct HeadlessLibrary {
    rows: Vec<(ArtworkIdentity, Option<(u32, u32)>)>,
}

impl HeadlessLibrary {
    fn from_dirs(dirs: &[String]) -> Self {
        let rows = dirs
            .iter()
            .map(|dir| {
                let trimmed = dir.trim_matches('/');
                let mut parts = trimmed.rsplitn(2, '/');
                let album = parts.next();
                let artist = parts.next();
                (ArtworkIdentity::new(artist, album, Some(trimmed)), None)
            })
            .collect();
        Self { rows }
    }

    fn resolved(&self) -> usize {
        self.rows.iter().filter(|(_, image)| image.is_some()).count()
    }
}

impl LibraryArtworkView for HeadlessLibrary {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row_identity(&self, row: usize) -> Option<ArtworkIdentity> {
        self.rows.get(row).map(|(identity, _)| identity.clone())
    }

    fn row_shows_placeholder(&self, row: usize) -> bool {
        self.rows.get(row).is_some_and(|(_, image)| image.is_none())
    }

    fn set_row_image(&mut self, row: usize, image: &DynamicImage) {
        if let Some((identity, slot)) = self.rows.get_mut(row) {
            info!(
                "Row {} ({}): artwork {}x{}",
                row,
                identity.label(),
                image.width(),
                image.height()
            );
            *slot = Some((image.width(), image.height()));
        }
    }
}

fn resolve_wait(config: &ArtworkConfig) -> Duration {
    if config.remote.fallback_enabled {
        LOCAL_RESOLVE_WAIT + Duration::from_millis(u64::from(config.remote.request_timeout_ms) * 2)
    } else {
        LOCAL_RESOLVE_WAIT
    }
}

fn run_song(
    manager: &mut ArtworkManager,
    config: &ArtworkConfig,
    song: SongInfo,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = manager.subscribe();
    let mut library = HeadlessLibrary { rows: Vec::new() };
    manager.update_songinfo(Some(song));
    manager.artwork_update(false)?;

    let interval = Duration::from_millis(u64::from(config.pump.interval_ms));
    let deadline = Instant::now() + resolve_wait(config);
    loop {
        match events.try_recv() {
            Ok(ArtworkEvent::Changed { image, source }) => {
                info!(
                    "Now playing artwork: {} ({}x{})",
                    source.display(),
                    image.width(),
                    image.height()
                );
                return Ok(());
            }
            Ok(ArtworkEvent::Reset) => debug!("Now playing artwork reset"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Closed) => break,
        }
        if Instant::now() >= deadline {
            break;
        }
        manager.tick(&mut library)?;
        thread::sleep(interval);
    }
    info!("No artwork found, keeping the default icon");
    Ok(())
}

fn run_library(
    manager: &mut ArtworkManager,
    config: &ArtworkConfig,
    dirs: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut library = HeadlessLibrary::from_dirs(dirs);
    manager.library_artwork_init(&library);

    let interval = Duration::from_millis(u64::from(config.pump.interval_ms));
    let mut deadline = Instant::now() + resolve_wait(config);
    while Instant::now() < deadline && library.resolved() < library.row_count() {
        if manager.has_pending_submission() {
            deadline = Instant::now() + resolve_wait(config);
        }
        manager.tick(&mut library)?;
        thread::sleep(interval);
    }
    info!(
        "Library artwork: {} of {} row(s) resolved",
        library.resolved(),
        library.row_count()
    );
    Ok(())
}

fn run_choose(manager: &ArtworkManager, artist: &str, album: &str) {
    let worker = manager.choose_remote_artwork(artist, album);
    let deadline = Instant::now() + CHOOSE_WAIT;
    let mut found = 0usize;
    while Instant::now() < deadline {
        match worker.results().recv_timeout(Duration::from_millis(250)) {
            Ok((path, image)) => {
                found += 1;
                info!(
                    "Candidate {}: {} ({}x{})",
                    found,
                    path.display(),
                    image.width(),
                    image.height()
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    worker.stop();
    info!("Remote search finished with {} candidate(s)", found);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Trace);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = config::sanitize_config(config::load_or_create_config(&args.config_file));
    log::set_max_level(config.log_level_filter());

    let mut cache = ArtworkCache::new(config.cache_path.clone(), config.display.cover_style);
    if cache.load().is_ok() {
        info!("Loaded {} cached artwork entries", cache.len());
    }
    let cache = cache.into_shared();
    let providers = ArtworkProviders::from_config(&config);

    let (jobs_tx, jobs_rx) = mpsc::channel();
    let (results_tx, results_rx) = mpsc::channel();
    ArtworkUpdateWorker::new(
        jobs_rx,
        results_tx,
        config.clone(),
        cache.clone(),
        providers.clone(),
    )
    .spawn()?;

    let mut manager = ArtworkManager::new(
        config.clone(),
        cache,
        jobs_tx,
        ResultPump::new(results_rx, config.pump.batch_size),
        Arc::new(AlwaysPlaying),
        providers,
    );

    match args.command {
        Command::Song(song) => run_song(&mut manager, &config, song)?,
        Command::Library(dirs) => run_library(&mut manager, &config, &dirs)?,
        Command::Choose { artist, album } => run_choose(&manager, &artist, &album),
    }

    if let Err(err) = manager.save_cache() {
        warn!("Artwork cache not saved: {}", err);
    }
    Ok(())
}
