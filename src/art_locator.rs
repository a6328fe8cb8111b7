//! Local artwork lookup.
//!
//! Probes a fixed, priority-ordered list of filesystem locations for the
//! artwork of one artist/album/directory triple. Nothing here caches or
//! decodes; the first existing candidate wins.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::{ArtworkConfig, PreferredLocation};
use crate::image_pipeline;
use crate::protocol::SongInfo;

/// Well-known cover filenames probed in the song directory after the fixed rules.
pub const MISC_ARTWORK_FILENAMES: [&str; 5] = [
    "front.jpg",
    ".folder.jpg",
    ".folder.png",
    "AlbumArt.jpg",
    "AlbumArtSmall.jpg",
];

/// Rule that produced a local artwork match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationRule {
    HomeCovers,
    Cover,
    Album,
    Folder,
    Custom,
    /// One of [`MISC_ARTWORK_FILENAMES`].
    Misc,
    /// The only image file in the song directory.
    LoneImage,
}

impl From<PreferredLocation> for LocationRule {
    fn from(value: PreferredLocation) -> Self {
        match value {
            PreferredLocation::HomeCovers => Self::HomeCovers,
            PreferredLocation::Cover => Self::Cover,
            PreferredLocation::Album => Self::Album,
            PreferredLocation::Folder => Self::Folder,
            PreferredLocation::Custom => Self::Custom,
        }
    }
}

/// Order in which the fixed single-file rules are tried after the preference.
const SIMPLE_LOCATIONS: [LocationRule; 4] = [
    LocationRule::HomeCovers,
    LocationRule::Cover,
    LocationRule::Album,
    LocationRule::Folder,
];

fn is_multicd_segment(segment: &str) -> bool {
    let lowered = segment.to_ascii_lowercase();
    let Some(rest) = lowered.strip_prefix("cd") else {
        return false;
    };
    rest.trim_start()
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_digit())
}

/// Goes one directory up for multi-disc albums.
///
/// `Artist/Album/CD 2` and `Artist/Album/cd1 - Y` both map to `Artist/Album`;
/// anything else is returned unchanged.
pub fn get_multicd_album_root_dir(album_path: &str) -> String {
    let path = Path::new(album_path);
    let is_multicd = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_multicd_segment);
    if !is_multicd {
        return album_path.to_string();
    }
    path.parent()
        .map(|parent| parent.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sanitize_name_part(value: Option<&str>) -> String {
    value.unwrap_or("").replace('/', "")
}

/// Single candidate path for one of the fixed-file rules.
///
/// Returns `None` for the directory-scanning rules and for the custom rule
/// when no custom filename is configured.
pub fn artwork_path_from_data(
    config: &ArtworkConfig,
    artist: Option<&str>,
    album: Option<&str>,
    song_dir: &str,
    rule: LocationRule,
) -> Option<PathBuf> {
    let song_folder = config
        .locations
        .music_dir
        .join(get_multicd_album_root_dir(song_dir));

    match rule {
        LocationRule::HomeCovers => Some(config.locations.covers_dir.join(format!(
            "{}-{}.jpg",
            sanitize_name_part(artist),
            sanitize_name_part(album)
        ))),
        LocationRule::Cover => Some(song_folder.join("cover.jpg")),
        LocationRule::Album => Some(song_folder.join("album.jpg")),
        LocationRule::Folder => Some(song_folder.join("folder.jpg")),
        LocationRule::Custom => {
            let filename = config.locations.custom_filename.trim();
            if filename.is_empty() {
                None
            } else {
                Some(song_folder.join(filename))
            }
        }
        LocationRule::Misc | LocationRule::LoneImage => None,
    }
}

pub fn artwork_stream_path(config: &ArtworkConfig, stream_name: &str) -> PathBuf {
    config
        .locations
        .covers_dir
        .join(format!("{}.jpg", stream_name.replace('/', "")))
}

/// Path the preferred rule would use for `song`; stream art for streams.
pub fn artwork_path(config: &ArtworkConfig, song: &SongInfo) -> Option<PathBuf> {
    if let Some(name) = song.name.as_deref() {
        return Some(artwork_stream_path(config, name));
    }
    artwork_path_from_data(
        config,
        song.artist.as_deref(),
        song.album.as_deref(),
        &song.song_dir(),
        config.locations.preferred_location.into(),
    )
}

/// Every fixed-rule path that may legitimately hold art for `song`.
pub fn candidate_paths_for_song(config: &ArtworkConfig, song: &SongInfo) -> Vec<PathBuf> {
    let song_dir = song.song_dir();
    [
        LocationRule::HomeCovers,
        LocationRule::Cover,
        LocationRule::Album,
        LocationRule::Folder,
        LocationRule::Custom,
    ]
    .into_iter()
    .filter_map(|rule| {
        artwork_path_from_data(
            config,
            song.artist.as_deref(),
            song.album.as_deref(),
            &song_dir,
            rule,
        )
    })
    .collect()
}

fn misc_image_in_dir(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    MISC_ARTWORK_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Returns the directory's image file when it is the only one there.
pub fn single_image_in_dir(dir: &Path) -> Option<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("ArtLocator: Failed to read directory {}: {}", dir.display(), err);
            return None;
        }
    };

    let mut found = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !image_pipeline::is_image_file(&path) {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(path);
    }
    found
}

/// Finds local artwork for the triple, or `None` when every rule misses.
pub fn find_local_image(
    config: &ArtworkConfig,
    artist: Option<&str>,
    album: Option<&str>,
    song_dir: &str,
) -> Option<(LocationRule, PathBuf)> {
    let path_for = |rule: LocationRule| artwork_path_from_data(config, artist, album, song_dir, rule);

    let preferred: LocationRule = config.locations.preferred_location.into();
    if let Some(candidate) = path_for(preferred).filter(|path| path.is_file()) {
        return Some((preferred, candidate));
    }

    for rule in SIMPLE_LOCATIONS {
        if let Some(candidate) = path_for(rule).filter(|path| path.is_file()) {
            return Some((rule, candidate));
        }
    }

    if preferred == LocationRule::Custom {
        if let Some(candidate) = path_for(LocationRule::Custom).filter(|path| path.is_file()) {
            return Some((LocationRule::Custom, candidate));
        }
    }

    let song_folder = config.locations.music_dir.join(song_dir);
    if let Some(candidate) = misc_image_in_dir(&song_folder) {
        return Some((LocationRule::Misc, candidate));
    }

    single_image_in_dir(&song_folder).map(|candidate| (LocationRule::LoneImage, candidate))
}
