//! Shared payloads exchanged between the artwork worker, the result pump and
//! the UI-facing artwork manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;

/// Identity of the artwork a song or library row wants to display.
///
/// This is both the cache key and the worker's deduplication key. Equality is
/// exact; [`ArtworkIdentity::matches_display`] is the looser comparison the UI
/// side uses when locating rows to update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Deserialize, serde::Serialize)]
pub struct ArtworkIdentity {
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Song directory relative to the music root.
    pub path: Option<String>,
}

impl ArtworkIdentity {
    pub fn new(artist: Option<&str>, album: Option<&str>, path: Option<&str>) -> Self {
        Self {
            artist: artist.map(str::to_string),
            album: album.map(str::to_string),
            path: path.map(str::to_string),
        }
    }

    pub fn artist_or_empty(&self) -> &str {
        self.artist.as_deref().unwrap_or("")
    }

    pub fn album_or_empty(&self) -> &str {
        self.album.as_deref().unwrap_or("")
    }

    /// Returns the song directory when the record has an addressable location.
    pub fn song_dir(&self) -> Option<&str> {
        self.path.as_deref().filter(|path| !path.is_empty())
    }

    /// Case-insensitive artist+album comparison used to match display rows.
    pub fn matches_display(&self, other: &ArtworkIdentity) -> bool {
        fold_eq(self.artist.as_deref(), other.artist.as_deref())
            && fold_eq(self.album.as_deref(), other.album.as_deref())
    }

    pub fn label(&self) -> String {
        format!(
            "{} - {} ({})",
            self.artist_or_empty(),
            self.album_or_empty(),
            self.path.as_deref().unwrap_or("<no path>")
        )
    }
}

fn fold_eq(left: Option<&str>, right: Option<&str>) -> bool {
    match (left, right) {
        (Some(left), Some(right)) => left.to_lowercase() == right.to_lowercase(),
        (None, None) => true,
        _ => false,
    }
}

/// Currently playing item as reported by the player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SongInfo {
    pub artist: Option<String>,
    pub album: Option<String>,
    /// File path relative to the music root.
    pub file: String,
    /// Set for radio streams; streams carry no album directory.
    pub name: Option<String>,
}

impl SongInfo {
    pub fn song(artist: Option<&str>, album: Option<&str>, file: &str) -> Self {
        Self {
            artist: artist.map(str::to_string),
            album: album.map(str::to_string),
            file: file.to_string(),
            name: None,
        }
    }

    pub fn stream(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn is_stream(&self) -> bool {
        self.name.is_some()
    }

    pub fn song_dir(&self) -> String {
        Path::new(&self.file)
            .parent()
            .map(|parent| parent.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn identity(&self) -> ArtworkIdentity {
        ArtworkIdentity {
            artist: Some(self.artist.clone().unwrap_or_default()),
            album: Some(self.album.clone().unwrap_or_default()),
            path: Some(self.song_dir()),
        }
    }
}

/// Where a resolved image should be applied; doubles as the request token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtworkTarget {
    /// Row index in the library view.
    LibraryRow(usize),
    /// The player's now-playing image.
    NowPlaying,
}

/// Resolution request submitted to the artwork worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkJob {
    pub identity: ArtworkIdentity,
    pub target: ArtworkTarget,
}

/// Resolved artwork posted back to the consumer thread.
#[derive(Debug, Clone)]
pub struct ArtworkResult {
    pub identity: ArtworkIdentity,
    /// Library-sized image built from `source`.
    pub image: DynamicImage,
    /// File the image was built from.
    pub source: PathBuf,
    /// Every target that asked for this identity while it was in flight.
    pub targets: Vec<ArtworkTarget>,
}

/// Notifications for UI collaborators, emitted on the consumer thread only.
#[derive(Debug, Clone)]
pub enum ArtworkEvent {
    Changed {
        image: Arc<DynamicImage>,
        source: PathBuf,
    },
    Reset,
}
