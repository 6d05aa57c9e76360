//! Media references and supported container types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

// ============================================================================
// Container MIME types
// ============================================================================

pub const AVI: &str = "video/x-msvideo";
pub const MP4: &str = "video/mp4";
pub const TS: &str = "video/mp2t";
pub const FLV: &str = "video/x-flv";
pub const THREE_GP: &str = "video/3gpp";
pub const MKV: &str = "video/x-matroska";
pub const WEBM: &str = "video/webm";

/// Containers the open dialog offers, with their file extensions.
pub const SUPPORTED_MIME_TYPES: &[(&str, &[&str])] = &[
    (AVI, &["avi"]),
    (MP4, &["mp4", "m4v", "mov"]),
    (TS, &["ts", "mts", "m2ts"]),
    (FLV, &["flv"]),
    (THREE_GP, &["3gp"]),
    (MKV, &["mkv"]),
    (WEBM, &["webm"]),
];

/// Filter preselected in the open dialog.
pub fn default_mime_type() -> &'static str {
    if cfg!(windows) {
        AVI
    } else {
        MP4
    }
}

/// Every extension across [`SUPPORTED_MIME_TYPES`].
pub fn supported_extensions() -> Vec<&'static str> {
    SUPPORTED_MIME_TYPES
        .iter()
        .flat_map(|(_, exts)| exts.iter().copied())
        .collect()
}

/// Extensions registered for a single MIME type.
pub fn extensions_for(mime: &str) -> &'static [&'static str] {
    SUPPORTED_MIME_TYPES
        .iter()
        .find(|(m, _)| *m == mime)
        .map(|(_, exts)| *exts)
        .unwrap_or(&[])
}

/// Container MIME type for a path, judged by extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_MIME_TYPES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(mime, _)| *mime)
}

// ============================================================================
// Media Reference
// ============================================================================

/// Opaque locator of a playable item: a plain path, a `file://` URI, or any
/// other URI a backend understands (`synthetic:` for test-pattern media).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    locator: String,
}

impl MediaReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(path.display().to_string())
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// URI scheme, if the locator is a URI rather than a bare path.
    ///
    /// Single-letter schemes are treated as Windows drive letters.
    pub fn scheme(&self) -> Option<String> {
        let url = Url::parse(&self.locator).ok()?;
        if url.scheme().len() > 1 {
            Some(url.scheme().to_string())
        } else {
            None
        }
    }

    /// Filesystem path for bare paths and `file://` URIs.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.scheme().as_deref() {
            None => Some(PathBuf::from(&self.locator)),
            Some("file") => Url::parse(&self.locator).ok()?.to_file_path().ok(),
            Some(_) => None,
        }
    }

    /// Short name for titles and status lines.
    pub fn display_name(&self) -> String {
        self.local_path()
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.locator.clone())
    }

    pub fn mime_type(&self) -> Option<&'static str> {
        self.local_path().as_deref().and_then(mime_for_path)
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator)
    }
}

impl From<&str> for MediaReference {
    fn from(locator: &str) -> Self {
        Self::new(locator)
    }
}

impl From<String> for MediaReference {
    fn from(locator: String) -> Self {
        Self::new(locator)
    }
}

impl From<PathBuf> for MediaReference {
    fn from(path: PathBuf) -> Self {
        Self::from_path(&path)
    }
}

// ============================================================================
// Stream classification
// ============================================================================

/// Elementary stream kind, judged from a negotiated media-type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    /// Subtitles, metadata and anything else the pipeline does not render
    Other,
}

impl StreamKind {
    pub fn from_caps(media_type: &str) -> Self {
        if media_type.starts_with("video/") {
            Self::Video
        } else if media_type.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_lookup() {
        assert_eq!(mime_for_path(Path::new("/movies/a.MP4")), Some(MP4));
        assert_eq!(mime_for_path(Path::new("clip.m2ts")), Some(TS));
        assert_eq!(mime_for_path(Path::new("clip.3gp")), Some(THREE_GP));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("noext")), None);
        assert!(supported_extensions().contains(&"flv"));
        assert_eq!(extensions_for(AVI), &["avi"]);
    }

    #[test]
    fn test_locator_kinds() {
        let plain = MediaReference::new("/tmp/movie.mkv");
        assert_eq!(plain.scheme(), None);
        assert_eq!(plain.local_path(), Some(PathBuf::from("/tmp/movie.mkv")));
        assert_eq!(plain.display_name(), "movie.mkv");
        assert_eq!(plain.mime_type(), Some(MKV));

        let synthetic = MediaReference::new("synthetic:5000");
        assert_eq!(synthetic.scheme().as_deref(), Some("synthetic"));
        assert_eq!(synthetic.local_path(), None);
        assert_eq!(synthetic.display_name(), "synthetic:5000");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_uri() {
        let uri = MediaReference::new("file:///tmp/a%20b.avi");
        assert_eq!(uri.local_path(), Some(PathBuf::from("/tmp/a b.avi")));
        assert_eq!(uri.display_name(), "a b.avi");
        assert_eq!(uri.mime_type(), Some(AVI));
    }

    #[test]
    fn test_stream_kind() {
        assert_eq!(StreamKind::from_caps("video/x-raw"), StreamKind::Video);
        assert_eq!(StreamKind::from_caps("audio/x-raw"), StreamKind::Audio);
        assert_eq!(StreamKind::from_caps("text/x-raw"), StreamKind::Other);
        assert_eq!(StreamKind::from_caps("application/x-id3"), StreamKind::Other);
    }
}
