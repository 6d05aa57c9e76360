//! Media sources for the buffered engine
//!
//! A source answers two questions for the streaming thread: what streams
//! the media holds, and whether data at a given timestamp can be read right
//! now. Decoding is out of scope; buffers carry timing and size only.

use std::path::PathBuf;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::media::{mime_for_path, MediaReference};

/// Scheme of test-pattern locators, see [`SyntheticSource::parse`]
pub const SYNTHETIC_SCHEME: &str = "synthetic";

/// Bitrate assumed when estimating a file's duration from its size
const NOMINAL_BITRATE_BPS: u64 = 4_000_000;
const VIDEO_BITRATE_BPS: u64 = 3_800_000;
const AUDIO_BITRATE_BPS: u64 = 192_000;
const TEXT_BITRATE_BPS: u64 = 8_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Demuxer pad the stream appears on
    pub pad_name: String,
    /// Media-type name
    pub caps: String,
    pub bitrate_bps: u64,
}

impl StreamInfo {
    pub fn new(pad_name: &str, caps: &str, bitrate_bps: u64) -> Self {
        Self {
            pad_name: pad_name.to_string(),
            caps: caps.to_string(),
            bitrate_bps,
        }
    }

    /// Bytes covering `duration_ms` of this stream.
    pub fn bytes_for(&self, duration_ms: u64) -> u64 {
        (self.bitrate_bps * duration_ms / 8000).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub duration_ms: u64,
    pub streams: Vec<StreamInfo>,
}

pub trait MediaSource: Send {
    /// Read the container header.
    fn probe(&mut self) -> EngineResult<MediaInfo>;

    /// Whether data at `position_ms` is readable now.
    fn can_read(&self, position_ms: u64) -> bool;
}

/// Open the source a locator points at.
pub fn open_source(media: &MediaReference) -> EngineResult<Box<dyn MediaSource>> {
    if media.scheme().as_deref() == Some(SYNTHETIC_SCHEME) {
        return Ok(Box::new(SyntheticSource::parse(media.locator())?));
    }
    match media.local_path() {
        Some(path) => Ok(Box::new(FileSource::new(path))),
        None => Err(EngineError::Construction(format!(
            "no source element handles {}",
            media
        ))),
    }
}

// ============================================================================
// Synthetic
// ============================================================================

/// Test-pattern media: one video and one audio stream of fixed length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSource {
    duration_ms: u64,
    /// Reads at or past this point never complete, like a stalled disk
    stall_at_ms: Option<u64>,
    extra_streams: Vec<StreamInfo>,
}

impl SyntheticSource {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            stall_at_ms: None,
            extra_streams: Vec::new(),
        }
    }

    pub fn with_stall_at(mut self, position_ms: u64) -> Self {
        self.stall_at_ms = Some(position_ms);
        self
    }

    /// Add a stream beyond the default video and audio pair.
    pub fn with_stream(mut self, stream: StreamInfo) -> Self {
        self.extra_streams.push(stream);
        self
    }

    /// Parse `synthetic:<duration_ms>[?stall=<ms>][&text=<count>]`.
    ///
    /// `text` adds that many `text/x-raw` streams, the way a container with
    /// subtitle tracks announces them.
    pub fn parse(locator: &str) -> EngineResult<Self> {
        let invalid = || EngineError::Construction(format!("invalid synthetic locator {locator}"));
        let url = Url::parse(locator).map_err(|_| invalid())?;
        if url.scheme() != SYNTHETIC_SCHEME {
            return Err(invalid());
        }
        let duration_ms = url.path().trim().parse::<u64>().map_err(|_| invalid())?;

        let mut source = Self::new(duration_ms);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "stall" => {
                    source = source.with_stall_at(value.parse().map_err(|_| invalid())?);
                }
                "text" => {
                    let count: usize = value.parse().map_err(|_| invalid())?;
                    for _ in 0..count {
                        let pad = format!("src_{}", 2 + source.extra_streams.len());
                        source = source.with_stream(StreamInfo::new(&pad, "text/x-raw", TEXT_BITRATE_BPS));
                    }
                }
                _ => {}
            }
        }
        Ok(source)
    }
}

impl MediaSource for SyntheticSource {
    fn probe(&mut self) -> EngineResult<MediaInfo> {
        let mut streams = vec![
            StreamInfo::new("src_0", "video/x-raw", VIDEO_BITRATE_BPS),
            StreamInfo::new("src_1", "audio/x-raw", AUDIO_BITRATE_BPS),
        ];
        streams.extend(self.extra_streams.iter().cloned());
        Ok(MediaInfo {
            duration_ms: self.duration_ms,
            streams,
        })
    }

    fn can_read(&self, position_ms: u64) -> bool {
        self.stall_at_ms.map_or(true, |stall| position_ms < stall)
    }
}

// ============================================================================
// File
// ============================================================================

/// A local container file
///
/// Duration is estimated from the file size at a nominal bitrate.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl MediaSource for FileSource {
    fn probe(&mut self) -> EngineResult<MediaInfo> {
        let metadata = std::fs::metadata(&self.path).map_err(|e| {
            EngineError::Backend(format!(
                "Could not open resource for reading: {} ({})",
                self.path.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(EngineError::Backend(format!(
                "{} is not a file",
                self.path.display()
            )));
        }
        let mime = mime_for_path(&self.path).ok_or_else(|| {
            EngineError::Backend(format!(
                "Could not determine type of stream: {}",
                self.path.display()
            ))
        })?;
        tracing::debug!("{} is {} ({} bytes)", self.path.display(), mime, metadata.len());

        let duration_ms = (metadata.len() * 8 * 1000 / NOMINAL_BITRATE_BPS).max(1);
        Ok(MediaInfo {
            duration_ms,
            streams: vec![
                StreamInfo::new("src_0", "video/x-raw", VIDEO_BITRATE_BPS),
                StreamInfo::new("src_1", "audio/x-raw", AUDIO_BITRATE_BPS),
            ],
        })
    }

    fn can_read(&self, _position_ms: u64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_synthetic() {
        let source = SyntheticSource::parse("synthetic:60000?stall=30000").unwrap();
        assert_eq!(source, SyntheticSource::new(60000).with_stall_at(30000));
        assert!(source.can_read(29_999));
        assert!(!source.can_read(30_000));

        let mut source = SyntheticSource::parse("synthetic:1000?text=2").unwrap();
        let info = source.probe().unwrap();
        let pads: Vec<_> = info.streams.iter().map(|s| s.pad_name.as_str()).collect();
        assert_eq!(pads, ["src_0", "src_1", "src_2", "src_3"]);
        assert_eq!(info.streams[3].caps, "text/x-raw");

        assert!(SyntheticSource::parse("synthetic:1000?text=x").is_err());
        assert!(SyntheticSource::parse("synthetic:abc").is_err());
        assert!(SyntheticSource::parse("file:///a.mp4").is_err());
    }

    #[test]
    fn test_open_source_by_locator() {
        assert!(open_source(&MediaReference::new("synthetic:1000")).is_ok());
        assert!(open_source(&MediaReference::new("/media/a.mp4")).is_ok());
        let err = open_source(&MediaReference::new("rtsp://camera/live")).err().unwrap();
        assert!(err.is_construction());
    }

    #[test]
    fn test_file_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, vec![0u8; 500_000]).unwrap();

        let info = FileSource::new(path).probe().unwrap();
        assert_eq!(info.duration_ms, 1000);
        assert_eq!(info.streams.len(), 2);
    }

    #[test]
    fn test_file_probe_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSource::new(dir.path().join("absent.mp4")).probe().is_err());

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hello").unwrap();
        assert!(FileSource::new(text).probe().is_err());
    }

    #[test]
    fn test_bytes_for() {
        let stream = StreamInfo::new("src_0", "video/x-raw", 8_000_000);
        assert_eq!(stream.bytes_for(40), 40_000);
    }
}
