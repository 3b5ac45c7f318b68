//! Maps logical URL paths onto files under the document root.
//!
//! The site is a tree of extension-less pretty URLs, a handful of static
//! asset types, and a client-rendered viewer for historical versions. The
//! resolver turns all three into plain file paths for [`crate::static_files`].

use percent_encoding::percent_decode_str;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.html";

/// Extensions the site actually ships. Any other dotted name is a pretty URL.
pub const KNOWN_EXTENSIONS: &[&str] = &[
    "html", "pdf", "jpg", "svg", "png", "gif", "css", "js", "mustache", "json", "bulk", "map",
    "ttf", "eot", "woff", "woff2",
];

/// Single-segment shorthands served by the historical-versions shell.
pub const HISTORICAL_PREFIXES: &[&str] = &["_publication", "_date", "_compare"];

/// Discards the query string, then the fragment.
pub fn strip_query_and_fragment(path: &str) -> &str {
    let path = path.split_once('?').map_or(path, |(head, _)| head);
    path.split_once('#').map_or(path, |(head, _)| head)
}

/// A request path reduced to safe segments joined under the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    segments: Vec<Vec<u8>>,
    trailing_slash: bool,
    relative: PathBuf,
}

impl Candidate {
    pub fn trailing_slash(&self) -> bool {
        self.trailing_slash
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn is_historical(&self) -> bool {
        match self.segments.as_slice() {
            [only] => HISTORICAL_PREFIXES
                .iter()
                .any(|prefix| only.starts_with(prefix.as_bytes())),
            _ => false,
        }
    }

    fn has_known_extension(&self) -> bool {
        let Some(last) = self.segments.last() else {
            return false;
        };
        match last.iter().rposition(|b| *b == b'.') {
            Some(dot) => {
                let ext = &last[dot + 1..];
                KNOWN_EXTENSIONS.iter().any(|known| known.as_bytes() == ext)
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    static_assets_dir: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>, static_assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            static_assets_dir: static_assets_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn static_assets_dir(&self) -> &Path {
        &self.static_assets_dir
    }

    /// Resolves a raw request path to a local file path. The result always
    /// lies under the document root or the static-assets directory, and may
    /// not exist.
    pub fn resolve(&self, logical_path: &str) -> PathBuf {
        match Self::candidate(logical_path) {
            Some(candidate) => self.resolve_candidate(&candidate),
            None => self.root.join(INDEX_FILE),
        }
    }

    /// Sanitizes a request path into segments. `None` when nothing is left,
    /// i.e. the request is for the root itself.
    pub fn candidate(logical_path: &str) -> Option<Candidate> {
        // The tree stores colon-bearing names with tildes.
        let path = strip_query_and_fragment(logical_path).replace(':', "~");
        let decoded: Vec<u8> = percent_decode_str(&path).collect();
        let trailing_slash = decoded.trim_ascii_end().ends_with(b"/");
        let segments = normalize_segments(&decoded);
        if segments.is_empty() {
            return None;
        }

        let relative = segments.iter().map(|s| segment_to_os(s)).collect::<PathBuf>();
        Some(Candidate {
            segments,
            trailing_slash,
            relative,
        })
    }

    pub fn resolve_candidate(&self, candidate: &Candidate) -> PathBuf {
        let path = self.root.join(candidate.relative());

        if candidate.is_historical() {
            if path.is_file() {
                return path;
            }
            return self.static_assets_dir.join(INDEX_FILE);
        }

        if path.is_file() {
            return path;
        }

        if !candidate.trailing_slash() && !candidate.has_known_extension() {
            let html = with_html_suffix(&path);
            // `/guide` prefers guide.html over guide/index.html.
            if html.is_file() || !path.is_dir() {
                return html;
            }
        }

        if path.is_dir() {
            return path.join(INDEX_FILE);
        }

        let overlay = self.static_assets_dir.join(candidate.relative());
        if overlay.is_file() {
            return overlay;
        }

        path
    }
}

/// POSIX normalization over raw bytes. `..` never climbs above the root and
/// names a filesystem could read as a separator or drive are dropped.
fn normalize_segments(decoded: &[u8]) -> Vec<Vec<u8>> {
    let mut segments: Vec<Vec<u8>> = Vec::new();
    for segment in decoded.split(|b| *b == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            s if s.contains(&b'\\') || s.contains(&0) => {}
            s => segments.push(s.to_vec()),
        }
    }
    segments
}

#[cfg(unix)]
fn segment_to_os(segment: &[u8]) -> OsString {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::OsStr::from_bytes(segment).to_os_string()
}

#[cfg(not(unix))]
fn segment_to_os(segment: &[u8]) -> OsString {
    OsString::from(String::from_utf8_lossy(segment).into_owned())
}

fn with_html_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".html");
    PathBuf::from(name)
}
