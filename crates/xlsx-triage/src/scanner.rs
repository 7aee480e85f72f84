//! Package scanner: ZIP container -> [`PartMap`].
//!
//! All reads are byte-level; no XML parsing happens here. Entry order is
//! preserved so the patcher can re-emit the archive without reshuffling
//! the central directory.

use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use zip::{CompressionMethod, ZipArchive};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("duplicate zip entry: {0}")]
    DuplicatePart(String),
}

/// One entry inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// ZIP entry name, forward-slash separated.
    pub path: String,
    /// Uncompressed entry bytes, exactly as stored.
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`.
    pub digest: [u8; 32],
    /// Whether the entry was compressed (anything other than STORE).
    pub compressed: bool,
    pub compressed_size: u64,
}

impl Part {
    pub fn is_xml(&self) -> bool {
        self.path.to_ascii_lowercase().ends_with(".xml")
    }

    pub fn is_rels(&self) -> bool {
        self.path.ends_with(".rels")
    }

    /// The part decoded as UTF-8, invalid sequences replaced.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn digest_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in self.digest {
            out.push_str(&format!("{b:02x}"));
        }
        out
    }
}

/// All parts of one archive, in central-directory order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartMap {
    parts: Vec<Part>,
}

impl PartMap {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;

        let mut parts: Vec<Part> = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let path = file.name().to_string();
            if parts.iter().any(|p| p.path == path) {
                return Err(ArchiveError::DuplicatePart(path));
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            let digest: [u8; 32] = Sha256::digest(&buf).into();
            parts.push(Part {
                path,
                digest,
                compressed: file.compression() != CompressionMethod::Stored,
                compressed_size: file.compressed_size(),
                bytes: buf,
            });
        }

        Ok(Self { parts })
    }

    /// Convenience wrapper for callers that start from a file path. The
    /// whole archive is buffered; the core itself never touches the
    /// filesystem beyond this read.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn get(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|p| p.path == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(|p| p.path.as_str())
    }

    pub fn xml_parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.is_xml())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Open an archive from a byte buffer and produce a [`PartMap`].
pub fn scan(bytes: &[u8]) -> Result<PartMap, ArchiveError> {
    PartMap::from_bytes(bytes)
}
