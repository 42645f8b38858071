//! Block template loading and patching
//!
//! A template is a bounded byte buffer holding ASCII text with a marker (for
//! example `nonce":"`) immediately followed by a 64 character hex field. The
//! miner overwrites that field in place for every candidate nonce.

use crate::types::NONCE_FIELD_LEN;
use crate::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Default maximum template size in bytes
pub const DEFAULT_MAX_TEMPLATE_SIZE: usize = 1_000_000;

/// Default marker preceding the nonce field
pub const DEFAULT_MARKER: &str = "nonce\":\"";

/// Block template buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Template {
    /// Wrap bytes that are already in memory
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            truncated: false,
        }
    }

    /// Load at most `max_len` bytes from `path`.
    ///
    /// Input longer than `max_len` is cut off and flagged through
    /// [`Template::is_truncated`]; input of exactly `max_len` bytes is not.
    pub fn load(path: impl AsRef<Path>, max_len: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::template_read(path, e))?;

        // One byte past the limit tells truncation apart from an exact fit
        let mut bytes = Vec::new();
        file.take((max_len as u64).saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| Error::template_read(path, e))?;

        let truncated = bytes.len() > max_len;
        if truncated {
            bytes.truncate(max_len);
            warn!(
                "Template {} exceeds {} bytes and was truncated; the nonce field may be cut off",
                path.display(),
                max_len
            );
        }

        debug!("Loaded {} template bytes from {}", bytes.len(), path.display());

        Ok(Self { bytes, truncated })
    }

    /// Template bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Logical length of the template
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the template is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the source held more bytes than were loaded
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Overwrite `data.len()` bytes starting at `offset`
    #[inline]
    pub fn patch(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let buffer_len = self.bytes.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= buffer_len)
            .ok_or_else(|| Error::BufferOverflow {
                offset,
                len: data.len(),
                buffer_len,
            })?;

        self.bytes[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Bytes of the nonce field starting at `offset`
    pub fn nonce_field(&self, offset: usize) -> Result<&[u8]> {
        let buffer_len = self.bytes.len();
        offset
            .checked_add(NONCE_FIELD_LEN)
            .filter(|end| *end <= buffer_len)
            .map(|end| &self.bytes[offset..end])
            .ok_or(Error::BufferOverflow {
                offset,
                len: NONCE_FIELD_LEN,
                buffer_len,
            })
    }

    /// Find the nonce field after `marker` and check that it fits in the buffer
    pub fn locate_nonce_field(&self, marker: &[u8]) -> Result<usize> {
        let offset = find_injection_offset(&self.bytes, marker)?;
        let field = self.nonce_field(offset)?;

        if !field.iter().all(u8::is_ascii_hexdigit) {
            warn!(
                "Nonce field at offset {} is not a 64 character hex value; it will be overwritten anyway",
                offset
            );
        }

        Ok(offset)
    }
}

/// Offset immediately after the first occurrence of `marker` in `buffer`
pub fn find_injection_offset(buffer: &[u8], marker: &[u8]) -> Result<usize> {
    if marker.is_empty() || marker.len() > buffer.len() {
        return Err(Error::marker_not_found(marker));
    }

    buffer
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|position| position + marker.len())
        .ok_or_else(|| Error::marker_not_found(marker))
}
