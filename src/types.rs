//! Core types for template mining
//!
//! Nonces, nonce ranges, the textual nonce layout injected into templates,
//! digests and hash rates.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::time::Duration;

/// Width of the nonce field inside a template, in ASCII hex characters
pub const NONCE_FIELD_LEN: usize = 64;

/// Number of hex characters carrying the 64-bit nonce value
const NONCE_VALUE_LEN: usize = 16;

/// Largest digest any supported hash primitive produces
pub const MAX_DIGEST_SIZE: usize = 64;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Proof-of-work nonce candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Convert to a 16 character hexadecimal string
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open range of nonces `[start, end)` assigned to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRange {
    start: u64,
    end: u64,
}

impl NonceRange {
    /// Create a range of `count` nonces beginning at `start`
    pub fn new(start: u64, count: u64) -> Result<Self> {
        let end = start.checked_add(count).ok_or_else(|| {
            Error::nonce(format!(
                "Range of {} nonces starting at {} overflows 64 bits",
                count, start
            ))
        })?;
        Ok(Self { start, end })
    }

    /// First nonce in the range
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last nonce in the range
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range holds no nonces
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `nonce` lies in this range
    pub fn contains(&self, nonce: u64) -> bool {
        (self.start..self.end).contains(&nonce)
    }

    /// Whether two ranges share no nonce
    pub fn is_disjoint(&self, other: &NonceRange) -> bool {
        self.end <= other.start || other.end <= self.start
    }

    /// Iterate nonces in increasing order
    pub fn iter(&self) -> Range<u64> {
        self.start..self.end
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Layout of the 64 character nonce field.
///
/// The leading `tag_width` characters hold the worker id in lowercase hex,
/// the trailing 16 characters hold the nonce value, and everything between is
/// zero. With a single tag character, workers 0 through 9 write their ASCII
/// digit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceLayout {
    tag_width: usize,
}

impl NonceLayout {
    /// Widest tag that still leaves the nonce value untouched
    pub const MAX_TAG_WIDTH: usize = NONCE_FIELD_LEN - NONCE_VALUE_LEN;

    /// Smallest layout able to tag `workers` distinct workers
    pub fn for_workers(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::nonce("Nonce layout needs at least one worker"));
        }

        let mut tag_width = 1;
        let mut highest = (workers - 1) >> 4;
        while highest > 0 {
            tag_width += 1;
            highest >>= 4;
        }

        Self::with_tag_width(tag_width)
    }

    /// Layout with an explicit tag width
    pub fn with_tag_width(tag_width: usize) -> Result<Self> {
        if tag_width == 0 || tag_width > Self::MAX_TAG_WIDTH {
            return Err(Error::nonce(format!(
                "Tag width must be between 1 and {}, got {}",
                Self::MAX_TAG_WIDTH,
                tag_width
            )));
        }
        Ok(Self { tag_width })
    }

    /// Number of leading hex characters reserved for the worker id
    pub fn tag_width(&self) -> usize {
        self.tag_width
    }

    /// Number of distinct worker ids the tag can hold
    pub fn capacity(&self) -> u128 {
        // 16^width, saturating once it no longer matters for a usize id
        if self.tag_width >= 32 {
            u128::MAX
        } else {
            1u128 << (4 * self.tag_width)
        }
    }

    /// Check that `worker_id` fits in the tag
    pub fn check_worker(&self, worker_id: usize) -> Result<()> {
        if (worker_id as u128) < self.capacity() {
            Ok(())
        } else {
            Err(Error::nonce(format!(
                "Worker id {} does not fit in a {} character tag",
                worker_id, self.tag_width
            )))
        }
    }

    /// Build a reusable encoder for one worker
    pub fn encoder(&self, worker_id: usize) -> Result<NonceEncoder> {
        self.check_worker(worker_id)?;

        let mut field = [b'0'; NONCE_FIELD_LEN];
        let mut id = worker_id;
        for slot in field[..self.tag_width].iter_mut().rev() {
            *slot = HEX_DIGITS[id & 0xf];
            id >>= 4;
        }

        Ok(NonceEncoder { field })
    }

    /// Encode a nonce for a worker as a 64 character string
    pub fn encode(&self, nonce: Nonce, worker_id: usize) -> Result<String> {
        let mut encoder = self.encoder(worker_id)?;
        let field = encoder.encode(nonce.value());
        Ok(String::from_utf8_lossy(field).into_owned())
    }

    /// Split an encoded field back into worker id and nonce
    pub fn decode(&self, field: &[u8]) -> Result<(usize, Nonce)> {
        if field.len() != NONCE_FIELD_LEN {
            return Err(Error::nonce(format!(
                "Nonce field must be {} characters, got {}",
                NONCE_FIELD_LEN,
                field.len()
            )));
        }

        if !field.is_ascii() {
            return Err(Error::nonce(format!(
                "Nonce field is not ASCII: {}",
                String::from_utf8_lossy(field)
            )));
        }
        let text = std::str::from_utf8(field)
            .map_err(|e| Error::nonce(format!("Nonce field is not ASCII: {}", e)))?;

        let tag = &text[..self.tag_width];
        let worker_id = usize::from_str_radix(tag, 16)
            .map_err(|e| Error::nonce(format!("Invalid worker tag {:?}: {}", tag, e)))?;

        let value = &text[NONCE_FIELD_LEN - NONCE_VALUE_LEN..];
        let nonce = u64::from_str_radix(value, 16)
            .map_err(|e| Error::nonce(format!("Invalid nonce value {:?}: {}", value, e)))?;

        Ok((worker_id, Nonce::new(nonce)))
    }
}

impl Default for NonceLayout {
    fn default() -> Self {
        Self { tag_width: 1 }
    }
}

/// Allocation-free nonce field writer with the worker tag pre-filled
#[derive(Debug, Clone)]
pub struct NonceEncoder {
    field: [u8; NONCE_FIELD_LEN],
}

impl NonceEncoder {
    /// Write `nonce` into the value slot and return the whole field
    #[inline]
    pub fn encode(&mut self, nonce: u64) -> &[u8; NONCE_FIELD_LEN] {
        let value = &mut self.field[NONCE_FIELD_LEN - NONCE_VALUE_LEN..];
        let mut n = nonce;
        for slot in value.iter_mut().rev() {
            *slot = HEX_DIGITS[(n & 0xf) as usize];
            n >>= 4;
        }
        &self.field
    }
}

/// Hash digest of a patched template
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Digest {
    bytes: [u8; MAX_DIGEST_SIZE],
    len: usize,
}

impl Digest {
    /// Zeroed digest of `len` bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 || len > MAX_DIGEST_SIZE {
            return Err(Error::crypto(format!(
                "Digest size must be between 1 and {} bytes, got {}",
                MAX_DIGEST_SIZE, len
            )));
        }
        Ok(Self {
            bytes: [0u8; MAX_DIGEST_SIZE],
            len,
        })
    }

    /// Build a digest from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut digest = Self::zeroed(bytes.len())?;
        digest.as_mut_bytes().copy_from_slice(bytes);
        Ok(digest)
    }

    /// Digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Mutable digest bytes, for hash primitives to write into
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// Digest size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false, digests hold at least one byte
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Digest").field(&self.to_hex()).finish()
    }
}

/// Hash rate in hashes per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct HashRate(pub f64);

impl HashRate {
    /// Create new hash rate
    pub fn new(rate: f64) -> Self {
        Self(rate)
    }

    /// Rate achieved by `hashes` attempts over `elapsed`
    pub fn from_hashes(hashes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            Self(hashes as f64 / secs)
        } else {
            Self(0.0)
        }
    }

    /// Get the rate value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000_000_000_000.0 {
            write!(f, "{:.2}T H/s", self.0 / 1_000_000_000_000.0)
        } else if self.0 >= 1_000_000_000.0 {
            write!(f, "{:.2}G H/s", self.0 / 1_000_000_000.0)
        } else if self.0 >= 1_000_000.0 {
            write!(f, "{:.2}M H/s", self.0 / 1_000_000.0)
        } else if self.0 >= 1_000.0 {
            write!(f, "{:.2}K H/s", self.0 / 1_000.0)
        } else {
            write!(f, "{:.2} H/s", self.0)
        }
    }
}
