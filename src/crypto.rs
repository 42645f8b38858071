//! Hash primitive boundary for mining
//!
//! The search loop only needs a streaming hash with an init/update/finalize
//! shape. Blake2s is the primitive templates are mined with.

use crate::types::Digest;
use crate::{Error, Result};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2sVar;

/// Streaming hash function usable by the search loop
pub trait StreamingHash: Clone + Send + 'static {
    /// Per-message hashing state
    type State;

    /// Primitive name for logging
    fn name(&self) -> &'static str;

    /// Digest width in bytes
    fn output_size(&self) -> usize;

    /// Start a new message
    fn init(&self) -> Self::State;

    /// Feed message bytes
    fn update(&self, state: &mut Self::State, data: &[u8]);

    /// Finish the message, writing exactly `output_size()` bytes to `out`
    fn finalize(&self, state: Self::State, out: &mut [u8]) -> Result<()>;

    /// Hash `data` in a single update, writing into a reusable digest
    #[inline]
    fn digest_into(&self, data: &[u8], out: &mut Digest) -> Result<()> {
        let mut state = self.init();
        self.update(&mut state, data);
        self.finalize(state, out.as_mut_bytes())
    }

    /// Hash `data` into a fresh digest
    fn digest(&self, data: &[u8]) -> Result<Digest> {
        let mut out = Digest::zeroed(self.output_size())?;
        self.digest_into(data, &mut out)?;
        Ok(out)
    }
}

/// Blake2s with a configurable output width of 1 to 32 bytes
#[derive(Clone)]
pub struct Blake2s {
    initial: Blake2sVar,
    output_size: usize,
}

impl Blake2s {
    /// Largest Blake2s digest
    pub const MAX_OUTPUT_SIZE: usize = 32;

    /// Create a hasher producing `output_size` byte digests
    pub fn new(output_size: usize) -> Result<Self> {
        if output_size == 0 || output_size > Self::MAX_OUTPUT_SIZE {
            return Err(Error::crypto(format!(
                "Blake2s digest size must be between 1 and {} bytes, got {}",
                Self::MAX_OUTPUT_SIZE,
                output_size
            )));
        }

        let initial = Blake2sVar::new(output_size).map_err(|e| {
            Error::crypto(format!("Invalid Blake2s output size {}: {}", output_size, e))
        })?;

        Ok(Self {
            initial,
            output_size,
        })
    }

    /// Standard 256-bit Blake2s
    pub fn blake2s_256() -> Result<Self> {
        Self::new(Self::MAX_OUTPUT_SIZE)
    }
}

impl std::fmt::Debug for Blake2s {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blake2s")
            .field("output_size", &self.output_size)
            .finish()
    }
}

impl StreamingHash for Blake2s {
    type State = Blake2sVar;

    fn name(&self) -> &'static str {
        "blake2s"
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    #[inline]
    fn init(&self) -> Self::State {
        self.initial.clone()
    }

    #[inline]
    fn update(&self, state: &mut Self::State, data: &[u8]) {
        state.update(data);
    }

    #[inline]
    fn finalize(&self, state: Self::State, out: &mut [u8]) -> Result<()> {
        state
            .finalize_variable(out)
            .map_err(|e| Error::crypto(format!("Blake2s finalize failed: {}", e)))
    }
}
