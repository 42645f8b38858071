//! Persisting mined blocks
//!
//! Each success is an independent open-write-close of the whole buffer. When
//! several workers succeed, the last write wins; every candidate is valid.

use crate::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Default destination for a mined block
pub const DEFAULT_OUTPUT_PATH: &str = "mined_block.txt";

/// Write `bytes` verbatim to `path`, replacing any previous content
pub fn write_mined_block(path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|e| Error::persist(path, e))?;
    file.write_all(bytes).map_err(|e| Error::persist(path, e))?;
    file.flush().map_err(|e| Error::persist(path, e))?;
    Ok(())
}
