//! Difficulty targets
//!
//! A target is a pure predicate over a digest. The search loop only calls
//! [`Target::meets_target`], so any of the rules below can be swapped in from
//! configuration.

use crate::types::MAX_DIGEST_SIZE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a hex encoded 256-bit threshold
const THRESHOLD_HEX_LEN: usize = 64;

/// Difficulty rule a digest must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The first `zero_bytes` bytes are zero and the next byte is at most `max_next`
    ByteThreshold { zero_bytes: usize, max_next: u8 },
    /// At least this many leading zero bits
    LeadingZeroBits(u32),
    /// The digest read as a big-endian 256-bit integer is at most this value
    Threshold([u8; 32]),
}

impl Target {
    /// Create a byte-granular threshold
    pub fn byte_threshold(zero_bytes: usize, max_next: u8) -> Result<Self> {
        if zero_bytes >= MAX_DIGEST_SIZE {
            return Err(Error::target(format!(
                "Zero byte count must be below {}, got {}",
                MAX_DIGEST_SIZE, zero_bytes
            )));
        }
        Ok(Self::ByteThreshold {
            zero_bytes,
            max_next,
        })
    }

    /// Create a leading-zero-bit target
    pub fn leading_zero_bits(bits: u32) -> Result<Self> {
        if bits as usize > MAX_DIGEST_SIZE * 8 {
            return Err(Error::target(format!(
                "Leading zero bits must be at most {}, got {}",
                MAX_DIGEST_SIZE * 8,
                bits
            )));
        }
        Ok(Self::LeadingZeroBits(bits))
    }

    /// Easiest possible target, accepted by every digest
    pub fn max() -> Self {
        Self::LeadingZeroBits(0)
    }

    /// Check if a digest meets this target
    #[inline]
    pub fn meets_target(&self, digest: &[u8]) -> bool {
        match *self {
            Target::ByteThreshold {
                zero_bytes,
                max_next,
            } => {
                digest.len() > zero_bytes
                    && digest[..zero_bytes].iter().all(|b| *b == 0)
                    && digest[zero_bytes] <= max_next
            }
            Target::LeadingZeroBits(bits) => leading_zero_bits(digest) >= bits,
            Target::Threshold(ref threshold) => {
                digest.len() == threshold.len() && digest <= threshold.as_slice()
            }
        }
    }

    /// Check that a digest of `output_size` bytes can ever meet this target
    pub fn validate_for(&self, output_size: usize) -> Result<()> {
        let fits = match *self {
            Target::ByteThreshold { zero_bytes, .. } => zero_bytes < output_size,
            Target::LeadingZeroBits(bits) => bits as usize <= output_size * 8,
            Target::Threshold(ref threshold) => threshold.len() == output_size,
        };

        if fits {
            Ok(())
        } else {
            Err(Error::target(format!(
                "Target {} cannot be met by a {} byte digest",
                self, output_size
            )))
        }
    }

    /// Approximate difficulty in bits, `-log2` of the acceptance probability
    pub fn difficulty_bits(&self) -> f64 {
        match *self {
            Target::ByteThreshold {
                zero_bytes,
                max_next,
            } => (zero_bytes * 8) as f64 + 8.0 - (max_next as f64 + 1.0).log2(),
            Target::LeadingZeroBits(bits) => bits as f64,
            Target::Threshold(ref threshold) => {
                let mut head = [0u8; 8];
                head.copy_from_slice(&threshold[..8]);
                let fraction = (u64::from_be_bytes(head) as f64 + 1.0) / 2f64.powi(64);
                -fraction.log2()
            }
        }
    }

    /// Expected number of hashes to find one solution
    pub fn expected_hashes(&self) -> f64 {
        2f64.powf(self.difficulty_bits())
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::ByteThreshold {
            zero_bytes: 4,
            max_next: 171,
        }
    }
}

/// Count leading zero bits of a digest
#[inline]
pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut count = 0;
    for byte in digest {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}

impl FromStr for Target {
    type Err = Error;

    /// Parse `bytes:<zero_bytes>:<max_next>`, `bits:<n>` or a 64 character hex threshold
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("bytes:") {
            let (zero_bytes, max_next) = rest.split_once(':').ok_or_else(|| {
                Error::target(format!("Expected bytes:<zero_bytes>:<max_next>, got {:?}", s))
            })?;
            let zero_bytes = zero_bytes
                .parse()
                .map_err(|e| Error::target(format!("Invalid zero byte count: {}", e)))?;
            let max_next = max_next
                .parse()
                .map_err(|e| Error::target(format!("Invalid next byte limit: {}", e)))?;
            return Self::byte_threshold(zero_bytes, max_next);
        }

        if let Some(bits) = s.strip_prefix("bits:") {
            let bits = bits
                .parse()
                .map_err(|e| Error::target(format!("Invalid leading zero bits: {}", e)))?;
            return Self::leading_zero_bits(bits);
        }

        if s.len() != THRESHOLD_HEX_LEN {
            return Err(Error::target(format!(
                "Invalid target {:?}: expected bytes:N:M, bits:N or {} hex chars",
                s, THRESHOLD_HEX_LEN
            )));
        }

        let mut threshold = [0u8; 32];
        hex::decode_to_slice(s, &mut threshold)
            .map_err(|e| Error::target(format!("Invalid hex in target: {}", e)))?;
        Ok(Self::Threshold(threshold))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::ByteThreshold {
                zero_bytes,
                max_next,
            } => write!(f, "bytes:{}:{}", zero_bytes, max_next),
            Target::LeadingZeroBits(bits) => write!(f, "bits:{}", bits),
            Target::Threshold(threshold) => write!(f, "{}", hex::encode(threshold)),
        }
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn digest_with(prefix: &[u8]) -> [u8; 32] {
        let mut digest = [0xffu8; 32];
        digest[..prefix.len()].copy_from_slice(prefix);
        digest
    }

    #[test]
    fn test_default_target_accepts() {
        let target = Target::default();
        assert!(target.meets_target(&digest_with(&[0, 0, 0, 0, 0])));
        assert!(target.meets_target(&digest_with(&[0, 0, 0, 0, 171])));
    }

    #[test]
    fn test_default_target_rejects() {
        let target = Target::default();
        assert!(!target.meets_target(&digest_with(&[0, 0, 0, 0, 172])));
        assert!(!target.meets_target(&digest_with(&[1, 0, 0, 0, 0])));
        assert!(!target.meets_target(&digest_with(&[0, 1, 0, 0, 0])));
        assert!(!target.meets_target(&digest_with(&[0, 0, 1, 0, 0])));
        assert!(!target.meets_target(&digest_with(&[0, 0, 0, 1, 0])));
        assert!(!target.meets_target(&[0, 0, 0, 0]));
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0x80]), 0);
        assert_eq!(leading_zero_bits(&[0x01]), 7);
        assert_eq!(leading_zero_bits(&[0, 0, 0, 0, 0x0f]), 36);
        assert_eq!(leading_zero_bits(&[0; 4]), 32);

        let target = Target::leading_zero_bits(36).unwrap();
        assert!(target.meets_target(&digest_with(&[0, 0, 0, 0, 0x0f])));
        assert!(!target.meets_target(&digest_with(&[0, 0, 0, 0, 0x10])));
        assert!(Target::max().meets_target(&[0xff; 32]));
    }

    #[test]
    fn test_threshold_target() {
        let target: Target = "00000000abc00000000000000000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        assert!(target.meets_target(&digest_with(&[0, 0, 0, 0, 0xab, 0xbf])));
        assert!(!target.meets_target(&digest_with(&[0, 0, 0, 0, 0xab, 0xc0])));
        assert!(!target.meets_target(&[0u8; 16]));
    }

    #[test]
    fn test_parse_and_display() {
        let threshold = "0f".repeat(32);
        for text in ["bytes:4:171", "bits:36", threshold.as_str()] {
            let target: Target = text.parse().unwrap();
            assert_eq!(target.to_string(), text);
        }

        assert_eq!("bytes:4:171".parse::<Target>().unwrap(), Target::default());
        assert!("bytes:4".parse::<Target>().is_err());
        assert!("bytes:4:256".parse::<Target>().is_err());
        assert!("bytes:64:0".parse::<Target>().is_err());
        assert!("bits:513".parse::<Target>().is_err());
        assert!("zz".repeat(32).parse::<Target>().is_err());
        assert!("hard".parse::<Target>().is_err());
    }

    #[test]
    fn test_validate_for_digest_size() {
        assert!(Target::default().validate_for(32).is_ok());
        assert!(Target::default().validate_for(4).is_err());
        assert!(Target::LeadingZeroBits(129).validate_for(16).is_err());
        assert!(Target::Threshold([0; 32]).validate_for(16).is_err());
    }

    #[test]
    fn test_difficulty_bits() {
        let bits = Target::default().difficulty_bits();
        assert!(bits > 32.5 && bits < 32.6);
        assert_eq!(Target::LeadingZeroBits(20).difficulty_bits(), 20.0);
        assert_eq!(Target::LeadingZeroBits(10).expected_hashes(), 1024.0);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Target::default()).unwrap();
        assert_eq!(json, "\"bytes:4:171\"");
        let parsed: Target = serde_json::from_str("\"bits:12\"").unwrap();
        assert_eq!(parsed, Target::LeadingZeroBits(12));
    }

    proptest! {
        #[test]
        fn prop_default_target_matches_rule(digest in proptest::array::uniform32(any::<u8>())) {
            let expected = digest[..4].iter().all(|b| *b == 0) && digest[4] <= 171;
            prop_assert_eq!(Target::default().meets_target(&digest), expected);
        }

        #[test]
        fn prop_zero_bits_monotonic(digest in proptest::array::uniform32(any::<u8>()), bits in 0u32..64) {
            let harder = Target::LeadingZeroBits(bits + 1).meets_target(&digest);
            let easier = Target::LeadingZeroBits(bits).meets_target(&digest);
            prop_assert!(!harder || easier);
        }
    }
}
