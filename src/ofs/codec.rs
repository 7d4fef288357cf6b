//! The payload transcoder: an optional byte-permutation applied to file
//! contents on write and inverted on read.
//!
//! Directory child arrays are never transcoded. An all-zero map means
//! identity; any other map must be a permutation of `[0, 255]`.

use crate::error::{OfsError, OfsResult};
use rand_core::RngCore;

/// A validated encoding map with its precomputed inverse.
#[derive(Debug)]
pub struct Transcoder {
    identity: bool,
    map: [u8; 256],
    inverse: [u8; 256],
}

impl Transcoder {
    /// Builds a transcoder from the persisted map.
    ///
    /// A non-zero map that is not a permutation is refused as
    /// [`OfsError::InvalidConfig`].
    pub fn new(map: [u8; 256]) -> OfsResult<Self> {
        if map.iter().all(|&b| b == 0) {
            return Ok(Self {
                identity: true,
                map,
                inverse: [0; 256],
            });
        }
        let mut inverse = [0u8; 256];
        let mut seen = [false; 256];
        for (i, &b) in map.iter().enumerate() {
            if seen[b as usize] {
                return Err(OfsError::InvalidConfig);
            }
            seen[b as usize] = true;
            inverse[b as usize] = i as u8;
        }
        Ok(Self {
            identity: false,
            map,
            inverse,
        })
    }

    /// Generates a random permutation map, suitable for storing in a header.
    pub fn random_map(rng: &mut impl RngCore) -> [u8; 256] {
        let mut map = [0u8; 256];
        for (i, b) in map.iter_mut().enumerate() {
            *b = i as u8;
        }
        // Fisher-Yates; the slight modulo bias is irrelevant here, the map is
        // an obfuscation device, not a cipher
        for i in (1..256usize).rev() {
            let j = rng.next_u32() as usize % (i + 1);
            map.swap(i, j);
        }
        map
    }

    /// Tells whether the map is the identity.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Transcodes payload bytes in place for writing.
    pub fn encode(&self, data: &mut [u8]) {
        if !self.identity {
            for b in data {
                *b = self.map[*b as usize];
            }
        }
    }

    /// Reverses the transcoding of payload bytes read back.
    pub fn decode(&self, data: &mut [u8]) {
        if !self.identity {
            for b in data {
                *b = self.inverse[*b as usize];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn zero_map_is_identity() {
        let codec = Transcoder::new([0; 256]).unwrap();
        assert!(codec.is_identity());
        let mut data = b"unchanged".to_vec();
        codec.encode(&mut data);
        assert_eq!(data, b"unchanged");
    }

    #[test]
    fn permutation_roundtrips() {
        let mut map = [0u8; 256];
        for (i, b) in map.iter_mut().enumerate() {
            // A simple involution-free permutation
            *b = (i as u8).wrapping_add(13);
        }
        let codec = Transcoder::new(map).unwrap();
        assert!(!codec.is_identity());

        let original = b"This is a test document for OFS!".to_vec();
        let mut data = original.clone();
        codec.encode(&mut data);
        assert_ne!(data, original);
        codec.decode(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn non_permutation_is_refused() {
        let mut map = [0u8; 256];
        map[0] = 7;
        map[1] = 7;
        assert_eq!(Transcoder::new(map).unwrap_err(), OfsError::InvalidConfig);
    }

    #[test]
    fn random_map_is_a_permutation() {
        let map = Transcoder::random_map(&mut OsRng);
        Transcoder::new(map).unwrap();
    }
}
