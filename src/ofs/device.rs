//! Fixed-size block I/O over the container file, plus the linked-chain
//! primitives shared by file contents and directory child lists.
//!
//! A block is `[next: u32][payload; block_size - 4]`. Indices are 1-based;
//! `0` is the null sentinel, both as a chain terminator and as "no block".

use crate::error::{OfsError, OfsResult};
use log::warn;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Size of the `next` pointer at the start of every block.
pub const NEXT_SIZE: u32 = 4;

/// The container file, viewed as a block region at a fixed base offset.
///
/// The device also carries the raw region accessors used to persist the
/// header, the tables and the bitmap, so the engine owns a single file
/// handle.
pub struct BlockDevice {
    file: File,
    block_size: u32,
    blocks_offset: u64,
    num_blocks: u32,
}

impl BlockDevice {
    /// Wraps an open container file.
    pub fn new(file: File, block_size: u32, blocks_offset: u64, num_blocks: u32) -> Self {
        Self {
            file,
            block_size,
            blocks_offset,
            num_blocks,
        }
    }

    /// Returns the number of blocks in the region.
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    /// Returns the payload capacity of one block.
    pub fn payload_size(&self) -> u32 {
        self.block_size - NEXT_SIZE
    }

    /// Reads `buf.len()` bytes at the absolute container offset `off`.
    pub fn read_at(&mut self, off: u64, buf: &mut [u8]) -> OfsResult<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` at the absolute container offset `off`.
    pub fn write_at(&mut self, off: u64, buf: &[u8]) -> OfsResult<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Pushes written data down to the host device.
    pub fn flush(&mut self) -> OfsResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Returns the container offset of the 1-based block `idx`.
    fn block_offset(&self, idx: u32) -> OfsResult<u64> {
        if idx == 0 || idx > self.num_blocks {
            warn!("block index {idx} out of range (1..={})", self.num_blocks);
            return Err(OfsError::Io);
        }
        Ok(self.blocks_offset + u64::from(idx - 1) * u64::from(self.block_size))
    }

    /// Reads a block, returning its `next` pointer and its full payload.
    pub fn read_block(&mut self, idx: u32) -> OfsResult<(u32, Vec<u8>)> {
        let off = self.block_offset(idx)?;
        let mut buf = vec![0; self.block_size as usize];
        self.read_at(off, &mut buf)?;
        let next = u32::from_le_bytes(buf[..4].try_into().unwrap());
        buf.drain(..4);
        Ok((next, buf))
    }

    /// Reads only the `next` pointer of a block.
    pub fn read_next(&mut self, idx: u32) -> OfsResult<u32> {
        let off = self.block_offset(idx)?;
        let mut buf = [0; 4];
        self.read_at(off, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Writes a block with the given `next` pointer and payload, zero-padding
    /// the payload up to the block capacity.
    pub fn write_block(&mut self, idx: u32, next: u32, payload: &[u8]) -> OfsResult<()> {
        assert!(payload.len() <= self.payload_size() as usize);
        let off = self.block_offset(idx)?;
        let mut buf = vec![0; self.block_size as usize];
        buf[..4].copy_from_slice(&next.to_le_bytes());
        buf[4..4 + payload.len()].copy_from_slice(payload);
        self.write_at(off, &buf)
    }

    /// Rewrites only the `next` pointer of a block.
    pub fn set_next(&mut self, idx: u32, next: u32) -> OfsResult<()> {
        let off = self.block_offset(idx)?;
        self.write_at(off, &next.to_le_bytes())
    }

    /// Returns the ordered block indices of the chain starting at `start`.
    ///
    /// `start == 0` yields an empty chain. A walk longer than the device can
    /// hold is a cycle and refused as an I/O error.
    pub fn chain(&mut self, start: u32) -> OfsResult<Vec<u32>> {
        let mut chain = Vec::new();
        let mut cur = start;
        while cur != 0 {
            chain.push(cur);
            if chain.len() > self.num_blocks as usize + 2 {
                warn!("block chain starting at {start} does not terminate, assuming a cycle");
                return Err(OfsError::Io);
            }
            cur = self.read_next(cur)?;
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempContainer;

    fn test_device(name: &str) -> (TempContainer, BlockDevice) {
        let tmp = TempContainer::new(name);
        let file = tmp.create(8 * 128);
        (tmp, BlockDevice::new(file, 128, 0, 8))
    }

    #[test]
    fn block_roundtrip_pads_with_zeros() {
        let (_tmp, mut dev) = test_device("device-roundtrip");
        dev.write_block(3, 5, b"hello").unwrap();
        let (next, payload) = dev.read_block(3).unwrap();
        assert_eq!(next, 5);
        assert_eq!(&payload[..5], b"hello");
        assert!(payload[5..].iter().all(|&b| b == 0));
        assert_eq!(payload.len(), 124);
    }

    #[test]
    fn index_zero_and_out_of_range_are_refused() {
        let (_tmp, mut dev) = test_device("device-range");
        assert_eq!(dev.read_block(0).unwrap_err(), OfsError::Io);
        assert_eq!(dev.read_block(9).unwrap_err(), OfsError::Io);
        assert_eq!(dev.write_block(0, 0, b"").unwrap_err(), OfsError::Io);
    }

    #[test]
    fn chain_walk_and_cycle_guard() {
        let (_tmp, mut dev) = test_device("device-chain");
        dev.write_block(1, 4, b"a").unwrap();
        dev.write_block(4, 2, b"b").unwrap();
        dev.write_block(2, 0, b"c").unwrap();
        assert_eq!(dev.chain(1).unwrap(), vec![1, 4, 2]);
        assert_eq!(dev.chain(0).unwrap(), Vec::<u32>::new());

        // Tie the tail back onto the head
        dev.set_next(2, 1).unwrap();
        assert_eq!(dev.chain(1).unwrap_err(), OfsError::Io);
    }
}
