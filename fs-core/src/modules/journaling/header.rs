//! Log header codec
//!
//! On disk: `u32` slot count, then one `u64` home block number per slot,
//! little-endian, zero padded to a full block.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::blockdev::BLOCK_SIZE;
use crate::error::{Error, Result};

const COUNT_SIZE: usize = 4;
const ENTRY_SIZE: usize = 8;

/// Home block numbers of the logged blocks, in slot order.
///
/// Slot `i` of the header describes log block `log_start + 1 + i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    blocks: Vec<u64>,
}

impl LogHeader {
    /// An empty header with room reserved for `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: Vec::with_capacity(capacity),
        }
    }

    /// Bytes needed to encode a header of `slots` entries
    pub const fn encoded_len(slots: usize) -> usize {
        COUNT_SIZE + slots * ENTRY_SIZE
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no block is logged
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Home block numbers, slot order
    pub fn blocks(&self) -> &[u64] {
        &self.blocks
    }

    /// Whether `block_num` already owns a slot
    pub fn contains(&self, block_num: u64) -> bool {
        self.blocks.contains(&block_num)
    }

    pub(crate) fn push(&mut self, block_num: u64) {
        self.blocks.push(block_num);
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Encode into a full block
    pub fn encode(&self) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE];
        LittleEndian::write_u32(&mut block[..COUNT_SIZE], self.blocks.len() as u32);
        for (slot, &block_num) in self.blocks.iter().enumerate() {
            let at = Self::encoded_len(slot);
            LittleEndian::write_u64(&mut block[at..at + ENTRY_SIZE], block_num);
        }
        block
    }

    /// Decode a header block, rejecting counts above `capacity`
    pub fn decode(block: &[u8], capacity: usize) -> Result<Self> {
        if block.len() < COUNT_SIZE {
            return Err(Error::InvalidLogHeader(format!(
                "header block is only {} bytes",
                block.len()
            )));
        }
        let n = LittleEndian::read_u32(&block[..COUNT_SIZE]) as usize;
        if n > capacity || Self::encoded_len(n) > block.len() {
            return Err(Error::InvalidLogHeader(format!(
                "header claims {} slots, log holds at most {}",
                n, capacity
            )));
        }

        let blocks = (0..n)
            .map(|slot| {
                let at = Self::encoded_len(slot);
                LittleEndian::read_u64(&block[at..at + ENTRY_SIZE])
            })
            .collect();
        Ok(Self { blocks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut header = LogHeader::with_capacity(29);
        header.push(100);
        header.push(7);

        let block = header.encode();
        assert_eq!(block.len(), BLOCK_SIZE);
        assert_eq!(&block[..4], &2u32.to_le_bytes());
        assert_eq!(&block[4..12], &100u64.to_le_bytes());
        assert_eq!(&block[12..20], &7u64.to_le_bytes());
        assert!(block[20..].iter().all(|&b| b == 0));

        assert_eq!(LogHeader::decode(&block, 29).unwrap(), header);
    }

    #[test]
    fn test_zeroed_block_is_empty_header() {
        let header = LogHeader::decode(&[0u8; BLOCK_SIZE], 29).unwrap();
        assert!(header.is_empty());
    }

    #[test]
    fn test_count_above_capacity_is_rejected() {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[..4].copy_from_slice(&30u32.to_le_bytes());
        assert!(matches!(
            LogHeader::decode(&block, 29),
            Err(Error::InvalidLogHeader(_))
        ));
    }
}
