//! File allocation table.
//!
//! One 16-bit entry per block. Block 0 is a reserved sentinel and is
//! never handed out; allocation is first-fit from block 1 upward.

use crate::disk::BlockStore;
use crate::error::FileSystemError;
use log::debug;

pub const FAT_FREE: u16 = 0xFFFF;
/// Claimed by an in-progress allocation but not linked yet.
pub const FAT_USED: u16 = 0xFFFE;
pub const FAT_EOC: u16 = 0xFFFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    Used,
    EndOfChain,
    Next(u16),
}

impl From<u16> for FatEntry {
    fn from(raw: u16) -> Self {
        match raw {
            FAT_FREE => FatEntry::Free,
            FAT_USED => FatEntry::Used,
            FAT_EOC => FatEntry::EndOfChain,
            next => FatEntry::Next(next),
        }
    }
}

impl From<FatEntry> for u16 {
    fn from(entry: FatEntry) -> Self {
        match entry {
            FatEntry::Free => FAT_FREE,
            FatEntry::Used => FAT_USED,
            FatEntry::EndOfChain => FAT_EOC,
            FatEntry::Next(next) => next,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fat {
    entries: Vec<u16>,
}

impl Fat {
    pub fn new(total_blocks: usize) -> Self {
        Fat {
            entries: vec![FAT_FREE; total_blocks],
        }
    }

    pub fn from_raw(entries: Vec<u16>) -> Self {
        Fat { entries }
    }

    pub fn raw(&self) -> &[u16] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, block: u16) -> FatEntry {
        FatEntry::from(self.entries[block as usize])
    }

    pub fn free_count(&self) -> usize {
        // block 0 is reserved and never counts as allocatable
        self.entries
            .iter()
            .skip(1)
            .filter(|&&e| e == FAT_FREE)
            .count()
    }

    /// Claims `ceil(byte_length / block_size)` blocks and links them into
    /// one chain, returning its head. A zero-length request claims nothing
    /// and returns `FAT_EOC`.
    ///
    /// Either every block is claimed or none is: if the table runs out
    /// partway, the blocks taken so far are put back.
    pub fn allocate(&mut self, byte_length: usize, block_size: usize) -> Result<u16, FileSystemError> {
        let needed = byte_length.div_ceil(block_size);
        if needed == 0 {
            return Ok(FAT_EOC);
        }

        let mut claimed: Vec<u16> = Vec::with_capacity(needed);
        let mut cursor = 1;
        while claimed.len() < needed {
            match self.find_free(cursor) {
                Some(block) => {
                    self.entries[block as usize] = FAT_USED;
                    claimed.push(block);
                    cursor = block as usize + 1;
                }
                None => {
                    for &block in &claimed {
                        self.entries[block as usize] = FAT_FREE;
                    }
                    debug!(
                        "allocation of {} blocks failed, rolled back {}",
                        needed,
                        claimed.len()
                    );
                    return Err(FileSystemError::InsufficientSpace {
                        needed,
                        free: claimed.len(),
                    });
                }
            }
        }

        for pair in claimed.windows(2) {
            self.entries[pair[0] as usize] = pair[1];
        }
        self.entries[claimed[needed - 1] as usize] = FAT_EOC;

        debug!("allocated chain {:?}", claimed);
        Ok(claimed[0])
    }

    /// Frees every block of the chain starting at `head`, zeroing its
    /// data. Returns how many blocks were released.
    pub fn deallocate(&mut self, head: u16, blocks: &mut BlockStore) -> usize {
        let chain: Vec<u16> = self.chain(head).collect();
        for &block in &chain {
            blocks.zero(block as usize);
            self.entries[block as usize] = FAT_FREE;
        }
        debug!("released chain {:?}", chain);
        chain.len()
    }

    /// Blocks of the chain starting at `head`, in order.
    pub fn chain(&self, head: u16) -> Chain<'_> {
        Chain {
            fat: self,
            next: Some(head),
            steps: 0,
            terminated: false,
        }
    }

    /// Walks a chain and reports whether it ended on `END_OF_CHAIN`
    /// within the table length.
    pub fn walk(&self, head: u16) -> (Vec<u16>, bool) {
        let mut chain = self.chain(head);
        let blocks: Vec<u16> = chain.by_ref().collect();
        (blocks, chain.terminated)
    }

    fn find_free(&self, from: usize) -> Option<u16> {
        (from.max(1)..self.entries.len())
            .find(|&i| self.entries[i] == FAT_FREE)
            .map(|i| i as u16)
    }
}

/// Iterator over one chain. Stops at `END_OF_CHAIN`, at a link that
/// leaves the table, or after `len` steps.
pub struct Chain<'a> {
    fat: &'a Fat,
    next: Option<u16>,
    steps: usize,
    terminated: bool,
}

impl Iterator for Chain<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        let current = self.next.take()?;
        if current == 0 || current as usize >= self.fat.len() || self.steps >= self.fat.len() {
            if current == FAT_EOC && self.steps == 0 {
                // empty chain
                self.terminated = true;
            }
            return None;
        }
        self.steps += 1;

        match self.fat.get(current) {
            FatEntry::Next(next) => self.next = Some(next),
            FatEntry::EndOfChain => self.terminated = true,
            FatEntry::Free | FatEntry::Used => {}
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_blocks(fat: &Fat, heads: &[u16]) -> usize {
        heads.iter().map(|&h| fat.chain(h).count()).sum()
    }

    #[test]
    fn allocates_first_fit_from_block_one() {
        let mut fat = Fat::new(16);
        let head = fat.allocate(1000, 512).expect("allocate");
        assert_eq!(head, 1);
        assert_eq!(fat.get(1), FatEntry::Next(2));
        assert_eq!(fat.get(2), FatEntry::EndOfChain);
        assert_eq!(fat.get(0), FatEntry::Free);
        assert_eq!(fat.chain(head).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn zero_length_claims_nothing() {
        let mut fat = Fat::new(8);
        let head = fat.allocate(0, 512).expect("allocate");
        assert_eq!(head, FAT_EOC);
        assert_eq!(fat.chain(head).count(), 0);
        assert_eq!(fat.free_count(), 7);

        let mut blocks = BlockStore::new(8, 512);
        assert_eq!(fat.deallocate(head, &mut blocks), 0);
    }

    #[test]
    fn reuses_holes_left_by_deallocation() {
        let mut fat = Fat::new(16);
        let mut blocks = BlockStore::new(16, 4);
        let a = fat.allocate(8, 4).expect("a");
        let b = fat.allocate(4, 4).expect("b");
        assert_eq!(fat.deallocate(a, &mut blocks), 2);

        let c = fat.allocate(12, 4).expect("c");
        assert_eq!(fat.chain(c).collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!(fat.chain(b).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn failed_allocation_rolls_back() {
        let mut fat = Fat::new(5);
        let _ = fat.allocate(2, 1).expect("two blocks");
        let before = fat.clone();

        let err = fat.allocate(3, 1).unwrap_err();
        assert!(matches!(
            err,
            FileSystemError::InsufficientSpace { needed: 3, free: 2 }
        ));
        assert_eq!(fat, before);
        assert!(!fat.raw().contains(&FAT_USED));
    }

    #[test]
    fn deallocate_zeroes_data() {
        let mut fat = Fat::new(8);
        let mut blocks = BlockStore::new(8, 4);
        let head = fat.allocate(6, 4).expect("allocate");
        for block in fat.chain(head).collect::<Vec<_>>() {
            blocks.write(block as usize, b"data");
        }
        fat.deallocate(head, &mut blocks);
        assert!(blocks.iter().all(|b| b.iter().all(|&x| x == 0)));
        assert_eq!(fat.free_count(), 7);
    }

    #[test]
    fn conservation_over_mixed_sequence() {
        let mut fat = Fat::new(64);
        let mut blocks = BlockStore::new(64, 16);
        let mut live = Vec::new();
        for (i, size) in [40usize, 1, 16, 17, 200, 33].iter().enumerate() {
            live.push(fat.allocate(*size, 16).expect("allocate"));
            if i % 2 == 1 {
                let head = live.remove(0);
                fat.deallocate(head, &mut blocks);
            }
            assert_eq!(fat.free_count(), 64 - 1 - live_blocks(&fat, &live));
        }
    }

    #[test]
    fn walk_detects_cycle_and_dangling_links() {
        let mut raw = vec![FAT_FREE; 6];
        raw[1] = 2;
        raw[2] = 1;
        let (blocks, terminated) = Fat::from_raw(raw).walk(1);
        assert!(!terminated);
        assert!(blocks.len() <= 6);

        let mut raw = vec![FAT_FREE; 6];
        raw[3] = 4;
        let (blocks, terminated) = Fat::from_raw(raw).walk(3);
        assert_eq!(blocks, vec![3, 4]);
        assert!(!terminated);

        let mut fat = Fat::new(6);
        let head = fat.allocate(3, 1).expect("allocate");
        assert_eq!(fat.walk(head), (vec![1, 2, 3], true));
    }

    #[test]
    fn entry_markers_convert() {
        assert_eq!(FatEntry::from(0xFFFF), FatEntry::Free);
        assert_eq!(FatEntry::from(0xFFFE), FatEntry::Used);
        assert_eq!(FatEntry::from(0xFFFD), FatEntry::EndOfChain);
        assert_eq!(u16::from(FatEntry::Next(7)), 7);
    }
}
