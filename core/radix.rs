//! Radix tree over 64-bit hashes.
//!
//! Every slot of a 16-way table is either `0` (empty), a positive index of a
//! child table, or a negative value whose complement is a byte offset into
//! `values`. Each entry in `values` is an 8-byte hash tag followed by
//! `vsize - 8` payload bytes.
//!
//! A key `h` may live at the location reached by descending on `h` or on
//! `h.rotate_left(32)`; the stored tag records which of the two was used.

use log::trace;

pub const RADIX: u32 = 4;
pub const TABSIZE: usize = 1 << RADIX;
pub const TABMASK: u64 = (TABSIZE - 1) as u64;

/// Size of the hash tag in front of every entry.
pub const TAG_SIZE: usize = 8;

// (table, slot) coordinates of an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Loc {
    table: usize,
    slot: usize,
}

#[derive(Debug, Clone)]
pub struct RadixTree64 {
    index: Vec<[i32; TABSIZE]>,
    values: Vec<u8>,
    vsize: usize,
}

fn le64(b: &[u8]) -> u64 {
    let mut tmp = [0u8; 8];
    tmp.copy_from_slice(&b[..8]);
    u64::from_le_bytes(tmp)
}

impl RadixTree64 {
    /// Creates a tree whose entries carry `datasize` payload bytes.
    pub fn new(datasize: usize) -> Self {
        let vsize = TAG_SIZE + datasize;
        RadixTree64 {
            index: vec![[0; TABSIZE]],
            values: Vec::with_capacity(vsize * 16),
            vsize,
        }
    }

    /// Size of one entry, tag included.
    pub fn vsize(&self) -> usize {
        self.vsize
    }

    pub fn datasize(&self) -> usize {
        self.vsize - TAG_SIZE
    }

    /// Number of index tables, root included.
    pub fn tables(&self) -> usize {
        self.index.len()
    }

    /// Number of entries ever inserted.
    pub fn len(&self) -> usize {
        self.values.len() / self.vsize
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    fn at(&self, loc: Loc) -> i32 {
        self.index[loc.table][loc.slot]
    }

    fn set(&mut self, loc: Loc, v: i32) {
        self.index[loc.table][loc.slot] = v;
    }

    /// Descends on `h` until a non-table slot is reached; returns the slot
    /// and the number of hash bits consumed.
    fn find(&self, h: u64) -> (Loc, u32) {
        let mut h = h;
        let mut loc = Loc {
            table: 0,
            slot: (h & TABMASK) as usize,
        };
        let mut rad = 0;
        while self.at(loc) > 0 {
            h >>= RADIX;
            loc = Loc {
                table: self.at(loc) as usize,
                slot: (h & TABMASK) as usize,
            };
            rad += RADIX;
        }
        (loc, rad)
    }

    fn refOffset(r: i32) -> usize {
        (!r) as usize
    }

    fn tagAt(&self, r: i32) -> u64 {
        le64(&self.values[Self::refOffset(r)..])
    }

    /// Byte offset of the entry for `h`, if present.
    pub fn offset(&self, h: u64) -> Option<usize> {
        let hrev = h.rotate_left(32);
        let (i0, _) = self.find(h);
        let (i1, _) = self.find(hrev);
        let r0 = self.at(i0);
        if r0 != 0 && self.tagAt(r0) == h {
            return Some(Self::refOffset(r0));
        }
        let r1 = self.at(i1);
        if r1 != 0 && self.tagAt(r1) == hrev {
            return Some(Self::refOffset(r1));
        }
        None
    }

    /// Payload of the entry for `h`, if present.
    pub fn lookup(&self, h: u64) -> Option<&[u8]> {
        let off = self.offset(h)?;
        Some(&self.values[off + TAG_SIZE..off + self.vsize])
    }

    /// Bounds-checked variant of [`Self::offset`] used by the interpreter.
    ///
    /// Returns `Err(())` if a table or value reference points outside the
    /// tree.
    pub fn checkedOffset(&self, h: u64) -> std::result::Result<Option<usize>, ()> {
        for probe in [h, h.rotate_left(32)] {
            let mut x = probe;
            let mut table = 0usize;
            let r = loop {
                let Some(tab) = self.index.get(table) else {
                    return Err(());
                };
                let r = tab[(x & TABMASK) as usize];
                if r <= 0 {
                    break r;
                }
                table = r as usize;
                x >>= RADIX;
            };
            if r == 0 {
                continue;
            }
            let off = Self::refOffset(r);
            if off + self.vsize > self.values.len() {
                return Err(());
            }
            if le64(&self.values[off..]) == probe {
                return Ok(Some(off));
            }
        }
        Ok(None)
    }

    fn newtable(&mut self) -> usize {
        self.index.push([0; TABSIZE]);
        self.index.len() - 1
    }

    fn newvalue(&mut self, h: u64) -> i32 {
        if self.values.len() + self.vsize * 16 > self.values.capacity() {
            self.values.reserve(self.values.len() + self.vsize * 16);
        }
        let idx = self.values.len();
        self.values.resize(idx + self.vsize, 0);
        self.values[idx..idx + TAG_SIZE].copy_from_slice(&h.to_le_bytes());
        !(idx as i32)
    }

    fn retag(&mut self, r: i32, h: u64) {
        let off = Self::refOffset(r);
        self.values[off..off + TAG_SIZE].copy_from_slice(&h.to_le_bytes());
    }

    /// Inserts an entry for `h`; returns the entry offset and whether it is
    /// new.
    pub fn insertSlow(&mut self, h: u64) -> (usize, bool) {
        // a full 64-bit collision needs at most 64/RADIX new tables
        self.index.reserve((64 >> RADIX) as usize);

        let hrev = h.rotate_left(32);
        let (i0, h0depth) = self.find(h);
        let (i1, h1depth) = self.find(hrev);
        let (r0, r1) = (self.at(i0), self.at(i1));
        let mut h0 = 0u64;
        let mut h1 = 0u64;
        if r0 != 0 {
            h0 = self.tagAt(r0);
            if h0 == h {
                return (Self::refOffset(r0), false);
            }
        }
        if r1 != 0 {
            h1 = self.tagAt(r1);
            if h1 == hrev {
                return (Self::refOffset(r1), false);
            }
        }
        if r0 == 0 {
            let r = self.newvalue(h);
            self.set(i0, r);
            return (Self::refOffset(r), true);
        }
        if r1 == 0 {
            let r = self.newvalue(hrev);
            self.set(i1, r);
            return (Self::refOffset(r), true);
        }

        // move an occupant to its alternate location
        let (i2, _) = self.find(h0.rotate_left(32));
        if self.at(i2) == 0 {
            self.set(i2, r0);
            self.retag(r0, h0.rotate_left(32));
            let r = self.newvalue(h);
            self.set(i0, r);
            trace!("radix: cuckoo {:#x} for {:#x}", h0, h);
            return (Self::refOffset(r), true);
        }
        let (i3, _) = self.find(h1.rotate_left(32));
        if self.at(i3) == 0 {
            self.set(i3, r1);
            self.retag(r1, h1.rotate_left(32));
            let r = self.newvalue(hrev);
            self.set(i1, r);
            trace!("radix: cuckoo {:#x} for {:#x}", h1, hrev);
            return (Self::refOffset(r), true);
        }

        // grow: split at the probe whose collision with its occupant is shorter
        let mut this = h;
        let mut depth = h0depth;
        let mut neighbits = h0 >> h0depth;
        let mut neighp = i0;
        if (hrev ^ h1).trailing_zeros() < (h ^ h0).trailing_zeros() {
            this = hrev;
            depth = h1depth;
            neighbits = h1 >> h1depth;
            neighp = i1;
        }
        let neigh = self.at(neighp);
        let mut selfbits = this >> depth;
        let mut tab = None;
        while neighbits & TABMASK == selfbits & TABMASK {
            let nt = self.newtable();
            self.set(neighp, nt as i32);
            tab = Some(nt);
            neighbits >>= RADIX;
            selfbits >>= RADIX;
            neighp = Loc {
                table: nt,
                slot: (neighbits & TABMASK) as usize,
            };
        }
        let Some(tab) = tab else {
            panic!("corrupt table");
        };
        let r = self.newvalue(this);
        self.index[tab][(neighbits & TABMASK) as usize] = neigh;
        self.index[tab][(selfbits & TABMASK) as usize] = r;
        trace!("radix: grew to {} tables inserting {:#x}", self.index.len(), h);
        (Self::refOffset(r), true)
    }

    /// Inserts `h` and returns its payload.
    pub fn insert(&mut self, h: u64) -> (&mut [u8], bool) {
        let (off, inserted) = self.insertSlow(h);
        (self.payloadMut(off), inserted)
    }

    /// Stored tag and payload of the entry at `off`.
    pub fn value(&self, off: usize) -> (u64, &[u8]) {
        (le64(&self.values[off..]), &self.values[off + TAG_SIZE..off + self.vsize])
    }

    pub fn payloadMut(&mut self, off: usize) -> &mut [u8] {
        let end = off + self.vsize;
        &mut self.values[off + TAG_SIZE..end]
    }

    fn walkFrom<F: FnMut(u64, &[u8])>(&self, r: i32, f: &mut F) -> usize {
        if r < 0 {
            let off = Self::refOffset(r);
            f(le64(&self.values[off..]), &self.values[off + TAG_SIZE..off + self.vsize]);
            return 0;
        }
        let mut max = 0;
        for &child in self.index[r as usize].iter() {
            if child == 0 {
                continue;
            }
            max = max.max(self.walkFrom(child, f));
        }
        max + 1
    }

    /// Visits every reachable entry; returns the depth of the tree.
    pub fn walk<F: FnMut(u64, &[u8])>(&self, mut f: F) -> usize {
        self.walkFrom(0, &mut f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_insert_find() {
        let mut t = RadixTree64::new(8);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let keys: Vec<u64> = (0..5000).map(|_| rng.gen()).collect();
        for (i, &k) in keys.iter().enumerate() {
            let (payload, inserted) = t.insert(k);
            assert!(inserted);
            payload.copy_from_slice(&(i as u64).to_le_bytes());
        }
        for (i, &k) in keys.iter().enumerate() {
            let payload = t.lookup(k).unwrap();
            assert_eq!(le64(payload), i as u64);
            let (_, again) = t.insertSlow(k);
            assert!(!again);
        }
        assert_eq!(t.len(), keys.len());
        let mut seen = 0;
        t.walk(|_, _| seen += 1);
        assert_eq!(seen, keys.len());
    }

    #[test]
    fn test_not_found() {
        let mut t = RadixTree64::new(0);
        t.insertSlow(0x1234);
        assert!(t.lookup(0x1234).is_some());
        assert!(t.lookup(0x1235).is_none());
        assert_eq!(t.checkedOffset(0x1235), Ok(None));
        assert_eq!(t.checkedOffset(0x1234), Ok(t.offset(0x1234)));
    }

    #[test]
    fn test_rotated_probe() {
        let mut t = RadixTree64::new(0);
        // 0x11 collides with 0x1 at the root and falls back to its rotation
        t.insertSlow(0x1);
        t.insertSlow(0x11);
        assert_eq!(t.tables(), 1);
        assert!(t.offset(0x1).is_some());
        assert!(t.offset(0x11).is_some());
        let (tag, _) = t.value(t.offset(0x11).unwrap());
        assert_eq!(tag, 0x11u64.rotate_left(32));
    }

    #[test]
    fn test_adversarial_growth() {
        let mut t = RadixTree64::new(0);
        let unrelated = [0x3u64, 0x5, 0x9_0000_0000];
        for k in unrelated {
            t.insertSlow(k);
        }
        // every key has the same 15 low nibbles; rotations agree on 7
        let x = 0x0777_7777_7777_7777u64;
        let keys: Vec<u64> = (0..16u64).map(|i| x | (i << 60)).collect();
        t.insertSlow(keys[0]);
        assert_eq!(t.tables(), 1);
        t.insertSlow(keys[1]);
        // the shorter collision (rotated path) forces one table per shared nibble
        assert_eq!(t.tables(), 1 + 7);
        for &k in &keys[2..] {
            t.insertSlow(k);
        }
        assert_eq!(t.tables(), 1 + 7);
        for k in unrelated.iter().chain(keys.iter()) {
            assert!(t.offset(*k).is_some(), "lost {:#x}", k);
        }
        assert_eq!(t.walk(|_, _| {}), 8);
    }

    #[test]
    fn test_minimum_tables_single_probe_collision() {
        let mut t = RadixTree64::new(0);
        t.insertSlow(0);
        t.insertSlow(1 << 60);
        // 1<<60 rotates to 1<<28, which shares 7 zero nibbles with 0
        assert_eq!(t.tables(), 8);
        t.insertSlow(2 << 60);
        assert_eq!(t.tables(), 8);
        for k in [0, 1 << 60, 2 << 60] {
            assert!(t.offset(k).is_some());
        }
        let depth = t.walk(|_, _| {});
        assert_eq!(t.tables(), depth);
    }
}
