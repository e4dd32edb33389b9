//! Virtual stack layout.
//!
//! Spilled registers live in a single byte-addressed stack. Slots are byte
//! offsets encoded as `u16`, so the stack never exceeds 64 KiB.

use std::collections::HashMap;

use super::defs::RegClass;
use super::ValueId;

pub type StackSlot = u16;

pub const MAX_STACK_SIZE: usize = 1 << 16;

/// Offset of the `i`-th slot of `class` in the reserved area at the bottom
/// of the stack.
pub fn stackSlotFromIndex(class: RegClass, i: usize) -> StackSlot {
    let size = class.size().next_multiple_of(class.align());
    (i * size) as StackSlot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// First-fit allocator over byte spans with coalescing free lists.
#[derive(Debug, Default, Clone)]
pub struct SpanAlloc {
    // sorted by start, never adjacent
    free: Vec<Span>,
    top: usize,
    allocated: bool,
}

impl SpanAlloc {
    /// Reserves `[0, size)` for fixed slots; must precede any allocation.
    pub fn reserve(&mut self, size: usize) {
        if self.allocated {
            panic!("spanalloc.reserve not called early enough");
        }
        self.top = self.top.max(size);
    }

    pub fn alloc(&mut self, size: usize, align: usize) -> usize {
        self.allocated = true;
        for i in 0..self.free.len() {
            let span = self.free[i];
            let start = span.start.next_multiple_of(align);
            if start + size > span.end {
                continue;
            }
            self.free.remove(i);
            if start > span.start {
                self.insertFree(Span {
                    start: span.start,
                    end: start,
                });
            }
            if start + size < span.end {
                self.insertFree(Span {
                    start: start + size,
                    end: span.end,
                });
            }
            return start;
        }
        let start = self.top.next_multiple_of(align);
        if start > self.top {
            self.insertFree(Span {
                start: self.top,
                end: start,
            });
        }
        self.top = start + size;
        start
    }

    pub fn free(&mut self, start: usize, size: usize) {
        self.insertFree(Span { start, end: start + size });
    }

    fn insertFree(&mut self, span: Span) {
        let pos = self.free.partition_point(|s| s.start < span.start);
        if let Some(prev) = pos.checked_sub(1).map(|p| self.free[p]) {
            assert!(prev.end <= span.start, "double free of stack span {:?}", span);
        }
        if let Some(next) = self.free.get(pos) {
            assert!(span.end <= next.start, "double free of stack span {:?}", span);
        }
        self.free.insert(pos, span);
        // merge with neighbours
        if pos + 1 < self.free.len() && self.free[pos].end == self.free[pos + 1].start {
            self.free[pos].end = self.free[pos + 1].end;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].end == self.free[pos].start {
            self.free[pos - 1].end = self.free[pos].end;
            self.free.remove(pos);
        }
    }

    /// High-water mark of the stack.
    pub fn size(&self) -> usize {
        self.top
    }
}

/// Stack slots currently holding a copy of an SSA value, per class.
#[derive(Debug, Default)]
pub struct StackMap {
    alloc: SpanAlloc,
    slots: [HashMap<ValueId, StackSlot>; super::defs::NUM_REG_CLASSES],
    // slots owned by the program itself; never freed
    permanent: Vec<(RegClass, StackSlot)>,
    // stack size first requested past MAX_STACK_SIZE
    overflow: Option<usize>,
}

impl StackMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count` fixed slots of `class` starting at the bottom of
    /// the stack.
    pub fn reserveSlots(&mut self, class: RegClass, count: usize) {
        if count == 0 {
            return;
        }
        let size = count * class.size().next_multiple_of(class.align());
        if size > MAX_STACK_SIZE {
            self.overflow.get_or_insert(size);
            return;
        }
        self.alloc.reserve(size);
        for i in 0..count {
            self.permanent.push((class, stackSlotFromIndex(class, i)));
        }
    }

    pub fn isPermanent(&self, class: RegClass, slot: StackSlot) -> bool {
        self.permanent.contains(&(class, slot))
    }

    pub fn slotOf(&self, class: RegClass, v: ValueId) -> Option<StackSlot> {
        self.slots[class as usize].get(&v).copied()
    }

    pub fn hasSlot(&self, class: RegClass, v: ValueId) -> bool {
        self.slots[class as usize].contains_key(&v)
    }

    /// Returns the slot for `v`, allocating one if needed.
    ///
    /// Past [`MAX_STACK_SIZE`] the returned slot is meaningless and the
    /// overflow is reported by [`StackMap::overflow`].
    pub fn allocSlot(&mut self, class: RegClass, v: ValueId) -> StackSlot {
        if let Some(slot) = self.slotOf(class, v) {
            return slot;
        }
        let off = self.alloc.alloc(class.size(), class.align());
        let end = off + class.size();
        if end > MAX_STACK_SIZE {
            self.overflow.get_or_insert(end);
        }
        let slot = off as StackSlot;
        self.slots[class as usize].insert(v, slot);
        slot
    }

    /// Transfers `slot` to `v`; used when a register exchange moves a value
    /// into a slot owned by a dead value.
    pub fn transfer(&mut self, class: RegClass, from: ValueId, to: ValueId) {
        if let Some(slot) = self.slots[class as usize].remove(&from) {
            self.slots[class as usize].insert(to, slot);
        }
    }

    pub fn freeValue(&mut self, class: RegClass, v: ValueId) {
        if let Some(slot) = self.slots[class as usize].remove(&v) {
            self.alloc.free(slot as usize, class.size());
        }
    }

    pub fn stackSize(&self) -> usize {
        self.alloc.size()
    }

    /// Size of the first stack request that did not fit.
    pub fn overflow(&self) -> Option<usize> {
        self.overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spanalloc_reuse() {
        let mut a = SpanAlloc::default();
        let k0 = a.alloc(2, 2);
        let s0 = a.alloc(128, 64);
        assert_eq!(k0, 0);
        assert_eq!(s0, 64);
        let k1 = a.alloc(2, 2);
        // fills the alignment hole left before s0
        assert_eq!(k1, 2);
        a.free(s0, 128);
        // the freed span merges with the hole and is reused aligned
        let v0 = a.alloc(160, 32);
        assert_eq!(v0, 32);
        assert_eq!(a.size(), 192);
        a.free(k0, 2);
        a.free(k1, 2);
        assert_eq!(a.alloc(4, 2), 0);
    }

    #[test]
    #[should_panic(expected = "spanalloc.reserve not called early enough")]
    fn test_reserve_after_alloc() {
        let mut a = SpanAlloc::default();
        a.alloc(2, 2);
        a.reserve(160);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut m = StackMap::new();
        let fit = MAX_STACK_SIZE / RegClass::V.size();
        for v in 0..fit {
            m.allocSlot(RegClass::V, v);
        }
        assert_eq!(m.overflow(), None);
        m.allocSlot(RegClass::V, fit);
        let Some(n) = m.overflow() else {
            panic!("no overflow after {} slots", fit + 1);
        };
        assert!(n > MAX_STACK_SIZE);

        let mut r = StackMap::new();
        r.reserveSlots(RegClass::V, fit + 1);
        assert_eq!(r.overflow(), Some((fit + 1) * RegClass::V.size()));
        assert!(!r.isPermanent(RegClass::V, 0));
    }

    #[test]
    fn test_reserved_slots() {
        let mut m = StackMap::new();
        m.reserveSlots(RegClass::V, 2);
        assert_eq!(stackSlotFromIndex(RegClass::V, 1), 160);
        assert!(m.isPermanent(RegClass::V, 160));
        let s = m.allocSlot(RegClass::S, 7);
        assert_eq!(s, 320);
        assert_eq!(m.allocSlot(RegClass::S, 7), s);
        m.freeValue(RegClass::S, 7);
        assert_eq!(m.allocSlot(RegClass::S, 8), s);
    }
}
