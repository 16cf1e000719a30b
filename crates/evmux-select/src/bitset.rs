//! Interest bitmaps for the select backend
//!
//! `FdBitset` is a growable one-bit-per-descriptor set whose word slice
//! has the layout of the platform `fd_set`, so it can be handed to
//! `select(2)` as is. `InterestStore` owns the four bitsets the backend
//! needs (read/write interest plus read/write scratch) and keeps them the
//! same size.
//!
//! Descriptor `fd` lives in bit `fd % BITS_PER_WORD` of word
//! `fd / BITS_PER_WORD`.

use evmux_core::EventMask;

cfg_if::cfg_if! {
    if #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "tvos",
        target_os = "watchos",
        target_os = "netbsd",
        target_os = "openbsd",
    ))] {
        /// One `fd_set` element (`__int32_t` / `uint32_t` here).
        pub type Word = u32;
    } else {
        /// One `fd_set` element (`unsigned long` / `__fd_mask` here).
        pub type Word = libc::c_ulong;
    }
}

/// Number of descriptors covered by one word
pub const BITS_PER_WORD: usize = Word::BITS as usize;

/// Smallest word count covering descriptor `fd`.
#[inline]
pub const fn words_for(fd: usize) -> usize {
    fd / BITS_PER_WORD + 1
}

#[inline]
const fn locate(fd: usize) -> (usize, Word) {
    (fd / BITS_PER_WORD, (1 as Word) << (fd % BITS_PER_WORD))
}

/// Growable descriptor bitset
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FdBitset {
    words: Vec<Word>,
}

impl FdBitset {
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Number of words allocated
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Grow to `words`, zero-filling the new tail. Never shrinks.
    pub fn grow(&mut self, words: usize) {
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
    }

    /// Test the bit for `fd`; descriptors beyond capacity are unset.
    #[inline]
    pub fn get(&self, fd: usize) -> bool {
        let (word, mask) = locate(fd);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Set or clear the bit for `fd`.
    ///
    /// `fd` must be covered; callers grow first.
    #[inline]
    pub fn set(&mut self, fd: usize, want: bool) {
        let (word, mask) = locate(fd);
        debug_assert!(word < self.words.len(), "fd {} beyond bitset capacity", fd);
        if want {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }
    }

    /// Overwrite with the contents of `src` (equal sizes).
    #[inline]
    pub fn copy_from(&mut self, src: &FdBitset) {
        self.words.copy_from_slice(&src.words);
    }

    #[inline]
    pub fn words(&self) -> &[Word] {
        &self.words
    }

    #[inline]
    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut self.words
    }

    /// Drop the allocation and return to zero capacity.
    pub fn release(&mut self) {
        self.words = Vec::new();
    }
}

/// Which interest bitmap an update targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitmap {
    Read,
    Write,
}

/// The four bitsets of one select backend instance.
///
/// **Invariant:** all four always have the same word count.
#[derive(Debug, Default)]
pub struct InterestStore {
    read: FdBitset,
    write: FdBitset,
    read_out: FdBitset,
    write_out: FdBitset,
}

impl InterestStore {
    pub const fn new() -> Self {
        Self {
            read: FdBitset::new(),
            write: FdBitset::new(),
            read_out: FdBitset::new(),
            write_out: FdBitset::new(),
        }
    }

    /// Capacity in words
    #[inline]
    pub fn capacity(&self) -> usize {
        self.read.len()
    }

    /// Number of descriptors the current capacity covers
    #[inline]
    pub fn capacity_fds(&self) -> usize {
        self.capacity() * BITS_PER_WORD
    }

    /// Grow all four bitsets so `fd` is covered.
    ///
    /// Returns the previous capacity in words if a growth happened.
    pub fn ensure_capacity(&mut self, fd: usize) -> Option<usize> {
        let old = self.capacity();
        let needed = words_for(fd);
        if needed <= old {
            return None;
        }
        self.read.grow(needed);
        self.write.grow(needed);
        self.read_out.grow(needed);
        self.write_out.grow(needed);
        Some(old)
    }

    /// Set or clear one interest bit. `fd` must be covered.
    #[inline]
    pub fn set(&mut self, bitmap: Bitmap, fd: usize, want: bool) {
        match bitmap {
            Bitmap::Read => self.read.set(fd, want),
            Bitmap::Write => self.write.set(fd, want),
        }
    }

    /// Current interest for `fd`
    pub fn interest(&self, fd: usize) -> EventMask {
        let mut events = EventMask::empty();
        if self.read.get(fd) {
            events |= EventMask::READ;
        }
        if self.write.get(fd) {
            events |= EventMask::WRITE;
        }
        events
    }

    pub fn read_interest(&self) -> &FdBitset {
        &self.read
    }

    pub fn write_interest(&self) -> &FdBitset {
        &self.write
    }

    /// Overwrite both scratch sets with the interest sets.
    pub fn load_scratch(&mut self) {
        self.read_out.copy_from(&self.read);
        self.write_out.copy_from(&self.write);
    }

    /// Scratch word slices to hand to the wait primitive.
    #[inline]
    pub fn scratch_mut(&mut self) -> (&mut [Word], &mut [Word]) {
        (self.read_out.words_mut(), self.write_out.words_mut())
    }

    /// Ready descriptors in the scratch sets, ascending.
    pub fn ready(&self) -> Ready<'_> {
        Ready::new(self.read_out.words(), self.write_out.words())
    }

    /// Free all four bitsets.
    pub fn release(&mut self) {
        self.read.release();
        self.write.release();
        self.read_out.release();
        self.write_out.release();
    }
}

/// Iterator over `(fd, events)` for every descriptor with a set bit in
/// either scratch set. Visits each descriptor once, in ascending order.
pub struct Ready<'a> {
    read: &'a [Word],
    write: &'a [Word],
    current: usize,
    next_word: usize,
    pending: Word,
}

impl<'a> Ready<'a> {
    fn new(read: &'a [Word], write: &'a [Word]) -> Self {
        debug_assert_eq!(read.len(), write.len());
        Self {
            read,
            write,
            current: 0,
            next_word: 0,
            pending: 0,
        }
    }
}

impl Iterator for Ready<'_> {
    type Item = (usize, EventMask);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.trailing_zeros() as usize;
                self.pending &= self.pending - 1;

                let mask = (1 as Word) << bit;
                let mut events = EventMask::empty();
                if self.read[self.current] & mask != 0 {
                    events |= EventMask::READ;
                }
                if self.write[self.current] & mask != 0 {
                    events |= EventMask::WRITE;
                }
                return Some((self.current * BITS_PER_WORD + bit, events));
            }

            // Skip empty words without looking at their bits
            if self.next_word >= self.read.len() {
                return None;
            }
            self.current = self.next_word;
            self.next_word += 1;
            self.pending = self.read[self.current] | self.write[self.current];
        }
    }
}
