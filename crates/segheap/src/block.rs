//! Block layout and boundary tags.
//!
//! Every block starts with a one-word header holding its size and an
//! allocated bit. A free block repeats the header in a trailing footer and
//! embeds two list links right after the header:
//!
//! ```text
//! Free block (size >= 24):
//! ┌──────────┬─────────────┬─────────────┬─────────────┬──────────┐
//! │ header   │ next (u64)  │ prev (u64)  │ ...         │ footer   │
//! │ size | 0 │             │             │             │ size | 0 │
//! └──────────┴─────────────┴─────────────┴─────────────┴──────────┘
//! 0          4             12            20      size - 4         size
//!
//! Allocated block:
//! ┌──────────┬──────────────────────────────────────────┬──────────┐
//! │ size | 1 │ payload (8-byte aligned)                 │ size | 1 │
//! └──────────┴──────────────────────────────────────────┴──────────┘
//! ```
//!
//! A [`Block`] is only an offset of a header inside the heap bytes. All
//! decoding goes through a [`DataView`], so a corrupted size or link can make
//! an access panic on the bounds check but never read outside the heap.

use dataview::DataView;
use platform_cast::CastFrom as _;

/// Size of a header or footer word.
pub(crate) const WORD: usize = 4;

/// Size of a double word, the alignment unit of blocks and payloads.
pub(crate) const DWORD: usize = 8;

/// Size of an embedded list link.
const LINK: usize = 8;

/// Alignment guaranteed for every payload, relative to the heap start.
pub const ALIGNMENT: usize = DWORD;

/// Header and footer overhead of every block.
pub const OVERHEAD: usize = 2 * WORD;

/// The smallest block that can hold a header, a footer and two links.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * LINK;

/// The largest size a header word can encode.
pub const MAX_BLOCK_SIZE: usize = SIZE_MASK as usize;

const ALLOCATED_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

const _: () = assert!(MIN_BLOCK_SIZE == 3 * DWORD);
const _: () = assert!(MIN_BLOCK_SIZE.is_multiple_of(ALIGNMENT));

/// Decoded contents of a header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
    pub(crate) size: usize,
    pub(crate) allocated: bool,
}

impl Tag {
    /// The zero-size allocated tag of the list-end sentinel and the epilogue.
    pub(crate) const END: Self = Self::allocated(0);

    pub(crate) const fn free(size: usize) -> Self {
        Self {
            size,
            allocated: false,
        }
    }

    pub(crate) const fn allocated(size: usize) -> Self {
        Self {
            size,
            allocated: true,
        }
    }

    pub(crate) fn unpack(word: u32) -> Self {
        Self {
            size: usize::cast_from(word & SIZE_MASK),
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    pub(crate) fn pack(self) -> u32 {
        debug_assert!(self.size <= MAX_BLOCK_SIZE, "block size does not fit a tag");
        debug_assert!(self.size.is_multiple_of(DWORD), "unaligned block size");
        (self.size as u32) | u32::from(self.allocated)
    }
}

/// Reads the raw word at `offset`.
pub(crate) fn read_word(mem: &DataView, offset: usize) -> u32 {
    mem.read::<u32>(offset)
}

/// Writes the raw word at `offset`.
pub(crate) fn write_word(mem: &mut DataView, offset: usize, word: u32) {
    mem.write(offset, &word);
}

/// A block, identified by the offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
    pub(crate) const fn at(offset: usize) -> Self {
        Self(offset)
    }

    /// Returns the block whose payload starts at `payload`.
    pub(crate) const fn from_payload(payload: usize) -> Option<Self> {
        match payload.checked_sub(WORD) {
            Some(offset) => Some(Self(offset)),
            None => None,
        }
    }

    pub(crate) const fn offset(self) -> usize {
        self.0
    }

    pub(crate) const fn payload(self) -> usize {
        self.0 + WORD
    }

    pub(crate) fn tag(self, mem: &DataView) -> Tag {
        Tag::unpack(read_word(mem, self.0))
    }

    pub(crate) fn size(self, mem: &DataView) -> usize {
        self.tag(mem).size
    }

    pub(crate) fn is_allocated(self, mem: &DataView) -> bool {
        self.tag(mem).allocated
    }

    /// Offset of the footer word, derived from the header size.
    pub(crate) fn footer(self, mem: &DataView) -> usize {
        self.0 + self.size(mem) - WORD
    }

    #[cfg(test)]
    pub(crate) fn footer_tag(self, mem: &DataView) -> Tag {
        Tag::unpack(read_word(mem, self.footer(mem)))
    }

    /// Writes only the header word.
    pub(crate) fn set_header(self, mem: &mut DataView, tag: Tag) {
        write_word(mem, self.0, tag.pack());
    }

    /// Writes `tag` to both the header and the footer implied by `tag.size`.
    pub(crate) fn set_tags(self, mem: &mut DataView, tag: Tag) {
        debug_assert!(tag.size >= MIN_BLOCK_SIZE, "block below minimum size");
        let word = tag.pack();
        write_word(mem, self.0, word);
        write_word(mem, self.0 + tag.size - WORD, word);
    }

    /// The physically following block.
    pub(crate) fn next(self, mem: &DataView) -> Self {
        Self(self.0 + self.size(mem))
    }

    /// Tag of the physically preceding block, read from its footer.
    pub(crate) fn prev_tag(self, mem: &DataView) -> Tag {
        Tag::unpack(read_word(mem, self.0 - WORD))
    }

    /// The physically preceding block.
    ///
    /// Only meaningful when the preceding block carries a valid footer,
    /// i.e. when it is free.
    pub(crate) fn prev(self, mem: &DataView) -> Self {
        Self(self.0 - self.prev_tag(mem).size)
    }

    pub(crate) fn next_free(self, mem: &DataView) -> Self {
        Self(read_link(mem, self.0 + WORD))
    }

    pub(crate) fn prev_free(self, mem: &DataView) -> Self {
        Self(read_link(mem, self.0 + WORD + LINK))
    }

    pub(crate) fn set_next_free(self, mem: &mut DataView, next: Self) {
        write_link(mem, self.0 + WORD, next.0);
    }

    pub(crate) fn set_prev_free(self, mem: &mut DataView, prev: Self) {
        write_link(mem, self.0 + WORD + LINK, prev.0);
    }
}

fn read_link(mem: &DataView, offset: usize) -> usize {
    usize::cast_from(mem.read::<u64>(offset))
}

fn write_link(mem: &mut DataView, offset: usize, target: usize) {
    mem.write(offset, &u64::cast_from(target));
}
