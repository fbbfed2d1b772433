//! Whole-heap consistency checking.
//!
//! [`Heap::audit`] walks the heap twice: once physically from the first
//! block to the epilogue, and once along every free list. It never trusts a
//! size or link before bounds-checking it, so it reports corruption instead
//! of panicking on it.

use alloc::{string::String, vec::Vec};
use core::fmt;

use snafu::{Location, Snafu};

use crate::{
    Heap,
    block::{ALIGNMENT, Block, DWORD, MIN_BLOCK_SIZE, Tag, WORD, read_word},
    region::HeapRegion,
    size_class::{Prologue, SizeClass},
};

/// One broken heap invariant.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum Violation {
    #[display("prologue word at {offset:#x} is {found:#x}")]
    Prologue { offset: usize, found: u32 },
    #[display("list end marker at {offset:#x} is {found:#x}")]
    ListEndMarker { offset: usize, found: u32 },
    #[display("epilogue at {offset:#x} is {found:#x}")]
    Epilogue { offset: usize, found: u32 },
    #[display("block {block:#x} has a misaligned payload")]
    Misaligned { block: usize },
    #[display("block {block:#x} has invalid size {size}")]
    Undersized { block: usize, size: usize },
    #[display("block {block:#x} of size {size} runs past the epilogue")]
    Overrun { block: usize, size: usize },
    #[display("free block {block:#x} has header {header:#x} but footer {footer:#x}")]
    TagMismatch { block: usize, header: u32, footer: u32 },
    #[display("free blocks {block:#x} and {next:#x} are adjacent")]
    AdjacentFree { block: usize, next: usize },
    #[display("block {block:#x} on list {class} is allocated")]
    ListedAllocated { class: SizeClass, block: usize },
    #[display("list {class} links from {from:#x} to {link:#x}, which is not a block")]
    LinkOutOfBounds {
        class: SizeClass,
        from: usize,
        link: usize,
    },
    #[display("block {block:#x} on list {class} links back to {found:#x} instead of {expected:#x}")]
    AsymmetricLink {
        class: SizeClass,
        block: usize,
        expected: usize,
        found: usize,
    },
    #[display("block {block:#x} of size {size} is on list {class}")]
    WrongClass {
        class: SizeClass,
        block: usize,
        size: usize,
    },
    #[display("list {class} does not terminate")]
    ListCycle { class: SizeClass },
    #[display("heap holds {walked} free blocks but the lists hold {listed}")]
    FreeCountMismatch { walked: usize, listed: usize },
}

/// The heap failed a consistency check.
#[derive(Debug, Snafu)]
#[snafu(display(
    "heap corruption detected at {call_site}: {}",
    ViolationList(violations)
))]
pub struct HeapCorruption {
    call_site: String,
    violations: Vec<Violation>,
    #[snafu(implicit)]
    location: Location,
}

impl HeapCorruption {
    #[must_use]
    pub fn call_site(&self) -> &str {
        &self.call_site
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

struct ViolationList<'a>(&'a [Violation]);

impl fmt::Display for ViolationList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.0.len())?;
        for violation in self.0 {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl<R> Heap<R>
where
    R: HeapRegion,
{
    /// Collects every broken invariant without modifying the heap.
    ///
    /// An empty result means the heap is consistent.
    #[must_use]
    pub fn audit(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.audit_markers(&mut violations);
        let walked = self.audit_blocks(&mut violations);
        let listed = self.audit_lists(&mut violations);
        if walked != listed {
            violations.push(Violation::FreeCountMismatch { walked, listed });
        }
        violations
    }

    /// Like [`audit`](Self::audit), but fails with the violations tagged by
    /// `call_site`.
    pub fn validate(&self, call_site: &str) -> Result<(), HeapCorruption> {
        let violations = self.audit();
        if violations.is_empty() {
            return Ok(());
        }
        HeapCorruptionSnafu {
            call_site,
            violations,
        }
        .fail()
    }

    /// Panics with a report of every violation if the heap is inconsistent.
    ///
    /// # Panics
    ///
    /// Panics if [`Heap::audit`] finds any violation. The message names
    /// `call_site` and lists every violation.
    #[track_caller]
    pub fn check_heap(&self, call_site: &str) {
        if let Err(err) = self.validate(call_site) {
            panic!("{err}");
        }
    }

    fn audit_markers(&self, violations: &mut Vec<Violation>) {
        let mem = self.mem();
        let prologue = self.prologue;
        let block = prologue.block();
        let expected = Tag::allocated(Prologue::SIZE).pack();
        for offset in [block.offset(), block.offset() + Prologue::SIZE - WORD] {
            let found = read_word(mem, offset);
            if found != expected {
                violations.push(Violation::Prologue { offset, found });
            }
        }

        let end = Tag::END.pack();
        let offset = prologue.sentinel().offset();
        let found = read_word(mem, offset);
        if found != end {
            violations.push(Violation::ListEndMarker { offset, found });
        }

        let offset = self.epilogue().offset();
        let found = read_word(mem, offset);
        if found != end {
            violations.push(Violation::Epilogue { offset, found });
        }
    }

    /// Walks blocks in address order and returns the number of free ones.
    fn audit_blocks(&self, violations: &mut Vec<Violation>) -> usize {
        let mem = self.mem();
        let low = self.prologue.low();
        let epilogue = self.epilogue();

        let mut free_blocks = 0;
        let mut prev_free: Option<Block> = None;
        let mut block = self.prologue.first_block();
        while block < epilogue {
            let tag = block.tag(mem);
            if !(block.payload() - low).is_multiple_of(ALIGNMENT) {
                violations.push(Violation::Misaligned {
                    block: block.offset(),
                });
            }
            if tag.size < MIN_BLOCK_SIZE || !tag.size.is_multiple_of(DWORD) {
                violations.push(Violation::Undersized {
                    block: block.offset(),
                    size: tag.size,
                });
                break;
            }
            if block.offset() + tag.size > epilogue.offset() {
                violations.push(Violation::Overrun {
                    block: block.offset(),
                    size: tag.size,
                });
                break;
            }

            if tag.allocated {
                prev_free = None;
            } else {
                free_blocks += 1;
                let header = read_word(mem, block.offset());
                let footer = read_word(mem, block.footer(mem));
                if header != footer {
                    violations.push(Violation::TagMismatch {
                        block: block.offset(),
                        header,
                        footer,
                    });
                }
                if let Some(prev) = prev_free.replace(block) {
                    violations.push(Violation::AdjacentFree {
                        block: prev.offset(),
                        next: block.offset(),
                    });
                }
            }
            block = block.next(mem);
        }
        free_blocks
    }

    /// Walks every free list and returns the number of listed blocks.
    fn audit_lists(&self, violations: &mut Vec<Violation>) -> usize {
        let mem = self.mem();
        let prologue = self.prologue;
        let low = prologue.low();
        let first = prologue.first_block().offset();
        let epilogue = self.epilogue().offset();
        let is_block = |offset: usize| {
            offset >= first
                && offset
                    .checked_add(MIN_BLOCK_SIZE)
                    .is_some_and(|end| end <= epilogue)
                && (offset - low) % DWORD == WORD
        };
        let max_len = (epilogue - first) / MIN_BLOCK_SIZE;

        let mut listed = 0;
        for class in SizeClass::all() {
            let mut prev = prologue.head(class);
            let mut cursor = prev.next_free(mem);
            let mut len = 0;
            while cursor != prologue.sentinel() {
                if !is_block(cursor.offset()) {
                    violations.push(Violation::LinkOutOfBounds {
                        class,
                        from: prev.offset(),
                        link: cursor.offset(),
                    });
                    break;
                }
                if len == max_len {
                    violations.push(Violation::ListCycle { class });
                    break;
                }
                len += 1;

                let tag = cursor.tag(mem);
                if tag.allocated {
                    violations.push(Violation::ListedAllocated {
                        class,
                        block: cursor.offset(),
                    });
                }
                if !class.contains(tag.size) {
                    violations.push(Violation::WrongClass {
                        class,
                        block: cursor.offset(),
                        size: tag.size,
                    });
                }
                let back = cursor.prev_free(mem);
                if back != prev {
                    violations.push(Violation::AsymmetricLink {
                        class,
                        block: cursor.offset(),
                        expected: prev.offset(),
                        found: back.offset(),
                    });
                }
                prev = cursor;
                cursor = cursor.next_free(mem);
            }
            listed += len;
        }
        listed
    }
}
