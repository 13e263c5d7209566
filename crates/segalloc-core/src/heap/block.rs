//! Boundary-tag block layout.
//!
//! ```text
//!   bp - WORD          bp                           bp + size - DWORD
//!   ┌────────────┬─────────────────────────────────┬────────────┐
//!   │ header     │ payload (next/prev when free)   │ footer     │
//!   │ size | a   │                                 │ size | a   │
//!   └────────────┴─────────────────────────────────┴────────────┘
//! ```
//!
//! A block is addressed by its payload offset `bp`. Sizes are multiples of
//! `DWORD`, so the low bits of a tag word are free; bit 0 carries the
//! allocated flag. Every access is bounds-checked against the live heap
//! slice, whose last word is the epilogue header.

use crate::error::{HeapError, Result};

/// Word and header/footer size (bytes).
pub const WORD: usize = size_of::<usize>();
/// Double word: the alignment unit for block sizes and payload offsets.
pub const DWORD: usize = 2 * WORD;
/// Header + footer + two free-list links.
pub const MIN_BLOCK: usize = 2 * DWORD;

const ALLOC_BIT: usize = 0x1;
const SIZE_MASK: usize = !(DWORD - 1);

/// Pack a size and allocated bit into a word.
#[inline]
pub const fn pack(size: usize, allocated: bool) -> usize {
    size | (allocated as usize)
}

/// Decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub size: usize,
    pub allocated: bool,
}

impl Tag {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    #[inline]
    pub const fn decode(word: usize) -> Self {
        Self {
            size: word & SIZE_MASK,
            allocated: word & ALLOC_BIT != 0,
        }
    }

    #[inline]
    pub const fn encode(self) -> usize {
        pack(self.size, self.allocated)
    }
}

/// Adjusted block size for a request of `n` payload bytes: room for header
/// and footer, rounded up to `DWORD`, never below `MIN_BLOCK`.
///
/// Returns `None` when the computation overflows.
pub fn adjusted_size(n: usize) -> Option<usize> {
    let raw = n.checked_add(DWORD)?.checked_next_multiple_of(DWORD)?;
    Some(raw.max(MIN_BLOCK))
}

fn word_range(mem: &[u8], offset: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(WORD) {
        Some(end) if end <= mem.len() => Ok(offset..end),
        _ => Err(HeapError::OutOfBounds {
            offset,
            limit: mem.len(),
        }),
    }
}

pub fn read_word(mem: &[u8], offset: usize) -> Result<usize> {
    let range = word_range(mem, offset)?;
    let bytes: [u8; WORD] = mem[range]
        .try_into()
        .map_err(|_| HeapError::OutOfBounds {
            offset,
            limit: mem.len(),
        })?;
    Ok(usize::from_ne_bytes(bytes))
}

pub fn write_word(mem: &mut [u8], offset: usize, value: usize) -> Result<()> {
    let range = word_range(mem, offset)?;
    mem[range].copy_from_slice(&value.to_ne_bytes());
    Ok(())
}

/// Header offset of the block at `bp`.
#[inline]
pub const fn header_offset(bp: usize) -> usize {
    bp.wrapping_sub(WORD)
}

/// Footer offset of a block at `bp` spanning `size` bytes.
#[inline]
pub const fn footer_offset(bp: usize, size: usize) -> usize {
    bp.wrapping_add(size).wrapping_sub(DWORD)
}

pub fn read_tag(mem: &[u8], offset: usize) -> Result<Tag> {
    read_word(mem, offset).map(Tag::decode)
}

pub fn header(mem: &[u8], bp: usize) -> Result<Tag> {
    read_tag(mem, header_offset(bp))
}

/// Footer of the block at `bp`, located through its header size.
pub fn footer(mem: &[u8], bp: usize) -> Result<Tag> {
    let size = header(mem, bp)?.size;
    read_tag(mem, footer_offset(bp, size))
}

/// Writes matching header and footer tags for a block at `bp`.
///
/// Both locations are validated before either word is written.
pub fn write_tags(mem: &mut [u8], bp: usize, tag: Tag) -> Result<()> {
    let hdr = header_offset(bp);
    let ftr = footer_offset(bp, tag.size);
    word_range(mem, hdr)?;
    word_range(mem, ftr)?;
    write_word(mem, hdr, tag.encode())?;
    write_word(mem, ftr, tag.encode())
}

/// Writes a zero-size allocated epilogue header at `bp`'s header slot.
pub fn write_epilogue(mem: &mut [u8], bp: usize) -> Result<()> {
    write_word(mem, header_offset(bp), pack(0, true))
}

/// Payload offset of the block following `bp` in address order.
pub fn next_block(mem: &[u8], bp: usize) -> Result<usize> {
    let size = header(mem, bp)?.size;
    bp.checked_add(size).ok_or(HeapError::OutOfBounds {
        offset: bp,
        limit: mem.len(),
    })
}

/// Payload offset of the block preceding `bp`, found by reading that
/// block's footer just below `bp`'s header.
pub fn prev_block(mem: &[u8], bp: usize) -> Result<usize> {
    let prev_size = read_tag(mem, bp.wrapping_sub(DWORD))?.size;
    bp.checked_sub(prev_size).ok_or(HeapError::OutOfBounds {
        offset: bp,
        limit: mem.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_decode_are_exact() {
        for size in (0..64).map(|i| i * DWORD) {
            for allocated in [false, true] {
                let tag = Tag::decode(pack(size, allocated));
                assert_eq!(tag, Tag::new(size, allocated));
                assert_eq!(tag.encode(), pack(size, allocated));
            }
        }
        let huge = usize::MAX & SIZE_MASK;
        assert_eq!(Tag::decode(pack(huge, true)), Tag::new(huge, true));
    }

    #[test]
    fn adjusted_size_floors_and_rounds() {
        assert_eq!(adjusted_size(1), Some(MIN_BLOCK));
        assert_eq!(adjusted_size(DWORD), Some(MIN_BLOCK));
        assert_eq!(adjusted_size(DWORD + 1), Some(3 * DWORD));
        assert_eq!(adjusted_size(2 * DWORD), Some(3 * DWORD));
        assert_eq!(adjusted_size(usize::MAX), None);
        assert_eq!(adjusted_size(usize::MAX - DWORD + 1), None);
    }

    #[test]
    fn tags_locate_neighbours() {
        let mut mem = vec![0u8; 8 * DWORD];
        let first = DWORD;
        write_tags(&mut mem, first, Tag::new(2 * DWORD, true)).unwrap();
        let second = next_block(&mem, first).unwrap();
        assert_eq!(second, first + 2 * DWORD);
        write_tags(&mut mem, second, Tag::new(3 * DWORD, false)).unwrap();

        assert_eq!(header(&mem, second).unwrap(), Tag::new(3 * DWORD, false));
        assert_eq!(footer(&mem, second).unwrap(), Tag::new(3 * DWORD, false));
        assert_eq!(prev_block(&mem, second).unwrap(), first);
    }

    #[test]
    fn accesses_past_the_heap_are_rejected() {
        let mut mem = vec![0u8; 4 * WORD];
        assert!(matches!(
            read_word(&mem, 3 * WORD + 1),
            Err(HeapError::OutOfBounds { .. })
        ));
        assert!(read_word(&mem, usize::MAX - 2).is_err());
        assert!(header(&mem, 0).is_err());

        let before = mem.clone();
        assert!(write_tags(&mut mem, WORD, Tag::new(8 * DWORD, false)).is_err());
        assert_eq!(mem, before, "no partial tag write");
    }

    #[test]
    fn epilogue_is_zero_size_allocated() {
        let mut mem = vec![0u8; 2 * WORD];
        write_epilogue(&mut mem, 2 * WORD).unwrap();
        assert_eq!(header(&mem, 2 * WORD).unwrap(), Tag::new(0, true));
    }
}
