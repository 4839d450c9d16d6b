//! In-memory representation of a single 4 KiB database page: header,
//! cell-pointer array, cell-content heap, and the transient overflow list
//! used while a cell is waiting for the next balance pass.

use crate::error::BtreeError;
use log::{debug, trace};

/// Fixed page size; this engine does not support variable page sizes.
pub const PAGE_SIZE: u16 = 4096;

pub const FLAG_DATA: u8 = 0x01;
pub const FLAG_INDEX: u8 = 0x02;
pub const FLAG_LEAF_DATA: u8 = 0x04;
pub const FLAG_LEAF: u8 = 0x08;

/// `true` if `flags` is one of the four valid combinations.
pub fn check_flags(flags: u8) -> bool {
    flags == FLAG_INDEX
        || flags == FLAG_INDEX | FLAG_LEAF
        || flags == FLAG_DATA | FLAG_LEAF_DATA
        || flags == FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF
}

fn get_u16(buf: &[u8], offset: usize) -> Result<u16, BtreeError> {
    let slice = buf.get(offset..offset + 2).ok_or(BtreeError::CorruptedPage)?;
    let bytes: [u8; 2] = slice.try_into().map_err(|_| BtreeError::CorruptedPage)?;
    Ok(u16::from_le_bytes(bytes))
}

fn set_u16(buf: &mut [u8], offset: usize, val: u16) -> Result<(), BtreeError> {
    let slice = buf
        .get_mut(offset..offset + 2)
        .ok_or(BtreeError::CorruptedPage)?;
    slice.copy_from_slice(&val.to_le_bytes());
    Ok(())
}

fn get_u32(buf: &[u8], offset: usize) -> Result<u32, BtreeError> {
    let slice = buf.get(offset..offset + 4).ok_or(BtreeError::CorruptedPage)?;
    let bytes: [u8; 4] = slice.try_into().map_err(|_| BtreeError::CorruptedPage)?;
    Ok(u32::from_le_bytes(bytes))
}

fn set_u32(buf: &mut [u8], offset: usize, val: u32) -> Result<(), BtreeError> {
    let slice = buf
        .get_mut(offset..offset + 4)
        .ok_or(BtreeError::CorruptedPage)?;
    slice.copy_from_slice(&val.to_le_bytes());
    Ok(())
}

/// One record: `(leftChild, size, key, payload)`. Payload is always owned
/// here rather than borrowed from the page buffer — keeping a cell
/// reference alive across a mutation of the page it came from would
/// otherwise require unsafe code or a lifetime that outlives `&mut self`
/// calls on the same page, which defeats the point. Pages are 4 KiB; the
/// copy is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub left_child_page_no: u32,
    pub payload_size: u16,
    pub key: u32,
    pub payload: Vec<u8>,
}

impl Cell {
    pub fn new(key: u32, payload: Vec<u8>) -> Self {
        Cell {
            left_child_page_no: 0,
            payload_size: payload.len() as u16,
            key,
            payload,
        }
    }

    /// Total encoded size of this cell on a page: `10 + payloadSize`.
    pub fn encoded_len(&self) -> u16 {
        10 + self.payload_size
    }
}

/// The in-memory representation of one page. Owns the authoritative
/// 4096-byte buffer and caches fields parsed out of it.
///
/// The shared B-tree state a page belongs to is deliberately *not* stored
/// here: a page that needs it (only `balance_deep`, when allocating a new
/// sibling) takes it as an explicit parameter instead of holding a
/// back-reference, which avoids a pointer cycle between a page and the
/// cache that owns it.
#[derive(Debug, Clone)]
pub struct MemPage {
    pub is_init: bool,
    pub page_no: u32,
    pub is_data_page: bool,
    pub is_data_leaf: bool,
    pub is_leaf: bool,
    pub is_page_one: bool,
    pub cell_num: u16,
    pub raw_data: Vec<u8>,
    pub header_offset: u16,
    pub cell_index_offset: u16,
    pub cell_content_offset: u16,
    pub free_bytes: u16,
    pub overflow: Vec<Cell>,
}

impl MemPage {
    /// A fresh, all-zero buffer. Header is not yet written; call
    /// `zero_page` before any structural use.
    pub fn new_zero(page_no: u32) -> Self {
        MemPage {
            is_init: false,
            page_no,
            is_data_page: false,
            is_data_leaf: false,
            is_leaf: false,
            is_page_one: page_no == 1,
            cell_num: 0,
            raw_data: vec![0u8; PAGE_SIZE as usize],
            header_offset: if page_no == 1 { 100 } else { 0 },
            cell_index_offset: 0,
            cell_content_offset: 0,
            free_bytes: 0,
            overflow: Vec::new(),
        }
    }

    fn header_len(is_leaf: bool) -> u16 {
        if is_leaf {
            8
        } else {
            12
        }
    }

    fn set_flag_fields(&mut self, flags: u8) -> Result<(), BtreeError> {
        if !check_flags(flags) {
            return Err(BtreeError::InvalidFlags);
        }
        self.is_data_page = flags & FLAG_DATA != 0;
        self.is_data_leaf = flags & FLAG_LEAF_DATA != 0;
        self.is_leaf = flags & FLAG_LEAF != 0;
        Ok(())
    }

    /// Reinitialize this page as empty, with the given flags. Does not
    /// touch `page_no` or any shared-state linkage.
    pub fn zero_page(&mut self, flags: u8) -> Result<(), BtreeError> {
        self.set_flag_fields(flags)?;
        let hdr = self.header_offset as usize;
        self.raw_data[hdr] = flags;
        for b in self.raw_data[hdr + 1..].iter_mut() {
            *b = 0;
        }

        let header_len = Self::header_len(self.is_leaf);
        self.cell_index_offset = self.header_offset + header_len;
        self.cell_content_offset = PAGE_SIZE;
        set_u16(&mut self.raw_data, hdr + 5, PAGE_SIZE)?;

        self.cell_num = 0;
        self.overflow.clear();
        self.is_init = true;
        self.compute_free_bytes();
        trace!(
            "zeroed page {} flags=0x{:02x} leaf={}",
            self.page_no,
            flags,
            self.is_leaf
        );
        Ok(())
    }

    /// Parse the cached fields out of `raw_data`. Does not compute
    /// `free_bytes`; call `compute_free_bytes` separately if needed.
    pub fn init_from_raw(&mut self) -> Result<(), BtreeError> {
        if self.is_init {
            return Err(BtreeError::CorruptedPage);
        }
        self.is_page_one = self.page_no == 1;
        let hdr = self.header_offset as usize;
        let flags = self.raw_data[hdr];
        if !check_flags(flags) {
            return Err(BtreeError::InvalidPageType);
        }
        self.is_data_page = flags & FLAG_DATA != 0;
        self.is_leaf = flags & FLAG_LEAF != 0;
        self.is_data_leaf = self.is_data_page && self.is_leaf;

        self.cell_index_offset = self.header_offset + Self::header_len(self.is_leaf);
        self.cell_content_offset = get_u16(&self.raw_data, hdr + 5)?;
        self.cell_num = get_u16(&self.raw_data, hdr + 1)?;
        self.is_init = true;
        Ok(())
    }

    pub fn compute_free_bytes(&mut self) {
        let cell_last = self.cell_index_offset + 2 * self.cell_num;
        self.free_bytes = self.cell_content_offset - cell_last;
    }

    /// Copy header, cell-pointer array, and cell content from `src` into
    /// `self`, then reparse. `self` keeps its own page number (and thus
    /// its own header offset — if `self` is page one, the header is
    /// rebased to offset 100).
    pub fn copy_from(&mut self, src: &MemPage) -> Result<(), BtreeError> {
        let cell_content_offset = src.cell_content_offset as usize;
        self.raw_data[cell_content_offset..]
            .copy_from_slice(&src.raw_data[cell_content_offset..]);

        let from_header_offset = src.header_offset as usize;
        let to_header_offset = if self.page_no == 1 { 100 } else { 0 };
        let region_len =
            src.cell_index_offset as usize + 2 * src.cell_num as usize - from_header_offset;
        self.raw_data[to_header_offset..to_header_offset + region_len].copy_from_slice(
            &src.raw_data[from_header_offset..from_header_offset + region_len],
        );

        self.header_offset = to_header_offset as u16;
        self.is_init = false;
        self.init_from_raw()?;
        self.compute_free_bytes();
        Ok(())
    }

    /// For leaves, 0. Otherwise the right-child page number in the header.
    pub fn get_right_child(&self) -> Result<u32, BtreeError> {
        if self.is_leaf {
            Ok(0)
        } else {
            get_u32(&self.raw_data, self.header_offset as usize + 8)
        }
    }

    pub fn set_right_child(&mut self, page_no: u32) -> Result<(), BtreeError> {
        set_u32(&mut self.raw_data, self.header_offset as usize + 8, page_no)
    }

    pub fn get_kth_cell_index(&self, k: u16) -> Result<u16, BtreeError> {
        get_u16(&self.raw_data, (self.cell_index_offset + k * 2) as usize)
    }

    pub fn get_kth_left_page_number(&self, k: u16) -> Result<u32, BtreeError> {
        let offset = self.get_kth_cell_index(k)? as usize;
        get_u32(&self.raw_data, offset)
    }

    pub fn get_kth_cell_size(&self, k: u16) -> Result<u16, BtreeError> {
        let offset = self.get_kth_cell_index(k)? as usize + 4;
        get_u16(&self.raw_data, offset)
    }

    pub fn get_kth_key(&self, k: u16) -> Result<u32, BtreeError> {
        let offset = self.get_kth_cell_index(k)? as usize + 6;
        get_u32(&self.raw_data, offset)
    }

    pub fn get_kth_cell_content(&self, k: u16) -> Result<&[u8], BtreeError> {
        let offset = self.get_kth_cell_index(k)? as usize;
        let size = self.get_kth_cell_size(k)? as usize;
        Ok(&self.raw_data[offset + 10..offset + 10 + size])
    }

    pub fn get_kth_cell(&self, k: u16) -> Result<Cell, BtreeError> {
        let offset = self.get_kth_cell_index(k)?;
        let size = self.get_kth_cell_size(k)?;
        let left_child = self.get_kth_left_page_number(k)?;
        let key = self.get_kth_key(k)?;
        let start = offset as usize + 10;
        Ok(Cell {
            left_child_page_no: left_child,
            payload_size: size,
            key,
            payload: self.raw_data[start..start + size as usize].to_vec(),
        })
    }

    /// Find space for at least `size` bytes on the free-block chain.
    /// This path is never exercised in practice: deletion, the only
    /// producer of free blocks, isn't implemented, so the first-free-block
    /// pointer never becomes non-zero. Kept for header-field fidelity only.
    fn find_free_space(&mut self, size: u16) -> Result<u16, BtreeError> {
        let hdr = self.header_offset as usize;
        let free_ptr = get_u16(&self.raw_data, hdr + 3)?;
        let free_size = get_u16(&self.raw_data, free_ptr as usize + 2)?;
        if free_size > size {
            let remain = free_size - size;
            set_u16(&mut self.raw_data, free_ptr as usize + 2, remain)?;
            Ok(free_ptr + remain)
        } else {
            Ok(free_ptr)
        }
    }

    /// Carve out `size` contiguous bytes for a new cell's content.
    pub fn allocate_space(&mut self, size: u16) -> Result<u16, BtreeError> {
        let hdr = self.header_offset as usize;
        let gap = self.cell_index_offset + 2 * self.cell_num;
        let top = get_u16(&self.raw_data, hdr + 5)?;

        let has_free_block = self.raw_data[hdr + 3] != 0 || self.raw_data[hdr + 4] != 0;
        if has_free_block && gap + 2 <= top {
            return self.find_free_space(size);
        }

        let new_top = top - size;
        set_u16(&mut self.raw_data, hdr + 5, new_top)?;
        self.cell_content_offset = new_top;
        Ok(new_top)
    }

    /// Insert `cell` at pointer-array slot `i`, in the free area. If the
    /// page has no room, append to `overflow` and leave the page
    /// untouched — caller (the cursor) must trigger a balance. Does not
    /// validate or enforce key ordering; the caller must supply the
    /// correct `i`.
    pub fn insert_cell_fast(&mut self, cell: Cell, i: u16) -> Result<(), BtreeError> {
        let mut buf = Vec::with_capacity(10 + cell.payload.len());
        buf.extend_from_slice(&cell.left_child_page_no.to_le_bytes());
        buf.extend_from_slice(&cell.payload_size.to_le_bytes());
        buf.extend_from_slice(&cell.key.to_le_bytes());
        buf.extend_from_slice(&cell.payload);
        let size = buf.len() as u16;

        if 2 + size > self.free_bytes {
            trace!(
                "page {} has no room for key {} (need {} have {}), deferring to overflow",
                self.page_no,
                cell.key,
                2 + size,
                self.free_bytes
            );
            self.overflow.push(cell);
            return Ok(());
        }

        let base = (self.cell_index_offset + 2 * i) as usize;
        let tail_len = (2 * (self.cell_num - i)) as usize;
        self.raw_data.copy_within(base..base + tail_len, base + 2);

        let offset = self.allocate_space(size)?;
        self.raw_data[offset as usize..offset as usize + buf.len()].copy_from_slice(&buf);
        set_u16(&mut self.raw_data, base, offset)?;

        self.cell_num += 1;
        set_u16(
            &mut self.raw_data,
            self.header_offset as usize + 1,
            self.cell_num,
        )?;
        self.free_bytes -= 2 + size;
        Ok(())
    }

    /// Overwrite the cell at pointer-array slot `k` with `cell` (same
    /// key), reusing its pointer-array entry but not its old content
    /// bytes — those are abandoned the same way a deleted cell's bytes
    /// would be, since reclaiming them is tied to the free-block chain
    /// this core never exercises. Falls back to `overflow` if the new
    /// encoding doesn't fit in the remaining free space.
    pub fn replace_kth_cell(&mut self, k: u16, cell: Cell) -> Result<(), BtreeError> {
        let mut buf = Vec::with_capacity(10 + cell.payload.len());
        buf.extend_from_slice(&cell.left_child_page_no.to_le_bytes());
        buf.extend_from_slice(&cell.payload_size.to_le_bytes());
        buf.extend_from_slice(&cell.key.to_le_bytes());
        buf.extend_from_slice(&cell.payload);
        let size = buf.len() as u16;

        if size > self.free_bytes {
            trace!(
                "page {} has no room to replace key {} in place, deferring to overflow",
                self.page_no,
                cell.key
            );
            self.overflow.push(cell);
            return Ok(());
        }

        let offset = self.allocate_space(size)?;
        self.raw_data[offset as usize..offset as usize + buf.len()].copy_from_slice(&buf);
        let base = (self.cell_index_offset + 2 * k) as usize;
        set_u16(&mut self.raw_data, base, offset)?;
        self.free_bytes -= size;
        Ok(())
    }

    /// More than one-third full (the SQLite "don't bother" threshold)?
    pub fn is_more_than_a_third_full(&self) -> bool {
        self.free_bytes as u32 * 3 <= PAGE_SIZE as u32 * 2
    }

    /// Root-deepening split: move this page's content into a brand-new
    /// child page, turn this page into a non-leaf interior page pointing
    /// at that child as its right child, and return the child.
    ///
    /// `allocate_page` must return a freshly-zeroed page with a page
    /// number assigned by the caller's page cache.
    pub fn balance_deep<F>(&mut self, allocate_page: F) -> Result<MemPage, BtreeError>
    where
        F: FnOnce() -> Result<MemPage, BtreeError>,
    {
        let mut child = allocate_page()?;
        child.copy_from(self)?;
        child.overflow = std::mem::take(&mut self.overflow);

        let child_flags = child.raw_data[child.header_offset as usize] & !FLAG_LEAF;
        self.zero_page(child_flags)?;
        self.set_right_child(child.page_no)?;
        debug!(
            "balanced root page {} deep: new child page {}",
            self.page_no, child.page_no
        );
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_page_leaf_computes_expected_free_bytes() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        assert_eq!(mem.free_bytes, PAGE_SIZE - 8);
    }

    #[test]
    fn zero_page_interior_computes_expected_free_bytes() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA).unwrap();
        assert_eq!(mem.free_bytes, PAGE_SIZE - 12);
    }

    #[test]
    fn zero_page_on_page_one_reserves_100_byte_prefix() {
        let mut mem = MemPage::new_zero(1);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        assert_eq!(mem.free_bytes, PAGE_SIZE - 108);

        let mut mem = MemPage::new_zero(1);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA).unwrap();
        assert_eq!(mem.free_bytes, PAGE_SIZE - 112);
    }

    #[test]
    fn zero_page_rejects_invalid_flag_combination() {
        let mut mem = MemPage::new_zero(2);
        assert_eq!(mem.zero_page(0x03), Err(BtreeError::InvalidFlags));
    }

    #[test]
    fn insert_and_read_back_single_cell() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        let cell = Cell::new(1, vec![0x1, 0x2, 0x3]);
        mem.insert_cell_fast(cell, 0).unwrap();
        assert_eq!(mem.cell_num, 1);
        let back = mem.get_kth_cell(0).unwrap();
        assert_eq!(back.key, 1);
        assert_eq!(back.payload, vec![0x1, 0x2, 0x3]);
        assert_eq!(mem.free_bytes, (PAGE_SIZE - 8) - (2 + 10 + 3));
    }

    #[test]
    fn insert_cell_that_does_not_fit_goes_to_overflow() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        let huge_payload = vec![0u8; PAGE_SIZE as usize];
        let cell = Cell::new(1, huge_payload);
        mem.insert_cell_fast(cell, 0).unwrap();
        assert_eq!(mem.cell_num, 0);
        assert_eq!(mem.overflow.len(), 1);
    }

    #[test]
    fn sorted_insert_within_a_page() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        mem.insert_cell_fast(Cell::new(2, vec![4, 5, 6]), 0).unwrap();
        mem.insert_cell_fast(Cell::new(1, vec![1, 2, 3]), 0).unwrap();
        mem.insert_cell_fast(Cell::new(3, vec![7, 8, 9]), 2).unwrap();

        assert_eq!(mem.get_kth_cell(0).unwrap().payload, vec![1, 2, 3]);
        assert_eq!(mem.get_kth_cell(1).unwrap().payload, vec![4, 5, 6]);
        assert_eq!(mem.get_kth_cell(2).unwrap().payload, vec![7, 8, 9]);
    }

    #[test]
    fn replace_kth_cell_keeps_cell_count_and_key_but_swaps_payload() {
        let mut mem = MemPage::new_zero(2);
        mem.zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF).unwrap();
        mem.insert_cell_fast(Cell::new(1, vec![1, 2, 3]), 0).unwrap();

        mem.replace_kth_cell(0, Cell::new(1, vec![9, 9])).unwrap();

        assert_eq!(mem.cell_num, 1);
        let back = mem.get_kth_cell(0).unwrap();
        assert_eq!(back.key, 1);
        assert_eq!(back.payload, vec![9, 9]);
    }
}
