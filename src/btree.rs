//! The B-tree and its cursor: shared per-tree state, key search, forward
//! traversal, and insertion with root-deepening rebalance.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::cache::{self, PageCache};
use crate::error::BtreeError;
use crate::page::{Cell, MemPage, FLAG_DATA, FLAG_LEAF, FLAG_LEAF_DATA};

/// Shared state for every B-tree and cursor that touches this database:
/// the page cache, a pinned reference to page one, and the usable page
/// size.
pub struct Shared {
    pub cache: PageCache,
    pub page_one: Option<Rc<RefCell<MemPage>>>,
    pub usable_size: u16,
    open_cursors: u32,
}

impl Shared {
    pub fn new(usable_size: u16) -> Rc<RefCell<Shared>> {
        Rc::new(RefCell::new(Shared {
            cache: PageCache::new(),
            page_one: None,
            usable_size,
            open_cursors: 0,
        }))
    }

    /// `getPage`: fetch via the cache, pinning page one if fetched.
    pub fn get_page(
        shared: &Rc<RefCell<Shared>>,
        page_no: u32,
        flags: u8,
    ) -> Result<Rc<RefCell<MemPage>>, BtreeError> {
        let entry = shared.borrow_mut().cache.fetch(page_no, flags)?;
        if entry.page_no == 1 {
            shared.borrow_mut().page_one = Some(entry.page.clone());
        }
        Ok(entry.page)
    }

    /// `allocateNewPage`: bump the page counter and register a fresh page.
    pub fn allocate_new_page(
        shared: &Rc<RefCell<Shared>>,
    ) -> Result<Rc<RefCell<MemPage>>, BtreeError> {
        let entry = shared.borrow_mut().cache.allocate();
        Ok(entry.page)
    }

    /// Mark a cached page dirty, e.g. after a cursor mutates its content.
    pub fn mark_dirty(shared: &Rc<RefCell<Shared>>, page_no: u32) {
        shared.borrow_mut().cache.mark_dirty(page_no);
    }

    pub fn open_cursor_count(&self) -> u32 {
        self.open_cursors
    }
}

/// A B-tree identified by its root page number plus the shared state it
/// lives in.
#[derive(Clone)]
pub struct Btree {
    pub root_page_no: u32,
    pub shared: Rc<RefCell<Shared>>,
}

impl Btree {
    pub fn new(root_page_no: u32, shared: Rc<RefCell<Shared>>) -> Self {
        Btree {
            root_page_no,
            shared,
        }
    }

    /// Allocate a brand-new page, initialize it as a table-tree leaf, and
    /// wrap it as the root of a new tree.
    pub fn create_table(shared: Rc<RefCell<Shared>>) -> Result<Self, BtreeError> {
        let root = Shared::allocate_new_page(&shared)?;
        root.borrow_mut()
            .zero_page(FLAG_DATA | FLAG_LEAF_DATA | FLAG_LEAF)?;
        let root_page_no = root.borrow().page_no;
        debug!("created table tree with root page {}", root_page_no);
        Ok(Btree::new(root_page_no, shared))
    }

    pub fn open_cursor(&self) -> Result<Cursor, BtreeError> {
        Cursor::new(self.root_page_no, self.shared.clone())
    }
}

/// A stateful navigator: current page, position within it, and the
/// ancestor stack (root-to-`mem`, not including `mem`).
///
/// Only one cursor per tree should mutate at a time; a cursor left open
/// across another cursor's insert on the same tree is not detected as
/// invalidated and may read a stale position.
pub struct Cursor {
    pub root_page_no: u32,
    pub shared: Rc<RefCell<Shared>>,
    pub mem: Rc<RefCell<MemPage>>,
    pub cell_index: u16,
    pub p_stack: Vec<Rc<RefCell<MemPage>>>,
    pub last_compare: i8,
}

impl Cursor {
    pub fn new(root_page_no: u32, shared: Rc<RefCell<Shared>>) -> Result<Self, BtreeError> {
        let mem = Shared::get_page(&shared, root_page_no, cache::FETCH | cache::CREATE)?;
        shared.borrow_mut().open_cursors += 1;
        Ok(Cursor {
            root_page_no,
            shared,
            mem,
            cell_index: 0,
            p_stack: Vec::new(),
            last_compare: 1,
        })
    }

    fn mem_cell_num(&self) -> u16 {
        self.mem.borrow().cell_num
    }

    fn mem_right_child(&self) -> Result<u32, BtreeError> {
        self.mem.borrow().get_right_child()
    }

    fn mem_left_child(&self, k: u16) -> Result<u32, BtreeError> {
        self.mem.borrow().get_kth_left_page_number(k)
    }

    pub fn move_to_root(&mut self) -> Result<(), BtreeError> {
        self.mem = Shared::get_page(&self.shared, self.root_page_no, cache::FETCH | cache::CREATE)?;
        self.cell_index = 0;
        self.p_stack.clear();
        Ok(())
    }

    pub fn move_to_child(&mut self, page_no: u32) -> Result<(), BtreeError> {
        debug_assert_ne!(page_no, 0);
        let child = Shared::get_page(&self.shared, page_no, cache::FETCH | cache::CREATE)?;
        self.p_stack.push(self.mem.clone());
        self.cell_index = 0;
        self.mem = child;
        Ok(())
    }

    /// Pops the immediate parent into `mem`, pointing `cell_index` at the
    /// pointer-array slot whose left child is the page we came from (or
    /// at `parent.cell_num` if we came from the right child).
    pub fn move_to_parent(&mut self) -> Result<(), BtreeError> {
        let parent = self.p_stack.pop().ok_or(BtreeError::CorruptedPage)?;
        let current_page_no = self.mem.borrow().page_no;
        let parent_cell_num = parent.borrow().cell_num;
        let mut cell_index = parent_cell_num;
        for i in 0..parent_cell_num {
            if parent.borrow().get_kth_left_page_number(i)? == current_page_no {
                cell_index = i;
                break;
            }
        }
        self.cell_index = cell_index;
        self.mem = parent;
        Ok(())
    }

    /// Descend left-child pointers from `(mem, cell_index)` until a leaf
    /// is reached.
    pub fn move_to_left_most(&mut self) -> Result<(), BtreeError> {
        loop {
            let left = self.mem_left_child(self.cell_index)?;
            if left != 0 {
                self.move_to_child(left)?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Sign of `mem[cell_index].key - key`, clamped to `{-1, 0, 1}`.
    pub fn compare_key(&self, key: u32) -> Result<i8, BtreeError> {
        let cursor_key = self.mem.borrow().get_kth_key(self.cell_index)?;
        Ok(if cursor_key > key {
            1
        } else if cursor_key == key {
            0
        } else {
            -1
        })
    }

    /// Binary-searches from the root down to the leaf (or empty root)
    /// that `key` would live on, leaving the cursor positioned so that an
    /// insert honoring the returned `cmp`/`cell_index` keeps the page
    /// sorted.
    pub fn move_to(&mut self, key: u32) -> Result<i8, BtreeError> {
        self.move_to_root()?;

        // A page with zero cells and no right child is a genuinely empty
        // tree; short-circuit to +1. A page with zero cells but a
        // non-zero right child is a deepened root (root-deepening leaves
        // the root with no cells of its own) and must still be descended
        // into, or traversal after a split would silently stop at the
        // root.
        if self.mem_cell_num() == 0 && self.mem_right_child()? == 0 {
            self.last_compare = 1;
            return Ok(1);
        }

        let mut c: i8 = -1;
        loop {
            let cell_num = self.mem_cell_num();
            let mut lo: i32 = 0;
            let mut hi: i32 = cell_num as i32 - 1;
            while lo <= hi {
                let mid = (lo + (hi - lo) / 2) as u16;
                self.cell_index = mid;
                c = self.compare_key(key)?;
                if c > 0 {
                    hi = mid as i32 - 1;
                } else if c == 0 {
                    self.last_compare = 0;
                    return Ok(0);
                } else {
                    lo = mid as i32 + 1;
                }
            }

            let child = if lo >= cell_num as i32 {
                let right = self.mem_right_child()?;
                if right == 0 {
                    self.last_compare = -1;
                    return Ok(-1);
                }
                right
            } else {
                self.mem_left_child(lo as u16)?
            };

            if child == 0 {
                self.last_compare = c;
                return Ok(c);
            }
            self.move_to_child(child)?;
        }
    }

    /// Advances one cell in key order across the whole tree. A no-op (not
    /// an error) once the logical end is reached.
    pub fn move_next(&mut self) -> Result<(), BtreeError> {
        self.cell_index += 1;
        if self.cell_index >= self.mem_cell_num() {
            let right = self.mem_right_child()?;
            if right != 0 {
                self.move_to_child(right)?;
                self.move_to_left_most()?;
                return Ok(());
            }
            loop {
                if self.p_stack.is_empty() {
                    return Ok(());
                }
                self.move_to_parent()?;
                if self.cell_index < self.mem_cell_num() {
                    // Landed on the interior cell whose left subtree we
                    // just finished; that cell is itself the next key in
                    // order, so stop here rather than advancing past it.
                    return Ok(());
                }
            }
        }
        self.move_to_left_most()
    }

    /// Current `(key, payload)` under `(mem, cell_index)`, or `None` if
    /// the cursor sits past the last cell on the current page.
    pub fn get(&self) -> Result<Option<(u32, Vec<u8>)>, BtreeError> {
        if self.cell_index >= self.mem_cell_num() {
            return Ok(None);
        }
        let cell = self.mem.borrow().get_kth_cell(self.cell_index)?;
        Ok(Some((cell.key, cell.payload)))
    }

    /// Inserts a new cell in key order, restructuring the root if the
    /// insert overflows it.
    ///
    /// Duplicate-key policy: an exact-key match replaces the payload in
    /// place, keeping the existing cell's left-child pointer so subtree
    /// linkage survives.
    pub fn insert(&mut self, key: u32, payload: Vec<u8>) -> Result<(), BtreeError> {
        let loc = self.move_to(key)?;
        let mut cell = Cell::new(key, payload);

        if loc == 0 {
            cell.left_child_page_no = self.mem_left_child(self.cell_index)?;
            self.mem
                .borrow_mut()
                .replace_kth_cell(self.cell_index, cell)?;
        } else {
            if loc > 0 && self.mem_cell_num() > 0 {
                // cursor already points at a greater key: insert before it.
            } else if loc < 0 {
                self.cell_index += 1;
            }
            self.mem
                .borrow_mut()
                .insert_cell_fast(cell, self.cell_index)?;
        }
        Shared::mark_dirty(&self.shared, self.mem.borrow().page_no);

        if !self.mem.borrow().overflow.is_empty() {
            self.balance()?;
        }
        Ok(())
    }

    /// Root-deepening only: split the root into an interior page plus a
    /// new child carrying the old content (and any overflow). Sibling
    /// borrow/merge for non-root pages is not implemented — if the new
    /// child still carries overflow after the split, the insert is
    /// reported as unsupported rather than silently dropped or left to
    /// corrupt the page.
    fn balance(&mut self) -> Result<(), BtreeError> {
        let (has_overflow, full_enough) = {
            let mem = self.mem.borrow();
            (!mem.overflow.is_empty(), mem.is_more_than_a_third_full())
        };
        if !has_overflow && full_enough {
            return Ok(());
        }

        if self.p_stack.is_empty() {
            let shared = self.shared.clone();
            let root_page_no = self.mem.borrow().page_no;
            let child = {
                let mut root = self.mem.borrow_mut();
                root.balance_deep(|| {
                    let entry = Shared::allocate_new_page(&shared)?;
                    Ok(entry.borrow().clone())
                })?
            };
            Shared::mark_dirty(&self.shared, root_page_no);
            Shared::mark_dirty(&self.shared, child.page_no);

            let child_rc = Shared::get_page(&self.shared, child.page_no, cache::FETCH)?;
            *child_rc.borrow_mut() = child;

            let still_overflowing = !child_rc.borrow().overflow.is_empty();
            self.p_stack.push(self.mem.clone());
            self.mem = child_rc;
            if still_overflowing {
                return Err(BtreeError::BalanceUnsupported);
            }
            return Ok(());
        }

        if !self.mem.borrow().overflow.is_empty() {
            return Err(BtreeError::BalanceUnsupported);
        }
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.try_borrow_mut() {
            shared.open_cursors = shared.open_cursors.saturating_sub(1);
        }
        trace!("cursor on tree rooted at page {} closed", self.root_page_no);
    }
}
