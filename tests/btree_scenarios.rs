//! End-to-end scenarios against the public B-tree surface: insertion
//! ordering, free-byte accounting, overflow-driven root splits, and the
//! page-cache creation quirk.

use btree_engine::btree::{Btree, Shared};
use btree_engine::cache::{PageCache, CREATE, FETCH};
use btree_engine::error::BtreeError;
use btree_engine::page::PAGE_SIZE;

#[test]
fn single_insert_into_empty_root() -> Result<(), BtreeError> {
    let shared = Shared::new(PAGE_SIZE);
    let tree = Btree::create_table(shared)?;
    let mut cursor = tree.open_cursor()?;

    cursor.insert(1, vec![0x1, 0x2, 0x3])?;

    cursor.move_to_root()?;
    assert_eq!(cursor.mem.borrow().get_kth_cell(0)?.payload, vec![0x1, 0x2, 0x3]);
    Ok(())
}

#[test]
fn sorted_within_a_page_and_free_bytes_accounting() -> Result<(), BtreeError> {
    let shared = Shared::new(PAGE_SIZE);
    let tree = Btree::create_table(shared)?;
    let mut cursor = tree.open_cursor()?;

    cursor.move_to_root()?;
    let initial_free = cursor.mem.borrow().free_bytes;

    cursor.insert(2, vec![4, 5, 6])?;
    cursor.insert(1, vec![1, 2, 3])?;
    cursor.insert(3, vec![7, 8, 9])?;

    cursor.move_to_root()?;
    let mem = cursor.mem.borrow();
    assert_eq!(mem.get_kth_cell(0)?.payload, vec![1, 2, 3]);
    assert_eq!(mem.get_kth_cell(1)?.payload, vec![4, 5, 6]);
    assert_eq!(mem.get_kth_cell(2)?.payload, vec![7, 8, 9]);
    assert_eq!(mem.free_bytes, initial_free - 3 * (2 + 10 + 3));
    Ok(())
}

#[test]
fn mixed_order_nine_keys_land_in_sorted_positions() -> Result<(), BtreeError> {
    let shared = Shared::new(PAGE_SIZE);
    let tree = Btree::create_table(shared)?;
    let mut cursor = tree.open_cursor()?;

    let rows: [(u32, Vec<u8>); 9] = [
        (2, vec![4, 5, 6]),
        (1, vec![1, 2, 3]),
        (3, vec![7, 8, 9]),
        (9, vec![7, 8, 6]),
        (6, vec![7, 8, 4]),
        (7, vec![7, 8, 5]),
        (11, vec![7, 8, 7]),
        (13, vec![0x13, 8, 9, 0x13]),
        (4, vec![4, 8, 9, 0x15]),
    ];
    for (key, payload) in rows {
        cursor.insert(key, payload)?;
    }

    cursor.move_to_root()?;
    let mem = cursor.mem.borrow();
    assert_eq!(mem.cell_num, 9);
    assert_eq!(mem.get_kth_cell(0)?.payload, vec![1, 2, 3]);
    assert_eq!(mem.get_kth_cell(3)?.payload, vec![4, 8, 9, 0x15]);
    assert_eq!(mem.get_kth_cell(8)?.payload, vec![0x13, 8, 9, 0x13]);
    Ok(())
}

#[test]
fn overflow_forces_a_root_split_into_an_interior_page_and_new_child() -> Result<(), BtreeError> {
    let shared = Shared::new(PAGE_SIZE);
    let tree = Btree::create_table(shared)?;
    let root_page_no = tree.root_page_no;
    let mut cursor = tree.open_cursor()?;

    // Each cell costs 2 (pointer) + 10 (header) + 100 (payload) = 112
    // bytes; the root is always page 1, whose 100-byte reserved prefix
    // leaves a leaf root with 4096 - 108 = 3988 bytes free, so well under
    // 40 insertions exhaust it and the insert that doesn't fit triggers
    // a root-deepening split. `balance_deep` moves the overflowing cell
    // into the new child's `overflow` list via `mem::take` and never
    // retries `insert_cell_fast` against it, so the cell stays stranded
    // there regardless of how much free space the child actually has.
    // Sibling rebalancing for non-root pages isn't implemented, so the
    // triggering insert surfaces `BalanceUnsupported` once the split
    // leaves the child still carrying that unapplied overflow cell.
    let mut result = Ok(());
    for key in 0u32..64 {
        result = cursor.insert(key, vec![0u8; 100]);
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result, Err(BtreeError::BalanceUnsupported));

    let root = Shared::get_page(&cursor.shared, root_page_no, FETCH)?;
    let root = root.borrow();
    assert!(!root.is_leaf);
    assert_eq!(root.cell_num, 0);
    let child_page_no = root.get_right_child()?;
    assert_ne!(child_page_no, 0);

    let child = Shared::get_page(&cursor.shared, child_page_no, FETCH)?;
    let child = child.borrow();
    assert!(child.is_leaf);
    assert!(child.cell_num > 0);
    assert!(!child.overflow.is_empty());
    Ok(())
}

#[test]
fn fetch_with_create_allocates_the_next_free_page_number() {
    let mut cache = PageCache::new();
    cache.allocate(); // page 1 now exists, high-water mark is 1
    let entry = cache.fetch(5, CREATE).unwrap();
    assert_eq!(entry.page_no, 2);
}
