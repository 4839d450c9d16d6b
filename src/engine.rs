//! A small facade over a page cache shared by every table tree in a
//! database: opens or creates named table trees and hands back cursors.
//!
//! Table names here are an in-memory convenience only, not an on-disk
//! catalog — nothing persists them across a restart.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::btree::{Btree, Shared};
use crate::error::BtreeError;
use crate::page::PAGE_SIZE;

pub struct Engine {
    shared: Rc<RefCell<Shared>>,
    tables: HashMap<String, u32>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            shared: Shared::new(PAGE_SIZE),
            tables: HashMap::new(),
        }
    }

    /// Allocate a new table tree and register it under `name`.
    pub fn create_table(&mut self, name: &str) -> Result<Btree, BtreeError> {
        let tree = Btree::create_table(self.shared.clone())?;
        debug!("engine: registered table {} at root page {}", name, tree.root_page_no);
        self.tables.insert(name.to_string(), tree.root_page_no);
        Ok(tree)
    }

    /// Look up a previously created table tree by name.
    pub fn table(&self, name: &str) -> Option<Btree> {
        self.tables
            .get(name)
            .map(|&root_page_no| Btree::new(root_page_no, self.shared.clone()))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|s| s.as_str()).collect()
    }

    /// Total number of pages allocated across every tree in this engine.
    pub fn page_count(&self) -> u32 {
        self.shared.borrow().cache.page_number()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_table_registers_name_and_is_reopenable() {
        let mut engine = Engine::new();
        let tree = engine.create_table("widgets").unwrap();

        let mut cursor = tree.open_cursor().unwrap();
        cursor.insert(1, b"hello".to_vec()).unwrap();

        let reopened = engine.table("widgets").expect("table should be registered");
        let mut cursor2 = reopened.open_cursor().unwrap();
        assert_eq!(cursor2.move_to(1).unwrap(), 0);
        assert_eq!(cursor2.get().unwrap(), Some((1, b"hello".to_vec())));
    }

    #[test]
    fn unknown_table_name_is_none() {
        let engine = Engine::new();
        assert!(engine.table("nope").is_none());
    }
}
