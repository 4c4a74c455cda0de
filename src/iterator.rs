//! Entry iterator
//!
//! Lazy iteration over live entries. The set of keys is fixed when the
//! iterator is created; values are read from the device one at a time
//! through a single reusable decode buffer. To start over, create a new
//! iterator.

use std::vec;

use crate::device::BlockDevice;
use crate::entry::{DecodeBuffer, EntryInfo};
use crate::error::Result;
use crate::index::{EntryKey, IndexSlot};
use crate::page::PageManager;
use crate::store::read_indexed;

/// Iterator over live entries
///
/// A record that fails to decode yields `Err(CorruptEntry)` for that entry
/// only; iteration continues with the next one.
pub struct EntryIter<'a, D: BlockDevice> {
    pages: &'a PageManager<D>,
    snapshot: vec::IntoIter<(EntryKey, IndexSlot)>,
    buffer: DecodeBuffer,
}

impl<'a, D: BlockDevice> EntryIter<'a, D> {
    pub(crate) fn new(pages: &'a PageManager<D>, snapshot: Vec<(EntryKey, IndexSlot)>) -> Self {
        Self {
            pages,
            snapshot: snapshot.into_iter(),
            buffer: DecodeBuffer::new(),
        }
    }
}

impl<'a, D: BlockDevice> Iterator for EntryIter<'a, D> {
    type Item = Result<EntryInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, slot) = self.snapshot.next()?;
        let entry = read_indexed(self.pages, &key.namespace, &key.key, &slot, &mut self.buffer);
        Some(entry.map(EntryInfo::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.snapshot.size_hint()
    }
}

impl<'a, D: BlockDevice> ExactSizeIterator for EntryIter<'a, D> {}
