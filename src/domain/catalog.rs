//! Device Catalog
//!
//! Deduplicating, insertion-ordered collection of scan results.

use crate::domain::models::Peripheral;
use std::collections::HashMap;

/// Discovered peripherals keyed by address
///
/// An entry keeps the position of its first sighting, so upgrading an unnamed
/// entry with a name does not reorder the list.
#[derive(Debug, Default)]
pub struct DeviceCatalog {
    entries: Vec<Peripheral>,
    index: HashMap<String, usize>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or upgrade a peripheral. Returns true if the visible content changed.
    pub fn upsert(&mut self, peripheral: Peripheral) -> bool {
        match self.index.get(&peripheral.address) {
            None => {
                self.index
                    .insert(peripheral.address.clone(), self.entries.len());
                self.entries.push(peripheral);
                true
            }
            Some(&pos) => {
                let existing = &mut self.entries[pos];
                if !existing.has_name() && peripheral.has_name() {
                    *existing = peripheral;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Entries in insertion order, optionally skipping unnamed devices
    pub fn filtered_view(&self, include_unnamed: bool) -> impl Iterator<Item = &Peripheral> + '_ {
        self.entries
            .iter()
            .filter(move |p| include_unnamed || p.has_name())
    }

    pub fn get(&self, address: &str) -> Option<&Peripheral> {
        self.index.get(address).map(|&pos| &self.entries[pos])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
