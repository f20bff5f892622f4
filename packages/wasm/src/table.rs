//! External reference table
//!
//! Host-side arena of [`HostValue`]s. The guest addresses entries purely by
//! index; every index handed across the boundary must be taken or
//! deallocated exactly once.

use crate::error::{BindingError, BindingResult};
use crate::value::HostValue;

/// Index of the undefined slot that exists before seeding
pub const UNDEFINED_INDEX: u32 = 0;

/// Number of slots added by [`ExternRefTable::seed`]
pub const SEEDED_SLOTS: u32 = 4;

/// Default number of slots added whenever the table is exhausted
pub const DEFAULT_TABLE_GROWTH: u32 = 128;

#[derive(Debug, Clone)]
enum Slot {
    /// Immutable sentinel (undefined, null, true, false)
    Reserved(HostValue),
    Occupied(HostValue),
    Vacant,
}

/// Growable, index-addressed table of host values
#[derive(Debug)]
pub struct ExternRefTable {
    slots: Vec<Slot>,
    /// Number of addressable slots (grows in increments)
    capacity: u32,
    /// Next index that has never been handed out
    first_free_hint: u32,
    free_list: Vec<u32>,
    growth: u32,
    live: usize,
    sentinels: Option<u32>,
}

impl Default for ExternRefTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_GROWTH)
    }
}

impl ExternRefTable {
    /// Create a table holding only the undefined slot at index 0
    pub fn new(growth: u32) -> Self {
        Self {
            slots: vec![Slot::Reserved(HostValue::Undefined)],
            capacity: 1,
            first_free_hint: 1,
            free_list: Vec::new(),
            growth: growth.max(1),
            live: 0,
            sentinels: None,
        }
    }

    /// Seed the sentinel slots and return the offset they start at.
    ///
    /// Layout after seeding: `offset + 0 = undefined`, `+1 = null`,
    /// `+2 = true`, `+3 = false`.
    pub fn seed(&mut self) -> u32 {
        if let Some(offset) = self.sentinels {
            return offset;
        }
        // Slots grown for earlier inserts but never handed out stay usable
        let skipped = self.first_free_hint..self.capacity;
        self.free_list.extend(skipped.rev());
        let offset = self.grow(SEEDED_SLOTS);
        let sentinels = [
            HostValue::Undefined,
            HostValue::Null,
            HostValue::Bool(true),
            HostValue::Bool(false),
        ];
        for (i, value) in sentinels.into_iter().enumerate() {
            self.slots[offset as usize + i] = Slot::Reserved(value);
        }
        self.first_free_hint = offset + SEEDED_SLOTS;
        self.sentinels = Some(offset);
        offset
    }

    /// Extend the table by `n` vacant slots, returning the previous length
    pub fn grow(&mut self, n: u32) -> u32 {
        let previous = self.capacity;
        self.capacity += n;
        self.slots.resize(self.capacity as usize, Slot::Vacant);
        tracing::trace!("External reference table grown to {} slots", self.capacity);
        previous
    }

    /// Store a value and return its index
    pub fn insert(&mut self, value: HostValue) -> u32 {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                if self.first_free_hint >= self.capacity {
                    self.grow(self.growth);
                }
                let index = self.first_free_hint;
                self.first_free_hint += 1;
                index
            }
        };
        self.slots[index as usize] = Slot::Occupied(value);
        self.live += 1;
        index
    }

    /// Read a slot without removing it; vacant slots are rejected
    pub fn get(&self, index: u32) -> BindingResult<&HostValue> {
        match self.slot(index)? {
            Slot::Reserved(value) | Slot::Occupied(value) => Ok(value),
            Slot::Vacant => Err(BindingError::invalid_reference(index, "slot is vacant")),
        }
    }

    /// Remove and return a value; a second take yields `Undefined`
    pub fn take(&mut self, index: u32) -> BindingResult<HostValue> {
        match self.slot(index)? {
            Slot::Reserved(value) => return Ok(value.clone()),
            Slot::Vacant => return Ok(HostValue::Undefined),
            Slot::Occupied(_) => {}
        }
        let slot = std::mem::replace(&mut self.slots[index as usize], Slot::Vacant);
        self.release_index(index);
        match slot {
            Slot::Occupied(value) => Ok(value),
            _ => Ok(HostValue::Undefined),
        }
    }

    /// Drop a value without returning it. Sentinels are left in place;
    /// freeing a vacant slot twice is an error.
    pub fn deallocate(&mut self, index: u32) -> BindingResult<()> {
        match self.slot(index)? {
            Slot::Reserved(_) => Ok(()),
            Slot::Vacant => Err(BindingError::invalid_reference(index, "slot is vacant")),
            Slot::Occupied(_) => {
                self.slots[index as usize] = Slot::Vacant;
                self.release_index(index);
                Ok(())
            }
        }
    }

    /// Copy out and deallocate every index, in order.
    ///
    /// All indices are consumed even when one of them is invalid; the first
    /// error is returned after the loop.
    pub fn collect(&mut self, indices: &[u32]) -> BindingResult<Vec<HostValue>> {
        let mut values = Vec::with_capacity(indices.len());
        let mut first_error = None;
        for &index in indices {
            let value = self.get(index).cloned();
            let freed = self.deallocate(index);
            match value.and_then(|value| freed.map(|_| value)) {
                Ok(value) => values.push(value),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    fn release_index(&mut self, index: u32) {
        self.free_list.push(index);
        self.live -= 1;
    }

    fn slot(&self, index: u32) -> BindingResult<&Slot> {
        self.slots.get(index as usize).ok_or_else(|| {
            BindingError::invalid_reference(
                index,
                format!("table has only {} slots", self.capacity),
            )
        })
    }

    /// Number of addressable slots
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of occupied, non-sentinel slots
    pub fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seeded() -> ExternRefTable {
        let mut table = ExternRefTable::new(8);
        table.seed();
        table
    }

    #[test]
    fn test_seed_layout() {
        let mut table = ExternRefTable::new(8);
        let offset = table.seed();
        assert_eq!(offset, 1);
        assert_eq!(table.capacity(), 5);
        assert_eq!(*table.get(UNDEFINED_INDEX).unwrap(), HostValue::Undefined);
        assert_eq!(*table.get(offset).unwrap(), HostValue::Undefined);
        assert_eq!(*table.get(offset + 1).unwrap(), HostValue::Null);
        assert_eq!(*table.get(offset + 2).unwrap(), HostValue::Bool(true));
        assert_eq!(*table.get(offset + 3).unwrap(), HostValue::Bool(false));
    }

    #[test]
    fn test_seed_twice_is_stable() {
        let mut table = seeded();
        assert_eq!(table.seed(), 1);
        assert_eq!(table.capacity(), 5);
    }

    fn host_value() -> impl Strategy<Value = HostValue> {
        prop_oneof![
            Just(HostValue::Null),
            any::<bool>().prop_map(HostValue::Bool),
            (-1.0e9f64..1.0e9).prop_map(HostValue::Number),
            any::<String>().prop_map(HostValue::String),
            any::<String>().prop_map(|message| HostValue::error(message)),
        ]
    }

    proptest! {
        #[test]
        fn test_take_is_exactly_once(
            values in prop::collection::vec(host_value(), 1..16),
        ) {
            let mut table = seeded();
            let indices: Vec<u32> = values.iter().cloned().map(|v| table.insert(v)).collect();

            for (index, value) in indices.iter().zip(values) {
                prop_assert_eq!(table.take(*index).unwrap(), value);
                prop_assert_eq!(table.take(*index).unwrap(), HostValue::Undefined);
            }
            prop_assert_eq!(table.live(), 0);
        }
    }

    #[test]
    fn test_sentinels_survive_take() {
        let mut table = seeded();
        assert_eq!(table.take(2).unwrap(), HostValue::Null);
        assert_eq!(table.take(2).unwrap(), HostValue::Null);
        table.deallocate(3).unwrap();
        assert_eq!(*table.get(3).unwrap(), HostValue::Bool(true));
    }

    #[test]
    fn test_insert_grows_and_reuses() {
        let mut table = seeded();
        let indices: Vec<u32> = (0..10)
            .map(|i| table.insert(HostValue::Number(i as f64)))
            .collect();
        assert_eq!(indices[0], 5);
        assert!(table.capacity() >= 15);

        table.deallocate(indices[3]).unwrap();
        assert!(table.get(indices[3]).is_err());
        let reused = table.insert(HostValue::Null);
        assert_eq!(reused, indices[3]);
        assert_eq!(table.live(), 10);
    }

    #[test]
    fn test_double_deallocate_rejected() {
        let mut table = seeded();
        let index = table.insert(HostValue::string("alice"));
        table.deallocate(index).unwrap();

        let err = table.deallocate(index).unwrap_err();
        assert!(matches!(err, BindingError::InvalidReference { .. }));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_get_vacant_rejected() {
        let mut table = seeded();
        let index = table.insert(HostValue::Number(1.0));
        assert_eq!(table.take(index).unwrap(), HostValue::Number(1.0));

        assert!(matches!(
            table.get(index),
            Err(BindingError::InvalidReference { .. })
        ));
        // take keeps returning the undefined sentinel
        assert_eq!(table.take(index).unwrap(), HostValue::Undefined);
    }

    #[test]
    fn test_insert_before_seed_keeps_slots_usable() {
        let mut table = ExternRefTable::new(8);
        let early = table.insert(HostValue::string("early"));
        assert_eq!(early, 1);

        let offset = table.seed();
        assert_eq!(offset, 9);
        assert_eq!(*table.get(offset + 1).unwrap(), HostValue::Null);

        let next: Vec<u32> = (0..7).map(|_| table.insert(HostValue::Null)).collect();
        assert_eq!(next, vec![2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(table.insert(HostValue::Null), offset + SEEDED_SLOTS);
        assert_eq!(table.seed(), offset);
    }

    #[test]
    fn test_collect_consumes_every_index() {
        let mut table = seeded();
        let alice = table.insert(HostValue::string("alice"));
        let bob = table.insert(HostValue::string("bob"));
        table.deallocate(alice).unwrap();
        let charlie = table.insert(HostValue::string("charlie"));
        let dave = table.insert(HostValue::string("dave"));
        table.deallocate(charlie).unwrap();

        let values = table.collect(&[bob, dave]).unwrap();
        assert_eq!(values, vec![HostValue::string("bob"), HostValue::string("dave")]);
        assert_eq!(table.live(), 0);

        let first = table.insert(HostValue::string("erin"));
        let second = table.insert(HostValue::string("frank"));
        let err = table.collect(&[first, 999, second]).unwrap_err();
        assert!(matches!(err, BindingError::InvalidReference { index: 999, .. }));
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut table = seeded();
        assert!(table.take(999).is_err());
        assert!(table.deallocate(999).is_err());
    }
}
