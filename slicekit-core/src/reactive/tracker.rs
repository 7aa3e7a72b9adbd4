//! Effect Tracker
//!
//! The tracker records, for one effect run, every field the effect read and
//! the value it observed. Reading a field through `track` is what makes an
//! effect depend on it: a field read only in a branch that did not execute
//! is not tracked for that run.
//!
//! After a transition, the tracker answers whether any recorded field whose
//! slice is in the (widened) changed set now holds a value its equality
//! considers different.

use std::collections::HashSet;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::ids::{FieldId, SliceId};
use crate::state::{FieldCore, StoreState, Value};

/// One recorded read.
#[derive(Clone)]
pub(crate) struct TrackedRead {
    pub(crate) field: Rc<FieldCore>,
    pub(crate) value: Value,
}

/// Per-run log of fields read and their observed values.
#[derive(Default)]
pub(crate) struct Tracker {
    reads: SmallVec<[TrackedRead; 4]>,
}

impl Tracker {
    pub(crate) fn record(&mut self, field: Rc<FieldCore>, value: Value) {
        self.reads.push(TrackedRead { field, value });
    }

    pub(crate) fn clear(&mut self) {
        self.reads.clear();
    }

    pub(crate) fn reads(&self) -> SmallVec<[TrackedRead; 4]> {
        self.reads.clone()
    }

    /// Ids of the tracked fields, deduplicated, in first-read order.
    pub(crate) fn field_ids(&self) -> Vec<FieldId> {
        let mut seen = HashSet::new();
        self.reads
            .iter()
            .filter(|read| seen.insert(read.field.id.clone()))
            .map(|read| read.field.id.clone())
            .collect()
    }
}

/// First tracked field in `changed` slices whose value differs in `state`.
///
/// A field that can no longer be read counts as changed.
pub(crate) fn changed_field(
    reads: &[TrackedRead],
    changed: &HashSet<SliceId>,
    state: &StoreState,
) -> Option<FieldId> {
    for read in reads {
        if !changed.contains(read.field.slice_id()) {
            continue;
        }
        match read.field.read(state) {
            Ok(current) if read.field.is_equal(&read.value, &current) => continue,
            _ => return Some(read.field.id.clone()),
        }
    }
    None
}
