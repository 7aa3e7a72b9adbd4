//! Structured debug events.
//!
//! A store created with a debug callback reports every applied transaction
//! and every effect run through it, in addition to its `tracing` output.

use std::rc::Rc;

use serde::Serialize;

use crate::ids::{SliceId, TransactionId};
use crate::reactive::RunReason;

/// Debug event emitted by a store.
///
/// Serializes with a `type` tag, e.g. `{"type":"TRANSACTION",...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebugEvent {
    /// A dispatched transaction was applied.
    #[serde(rename_all = "camelCase")]
    Transaction {
        id: TransactionId,
        source_slice: Option<SliceId>,
        action: String,
        dispatcher: Option<String>,
        store: Option<String>,
    },

    /// An effect ran for the first time, or as part of a full run.
    SyncUpdateEffect { name: String, changed: String },

    /// An effect ran because a tracked field changed.
    UpdateEffect { name: String, changed: String },
}

impl DebugEvent {
    pub(crate) fn effect_run(name: &str, reason: &RunReason) -> Self {
        let name = name.to_string();
        match reason {
            RunReason::FirstRun => DebugEvent::SyncUpdateEffect {
                name,
                changed: "<first-run>".to_string(),
            },
            RunReason::FullRun => DebugEvent::SyncUpdateEffect {
                name,
                changed: "<all>".to_string(),
            },
            RunReason::FieldChanged(field) => DebugEvent::UpdateEffect {
                name,
                changed: field.to_string(),
            },
        }
    }
}

/// Receives debug events.
pub type DebugCallback = Rc<dyn Fn(&DebugEvent)>;
