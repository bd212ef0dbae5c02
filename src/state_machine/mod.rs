// State machine module for task lifecycle management
//
// Task states only move forward; DROPPED and PROCESSED are terminal. Record
// states back the per-(task, record) idempotency ledger.

pub mod events;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use events::TaskEvent;
pub use states::{RecordState, TaskState};
pub use task_state_machine::TaskStateMachine;
