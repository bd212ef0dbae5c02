use super::{events::TaskEvent, states::TaskState};
use crate::error::{HarvesterError, Result};

/// Resolves the target state of a task event.
///
/// Transitions are monotonic: the table below only ever moves a task
/// forward, and every produced target is re-checked against
/// [`TaskState::can_transition_to`] so that an event arriving late (for
/// example a completion after an explicit drop) is rejected rather than
/// resurrecting the task.
pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn determine_target_state(
        task_id: i64,
        current_state: TaskState,
        event: &TaskEvent,
    ) -> Result<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Queued, TaskEvent::Start) => TaskState::Processing,

            (TaskState::Queued | TaskState::Processing, TaskEvent::LastRecordFinished { post_processing }) => {
                if *post_processing {
                    TaskState::ReadyForPostProcessing
                } else {
                    TaskState::Processed
                }
            }

            (TaskState::ReadyForPostProcessing, TaskEvent::BeginPostProcessing) => {
                TaskState::InPostProcessing
            }

            (TaskState::Queued | TaskState::Processing | TaskState::InPostProcessing, TaskEvent::Complete) => {
                TaskState::Processed
            }

            (_, TaskEvent::Drop(_)) => TaskState::Dropped,

            (from_state, _) => {
                return Err(HarvesterError::InvalidStateTransition {
                    task_id,
                    from: from_state.to_string(),
                    to: event.event_type().to_string(),
                })
            }
        };

        if !current_state.can_transition_to(target) {
            return Err(HarvesterError::InvalidStateTransition {
                task_id,
                from: current_state.to_string(),
                to: target.to_string(),
            });
        }

        Ok(target)
    }
}
