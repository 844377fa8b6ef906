use crate::errors::RelayError;
use crate::store::RelayStore;

use super::registry::ActiveRunRegistry;

/// A session is complete once nobody is waiting in the queue and nobody is on course.
pub fn is_session_complete(queue_exhausted: bool, registry: &ActiveRunRegistry) -> bool {
    queue_exhausted && registry.is_empty()
}

pub fn queue_exhausted(store: &impl RelayStore, session_id: &str) -> Result<bool, RelayError> {
    Ok(store.get_next_queued_run(session_id)?.is_none())
}
