/*!
 * Handler Invocation
 * Runs completion callbacks with panic isolation
 */

use crate::channel::Completion;
use crate::core::types::GroupId;
use crate::monitoring::GroupCounters;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Run one callback; errors and panics are logged and counted, never propagated
pub(crate) fn invoke(counters: &GroupCounters, group: GroupId, completion: Completion) {
    match panic::catch_unwind(AssertUnwindSafe(completion)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            GroupCounters::bump(&counters.handler_errors);
            warn!(group = %group, error = %e, "Completion handler returned an error");
        }
        Err(payload) => {
            GroupCounters::bump(&counters.handler_panics);
            error!(
                group = %group,
                panic = panic_message(payload.as_ref()),
                "Completion handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
