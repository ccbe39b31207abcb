//! Inbound message router
//!
//! ```text
//! transport ──frame──▶ MessageRouter::dispatch()
//!                           │
//!                     Message::from_frame ──err──▶ warn + drop
//!                           │
//!            exact-type snapshot, then wildcard snapshot
//!                           │
//!                   each handler, isolated
//! ```

use super::callbacks::panic_message;
use super::registry::{Handler, SubscriptionRegistry};
use crate::core::{Message, event_types::WILDCARD};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Decodes frames and fans them out to the registry's handlers
#[derive(Debug, Clone)]
pub struct MessageRouter {
    registry: SubscriptionRegistry,
}

impl MessageRouter {
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Decode a raw text frame and deliver it
    ///
    /// Undecodable frames are logged and dropped. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&self, raw: &str) -> usize {
        match Message::from_frame(raw) {
            Ok(message) => self.dispatch_message(&message),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    code = e.error_code(),
                    frame_len = raw.len(),
                    "Dropping undecodable frame"
                );
                0
            }
        }
    }

    /// Deliver an already decoded message
    ///
    /// Exact-type handlers run first, then wildcard handlers. Both sets are
    /// snapshotted before the first handler runs.
    pub fn dispatch_message(&self, message: &Message) -> usize {
        let event_type = message.event_type();

        let exact = if event_type == WILDCARD {
            Vec::new()
        } else {
            self.registry.handlers_for(event_type)
        };
        let wildcard = self.registry.handlers_for(WILDCARD);

        let mut invoked = 0;
        for handler in exact.iter().chain(wildcard.iter()) {
            invoke(handler, message);
            invoked += 1;
        }

        tracing::trace!(event_type = %event_type, handlers = invoked, "Message dispatched");
        invoked
    }
}

fn invoke(handler: &Handler, message: &Message) {
    match catch_unwind(AssertUnwindSafe(|| handler(message))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(
                event_type = %message.event_type(),
                error = %e,
                "Message handler failed"
            );
        }
        Err(payload) => {
            tracing::warn!(
                event_type = %message.event_type(),
                panic = %panic_message(payload.as_ref()),
                "Message handler panicked"
            );
        }
    }
}
