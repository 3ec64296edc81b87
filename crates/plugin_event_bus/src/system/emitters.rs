//! Event dispatch
use super::core::{EventBus, Subscription};
use super::stats::BusStats;
use crate::events::EventDescriptor;
use crate::synthesis::{EventInstance, FieldValue};
use crate::EventError;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl EventBus {
    /// Delivers `event` to every matching subscription.
    ///
    /// Subscriptions run on the calling thread in ascending order, ties broken
    /// by registration sequence. Once the event is cancelled, only
    /// subscriptions that ignore cancellation still run. Handler errors and
    /// panics are logged and never stop the pass.
    pub fn post(&self, event: &EventInstance) {
        let index = self.snapshot();
        let descriptor = event.descriptor();
        let stats = &self.shared.stats;
        BusStats::bump(&stats.events_posted);

        let mut matching: Vec<&Arc<Subscription>> = index
            .iter()
            .filter(|s| s.target.accepts(descriptor))
            .collect();

        if matching.is_empty() {
            BusStats::bump(&stats.unhandled_posts);
            if self.shared.config.warn_on_unhandled {
                warn!("⚠️ No subscribers for event: {}", descriptor);
            } else {
                debug!("No subscribers for event: {}", descriptor);
            }
            return;
        }

        matching.sort_by_key(|s| (s.order, s.sequence));
        debug!("📤 Posting {} to {} subscribers", descriptor, matching.len());

        let slow_threshold = Duration::from_millis(self.shared.config.slow_handler_threshold_ms);
        for subscription in matching {
            if event.is_cancelled() && !subscription.ignore_cancelled {
                BusStats::bump(&stats.cancelled_skips);
                continue;
            }

            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscription.handler)(event)));
            let elapsed = started.elapsed();
            BusStats::bump(&stats.handlers_invoked);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    BusStats::bump(&stats.handler_failures);
                    error!(
                        "❌ Subscriber {}::{} of plugin {} failed on {}: {}",
                        subscription.listener_name,
                        subscription.method,
                        subscription.plugin,
                        descriptor,
                        e
                    );
                }
                Err(panic) => {
                    BusStats::bump(&stats.handler_panics);
                    error!(
                        "❌ Subscriber {}::{} of plugin {} panicked on {}: {}",
                        subscription.listener_name,
                        subscription.method,
                        subscription.plugin,
                        descriptor,
                        panic_message(&*panic)
                    );
                }
            }

            if !slow_threshold.is_zero() && elapsed > slow_threshold {
                BusStats::bump(&stats.slow_handlers);
                warn!(
                    "🐌 Subscriber {}::{} of plugin {} took {:?} on {}",
                    subscription.listener_name,
                    subscription.method,
                    subscription.plugin,
                    elapsed,
                    descriptor
                );
            }
        }
    }

    /// Instantiates an event from user field values and posts it.
    ///
    /// The instance is returned so the poster can inspect its cancellation
    /// state.
    pub fn post_new(
        &self,
        descriptor: &EventDescriptor,
        values: Vec<FieldValue>,
    ) -> Result<EventInstance, EventError> {
        let event = self.shared.synthesizer.instantiate(descriptor, values)?;
        self.post(&event);
        Ok(event)
    }

    /// True if posting an event of `descriptor` would reach any subscription.
    ///
    /// Lets posters skip building events nobody listens to.
    pub fn has_subscribers(&self, descriptor: &EventDescriptor) -> bool {
        self.snapshot().iter().any(|s| s.target.accepts(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let from_str = catch_unwind(|| panic!("boom")).unwrap_err();
        let from_string = catch_unwind(|| panic!("{} failed", "handler")).unwrap_err();

        assert_eq!(panic_message(&*from_str), "boom");
        assert_eq!(panic_message(&*from_string), "handler failed");
    }
}
