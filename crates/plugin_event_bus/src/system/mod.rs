//! Event bus - split into state, registration, dispatch and management
mod core;
mod emitters;
mod handlers;
mod management;
mod stats;

pub use self::core::{EventBus, SubscriptionInfo};
pub use handlers::{RegistrationReport, SubscriptionHandle};
pub use stats::{BusStats, BusStatsSnapshot};

use crate::config::BusConfig;
use crate::synthesis::EventSynthesizer;
use std::sync::Arc;

/// Creates a bus and the synthesizer it owns, sharing the synthesizer so the
/// host can build events for it.
pub fn create_event_bus(config: BusConfig) -> (EventBus, Arc<EventSynthesizer>) {
    let synthesizer = Arc::new(EventSynthesizer::new());
    let bus = EventBus::with_synthesizer(Arc::clone(&synthesizer), config);
    (bus, synthesizer)
}
