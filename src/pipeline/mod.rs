//! The Herald → Envoy → Scribe dispatch pipeline (spec §4.7): one Herald
//! (a stateless router) per World, `P` partitions each pairing one Envoy
//! (per-entity sequencing) with one Scribe (transient-worker consumer).
//!
//! Backpressure here is the bounded channel between an Envoy and its
//! Scribe, sized to `WorldOptions::max_events` — "Scribes subscribe to
//! their Envoy with a `max_demand` that bounds the number of in-flight
//! batches per partition" becomes, concretely, a channel `send` that blocks
//! the caller once that many batches are queued or executing. This is the
//! "producer/consumer tasks with demand signalling" design note (§9)
//! realised with `crossbeam`'s channels rather than a hand-rolled demand
//! protocol.

mod envoy;
mod herald;
mod scribe;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::bounded;

use crate::error::Fault;
use crate::event::Event;
use crate::registry::Registry;

use envoy::Envoy;
use herald::Herald;
use scribe::Scribe;

/// How often [`Pipeline::flush`] re-checks every partition's idle state.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owns one World's entire Herald/Envoy/Scribe topology.
pub struct Pipeline {
    herald: Herald,
    envoys: Vec<Arc<Envoy>>,
    scribes: Vec<Scribe>,
}

impl Pipeline {
    pub fn new(partitions: usize, max_events: usize, registry: Arc<Registry>) -> Self {
        let capacity = max_events.max(1);
        let mut envoys = Vec::with_capacity(partitions);
        let mut scribes = Vec::with_capacity(partitions);

        for _ in 0..partitions {
            let (tx, rx) = bounded(capacity);
            let envoy = Arc::new(Envoy::new(tx));
            let scribe = Scribe::spawn(rx, Arc::downgrade(&envoy), Arc::clone(&registry));
            envoys.push(envoy);
            scribes.push(scribe);
        }

        log::info!("pipeline: started with {partitions} partition(s), max_events={max_events}");
        Pipeline {
            herald: Herald::new(partitions),
            envoys,
            scribes,
        }
    }

    /// Routes `event` to its partition's Envoy (spec §4.7: `event ->
    /// partition = stable_hash(event.entity.hash) mod P`).
    pub fn send(&self, event: Event) {
        let partition = self.herald.route(event.entity.hash());
        log::debug!("pipeline: routed `{}` to partition {partition}", event.name);
        self.envoys[partition].enqueue(event);
    }

    /// Blocks until every partition reports no in-flight or queued work, or
    /// `timeout` elapses (spec's "supplement" §2.2). This is a polling
    /// drain rather than a literal barrier token threaded through the
    /// channels — the Envoy's idle state (no tracked entities) is already
    /// the exact condition a barrier would wait for.
    pub fn flush(&self, timeout: Duration) -> Result<(), Fault> {
        let start = Instant::now();
        loop {
            if self.envoys.iter().all(|envoy| envoy.is_idle()) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Fault::FlushTimedOut {
                    waited_ms: start.elapsed().as_millis(),
                });
            }
            std::thread::sleep(FLUSH_POLL_INTERVAL);
        }
    }

    pub fn partitions(&self) -> usize {
        self.herald.partitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Component, ComponentDescriptor, Handler, PropMap};
    use crate::context::{Context, CreateOpts};
    use crate::entity::WorldHandle;
    use crate::event::{Event, Outcome};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::time::Duration;

    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Logger {}
    impl Component for Logger {
        fn alias() -> &'static str {
            "logger"
        }
        fn events() -> &'static [&'static str] {
            &["ping"]
        }
    }
    impl Handler for Logger {
        fn handle_event(_name: &str, event: Event) -> (Outcome, Event) {
            LOG.lock().unwrap().push("logger");
            (Outcome::Continue, event)
        }
    }

    #[test]
    fn send_dispatches_to_registered_handler_and_flush_observes_completion() {
        // Given
        LOG.lock().unwrap().clear();
        let registry = Arc::new(Registry::new());
        registry.register_components(vec![ComponentDescriptor::with_handler::<Logger>()]).unwrap();
        let ctx = Context::new(None);
        let entity = ctx.create(CreateOpts::default()).unwrap();
        ctx.emplace(entity.clone(), crate::component::ComponentValue::of(&Logger {})).unwrap();

        let pipeline = Pipeline::new(2, 16, Arc::clone(&registry));
        let handlers = registry.handlers_for("ping");
        let event = Event::new("ping", WorldHandle(1), entity, PropMap::new(), handlers);

        // When
        pipeline.send(event);

        // Then
        pipeline.flush(Duration::from_secs(1)).unwrap();
        assert_eq!(*LOG.lock().unwrap(), vec!["logger"]);
    }

    #[test]
    fn flush_times_out_while_a_handler_is_still_blocked() {
        #[derive(Serialize, Deserialize, Clone, Debug)]
        struct Sleepy {}
        impl Component for Sleepy {
            fn alias() -> &'static str {
                "sleepy"
            }
            fn events() -> &'static [&'static str] {
                &["slow"]
            }
        }
        impl Handler for Sleepy {
            fn handle_event(_name: &str, event: Event) -> (Outcome, Event) {
                std::thread::sleep(Duration::from_millis(200));
                (Outcome::Continue, event)
            }
        }

        let registry = Arc::new(Registry::new());
        registry.register_components(vec![ComponentDescriptor::with_handler::<Sleepy>()]).unwrap();
        let ctx = Context::new(None);
        let entity = ctx.create(CreateOpts::default()).unwrap();
        ctx.emplace(entity.clone(), crate::component::ComponentValue::of(&Sleepy {})).unwrap();

        let pipeline = Pipeline::new(1, 16, Arc::clone(&registry));
        let handlers = registry.handlers_for("slow");
        pipeline.send(Event::new("slow", WorldHandle(1), entity, PropMap::new(), handlers));

        let err = pipeline.flush(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, Fault::FlushTimedOut { .. }));
    }
}
