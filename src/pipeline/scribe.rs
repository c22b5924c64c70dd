//! The Scribe: a consumer that spawns a transient worker per downstream
//! item, invokes each event's handler chain in registered order, verifies
//! the drift checksum after every call, and acks the owning Envoy on
//! completion — success, handled fault, or panic alike (spec §4.7, §7).

use std::any::TypeId;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;

use crossbeam::channel::Receiver;

use crate::error::Fault;
use crate::event::{Event, Outcome};
use crate::pipeline::envoy::Envoy;
use crate::registry::Registry;
use crate::task::Executor;

/// Default worker-pool size for each Scribe's transient-worker executor.
/// The spec names `max_events` as the in-flight *batch* cap (the bounded
/// channel feeding this Scribe); it does not separately name a concurrency
/// degree for how many of those batches run at once, so this is a fixed
/// internal default rather than something `WorldOptions` exposes.
const WORKERS_PER_SCRIBE: usize = 4;

pub struct Scribe {
    dispatcher: Option<thread::JoinHandle<()>>,
}

impl Scribe {
    /// Spawns the dispatch thread that drains `receiver` and submits each
    /// item to a bounded worker pool. `envoy` is held weakly: the Scribe
    /// must never be the thing keeping the Envoy (and its `Sender`) alive,
    /// or the receiver would never observe a closed channel and this
    /// dispatch thread would never exit.
    pub fn spawn(receiver: Receiver<Event>, envoy: Weak<Envoy>, registry: Arc<Registry>) -> Self {
        let dispatcher = thread::spawn(move || {
            let executor = Executor::new(WORKERS_PER_SCRIBE);
            for event in receiver.iter() {
                let envoy = envoy.clone();
                let registry = Arc::clone(&registry);
                executor.execute(move || run_event(&registry, envoy, event));
            }
            // `executor` drops here, joining its workers once the channel
            // feeding this loop has closed.
        });
        Scribe {
            dispatcher: Some(dispatcher),
        }
    }
}

impl Drop for Scribe {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

fn run_event(registry: &Registry, envoy: Weak<Envoy>, event: Event) {
    let hash = event.entity.hash();
    let handlers = event.handlers.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(registry, event, &handlers)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(fault)) => log::error!("scribe: {fault} while dispatching to entity {hash:?}"),
        Err(_) => log::error!("scribe: handler panicked while dispatching to entity {hash:?}"),
    }
    if let Some(envoy) = envoy.upgrade() {
        envoy.ack(hash);
    }
}

/// Iterates `handlers` in order, invoking each one's `handle_event` (or the
/// `(Continue, event)` default for types that declare none), verifying the
/// drift checksum after every call, and stopping early on `Halt`.
fn dispatch(registry: &Registry, mut event: Event, handlers: &[TypeId]) -> Result<(), Fault> {
    for type_id in handlers {
        let descriptor = registry
            .descriptor(*type_id)
            .ok_or_else(|| Fault::UnregisteredComponent { event: event.name.clone() })?;
        let baseline = event.checksum();
        let (outcome, updated) = descriptor.handle_event(&event.name, event);
        event = updated;
        event.check_drift(baseline, descriptor.alias())?;
        if outcome == Outcome::Halt {
            break;
        }
    }
    Ok(())
}
