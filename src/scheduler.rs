//! Poll scheduler
//!
//! Single-threaded cooperative loop that owns the pacing of a node. Each
//! period it advances every timer by the measured wall-clock delta and
//! runs one node tick; in between it applies transport events as they
//! arrive. All node access happens under the node lock, so link state is
//! never touched concurrently.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::network::TransportEvent;
use crate::node::NodeHandle;

/// Events applied per wake-up before yielding back to the ticker
const MAX_EVENTS_PER_WAKE: usize = 256;

pub struct Scheduler {
    node: NodeHandle,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    period: Duration,
}

impl Scheduler {
    pub fn new(node: NodeHandle, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        let period = node.lock().config().timers.poll_interval();
        Self {
            node,
            events,
            period,
        }
    }

    /// Run until `shutdown` completes, then drop every link politely
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        tokio::pin!(shutdown);

        info!("Poll scheduler running every {:?}", self.period);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                now = ticker.tick() => {
                    let elapsed = now.saturating_duration_since(last);
                    last = now;
                    self.node.lock().tick(elapsed);
                }
                Some(event) = self.events.recv() => {
                    let mut node = self.node.lock();
                    node.handle_transport_event(event);
                    for _ in 1..MAX_EVENTS_PER_WAKE {
                        match self.events.try_recv() {
                            Ok(event) => node.handle_transport_event(event),
                            Err(_) => break,
                        }
                    }
                }
            }
        }

        debug!("Poll scheduler stopping");
        self.node.lock().shutdown();
    }
}
