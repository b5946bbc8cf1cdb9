use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use repairdesk_core::TenantId;
use repairdesk_events::{EventBus, Subscription, TenantScoped};

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub handled: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Handle to stop and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the worker and wait for it. A panicked worker reports empty stats.
    pub fn shutdown(mut self) -> WorkerStats {
        let _ = self.shutdown.send(());
        let stats = self
            .join
            .take()
            .and_then(|j| j.join().ok())
            .unwrap_or_default();
        info!(worker = self.name, handled = stats.handled, failed = stats.failed, "projection worker stopped");
        stats
    }
}

/// Background loop feeding bus messages into an idempotent projection handler.
#[derive(Debug)]
pub struct ProjectionWorker;

impl ProjectionWorker {
    /// Spawn a worker thread that processes events from the bus subscription.
    ///
    /// The subscription is taken before the thread starts, so nothing published
    /// after `spawn` returns is missed. With `tenant_id` set, other tenants'
    /// messages are skipped. Handler failures are logged and the loop continues.
    pub fn spawn<M, B, H, E>(
        name: &'static str,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &'static str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) -> WorkerStats
where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(25);
    let mut stats = WorkerStats::default();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
                    stats.skipped += 1;
                    continue;
                }
                match handler(msg) {
                    Ok(()) => stats.handled += 1,
                    Err(err) => {
                        stats.failed += 1;
                        warn!(worker = name, error = %err, "projection worker handler failed");
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                debug!(worker = name, "bus closed");
                break;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    use repairdesk_events::InMemoryEventBus;

    #[derive(Debug, Clone)]
    struct Msg(TenantId, u64);

    impl TenantScoped for Msg {
        fn tenant_id(&self) -> TenantId {
            self.0
        }
    }

    #[test]
    fn pinned_worker_skips_other_tenants_and_counts_failures() {
        let bus: InMemoryEventBus<Msg> = InMemoryEventBus::new();
        let mine = TenantId::new();
        let seen = Arc::new(AtomicU64::new(0));

        let counter = seen.clone();
        let worker = ProjectionWorker::spawn("test-worker", &bus, Some(mine), move |m: Msg| {
            counter.fetch_add(1, Ordering::SeqCst);
            if m.1 == 13 { Err("unlucky") } else { Ok(()) }
        })
        .unwrap();

        bus.publish(Msg(mine, 1)).unwrap();
        bus.publish(Msg(TenantId::new(), 2)).unwrap();
        bus.publish(Msg(mine, 13)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        // The skipped message precedes the last handled one on the same channel.
        let stats = worker.shutdown();
        assert_eq!(stats, WorkerStats { handled: 1, skipped: 1, failed: 1 });
    }
}
