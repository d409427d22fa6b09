//! Fixed-interval scrape loop.

use std::time::Duration;

use smartmeter_device::DeviceClient;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::scrape::{DeviceSession, ScrapeOrchestrator};

/// Shortest accepted scrape interval.
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Interval used when none (or an invalid one) is configured.
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

/// Interval to scrape at for a configured value.
///
/// Values below [`MIN_INTERVAL_SECS`] fall back to the default rather than
/// being clamped.
pub fn effective_interval(interval_secs: u64) -> Duration {
    if interval_secs < MIN_INTERVAL_SECS {
        warn!(
            interval_secs,
            min = MIN_INTERVAL_SECS,
            default = DEFAULT_INTERVAL_SECS,
            "Scrape interval too short, using default"
        );
        return Duration::from_secs(DEFAULT_INTERVAL_SECS);
    }
    Duration::from_secs(interval_secs)
}

/// Runs scrape cycles back to back at a fixed period.
pub struct ScrapeScheduler<C> {
    orchestrator: ScrapeOrchestrator<C>,
    session: DeviceSession,
    interval: Duration,
}

impl<C: DeviceClient> ScrapeScheduler<C> {
    pub fn new(orchestrator: ScrapeOrchestrator<C>, interval: Duration) -> Self {
        Self {
            orchestrator,
            session: DeviceSession::default(),
            interval,
        }
    }

    /// Scrape immediately, then every interval until `shutdown` turns true.
    ///
    /// A cycle in progress is always allowed to finish; the shutdown signal
    /// is only observed between cycles. Returns the final session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DeviceSession {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "Scrape scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.orchestrator.run_cycle(&mut self.session).await;
                }
            }
        }

        info!(
            scrapes = self.orchestrator.sink().scrape_count(),
            "Scrape scheduler stopped"
        );
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use smartmeter_device::echonet::{CONTROLLER_EOJ, EPC_INSTANTANEOUS_POWER, SMART_METER_EOJ};
    use smartmeter_device::{Esv, Frame, Property};
    use tokio::time::Instant;

    use crate::sink::{MetricsSink, SharedSink};

    /// Client whose query takes `latency` and always succeeds.
    struct SlowClient {
        latency: Duration,
        active: Arc<AtomicUsize>,
        overlapped: Arc<AtomicUsize>,
    }

    impl SlowClient {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                active: Arc::default(),
                overlapped: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl DeviceClient for SlowClient {
        async fn resolve_address(&mut self) -> smartmeter_device::Result<Ipv6Addr> {
            Ok(Ipv6Addr::LOCALHOST)
        }

        async fn authenticate(&mut self, _address: Ipv6Addr) -> smartmeter_device::Result<()> {
            Ok(())
        }

        async fn query(
            &mut self,
            _address: Ipv6Addr,
            _request: &Frame,
            _retries: u32,
        ) -> smartmeter_device::Result<Frame> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            Ok(Frame {
                tid: 1,
                seoj: SMART_METER_EOJ,
                deoj: CONTROLLER_EOJ,
                esv: Esv::GetRes,
                properties: vec![Property::new(
                    EPC_INSTANTANEOUS_POWER,
                    vec![0x00, 0x00, 0x01, 0x00],
                )],
            })
        }
    }

    fn make_scheduler(
        client: SlowClient,
        interval: Duration,
    ) -> (ScrapeScheduler<SlowClient>, SharedSink) {
        let sink = Arc::new(MetricsSink::new());
        let orchestrator = ScrapeOrchestrator::new(client, sink.clone());
        (ScrapeScheduler::new(orchestrator, interval), sink)
    }

    #[test]
    fn test_effective_interval() {
        assert_eq!(effective_interval(60), Duration::from_secs(60));
        assert_eq!(effective_interval(10), Duration::from_secs(10));
        assert_eq!(effective_interval(300), Duration::from_secs(300));
        assert_eq!(effective_interval(9), Duration::from_secs(60));
        assert_eq!(effective_interval(0), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_periodically() {
        let (scheduler, sink) =
            make_scheduler(SlowClient::new(Duration::ZERO), Duration::from_secs(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.scrape_count(), 1);

        // Ticks at 0 s, 10 s and 20 s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sink.scrape_count(), 3);

        tx.send(true).unwrap();
        let session = handle.await.unwrap();
        assert_eq!(session.address, Some(Ipv6Addr::LOCALHOST));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_do_not_overlap() {
        let client = SlowClient::new(Duration::from_secs(25));
        let overlapped = client.overlapped.clone();
        let (scheduler, sink) = make_scheduler(client, Duration::from_secs(10));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_secs(100)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(overlapped.load(Ordering::SeqCst), 0);
        // Missed ticks are skipped: at most one cycle per 25 s of latency.
        let count = sink.scrape_count();
        assert!((3..=5).contains(&count), "unexpected cycle count {count}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_cycle_in_flight() {
        let (scheduler, sink) = make_scheduler(
            SlowClient::new(Duration::from_secs(15)),
            Duration::from_secs(60),
        );
        let (tx, rx) = watch::channel(false);
        let start = Instant::now();
        let handle = tokio::spawn(scheduler.run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.scrape_count(), 0);

        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(sink.scrape_count(), 1);
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(sink.power_watts(), 256.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_start() {
        let (scheduler, sink) =
            make_scheduler(SlowClient::new(Duration::ZERO), Duration::from_secs(10));
        let (_tx, rx) = watch::channel(true);

        scheduler.run(rx).await;

        assert_eq!(sink.scrape_count(), 0);
    }
}
