//! Scrape cycle state machine.
//!
//! One cycle resolves the meter address (once per process), queries
//! instantaneous power and current, and on failure re-authenticates and
//! retries the query a single time. Every cycle yields exactly one
//! [`ScrapeOutcome`] and records its duration, whatever happened.

use std::net::Ipv6Addr;
use std::time::Duration;

use smartmeter_common::current_timestamp_secs;
use smartmeter_device::echonet::{
    EPC_INSTANTANEOUS_CURRENT, EPC_INSTANTANEOUS_POWER, SMART_METER_EOJ,
};
use smartmeter_device::{DeviceClient, Frame};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::decoder::decode;
use crate::sink::SharedSink;

/// Wait after a failed query before re-authenticating.
pub const REAUTH_COOLDOWN: Duration = Duration::from_secs(5);

/// Wait after re-authentication before the second query.
pub const POST_AUTH_COOLDOWN: Duration = Duration::from_secs(2);

/// Attempts the device client makes per query.
pub const QUERY_RETRIES: u32 = 3;

/// Result of one scrape cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Success,
    IpResolveFailure,
    AuthFailure,
    QueryFailure,
    ParseFailure,
}

impl ScrapeOutcome {
    /// Value of the `type` label on `scrape_errors_total`, `None` on success.
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            ScrapeOutcome::Success => None,
            ScrapeOutcome::IpResolveFailure => Some("ip_resolve"),
            ScrapeOutcome::AuthFailure => Some("auth"),
            ScrapeOutcome::QueryFailure => Some("query"),
            ScrapeOutcome::ParseFailure => Some("parse"),
        }
    }

    /// Every failure outcome, in exposition order.
    pub const FAILURES: [ScrapeOutcome; 4] = [
        ScrapeOutcome::IpResolveFailure,
        ScrapeOutcome::AuthFailure,
        ScrapeOutcome::QueryFailure,
        ScrapeOutcome::ParseFailure,
    ];

    /// All error label values.
    pub fn error_types() -> impl Iterator<Item = &'static str> {
        Self::FAILURES
            .into_iter()
            .filter_map(|outcome| outcome.error_type())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeOutcome::Success)
    }
}

/// Per-process connection state, owned by the scrape task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSession {
    /// Meter address; cached for the process lifetime once resolved.
    pub address: Option<Ipv6Addr>,
    /// Whether the last authentication attempt left a usable session.
    /// Reported in logs only; a failed query always re-authenticates.
    pub authenticated: bool,
}

/// Source of the Unix time stamped on successful scrapes.
pub type Clock = fn() -> f64;

/// Drives one device client through scrape cycles.
pub struct ScrapeOrchestrator<C> {
    client: C,
    sink: SharedSink,
    request: Frame,
    clock: Clock,
}

impl<C: DeviceClient> ScrapeOrchestrator<C> {
    pub fn new(client: C, sink: SharedSink) -> Self {
        Self {
            client,
            sink,
            request: Frame::get(
                SMART_METER_EOJ,
                &[EPC_INSTANTANEOUS_POWER, EPC_INSTANTANEOUS_CURRENT],
            ),
            clock: current_timestamp_secs,
        }
    }

    /// Replace the wall clock used for the last-success timestamp.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Run one cycle and record its outcome and duration in the sink.
    pub async fn run_cycle(&mut self, session: &mut DeviceSession) -> ScrapeOutcome {
        let start = Instant::now();
        let outcome = self.cycle(session).await;
        let elapsed = start.elapsed().as_secs_f64();

        self.sink.record_duration(elapsed);
        self.sink.increment_outcome(outcome);

        match outcome {
            ScrapeOutcome::Success => {
                info!(duration_secs = elapsed, "Scrape succeeded");
            }
            ScrapeOutcome::AuthFailure => {
                error!(duration_secs = elapsed, "Scrape failed: authentication");
            }
            other => {
                warn!(
                    duration_secs = elapsed,
                    error_type = other.error_type().unwrap_or_default(),
                    "Scrape failed"
                );
            }
        }

        outcome
    }

    async fn cycle(&mut self, session: &mut DeviceSession) -> ScrapeOutcome {
        let address = match session.address {
            Some(address) => address,
            None => match self.client.resolve_address().await {
                Ok(address) => {
                    info!(addr = %address, "Resolved smart meter address");
                    session.address = Some(address);
                    address
                }
                Err(e) => {
                    warn!(error = %e, "Failed to resolve smart meter address");
                    return ScrapeOutcome::IpResolveFailure;
                }
            },
        };

        let response = match self
            .client
            .query(address, &self.request, QUERY_RETRIES)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    error = %e,
                    was_authenticated = session.authenticated,
                    "Query failed, re-authenticating"
                );
                session.authenticated = false;

                info!(
                    cooldown_secs = REAUTH_COOLDOWN.as_secs(),
                    "Waiting before authentication"
                );
                tokio::time::sleep(REAUTH_COOLDOWN).await;

                if let Err(e) = self.client.authenticate(address).await {
                    error!(error = %e, "Authentication failed");
                    return ScrapeOutcome::AuthFailure;
                }
                session.authenticated = true;

                info!(
                    cooldown_secs = POST_AUTH_COOLDOWN.as_secs(),
                    "Waiting after authentication"
                );
                tokio::time::sleep(POST_AUTH_COOLDOWN).await;

                match self
                    .client
                    .query(address, &self.request, QUERY_RETRIES)
                    .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        session.authenticated = false;
                        warn!(error = %e, "Query failed after re-authentication");
                        return ScrapeOutcome::QueryFailure;
                    }
                }
            }
        };

        let decoded = decode(&response.properties);
        if decoded.matched == 0 {
            debug!(properties = response.properties.len(), "No usable properties");
            return ScrapeOutcome::ParseFailure;
        }

        for reading in &decoded.readings {
            self.sink.set_reading(reading);
        }
        self.sink.record_success((self.clock)());

        ScrapeOutcome::Success
    }
}
