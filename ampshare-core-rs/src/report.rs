//! Timeout-bounded waits on telemetry
//!
//! Both waits subscribe before reading current state so a report landing
//! between the read and the subscription is never missed. A timeout is an
//! outcome, not an error.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::backend::Telemetry;
use crate::error::{ArbiterError, Result};
use crate::types::{Attribute, DeviceId, StateChange, WaitOutcome};

/// Value test for one side of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    Is(String),
    IsNot(String),
}

impl ValueMatch {
    pub fn is(value: impl Into<String>) -> Self {
        ValueMatch::Is(value.into())
    }

    pub fn is_not(value: impl Into<String>) -> Self {
        ValueMatch::IsNot(value.into())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            ValueMatch::Is(expected) => value == expected,
            ValueMatch::IsNot(excluded) => value != excluded,
        }
    }
}

/// Which transitions a state wait accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFilter {
    /// Required previous value; `None` also accepts the current value
    pub old: Option<ValueMatch>,
    pub new: ValueMatch,
}

impl StateFilter {
    pub fn to(new: ValueMatch) -> Self {
        Self { old: None, new }
    }

    pub fn transition(old: ValueMatch, new: ValueMatch) -> Self {
        Self {
            old: Some(old),
            new,
        }
    }

    fn accepts(&self, change: &StateChange) -> bool {
        let old_ok = match (&self.old, &change.old) {
            (None, _) => true,
            (Some(filter), Some(old)) => filter.matches(old),
            (Some(_), None) => false,
        };
        old_ok && self.new.matches(&change.new)
    }
}

/// Wait until `device` reports `attribute` in a state accepted by `filter`
pub async fn wait_for_state<T>(
    telemetry: &T,
    device: &DeviceId,
    attribute: Attribute,
    filter: &StateFilter,
    timeout: Duration,
) -> Result<WaitOutcome>
where
    T: Telemetry + ?Sized,
{
    let mut rx = telemetry.subscribe();

    if filter.old.is_none() {
        let snapshot = telemetry.snapshot(device).await?;
        if let Some(value) = snapshot.value(attribute) {
            if filter.new.matches(value) {
                debug!("{} {} already {:?}", device, attribute, value);
                return Ok(WaitOutcome::Completed);
            }
        }
    }

    let matching = next_matching(&mut rx, |change| {
        change.device == *device && change.attribute == attribute && filter.accepts(change)
    });

    match tokio::time::timeout(timeout, matching).await {
        Ok(Ok(change)) => {
            debug!("{} {} -> {}", device, attribute, change.new);
            Ok(WaitOutcome::Completed)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                "Timed out after {:?} waiting for {} {} {:?}",
                timeout, device, attribute, filter.new
            );
            Ok(WaitOutcome::TimedOut)
        }
    }
}

/// Wait for a report of `attribute` strictly newer than `since`
///
/// Without `since`, the attribute's current last-reported time is the anchor.
pub async fn await_new_report<T>(
    telemetry: &T,
    device: &DeviceId,
    attribute: Attribute,
    since: Option<DateTime<Utc>>,
    timeout: Duration,
) -> Result<WaitOutcome>
where
    T: Telemetry + ?Sized,
{
    let mut rx = telemetry.subscribe();
    let current = telemetry.snapshot(device).await?.reported_at(attribute);
    let anchor = since.or(current);

    let seen = newer_report(&mut rx, device, attribute, current, anchor, timeout).await?;
    Ok(match seen {
        Some(_) => WaitOutcome::Completed,
        None => WaitOutcome::TimedOut,
    })
}

/// Wait for a report of `attribute` strictly newer than `since`
///
/// Returns when that report was made, or `None` on timeout. Without `since`
/// any report counts, including the one already stored.
pub async fn await_report_after<T>(
    telemetry: &T,
    device: &DeviceId,
    attribute: Attribute,
    since: Option<DateTime<Utc>>,
    timeout: Duration,
) -> Result<Option<DateTime<Utc>>>
where
    T: Telemetry + ?Sized,
{
    let mut rx = telemetry.subscribe();
    let current = telemetry.snapshot(device).await?.reported_at(attribute);
    newer_report(&mut rx, device, attribute, current, since, timeout).await
}

async fn newer_report(
    rx: &mut broadcast::Receiver<StateChange>,
    device: &DeviceId,
    attribute: Attribute,
    current: Option<DateTime<Utc>>,
    anchor: Option<DateTime<Utc>>,
    timeout: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let is_newer = |at: DateTime<Utc>| anchor.map_or(true, |anchor| at > anchor);

    if let Some(at) = current.filter(|at| is_newer(*at)) {
        return Ok(Some(at));
    }

    debug!("Awaiting {} {} report newer than {:?}", device, attribute, anchor);

    let matching = next_matching(rx, |change| {
        change.device == *device && change.attribute == attribute && is_newer(change.reported_at)
    });

    match tokio::time::timeout(timeout, matching).await {
        Ok(Ok(change)) => Ok(Some(change.reported_at)),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                "No new {} report from {} within {:?}",
                attribute, device, timeout
            );
            Ok(None)
        }
    }
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<StateChange>, accept: F) -> Result<StateChange>
where
    F: Fn(&StateChange) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(change) if accept(&change) => return Ok(change),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Telemetry subscriber lagged, skipped {} changes", skipped);
            }
            Err(RecvError::Closed) => return Err(ArbiterError::StreamClosed),
        }
    }
}
