//! Keep-alive sender and pending-call sweeper.
//!
//! Both loops run once per connect lifetime and stop when the shutdown
//! channel flips. They hold a weak session handle so a dropped session
//! ends them too.

use std::time::Duration;

use tokio::sync::watch;

use super::session::WeakSession;
use super::{KEEP_ALIVE_RETRY_PAUSE, KEEP_ALIVE_TIMEOUT, SWEEP_INTERVAL};
use crate::message::Message;

/// Remaining wait below which a keep-alive is sent immediately.
const SEND_NOW_THRESHOLD: Duration = Duration::from_millis(10);

async fn sleep_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(wait) => true,
        _ = shutdown.changed() => false,
    }
}

/// Send a keep-alive whenever nothing was received for `interval`.
pub(crate) async fn keep_alive_loop(
    session: WeakSession,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(interval_secs = interval.as_secs(), "keep-alive started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let Some(current) = session.upgrade() else {
            break;
        };

        let wait = if current.is_authorized() {
            interval.saturating_sub(current.since_last_received())
        } else {
            interval
        };

        if wait > SEND_NOW_THRESHOLD {
            drop(current);
            if !sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
            continue;
        }

        let answer = tokio::select! {
            answer = current.sync_call(Message::keep_alive(), KEEP_ALIVE_TIMEOUT) => answer,
            _ = shutdown.changed() => break,
        };
        drop(current);

        match answer {
            None => {
                tracing::warn!("keep-alive not answered");
                if !sleep_or_shutdown(KEEP_ALIVE_RETRY_PAUSE, &mut shutdown).await {
                    break;
                }
            },
            Some(answer) if !answer.is_success() => {
                tracing::warn!(
                    res_code = answer.res_code.as_deref().unwrap_or_default(),
                    res_msg = answer.res_msg.as_deref().unwrap_or_default(),
                    "FAIL TO SEND keep-alive message"
                );
            },
            Some(_) => {},
        }
    }
    tracing::debug!("keep-alive stopped");
}

/// Time out expired pending calls; drain the table on exit.
pub(crate) async fn sweeper_loop(session: WeakSession, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(current) = session.upgrade() else {
                    return;
                };
                current.sweep_expired();
            },
            _ = shutdown.changed() => break,
        }
    }

    if let Some(current) = session.upgrade() {
        current.drain_pending();
    }
    tracing::debug!("sweeper stopped");
}
