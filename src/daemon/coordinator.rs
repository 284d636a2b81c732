use crate::core::error::FetchError;
use crate::core::models::{FetcherState, OrderSnapshot, UnavailableReason};
use crate::core::notifications::{send_order_notification, OrderEvent};
use crate::core::store::OrderStore;
use crate::fetcher::OrderFetcher;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub interval: Duration,
    pub notify: bool,
}

/// Cheap handle for queueing a refresh on a running coordinator.
#[derive(Clone)]
pub struct RefreshTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl RefreshTrigger {
    /// Returns false once the coordinator has shut down.
    pub fn request(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

pub struct CoordinatorHandle {
    account: String,
    trigger: RefreshTrigger,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<OrderFetcher>>,
}

impl CoordinatorHandle {
    #[cfg(test)]
    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    pub fn request_refresh(&self) -> bool {
        self.trigger.request()
    }

    /// Stops the interval timer, waits for an in-flight refresh to finish
    /// and hands the fetcher back so the caller decides when it is released.
    pub async fn shutdown(mut self) -> Option<OrderFetcher> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let task = self.task.take()?;
        match task.await {
            Ok(fetcher) => {
                tracing::debug!(account = %self.account, "Coordinator stopped");
                Some(fetcher)
            }
            Err(e) => {
                tracing::warn!(account = %self.account, error = %e, "Coordinator task ended abnormally");
                None
            }
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Starts the polling loop. The first tick fires one interval from now;
/// the caller is expected to have done the initial refresh already.
///
/// Scheduled ticks are skipped while the session is expired, so rejected
/// cookies are not resent on every interval. Manual refreshes still run.
pub fn spawn(fetcher: OrderFetcher, config: CoordinatorConfig, store: OrderStore) -> CoordinatorHandle {
    let account = fetcher.account().to_string();
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tracing::info!(
        account = %account,
        interval_secs = config.interval.as_secs(),
        "Starting order coordinator"
    );

    let task = tokio::spawn(run_loop(fetcher, config, store, refresh_rx, shutdown_rx));

    CoordinatorHandle {
        account,
        trigger: RefreshTrigger { tx: refresh_tx },
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}

async fn run_loop(
    mut fetcher: OrderFetcher,
    config: CoordinatorConfig,
    store: OrderStore,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> OrderFetcher {
    let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {
                if fetcher.expired() {
                    tracing::debug!(account = %fetcher.account(), "Session expired, skipping scheduled refresh");
                    continue;
                }
                let _ = refresh_once(&mut fetcher, &store, config.notify).await;
            }
            Some(()) = refresh_rx.recv() => {
                while refresh_rx.try_recv().is_ok() {}
                let _ = refresh_once(&mut fetcher, &store, config.notify).await;
                ticker.reset();
            }
        }
    }

    fetcher
}

pub async fn refresh_once(
    fetcher: &mut OrderFetcher,
    store: &OrderStore,
    notify: bool,
) -> Result<(), FetchError> {
    let result = fetcher.refresh().await;
    publish(store, fetcher.account(), result, fetcher.state(), notify).await
}

/// Moves one refresh result into the store. Errors keep the previous
/// snapshot and only flip availability.
pub async fn publish(
    store: &OrderStore,
    account: &str,
    result: Result<OrderSnapshot, FetchError>,
    state: FetcherState,
    notify: bool,
) -> Result<(), FetchError> {
    let previous = store.get(account).await;
    let was_available = previous
        .as_ref()
        .is_some_and(|e| e.availability.is_available());
    let was_expired = previous.as_ref().is_some_and(|e| e.state.expired);

    match result {
        Ok(snapshot) => {
            if !was_available && previous.is_some() {
                tracing::info!(account = %account, "Order data available again");
            }
            let notify_snapshot = snapshot.clone();
            let event = store.update_snapshot(account, snapshot, state).await;

            if let (true, Some(event)) = (notify, event) {
                notify_user(account, &event, Some(&notify_snapshot));
            }
            Ok(())
        }
        Err(e) if e.is_transient() => {
            if matches!(e, FetchError::RateLimited) {
                tracing::warn!(account = %account, "Rate limited, waiting for next tick");
            } else {
                tracing::warn!(account = %account, error = %e, "Failed to fetch order status");
            }
            store
                .set_unavailable(account, UnavailableReason::Transient(e.to_string()), state)
                .await;
            Err(e)
        }
        Err(e) => {
            if !was_expired {
                tracing::error!(
                    account = %account,
                    "Session cookies rejected; update the account configuration"
                );
                if notify {
                    notify_user(account, &OrderEvent::SessionExpired, None);
                }
            }
            store
                .set_unavailable(account, UnavailableReason::AuthExpired, state)
                .await;
            Err(e)
        }
    }
}

fn notify_user(account: &str, event: &OrderEvent, snapshot: Option<&OrderSnapshot>) {
    if let Err(e) = send_order_notification(account, event, snapshot) {
        tracing::debug!(account = %account, error = %e, "Failed to send notification");
    }
}
