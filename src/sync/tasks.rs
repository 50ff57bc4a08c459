//! Background tasks - the drain loop and the timer loop
//!
//! Both run until their `CancellationToken` fires. The drain loop sleeps
//! until it is woken (enqueue, retry, connect), until the earliest backoff
//! deadline, or until a jittered poll interval elapses, whichever is first.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::SyncService;
use crate::config::defaults;

/// Time until the next drain pass when nothing wakes the loop.
fn idle_sleep(service: &SyncService) -> Duration {
    let queue_config = service.queue_config();
    let jitter = if queue_config.drain_poll_jitter_secs > 0 {
        rand::thread_rng().gen_range(0..=queue_config.drain_poll_jitter_secs)
    } else {
        0
    };
    let poll = Duration::from_secs(queue_config.drain_poll_secs + jitter);

    match service.queue().next_wake_in() {
        Ok(Some(until)) => until.min(poll),
        Ok(None) => poll,
        Err(e) => {
            warn!(error = %e, "Failed to read backoff deadlines");
            poll
        }
    }
}

/// Deliver queued items until cancelled.
pub async fn run_drain_loop(service: SyncService, cancel: CancellationToken) {
    info!("Drain loop started");
    loop {
        let connection = service.queue().connection();
        if !connection.is_usable() && connection.reprobe().await {
            info!("Connection re-established by probe");
        }

        match service.drain().await {
            Ok(report) if report.deferred => debug!("Drain deferred, connection not usable"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Drain pass failed"),
        }

        let sleep = idle_sleep(&service);
        tokio::select! {
            () = cancel.cancelled() => break,
            () = service.queue().wait_for_work() => {}
            () = tokio::time::sleep(sleep) => {}
        }
    }
    info!("Drain loop stopped");
}

/// Drive the report scheduler, attunement and retention purge until cancelled.
pub async fn run_scheduler_loop(service: SyncService, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(defaults::SCHEDULER_TICK_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let purge_every = defaults::PURGE_INTERVAL_SECS / defaults::SCHEDULER_TICK_SECS;
    let mut ticks: u64 = 0;

    info!("Scheduler loop started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = service.scheduler().tick();
        if report.errors > 0 {
            warn!(errors = report.errors, "Scheduler tick had report failures");
        }
        if let Some(decision) = service.attunement().tick() {
            debug!(?decision, "Attunement applied");
        }

        if ticks % purge_every.max(1) == 0 {
            if let Err(e) = service.purge_old() {
                warn!(error = %e, "Retention purge failed");
            }
        }
        ticks = ticks.wrapping_add(1);
    }
    info!("Scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SharedConfig, SyncConfig};
    use crate::storage::InMemoryQueueStore;
    use crate::sync::SendError;
    use crate::testing::ScriptedSender;
    use crate::types::{ConnectionStatus, PayloadType, QueueStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drain_loop_delivers_and_stops() {
        let sender = Arc::new(ScriptedSender::new());
        let service = SyncService::builder(
            SharedConfig::new(SyncConfig::default()),
            Arc::new(InMemoryQueueStore::new()),
            sender.clone(),
        )
        .build();
        assert!(service.connect(Some("https://reports.example.com"), None).await.connected);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_drain_loop(service.clone(), cancel.clone()));

        let id = service.enqueue(PayloadType::Emergency, serde_json::json!({})).unwrap();
        for _ in 0..100 {
            if service.get(id).unwrap().unwrap().status == QueueStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sender.delivered(), vec![id]);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_boot_offline_then_network_recovers() {
        let sender = Arc::new(ScriptedSender::new());
        sender.fail_probes(SendError::Transient("network unreachable".into()));
        let config = SyncConfig {
            endpoint: Some("https://reports.example.com".into()),
            ..SyncConfig::default()
        };
        let service = SyncService::builder(
            SharedConfig::new(config),
            Arc::new(InMemoryQueueStore::new()),
            sender.clone(),
        )
        .build();

        assert!(!service.connect(None, None).await.connected);
        let id = service.enqueue(PayloadType::Emergency, serde_json::json!({})).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_drain_loop(service.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.get(id).unwrap().unwrap().status, QueueStatus::Pending);

        sender.heal_probes();
        service.queue().wake();
        for _ in 0..100 {
            if service.get(id).unwrap().unwrap().status == QueueStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.get(id).unwrap().unwrap().status, QueueStatus::Sent);
        assert_eq!(service.connection_state().unwrap().connection_status, ConnectionStatus::Connected);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
