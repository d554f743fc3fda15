use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::{Engine, EngineError};
use crate::observability;
use crate::store::{LogStore, StoreError};

/// Expire every unpaid hold past its window. Returns how many moved.
pub async fn reap_expired(engine: &Engine) -> Result<usize, EngineError> {
    let mut reaped = 0;
    for id in engine.collect_expired_holds().await? {
        match engine.expire_hold(&id).await {
            Ok(_) => {
                reaped += 1;
                info!("reaped expired hold {id}");
            }
            Err(e) if e.is_fatal() => return Err(e),
            // Paid, restarted, or cancelled since the scan. That's fine.
            Err(e) => debug!("reaper skip {id}: {e}"),
        }
    }
    metrics::counter!(observability::REAPED_TOTAL).increment(reaped as u64);
    Ok(reaped)
}

/// Background task that periodically expires stale holds.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = reap_expired(&engine).await {
            error!("reaper pass failed: {e}");
        }
    }
}

/// Compact the log once `threshold` appends have piled up since the last
/// compaction. Returns whether it compacted.
pub async fn compact_if_due(store: &LogStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted reservation log after {appends} appends ({} rows)", store.len());
    Ok(true)
}

pub async fn run_compactor(store: Arc<LogStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            error!("compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::BookingRequest;
    use crate::model::fixtures::{at, date, guest};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::rules::Policy;
    use chrono::TimeDelta;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("venuelock_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn setup() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at("2025-11-01T09:00:00Z")));
        let engine = Engine::new(
            Arc::new(LogStore::in_memory()),
            clock.clone(),
            Arc::new(NotifyHub::new()),
            Policy::default(),
        );
        (engine, clock)
    }

    async fn hold(engine: &Engine) -> Reservation {
        let req = BookingRequest {
            guest: guest(),
            booking_type: BookingType::Daytime,
            check_in_date: date("2025-12-04"),
            duration: 1,
        };
        engine
            .create_reservation(req, &Actor::guest("maria"))
            .await
            .unwrap()
            .reservation
    }

    #[tokio::test]
    async fn reaper_expires_only_stale_unpaid_holds() {
        let (engine, clock) = setup();
        let stale = hold(&engine).await;
        let paid = hold(&engine).await;
        engine
            .record_payment(&paid.id, PaymentKind::Deposit, "gcash-1", &Actor::guest("maria"))
            .await
            .unwrap();

        clock.advance(TimeDelta::hours(23));
        let fresh = hold(&engine).await;
        assert_eq!(reap_expired(&engine).await.unwrap(), 0);

        clock.advance(TimeDelta::hours(1));
        assert_eq!(reap_expired(&engine).await.unwrap(), 1);

        let stale = engine.get(&stale.id).await.unwrap();
        assert_eq!(stale.status, Status::Expired);
        assert!(!stale.date_locked);
        assert_eq!(stale.history.last().unwrap().actor, Actor::system());
        assert_eq!(engine.get(&paid.id).await.unwrap().status, Status::PendingConfirmation);
        assert_eq!(engine.get(&fresh.id).await.unwrap().status, Status::PendingPayment);

        // Already expired: nothing left to do.
        assert_eq!(reap_expired(&engine).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_hold_frees_contention() {
        let (engine, clock) = setup();
        hold(&engine).await;
        let day = date("2025-12-04");
        let before = engine
            .check_availability(day, BookingType::Daytime, None)
            .await
            .unwrap();
        assert_eq!(before.pending_count, 1);

        clock.advance(TimeDelta::hours(24));
        reap_expired(&engine).await.unwrap();
        let after = engine
            .check_availability(day, BookingType::Daytime, None)
            .await
            .unwrap();
        assert!(after.available);
        assert_eq!(after.pending_count, 0);
    }

    #[tokio::test]
    async fn compaction_waits_for_threshold() {
        let path = test_wal_path("compact_if_due.wal");
        let store = Arc::new(LogStore::open(&path).unwrap());
        let clock = Arc::new(ManualClock::new(at("2025-11-01T09:00:00Z")));
        let engine = Engine::new(
            store.clone(),
            clock,
            Arc::new(NotifyHub::new()),
            Policy::default(),
        );
        let r = hold(&engine).await;
        engine
            .add_admin_note(&r.id, &Actor::admin("ana"), "called guest")
            .await
            .unwrap();

        assert!(!compact_if_due(&store, 3).await.unwrap());
        assert!(compact_if_due(&store, 2).await.unwrap());
        assert_eq!(store.appends_since_compact().await, 0);
    }
}
