use std::time::Duration;

use tokio::time;

use super::TimeoutGuard;
use crate::domain::services::CancelReason;
use crate::domain::services::OperationHandle;
use crate::domain::services::OperationKind;
use crate::domain::services::OperationSlot;

const FIRST_BYTE: Duration = Duration::from_secs(30);
const PROGRESS: Duration = Duration::from_secs(120);

fn operation() -> OperationHandle {
    let mut slot = OperationSlot::default();
    return slot.start(OperationKind::Stream, None, CancelReason::Superseded);
}

#[tokio::test(start_paused = true)]
async fn it_fires_first_byte_timer_without_bytes() {
    let op = operation();
    let mut guard = TimeoutGuard::new(op.clone(), FIRST_BYTE, PROGRESS);
    guard.arm_first_byte();

    time::sleep(FIRST_BYTE - Duration::from_millis(1)).await;
    assert!(!op.is_cancelled());

    time::sleep(Duration::from_millis(2)).await;
    assert!(op.is_cancelled());
    assert_eq!(op.reason(), Some(CancelReason::FirstByteTimeout));
}

#[tokio::test(start_paused = true)]
async fn it_only_fires_progress_timer_after_first_byte() {
    let op = operation();
    let mut guard = TimeoutGuard::new(op.clone(), FIRST_BYTE, PROGRESS);
    guard.arm_first_byte();

    time::sleep(Duration::from_secs(1)).await;
    guard.record_progress();
    assert!(guard.received_any());

    // Past the first-byte deadline, still inside the inactivity window.
    time::sleep(Duration::from_secs(60)).await;
    assert!(!op.is_cancelled());

    // Arming again after a byte is a no-op.
    guard.arm_first_byte();
    time::sleep(Duration::from_secs(59)).await;
    assert!(!op.is_cancelled());

    time::sleep(Duration::from_secs(2)).await;
    assert!(op.is_cancelled());
    assert_eq!(op.reason(), Some(CancelReason::Inactivity));
}

#[tokio::test(start_paused = true)]
async fn it_rearms_progress_timer_on_every_byte() {
    let op = operation();
    let mut guard = TimeoutGuard::new(op.clone(), FIRST_BYTE, PROGRESS);
    guard.arm_first_byte();

    for _ in 0..5 {
        guard.record_progress();
        time::sleep(Duration::from_secs(100)).await;
    }
    assert!(!op.is_cancelled());

    time::sleep(Duration::from_secs(21)).await;
    assert_eq!(op.reason(), Some(CancelReason::Inactivity));
}

#[tokio::test(start_paused = true)]
async fn it_clears_timers_idempotently() {
    let op = operation();
    let mut guard = TimeoutGuard::new(op.clone(), FIRST_BYTE, PROGRESS);
    guard.arm_first_byte();
    guard.clear();
    guard.clear();
    guard.clear_first_byte();

    time::sleep(PROGRESS * 2).await;
    assert!(!op.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn it_clears_timers_on_drop() {
    let op = operation();
    {
        let mut guard = TimeoutGuard::new(op.clone(), FIRST_BYTE, PROGRESS);
        guard.arm_first_byte();
        guard.record_progress();
    }

    time::sleep(PROGRESS * 2).await;
    assert!(!op.is_cancelled());
}
