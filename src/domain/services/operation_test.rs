use super::ActiveThread;
use super::CancelReason;
use super::OperationKind;
use super::OperationSlot;

#[test]
fn it_cancels_previous_operation_on_start() {
    let mut slot = OperationSlot::default();
    let first = slot.start(OperationKind::Stream, None, CancelReason::Superseded);
    let second = slot.start(OperationKind::Stream, None, CancelReason::Superseded);

    assert!(first.is_cancelled());
    assert_eq!(first.reason(), Some(CancelReason::Superseded));
    assert!(!second.is_cancelled());
    assert!(slot.is_current(second.id()));
    assert!(!slot.is_current(first.id()));
}

#[test]
fn it_keeps_first_cancel_reason() {
    let mut slot = OperationSlot::default();
    let handle = slot.start(OperationKind::Stream, None, CancelReason::Superseded);

    handle.cancel(CancelReason::FirstByteTimeout);
    handle.clone().cancel(CancelReason::UserStop);

    assert_eq!(handle.reason(), Some(CancelReason::FirstByteTimeout));
}

#[test]
fn it_releases_only_matching_operation() {
    let mut slot = OperationSlot::default();
    let first = slot.start(OperationKind::Hydrate, None, CancelReason::ThreadSwitch);
    let second = slot.start(OperationKind::Stream, None, CancelReason::Superseded);

    assert!(!slot.release(first.id()));
    assert!(slot.current().is_some());
    assert!(slot.release(second.id()));
    assert!(slot.current().is_none());
    assert!(!slot.release(second.id()));
}

#[test]
fn it_interrupts_without_clearing() {
    let mut slot = OperationSlot::default();
    let handle = slot.start(OperationKind::Stream, None, CancelReason::Superseded);

    assert!(slot.interrupt(CancelReason::UserStop));
    assert!(handle.is_cancelled());
    assert_eq!(handle.reason(), Some(CancelReason::UserStop));
    assert!(slot.is_current(handle.id()));

    slot.release(handle.id());
    assert!(!slot.interrupt(CancelReason::UserStop));
}

#[test]
fn it_renews_cancelled_operation() {
    let mut slot = OperationSlot::default();
    let handle = slot.start(
        OperationKind::Stream,
        Some("placeholder".to_string()),
        CancelReason::Superseded,
    );
    handle.cancel(CancelReason::Inactivity);

    let renewed = slot.renew(handle.id(), OperationKind::Poll).unwrap();
    assert_eq!(renewed.id(), handle.id());
    assert_eq!(renewed.kind(), OperationKind::Poll);
    assert_eq!(renewed.placeholder_id(), Some("placeholder"));
    assert!(!renewed.is_cancelled());

    slot.cancel(CancelReason::ThreadSwitch);
    assert!(slot.renew(handle.id(), OperationKind::Poll).is_none());
}

#[test]
fn it_carries_a_late_stop_into_the_renewed_operation() {
    let mut slot = OperationSlot::default();
    let handle = slot.start(OperationKind::Stream, None, CancelReason::Superseded);
    handle.cancel(CancelReason::Inactivity);
    assert!(slot.interrupt(CancelReason::UserStop));
    assert_eq!(handle.reason(), Some(CancelReason::Inactivity));
    assert!(handle.stop_requested());

    let renewed = slot.renew(handle.id(), OperationKind::Poll).unwrap();
    assert!(renewed.is_cancelled());
    assert_eq!(renewed.reason(), Some(CancelReason::UserStop));
}

#[test]
fn it_invalidates_tokens_on_activate_and_advance() {
    let mut active = ActiveThread::default();
    assert!(active.advance().is_none());

    let first = active.activate("a");
    assert!(active.is_current(&first));

    let second = active.advance().unwrap();
    assert!(!active.is_current(&first));
    assert!(active.is_current(&second));

    let third = active.activate("b");
    assert!(!active.is_current(&second));
    assert!(active.is_current(&third));
    assert_eq!(active.thread_id(), Some("b"));
}

#[test]
fn it_rejects_tokens_from_a_revisited_thread() {
    let mut active = ActiveThread::default();
    let stale = active.activate("a");
    active.activate("b");
    active.activate("a");

    assert!(!active.is_current(&stale));
}
