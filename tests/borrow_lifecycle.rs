//! Borrow lifecycle tests over the in-process store

use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};

use borrowdesk_server::{
    config::{BorrowConfig, NotificationsConfig},
    error::AppError,
    models::{
        borrow::{BorrowMetadata, BorrowStatus, DirectLend, NewBorrow, SubmitBorrow},
        inventory::{CreateItem, InventoryItem, ItemStatus, UpdateItem},
        requester::{Requester, RequesterProfile},
        schedule::ScheduleSlot,
    },
    repository::{BorrowStore, MemoryStore},
    services::{
        borrow::BorrowService,
        broadcast::{BroadcastHub, Envelope},
        expiry::{ExpiryScheduler, SchedulerHandle, SweepReport},
        notifications::{BorrowEvent, Notifier, PublishError, Publisher, Topic},
        Services,
    },
};

const ADMIN: i32 = 9;

struct Desk {
    services: Services,
    store: Arc<MemoryStore>,
    events: broadcast::Receiver<Envelope>,
    _scheduler: SchedulerHandle,
}

fn ayu() -> Requester {
    Requester::Student("2201001".into())
}

fn budi() -> Requester {
    Requester::Student("2201002".into())
}

async fn seed(store: &MemoryStore) {
    for (requester, name) in [(ayu(), "Ayu Lestari"), (budi(), "Budi Santoso")] {
        store
            .add_requester(RequesterProfile {
                requester,
                name: name.into(),
                program: "Informatics".into(),
            })
            .await;
    }
    store
        .add_requester(RequesterProfile {
            requester: Requester::Student("2301050".into()),
            name: "Citra Dewi".into(),
            program: "Physics".into(),
        })
        .await;
    store
        .add_schedule_slot(ScheduleSlot {
            id: 1,
            program: "Informatics".into(),
            class_name: "Computer Networks".into(),
            lecturer_name: Some("Dr. Hartono".into()),
            room: Some("Lab 2".into()),
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        })
        .await;
}

async fn desk() -> Desk {
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;

    let hub = BroadcastHub::new(64);
    let events = hub.subscribe();
    let (scheduler, handle) = ExpiryScheduler::new();
    let borrow = BorrowConfig {
        per_request_timers: false,
        ..Default::default()
    };
    let services = Services::new(
        store.clone(),
        Arc::new(hub.clone()),
        Some(hub),
        scheduler,
        &NotificationsConfig::default(),
        &borrow,
    );

    Desk {
        services,
        store,
        events,
        _scheduler: handle,
    }
}

async fn add_item(store: &MemoryStore, barcode: &str) -> InventoryItem {
    store
        .create_item(&CreateItem {
            barcode: barcode.into(),
            item_type: "Projector".into(),
            brand: Some("Epson".into()),
            model: Some("EB-X05".into()),
            serial_number: None,
            description: None,
            location: Some("Store room".into()),
            purchase_date: None,
            status: None,
        })
        .await
        .unwrap()
}

fn request(requester: Requester, now: DateTime<Utc>) -> SubmitBorrow {
    SubmitBorrow {
        requester,
        profile: None,
        schedule_id: 1,
        item_id: None,
        promised_return: now + Duration::hours(3),
    }
}

/// (channel, event name) pairs published so far
async fn drain(notifier: &Notifier, events: &mut broadcast::Receiver<Envelope>) -> Vec<(String, String)> {
    assert!(notifier.flush().await);
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(envelope) => seen.push((envelope.channel, envelope.event.name().to_string())),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
            Err(TryRecvError::Lagged(_)) => continue,
        }
    }
}

fn pair(channel: &str, event: &str) -> (String, String) {
    (channel.to_string(), event.to_string())
}

/// `on_loan` iff exactly one active/overdue transaction holds the item
async fn assert_ledger_consistent(store: &MemoryStore) {
    let loans = store.list_by_status(&BorrowStatus::ON_LOAN).await.unwrap();
    for item in store.list_available_items().await.unwrap() {
        assert!(loans.iter().all(|t| t.item_id != Some(item.id)));
    }
    for loan in &loans {
        let holders = loans.iter().filter(|t| t.item_id == loan.item_id).count();
        assert_eq!(holders, 1);
        let item = store.get_item(loan.item_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::OnLoan);
    }
}

#[tokio::test]
async fn test_round_trip_leaves_item_available() {
    let mut desk = desk().await;
    let borrow = &desk.services.borrow;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let outcome = borrow.submit_at(request(ayu(), now), now).await.unwrap();
    assert_eq!(outcome.status, BorrowStatus::Pending);
    assert_eq!(outcome.acceptance_deadline, now + Duration::minutes(15));

    borrow.accept(outcome.transaction_id, ADMIN).await.unwrap();
    let active = borrow
        .scan_and_checkout(outcome.transaction_id, ADMIN, item.id, now + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(active.status, BorrowStatus::Active);
    assert_eq!(active.item_id, Some(item.id));
    assert_eq!(active.metadata.class_name.as_deref(), Some("Computer Networks"));
    assert_ledger_consistent(&desk.store).await;

    let returned = borrow
        .return_item(outcome.transaction_id, ADMIN, Some("All cables present".into()))
        .await
        .unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert!(returned.checkout_at.unwrap() <= returned.returned_at.unwrap());
    assert_eq!(returned.checkin_note.as_deref(), Some("All cables present"));

    let item = desk.store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Available);

    assert_eq!(
        drain(&desk.services.notifier, &mut desk.events).await,
        vec![
            pair("admin_room", "new_borrow_request"),
            pair("student_2201001", "borrow_accepted"),
            pair("admin_room", "student_arrived"),
            pair("student_2201001", "borrow_completed"),
            pair("admin_room", "request_processed"),
            pair("student_2201001", "item_returned"),
            pair("admin_room", "item_returned"),
        ]
    );
}

#[tokio::test]
async fn test_past_return_time_creates_nothing() {
    let mut desk = desk().await;
    let now = Utc::now();
    let mut input = request(ayu(), now);
    input.promised_return = now - Duration::minutes(1);

    let err = desk.services.borrow.submit_at(input, now).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidReturnTime));
    assert!(desk
        .store
        .list_for_requester(&ayu(), &BorrowStatus::OPEN)
        .await
        .unwrap()
        .is_empty());
    assert!(drain(&desk.services.notifier, &mut desk.events).await.is_empty());
}

#[tokio::test]
async fn test_program_mismatch_is_refused() {
    let desk = desk().await;
    let now = Utc::now();
    let err = desk
        .services
        .borrow
        .submit_at(request(Requester::Student("2301050".into()), now), now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProgramMismatch { .. }));
}

#[tokio::test]
async fn test_unattended_request_expires_on_sweep() {
    let mut desk = desk().await;
    let borrow = &desk.services.borrow;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let mut input = request(ayu(), now);
    input.item_id = Some(item.id);
    let outcome = borrow.submit_at(input, now).await.unwrap();
    drain(&desk.services.notifier, &mut desk.events).await;

    let report = borrow.sweep_at(now + Duration::minutes(14)).await.unwrap();
    assert_eq!(report, SweepReport::default());

    let report = borrow.sweep_at(now + Duration::minutes(16)).await.unwrap();
    assert_eq!(report.expired, 1);

    let expired = borrow.get(outcome.transaction_id).await.unwrap();
    assert_eq!(expired.status, BorrowStatus::Rejected);
    assert_eq!(expired.metadata.auto_rejected, Some(true));
    assert_eq!(expired.metadata.rejected_by, Some(None));
    assert!(expired.metadata.rejection_reason.is_some());

    let item = desk.store.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Available);

    assert_eq!(
        drain(&desk.services.notifier, &mut desk.events).await,
        vec![
            pair("student_2201001", "borrow_auto_rejected"),
            pair("admin_room", "request_auto_rejected"),
        ]
    );
}

#[tokio::test]
async fn test_second_request_within_window_is_duplicate() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let now = Utc::now();

    borrow.submit_at(request(ayu(), now), now).await.unwrap();
    let err = borrow
        .submit_at(request(ayu(), now + Duration::minutes(2)), now + Duration::minutes(2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicatePendingRequest(_)));
}

#[tokio::test]
async fn test_resubmission_after_window_closes_the_stale_request() {
    let mut desk = desk().await;
    let borrow = &desk.services.borrow;
    let now = Utc::now();

    let first = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    drain(&desk.services.notifier, &mut desk.events).await;

    // No sweep in between
    let later = now + Duration::minutes(16);
    let second = borrow.submit_at(request(ayu(), later), later).await.unwrap();
    assert_eq!(second.status, BorrowStatus::Pending);

    let stale = borrow.get(first).await.unwrap();
    assert_eq!(stale.status, BorrowStatus::Rejected);
    assert_eq!(stale.metadata.auto_rejected, Some(true));
    assert_eq!(stale.metadata.rejected_by, Some(None));

    assert_eq!(
        drain(&desk.services.notifier, &mut desk.events).await,
        vec![
            pair("student_2201001", "borrow_auto_rejected"),
            pair("admin_room", "request_auto_rejected"),
            pair("admin_room", "new_borrow_request"),
        ]
    );
    assert_eq!(borrow.sweep_at(later).await.unwrap(), SweepReport::default());
}

#[tokio::test]
async fn test_uncollected_acceptance_does_not_block_resubmission() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let now = Utc::now();

    let first = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    borrow.accept_at(first, ADMIN, now + Duration::minutes(1)).await.unwrap();

    // Still before the promised return: the acceptance holds
    let before = now + Duration::hours(2);
    let err = borrow.submit_at(request(ayu(), before), before).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicatePendingRequest(_)));

    let after = now + Duration::hours(3) + Duration::minutes(1);
    borrow.submit_at(request(ayu(), after), after).await.unwrap();
    assert_eq!(borrow.get(first).await.unwrap().status, BorrowStatus::Rejected);
    assert_eq!(
        desk.store
            .list_for_requester(&ayu(), &BorrowStatus::OPEN_REQUEST)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_checkout_of_lent_item_keeps_request_accepted() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let outcome = borrow.submit_at(request(ayu(), now), now).await.unwrap();
    borrow.accept(outcome.transaction_id, ADMIN).await.unwrap();

    borrow
        .direct_lend(DirectLend {
            requester: budi(),
            profile: None,
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: now + Duration::hours(1),
            schedule_id: None,
        })
        .await
        .unwrap();

    let err = borrow
        .scan_and_checkout(outcome.transaction_id, ADMIN, item.id, now + Duration::hours(2))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ItemUnavailable(_)));

    let still = borrow.get(outcome.transaction_id).await.unwrap();
    assert_eq!(still.status, BorrowStatus::Accepted);
    assert_eq!(still.item_id, None);
    assert_ledger_consistent(&desk.store).await;
}

#[tokio::test]
async fn test_direct_lending_starts_active() {
    let mut desk = desk().await;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let loan = desk
        .services
        .borrow
        .direct_lend(DirectLend {
            requester: ayu(),
            profile: None,
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: now + Duration::hours(1),
            schedule_id: Some(1),
        })
        .await
        .unwrap();

    assert_eq!(loan.status, BorrowStatus::Active);
    assert_eq!(loan.acceptance_deadline, None);
    assert_eq!(loan.metadata.direct_lending, Some(true));
    assert_eq!(loan.metadata.lending_admin, Some(ADMIN));
    assert_eq!(loan.checkout_admin_id, Some(ADMIN));
    assert_eq!(
        desk.store.get_item(item.id).await.unwrap().unwrap().status,
        ItemStatus::OnLoan
    );
    assert_ledger_consistent(&desk.store).await;

    assert_eq!(
        drain(&desk.services.notifier, &mut desk.events).await,
        vec![
            pair("student_2201001", "direct_lending_completed"),
            pair("admin_room", "direct_lending_completed"),
        ]
    );
}

#[tokio::test]
async fn test_direct_lending_registers_new_requester() {
    let desk = desk().await;
    let item = add_item(&desk.store, "LAB-0001").await;
    let lecturer = Requester::Lecturer("198703".into());

    desk.services
        .borrow
        .direct_lend(DirectLend {
            requester: lecturer.clone(),
            profile: Some(RequesterProfile {
                requester: lecturer.clone(),
                name: "Dr. Hartono".into(),
                program: "Informatics".into(),
            }),
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: Utc::now() + Duration::hours(1),
            schedule_id: None,
        })
        .await
        .unwrap();

    assert!(desk.store.find_requester(&lecturer).await.unwrap().is_some());
}

#[tokio::test]
async fn test_expire_and_mark_overdue_are_idempotent() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let request_id = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    let later = now + Duration::minutes(20);
    let first = borrow.expire_at(request_id, later).await.unwrap();
    let err = borrow.expire_at(request_id, later).await.unwrap_err();
    assert!(matches!(err, AppError::TransactionNotFound(_)));
    assert_eq!(borrow.get(request_id).await.unwrap(), first);

    let loan = borrow
        .direct_lend(DirectLend {
            requester: budi(),
            profile: None,
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: now + Duration::hours(1),
            schedule_id: None,
        })
        .await
        .unwrap();

    let late = now + Duration::hours(2);
    assert_eq!(borrow.sweep_at(late).await.unwrap().overdue, 1);
    assert_eq!(borrow.sweep_at(late).await.unwrap(), SweepReport::default());
    assert_eq!(borrow.get(loan.id).await.unwrap().status, BorrowStatus::Overdue);

    // Overdue loans still come back through a normal return
    let returned = borrow.return_item(loan.id, ADMIN, None).await.unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert_ledger_consistent(&desk.store).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_accept_and_expire_race_has_one_winner() {
    for _ in 0..20 {
        let desk = desk().await;
        let borrow = desk.services.borrow.clone();
        let now = Utc::now();
        let id = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
        let deadline = now + Duration::minutes(15);

        let accepting = borrow.clone();
        let expiring = borrow.clone();
        let (accepted, expired) = tokio::join!(
            tokio::spawn(async move { accepting.accept_at(id, ADMIN, deadline - Duration::seconds(1)).await }),
            tokio::spawn(async move { expiring.expire_at(id, deadline + Duration::seconds(1)).await }),
        );
        let (accepted, expired) = (accepted.unwrap(), expired.unwrap());

        assert!(accepted.is_ok() != expired.is_ok());
        let loser = accepted.as_ref().err().or(expired.as_ref().err()).unwrap();
        assert!(matches!(loser, AppError::TransactionNotFound(_)));

        let status = borrow.get(id).await.unwrap().status;
        if accepted.is_ok() {
            assert_eq!(status, BorrowStatus::Accepted);
        } else {
            assert_eq!(status, BorrowStatus::Rejected);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_create_one_request() {
    let desk = desk().await;
    let now = Utc::now();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let borrow = desk.services.borrow.clone();
            tokio::spawn(async move { borrow.submit_at(request(ayu(), now), now).await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, AppError::DuplicatePendingRequest(_))),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(
        desk.store
            .list_for_requester(&ayu(), &BorrowStatus::OPEN_REQUEST)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_direct_lending_of_one_item() {
    for _ in 0..20 {
        let desk = desk().await;
        let item = add_item(&desk.store, "LAB-0001").await;
        let now = Utc::now();

        let lend = |requester: Requester| {
            let borrow = desk.services.borrow.clone();
            let input = DirectLend {
                requester,
                profile: None,
                item_id: item.id,
                admin_id: ADMIN,
                promised_return: now + Duration::hours(1),
                schedule_id: None,
            };
            tokio::spawn(async move { borrow.direct_lend_at(input, now).await })
        };
        let (first, second) = tokio::join!(lend(ayu()), lend(budi()));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.is_ok() != second.is_ok());
        let loser = first.as_ref().err().or(second.as_ref().err()).unwrap();
        assert!(matches!(loser, AppError::ItemUnavailable(_)));
        assert_eq!(desk.store.list_by_status(&BorrowStatus::ON_LOAN).await.unwrap().len(), 1);
        assert_ledger_consistent(&desk.store).await;
    }
}

struct Stalled;

#[async_trait::async_trait]
impl Publisher for Stalled {
    async fn publish(&self, _: &Topic, _: &BorrowEvent) -> Result<(), PublishError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_transport_does_not_hold_up_transitions() {
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;
    let (scheduler, _handle) = ExpiryScheduler::new();
    let borrow = BorrowService::new(
        store.clone(),
        Notifier::new(Arc::new(Stalled), std::time::Duration::from_secs(30)),
        scheduler,
        Duration::minutes(15),
        false,
    );
    let now = Utc::now();

    let work = async {
        for requester in [ayu(), budi()] {
            borrow.submit_at(request(requester, now), now).await.unwrap();
        }
        borrow.sweep_at(now + Duration::minutes(16)).await.unwrap()
    };
    let report = tokio::time::timeout(std::time::Duration::from_secs(2), work)
        .await
        .expect("transitions waited on event delivery");
    assert_eq!(report.expired, 2);
}

#[tokio::test]
async fn test_reject_only_before_checkout() {
    let mut desk = desk().await;
    let borrow = &desk.services.borrow;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    let id = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    let rejected = borrow.reject(id, ADMIN, "No lab session today").await.unwrap();
    assert_eq!(rejected.status, BorrowStatus::Rejected);
    assert_eq!(rejected.metadata.rejected_by, Some(Some(ADMIN)));
    assert_eq!(rejected.checkin_admin_id, Some(ADMIN));

    // A rejected request frees the requester to ask again
    let id = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    borrow.accept(id, ADMIN).await.unwrap();
    borrow
        .scan_and_checkout(id, ADMIN, item.id, now + Duration::hours(1))
        .await
        .unwrap();
    let err = borrow.reject(id, ADMIN, "Changed my mind").await.unwrap_err();
    assert!(matches!(err, AppError::TransactionNotFound(_)));

    let events = drain(&desk.services.notifier, &mut desk.events).await;
    assert!(events.contains(&pair("student_2201001", "borrow_rejected")));
}

#[tokio::test]
async fn test_pending_list_hides_closed_windows() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let now = Utc::now();

    let waiting = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    let accepted = borrow
        .submit_at(request(budi(), now), now)
        .await
        .unwrap()
        .transaction_id;
    borrow.accept_at(accepted, ADMIN, now + Duration::minutes(1)).await.unwrap();

    let list = borrow.pending_requests_at(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(list.len(), 2);
    let entry = list.iter().find(|v| v.transaction.id == waiting).unwrap();
    assert_eq!(entry.seconds_remaining, Some(600));
    let entry = list.iter().find(|v| v.transaction.id == accepted).unwrap();
    assert_eq!(entry.seconds_remaining, None);
    assert!(entry.student_arrived);

    let list = borrow.pending_requests_at(now + Duration::minutes(15)).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].transaction.id, accepted);
}

#[tokio::test]
async fn test_stale_acceptance_expires() {
    let desk = desk().await;
    let borrow = &desk.services.borrow;
    let now = Utc::now();

    let id = borrow.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    borrow.accept_at(id, ADMIN, now + Duration::minutes(1)).await.unwrap();

    assert_eq!(borrow.sweep_at(now + Duration::hours(1)).await.unwrap().expired, 0);
    assert_eq!(borrow.sweep_at(now + Duration::hours(4)).await.unwrap().expired, 1);
    assert_eq!(borrow.get(id).await.unwrap().status, BorrowStatus::Rejected);
}

#[tokio::test]
async fn test_status_override_closes_the_loan() {
    let mut desk = desk().await;
    let item = add_item(&desk.store, "LAB-0001").await;

    let loan = desk
        .services
        .borrow
        .direct_lend(DirectLend {
            requester: ayu(),
            profile: None,
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: Utc::now() + Duration::hours(1),
            schedule_id: None,
        })
        .await
        .unwrap();
    drain(&desk.services.notifier, &mut desk.events).await;

    let updated = desk
        .services
        .inventory
        .update(
            item.id,
            UpdateItem {
                status: Some(ItemStatus::InRepair),
                ..Default::default()
            },
            ADMIN,
        )
        .await
        .unwrap();
    assert_eq!(updated.status, ItemStatus::InRepair);

    let closed = desk.services.borrow.get(loan.id).await.unwrap();
    assert_eq!(closed.status, BorrowStatus::Returned);
    assert!(closed.checkin_note.unwrap().contains("in_repair"));
    assert_ledger_consistent(&desk.store).await;
    assert_eq!(
        drain(&desk.services.notifier, &mut desk.events).await,
        vec![
            pair("student_2201001", "item_returned"),
            pair("admin_room", "item_returned"),
        ]
    );

    let err = desk
        .services
        .inventory
        .update(
            item.id,
            UpdateItem {
                status: Some(ItemStatus::OnLoan),
                ..Default::default()
            },
            ADMIN,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_return_by_barcode_and_item_history() {
    let desk = desk().await;
    let item = add_item(&desk.store, "LAB-0001").await;
    let borrow = &desk.services.borrow;

    assert!(matches!(
        borrow.return_by_barcode("LAB-0001", ADMIN, None).await.unwrap_err(),
        AppError::NotFound(_)
    ));

    borrow
        .direct_lend(DirectLend {
            requester: ayu(),
            profile: None,
            item_id: item.id,
            admin_id: ADMIN,
            promised_return: Utc::now() + Duration::hours(1),
            schedule_id: None,
        })
        .await
        .unwrap();

    assert!(matches!(
        desk.services.inventory.scan_barcode("LAB-0001").await.unwrap_err(),
        AppError::ItemUnavailable(_)
    ));
    assert!(matches!(
        desk.services.inventory.delete(item.id).await.unwrap_err(),
        AppError::Conflict(_)
    ));

    let returned = borrow.return_by_barcode("LAB-0001", ADMIN, None).await.unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert!(desk.services.inventory.check_available(item.id).await.unwrap());

    // Items with history are kept
    assert!(matches!(
        desk.services.inventory.delete(item.id).await.unwrap_err(),
        AppError::Conflict(_)
    ));
}

#[tokio::test]
async fn test_legacy_record_is_returned_like_any_other() {
    let desk = desk().await;
    let item = add_item(&desk.store, "LAB-0001").await;
    let now = Utc::now();

    // Written before metadata was versioned
    let legacy: BorrowMetadata =
        serde_json::from_str(r#"{"requester_name": "Ayu Lestari", "validation_passed": true}"#).unwrap();
    assert!(legacy.is_legacy());

    let loan = desk
        .store
        .insert_transaction(NewBorrow {
            id: uuid::Uuid::new_v4(),
            requester: ayu(),
            schedule_id: None,
            item_id: Some(item.id),
            promised_return: now + Duration::hours(1),
            status: BorrowStatus::Active,
            acceptance_deadline: None,
            metadata: legacy,
            created_at: now - Duration::days(30),
            checkout_at: Some(now - Duration::days(30)),
            checkout_admin_id: Some(1),
            profile: None,
            expire_stale: None,
        })
        .await
        .unwrap()
        .transaction;

    let returned = desk.services.borrow.return_item(loan.id, ADMIN, None).await.unwrap();
    assert_eq!(returned.status, BorrowStatus::Returned);
    assert!(returned.metadata.is_legacy());
    assert_eq!(returned.metadata.accepted_by, None);
}

#[tokio::test]
async fn test_request_timer_expires_without_sweep() {
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;
    let hub = BroadcastHub::new(16);
    let mut events = hub.subscribe();
    let (scheduler, _handle) = ExpiryScheduler::new();
    let notifier = Notifier::new(Arc::new(hub), std::time::Duration::from_secs(1));
    let borrow = BorrowService::new(
        store.clone(),
        notifier.clone(),
        scheduler,
        Duration::milliseconds(100),
        true,
    );

    let id = borrow.submit(request(ayu(), Utc::now())).await.unwrap().transaction_id;
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;

    assert_eq!(borrow.get(id).await.unwrap().status, BorrowStatus::Rejected);
    assert!(drain(&notifier, &mut events).await.contains(&pair("student_2201001", "borrow_auto_rejected")));
}

#[tokio::test]
async fn test_rearm_after_restart() {
    let store = Arc::new(MemoryStore::new());
    seed(&store).await;
    let now = Utc::now();

    let hub = BroadcastHub::new(16);
    let (scheduler, handle) = ExpiryScheduler::new();
    let before = BorrowService::new(
        store.clone(),
        Notifier::new(Arc::new(hub.clone()), std::time::Duration::from_secs(1)),
        scheduler,
        Duration::milliseconds(150),
        true,
    );
    let id = before.submit_at(request(ayu(), now), now).await.unwrap().transaction_id;
    // Process stops: its timers go with it
    handle.shutdown();

    let (scheduler, _handle) = ExpiryScheduler::new();
    let after = BorrowService::new(
        store.clone(),
        Notifier::new(Arc::new(hub), std::time::Duration::from_secs(1)),
        scheduler,
        Duration::milliseconds(150),
        true,
    );
    assert_eq!(after.rearm_timers().await.unwrap(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    assert_eq!(after.get(id).await.unwrap().status, BorrowStatus::Rejected);
}
