mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::models::*;
use common::{card_payment, Clinic};

async fn join(clinic: &Clinic, patient_id: Uuid) -> WaitlistEntry {
    clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest {
            patient_id,
            schedule_id: clinic.schedule_id,
        })
        .await
        .unwrap()
}

async fn entry(clinic: &Clinic, id: Uuid) -> WaitlistEntry {
    clinic.engine.waitlist.get_entry(id).await.unwrap()
}

#[tokio::test]
async fn cancelling_sole_booking_relocks_seat_for_waitlist() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;
    let waiting = join(&clinic, ben).await;
    assert_eq!(waiting.status, WaitlistStatus::Waiting);

    let outcome = clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();
    assert!(outcome.seat_released);
    assert_matches!(outcome.backfill, BestEffort::Applied(Some(ref e)) if e.id == waiting.id);

    let promoted = entry(&clinic, waiting.id).await;
    assert_eq!(promoted.status, WaitlistStatus::Notified);
    assert_eq!(promoted.notification_sent_at, Some(common::day_before()));

    let seats = clinic.seats().await;
    assert_eq!((seats.booked_seats, seats.available_seats), (1, 0));

    assert!(clinic
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::WaitlistSeatOffered { entry_id, .. } if *entry_id == waiting.id)));
}

#[tokio::test]
async fn join_rejects_duplicates_and_holders() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    clinic.book(ana).await;

    let holder = clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest { patient_id: ana, schedule_id: clinic.schedule_id })
        .await;
    assert_matches!(holder, Err(AppointmentError::AlreadyBooked));

    join(&clinic, ben).await;
    let twice = clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest { patient_id: ben, schedule_id: clinic.schedule_id })
        .await;
    assert_matches!(twice, Err(AppointmentError::AlreadyWaiting));

    let banned = Patient {
        id: Uuid::new_v4(),
        name: "Cal".to_string(),
        is_blacklisted: true,
        no_show_count: 3,
    };
    clinic.engine.booking.register_patient(banned.clone()).await.unwrap();
    let blacklisted = clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest { patient_id: banned.id, schedule_id: clinic.schedule_id })
        .await;
    assert_matches!(blacklisted, Err(AppointmentError::PatientBlacklisted));
}

#[tokio::test]
async fn promotion_is_fifo_and_one_per_seat() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let cat = clinic.patient("Cat").await;
    let booked = clinic.book(ana).await;

    let first = join(&clinic, ben).await;
    clinic.clock.advance(Duration::minutes(1));
    let second = join(&clinic, cat).await;

    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    assert_eq!(entry(&clinic, first.id).await.status, WaitlistStatus::Notified);
    assert_eq!(entry(&clinic, second.id).await.status, WaitlistStatus::Waiting);

    // A second trigger with no free seat is a no-op.
    let again = clinic.engine.waitlist.promote_next(clinic.schedule_id).await.unwrap();
    assert!(again.is_none());
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test]
async fn blacklisted_waiter_is_skipped_and_expired() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let cat = clinic.patient("Cat").await;
    let booked = clinic.book(ana).await;

    let skipped = join(&clinic, ben).await;
    clinic.clock.advance(Duration::minutes(1));
    let next = join(&clinic, cat).await;

    clinic
        .engine
        .booking
        .register_patient(Patient {
            id: ben,
            name: "Ben".to_string(),
            is_blacklisted: true,
            no_show_count: 3,
        })
        .await
        .unwrap();

    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();
    assert_eq!(entry(&clinic, skipped.id).await.status, WaitlistStatus::Expired);
    assert_eq!(entry(&clinic, next.id).await.status, WaitlistStatus::Notified);
}

#[tokio::test]
async fn paying_offer_books_on_locked_seat() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;
    let waiting = join(&clinic, ben).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    clinic.clock.advance(Duration::minutes(10));
    let appointment = clinic.engine.waitlist.pay_offer(waiting.id, card_payment()).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.payment_status, PaymentStatus::Paid);
    assert_eq!(appointment.patient_id, ben);
    assert_eq!(appointment.visit_number, 2);

    let settled = entry(&clinic, waiting.id).await;
    assert_eq!(settled.status, WaitlistStatus::Booked);
    assert_eq!(settled.appointment_id, Some(appointment.id));
    assert_eq!(clinic.seats().await.booked_seats, 1);

    let twice = clinic.engine.waitlist.pay_offer(waiting.id, card_payment()).await;
    assert_matches!(twice, Err(AppointmentError::WrongStatus(_)));
}

#[tokio::test]
async fn paying_a_waiting_entry_is_rejected() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    clinic.book(ana).await;
    let waiting = join(&clinic, ben).await;

    let result = clinic.engine.waitlist.pay_offer(waiting.id, card_payment()).await;
    assert_matches!(result, Err(AppointmentError::WrongStatus(_)));

    let missing = clinic.engine.waitlist.pay_offer(Uuid::new_v4(), card_payment()).await;
    assert_matches!(missing, Err(AppointmentError::WaitlistEntryNotFound));
}

#[tokio::test]
async fn notified_patient_cannot_book_around_the_offer() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;
    join(&clinic, ben).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    let direct = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest::regular(ben, clinic.schedule_id))
        .await;
    assert_matches!(direct, Err(AppointmentError::AlreadyWaiting));
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test]
async fn late_payment_loses_seat_to_next_in_line() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let cat = clinic.patient("Cat").await;
    let booked = clinic.book(ana).await;
    let first = join(&clinic, ben).await;
    clinic.clock.advance(Duration::minutes(1));
    let second = join(&clinic, cat).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    clinic.clock.advance(Duration::minutes(16));
    let result = clinic.engine.waitlist.pay_offer(first.id, card_payment()).await;
    assert_matches!(result, Err(AppointmentError::SeatLost));

    assert_eq!(entry(&clinic, first.id).await.status, WaitlistStatus::Expired);
    assert_eq!(entry(&clinic, second.id).await.status, WaitlistStatus::Notified);
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test]
async fn expiry_sweep_releases_and_promotes_next() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let cat = clinic.patient("Cat").await;
    let booked = clinic.book(ana).await;
    let first = join(&clinic, ben).await;
    clinic.clock.advance(Duration::minutes(1));
    let second = join(&clinic, cat).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    clinic.clock.advance(Duration::minutes(14));
    let quiet = clinic.engine.run_sweep().await.unwrap();
    assert!(quiet.expired_offers.is_empty());

    clinic.clock.advance(Duration::minutes(2));
    let report = clinic.engine.run_sweep().await.unwrap();
    assert_eq!(report.expired_offers, vec![first.id]);
    assert_eq!(report.promoted_entries, vec![second.id]);

    assert_eq!(entry(&clinic, first.id).await.status, WaitlistStatus::Expired);
    let promoted = entry(&clinic, second.id).await;
    assert_eq!(promoted.status, WaitlistStatus::Notified);
    assert_eq!(promoted.notification_sent_at, Some(clinic.clock_now()));
    assert_eq!(clinic.seats().await.booked_seats, 1);

    assert!(clinic
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::WaitlistOfferExpired { entry_id, .. } if *entry_id == first.id)));
}

#[tokio::test]
async fn expiry_with_empty_waitlist_frees_the_seat() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;
    let only = join(&clinic, ben).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    clinic.clock.advance(Duration::minutes(16));
    let report = clinic.engine.run_sweep().await.unwrap();
    assert_eq!(report.expired_offers, vec![only.id]);
    assert!(report.promoted_entries.is_empty());

    let seats = clinic.seats().await;
    assert_eq!((seats.booked_seats, seats.available_seats), (0, 1));
}

#[tokio::test]
async fn withdrawing_a_notified_entry_passes_seat_on() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let cat = clinic.patient("Cat").await;
    let booked = clinic.book(ana).await;
    let first = join(&clinic, ben).await;
    clinic.clock.advance(Duration::minutes(1));
    let second = join(&clinic, cat).await;
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();

    let withdrawn = clinic.engine.waitlist.withdraw(first.id).await.unwrap();
    assert_eq!(withdrawn.status, WaitlistStatus::Expired);
    assert_eq!(entry(&clinic, second.id).await.status, WaitlistStatus::Notified);
    assert_eq!(clinic.seats().await.booked_seats, 1);

    let again = clinic.engine.waitlist.withdraw(first.id).await;
    assert_matches!(again, Err(AppointmentError::WrongStatus(_)));
}

#[tokio::test]
async fn joining_with_a_free_seat_promotes_immediately() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;

    let entry = join(&clinic, ana).await;
    assert_eq!(entry.status, WaitlistStatus::Notified);
    assert_eq!(clinic.seats().await.booked_seats, 1);
}
