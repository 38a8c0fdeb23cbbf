mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::models::*;
use common::{at, Clinic};

#[tokio::test]
async fn booking_takes_a_seat_and_fills_schedule() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;

    let first = clinic.book(ana).await;
    assert_eq!(first.status, AppointmentStatus::Scheduled);
    assert_eq!(first.visit_number, 1);
    assert_eq!(clinic.seats().await.available_seats, 1);

    let second = clinic.book(ben).await;
    assert_eq!(second.visit_number, 2);

    let seats = clinic.seats().await;
    assert_eq!((seats.booked_seats, seats.available_seats), (2, 0));

    let schedule = clinic.engine.booking.get_schedule(clinic.schedule_id).await.unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Full);
}

#[tokio::test]
async fn same_patient_cannot_hold_two_bookings() {
    let clinic = Clinic::with_seats(3).await;
    let ana = clinic.patient("Ana").await;
    clinic.book(ana).await;

    let again = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest::regular(ana, clinic.schedule_id))
        .await;
    assert_matches!(again, Err(AppointmentError::AlreadyBooked));
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_bookings_for_last_seat_yield_one_winner() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;

    let engine_a = clinic.engine.clone();
    let engine_b = clinic.engine.clone();
    let schedule_id = clinic.schedule_id;

    let first = tokio::spawn(async move {
        engine_a
            .booking
            .book_appointment(BookAppointmentRequest::regular(ana, schedule_id))
            .await
    });
    let second = tokio::spawn(async move {
        engine_b
            .booking
            .book_appointment(BookAppointmentRequest::regular(ben, schedule_id))
            .await
    });

    let results = vec![first.await.unwrap(), second.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results.iter().any(|r| matches!(r, Err(AppointmentError::NoSeats))));

    let seats = clinic.seats().await;
    assert_eq!((seats.booked_seats, seats.total_seats), (1, 1));
}

#[tokio::test]
async fn blacklisted_and_past_bookings_are_rejected() {
    let clinic = Clinic::with_seats(3).await;
    let banned = Patient {
        id: Uuid::new_v4(),
        name: "Cal".to_string(),
        is_blacklisted: true,
        no_show_count: 3,
    };
    clinic.engine.booking.register_patient(banned.clone()).await.unwrap();

    let result = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest::regular(banned.id, clinic.schedule_id))
        .await;
    assert_matches!(result, Err(AppointmentError::PatientBlacklisted));

    let dee = clinic.patient("Dee").await;
    clinic.clock.set(at(11, 45));
    let result = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest::regular(dee, clinic.schedule_id))
        .await;
    assert_matches!(result, Err(AppointmentError::PastSchedule));
}

#[tokio::test]
async fn add_on_kind_cannot_be_booked_directly() {
    let clinic = Clinic::with_seats(3).await;
    let ana = clinic.patient("Ana").await;

    let result = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest {
            patient_id: ana,
            schedule_id: clinic.schedule_id,
            kind: AppointmentKind::AddOn,
            follow_up_doctor_id: None,
        })
        .await;
    assert_matches!(result, Err(AppointmentError::ValidationError(_)));
}

#[tokio::test]
async fn cancelling_releases_exactly_one_seat() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let booked = clinic.book(ana).await;

    let outcome = clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();
    assert_eq!(outcome.appointment.status, AppointmentStatus::Cancelled);
    assert!(outcome.seat_released);
    assert_matches!(outcome.backfill, BestEffort::Applied(None));
    assert_eq!(clinic.seats().await.booked_seats, 0);

    let again = clinic.engine.booking.cancel_appointment(booked.id).await;
    assert_matches!(again, Err(AppointmentError::AlreadyCancelled));
    assert_eq!(clinic.seats().await.booked_seats, 0);
}

#[tokio::test]
async fn paid_booking_is_refunded_on_cancel() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;

    let entry = clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest { patient_id: ben, schedule_id: clinic.schedule_id })
        .await
        .unwrap();
    clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();
    let paid = clinic.engine.waitlist.pay_offer(entry.id, common::card_payment()).await.unwrap();

    let outcome = clinic.engine.booking.cancel_appointment(paid.id).await.unwrap();
    assert_eq!(outcome.appointment.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn checked_in_appointment_cannot_be_cancelled() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let booked = clinic.book(ana).await;

    clinic.clock.set(at(8, 5));
    clinic.scan(booked.id).await.unwrap();

    let result = clinic.engine.booking.cancel_appointment(booked.id).await;
    assert_matches!(result, Err(AppointmentError::AlreadyCheckedIn));
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test]
async fn cancelling_after_window_is_rejected() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let booked = clinic.book(ana).await;

    clinic.clock.set(at(11, 31));
    let result = clinic.engine.booking.cancel_appointment(booked.id).await;
    assert_matches!(result, Err(AppointmentError::PastVisit));
}

#[tokio::test]
async fn revived_booking_gets_a_new_visit_number() {
    let clinic = Clinic::with_seats(3).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;

    let original = clinic.book(ana).await;
    clinic.engine.booking.cancel_appointment(original.id).await.unwrap();
    let ben_booking = clinic.book(ben).await;
    let revived = clinic.book(ana).await;

    assert_eq!(revived.id, original.id);
    assert_eq!(original.visit_number, 1);
    assert_eq!(ben_booking.visit_number, 2);
    assert_eq!(revived.visit_number, 3);
    assert_eq!(clinic.seats().await.booked_seats, 2);
}

#[tokio::test]
async fn no_show_at_threshold_blacklists_patient() {
    let clinic = Clinic::with_seats(2).await;
    let repeat = Patient {
        id: Uuid::new_v4(),
        name: "Eli".to_string(),
        is_blacklisted: false,
        no_show_count: 2,
    };
    clinic.engine.booking.register_patient(repeat.clone()).await.unwrap();
    let booked = clinic.book(repeat.id).await;

    clinic.clock.set(at(10, 0));
    let outcome = clinic.engine.booking.mark_no_show(booked.id).await.unwrap();
    assert_eq!(outcome.appointment.status, AppointmentStatus::NoShow);
    assert!(outcome.patient_blacklisted);
    assert_eq!(clinic.seats().await.booked_seats, 0);

    assert!(clinic
        .notices()
        .iter()
        .any(|n| matches!(n, Notice::PatientBlacklisted { no_show_count: 3, .. })));

    let again = clinic.engine.booking.mark_no_show(booked.id).await;
    assert_matches!(again, Err(AppointmentError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn completion_requires_a_call_and_calls_next() {
    let clinic = Clinic::with_seats(3).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let first = clinic.book(ana).await;
    let second = clinic.book(ben).await;

    clinic.clock.set(at(7, 45));
    clinic.scan(first.id).await.unwrap();
    clinic.scan(second.id).await.unwrap();

    let premature = clinic.engine.booking.mark_completed(first.id).await;
    assert_matches!(premature, Err(AppointmentError::NotCalled));

    clinic.clock.set(at(8, 0));
    let called = clinic.engine.booking.call_next(clinic.schedule_id).await.unwrap();
    assert_eq!(called.map(|a| a.id), Some(first.id));

    clinic.clock.set(at(8, 12));
    let outcome = clinic.engine.booking.mark_completed(first.id).await.unwrap();
    assert_eq!(outcome.appointment.status, AppointmentStatus::Completed);
    assert_matches!(outcome.next_call, BestEffort::Applied(Some(ref next)) if next.id == second.id);
    assert_eq!(clinic.appointment(second.id).await.called_at, Some(at(8, 12)));
}

#[tokio::test]
async fn recall_counts_a_missed_call() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let booked = clinic.book(ana).await;

    clinic.clock.set(at(8, 0));
    clinic.scan(booked.id).await.unwrap();

    let not_called = clinic.engine.booking.recall(booked.id).await;
    assert_matches!(not_called, Err(AppointmentError::NotCalled));

    clinic.engine.booking.call_next(clinic.schedule_id).await.unwrap();
    clinic.clock.set(at(8, 5));
    let recalled = clinic.engine.booking.recall(booked.id).await.unwrap();
    assert_eq!(recalled.missed_call_count, 1);
    assert_eq!(recalled.called_at, Some(at(8, 5)));
}

#[tokio::test]
async fn missed_call_returns_patient_to_scheduled() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let booked = clinic.book(ana).await;

    clinic.clock.set(at(8, 0));
    clinic.scan(booked.id).await.unwrap();
    clinic.engine.booking.call_next(clinic.schedule_id).await.unwrap();

    let reset = clinic.engine.booking.mark_missed_call(booked.id).await.unwrap();
    assert_eq!(reset.status, AppointmentStatus::Scheduled);
    assert_eq!(reset.missed_call_count, 1);
    assert!(reset.check_in_time.is_none());
    assert!(reset.called_at.is_none());
    assert!(reset.real_time_queue_number.is_none());

    clinic.clock.set(at(8, 30));
    let rescanned = clinic.scan(booked.id).await.unwrap();
    assert_eq!(rescanned.visit_number, booked.visit_number);
    assert_eq!(clinic.seats().await.booked_seats, 1);
}

#[tokio::test]
async fn sweep_marks_unattended_bookings_as_no_show() {
    let clinic = Clinic::with_seats(2).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let absent = clinic.book(ana).await;
    let present = clinic.book(ben).await;

    clinic.clock.set(at(9, 0));
    clinic.scan(present.id).await.unwrap();

    clinic.clock.set(at(11, 30) + Duration::minutes(20));
    let early = clinic.engine.run_sweep().await.unwrap();
    assert!(early.auto_no_shows.is_empty());

    clinic.clock.set(at(12, 1));
    let report = clinic.engine.run_sweep().await.unwrap();
    assert_eq!(report.auto_no_shows, vec![absent.id]);
    assert_eq!(clinic.appointment(absent.id).await.status, AppointmentStatus::NoShow);
    assert_eq!(clinic.appointment(present.id).await.status, AppointmentStatus::CheckedIn);
}

#[tokio::test]
async fn notification_failure_never_fails_the_transition() {
    let clinic = Clinic::with_failing_notifier(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    let booked = clinic.book(ana).await;
    let entry = clinic
        .engine
        .waitlist
        .join(JoinWaitlistRequest { patient_id: ben, schedule_id: clinic.schedule_id })
        .await
        .unwrap();

    let outcome = clinic.engine.booking.cancel_appointment(booked.id).await.unwrap();
    assert_matches!(outcome.backfill, BestEffort::Applied(Some(ref promoted)) if promoted.id == entry.id);
    assert_eq!(clinic.notices().len(), 1);
}

#[tokio::test]
async fn refreshing_a_schedule_keeps_its_seat_ledger() {
    let clinic = Clinic::with_seats(1).await;
    let ana = clinic.patient("Ana").await;
    let ben = clinic.patient("Ben").await;
    clinic.book(ana).await;

    let mut refresh = clinic.engine.booking.get_schedule(clinic.schedule_id).await.unwrap();
    refresh.booked_seats = 0;
    refresh.location = "Clinic B, Room 6".to_string();
    let stored = clinic.engine.booking.register_schedule(refresh.clone()).await.unwrap();
    assert_eq!(stored.booked_seats, 1);
    assert_eq!(stored.location, "Clinic B, Room 6");
    assert_eq!(stored.status, ScheduleStatus::Full);

    let late = clinic
        .engine
        .booking
        .book_appointment(BookAppointmentRequest::regular(ben, clinic.schedule_id))
        .await;
    assert_matches!(late, Err(AppointmentError::NoSeats));

    refresh.total_seats = 0;
    let shrunk = clinic.engine.booking.register_schedule(refresh).await;
    assert_matches!(shrunk, Err(AppointmentError::ValidationError(_)));
    assert_eq!(clinic.seats().await.total_seats, 1);
}
