//! Booking and job lifecycle scenarios written with `ReducerTest`.

#![allow(clippy::unwrap_used, clippy::panic)]

use marketplace_core::actor::{Actor, Party};
use marketplace_core::booking::{BookingAction, BookingReducer, BookingStatus};
use marketplace_core::effect::{MarketEffect, NotificationKind};
use marketplace_core::error::DomainError;
use marketplace_core::ids::{PaymentId, QuoteId, UserId};
use marketplace_core::job::{JobAction, JobReducer, JobStatus, QuoteStatus};
use marketplace_core::money::Money;
use marketplace_core::split::{PaymentPhase, PlanTier};
use marketplace_testing::assertions::{
    assert_has_charge, assert_has_refund, assert_has_transfer, assert_no_effects, assert_notifies,
};
use marketplace_testing::fixtures::{booking_in, open_job, requested_booking, starter_split, test_env};
use marketplace_testing::ReducerTest;

#[test]
fn provider_accepts_requested_booking() {
    let booking = requested_booking();
    let provider = Actor::provider(booking.provider_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::Accept { actor: provider })
        .then_state(|b| assert_eq!(b.status, BookingStatus::Accepted))
        .then_effects(|effects| assert_notifies(effects, NotificationKind::BookingAccepted))
        .run();
}

#[test]
fn customer_cannot_accept_own_request() {
    let booking = requested_booking();
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::Accept { actor: customer })
        .then_error(|e| assert!(matches!(e, DomainError::Forbidden(_))))
        .run();
}

#[test]
fn payment_request_emits_charge_without_changing_status() {
    let booking = booking_in(BookingStatus::Accepted);
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::RequestPayment {
            actor: customer,
            plan_tier: PlanTier::Starter,
            payment_method: None,
        })
        .then_state(|b| assert_eq!(b.status, BookingStatus::Accepted))
        .then_effects(assert_has_charge)
        .run();
}

#[test]
fn paying_twice_is_a_conflict() {
    let booking = booking_in(BookingStatus::Paid);
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::RequestPayment {
            actor: customer,
            plan_tier: PlanTier::Starter,
            payment_method: None,
        })
        .then_error(|e| {
            assert_eq!(e, &DomainError::transition("booking", "paid", "paid"));
        })
        .run();
}

#[test]
fn accepted_to_reviewed_is_rejected() {
    let booking = booking_in(BookingStatus::Accepted);
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::Review {
            actor: customer,
            rating: 5,
            comment: None,
        })
        .then_error(|e| assert!(matches!(e, DomainError::InvalidTransition { .. })))
        .then_state(|b| assert_eq!(b.status, BookingStatus::Accepted))
        .run();
}

#[test]
fn confirming_a_completed_booking_is_a_no_op() {
    let booking = booking_in(BookingStatus::Completed);
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::ConfirmCompletion { actor: customer })
        .then_state(|b| assert_eq!(b.status, BookingStatus::Completed))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn confirm_from_completed_by_provider_transfers() {
    let booking = booking_in(BookingStatus::CompletedByProvider);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::ConfirmCompletion {
            actor: Actor::system(),
        })
        .then_state(|b| assert_eq!(b.status, BookingStatus::Completed))
        .then_effects(assert_has_transfer)
        .run();
}

#[test]
fn provider_cancel_after_payment_refunds_in_full() {
    let booking = booking_in(BookingStatus::Paid);
    let provider = Actor::provider(booking.provider_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::Cancel {
            actor: provider,
            side: None,
            reason: "sick".to_string(),
        })
        .then_state(|b| {
            assert_eq!(b.status, BookingStatus::CanceledProvider);
            assert_eq!(b.payment.as_ref().unwrap().refunded, Money::from_cents(10_000));
        })
        .then_effects(|effects| {
            assert_has_refund(effects);
            assert_notifies(effects, NotificationKind::Canceled);
        })
        .run();
}

#[test]
fn cancel_after_completion_is_rejected() {
    let booking = booking_in(BookingStatus::Completed);
    let admin = Actor::admin(UserId::new());

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::Cancel {
            actor: admin,
            side: Some(Party::Customer),
            reason: String::new(),
        })
        .then_error(|e| assert!(matches!(e, DomainError::InvalidTransition { .. })))
        .run();
}

#[test]
fn full_dispute_refund_reverses_earnings() {
    let mut booking = booking_in(BookingStatus::Disputed);
    booking.earnings_recorded = true;

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::ResolveDispute {
            actor: Actor::admin(UserId::new()),
            refund: Money::from_cents(10_000),
            note: "no show".to_string(),
        })
        .then_state(|b| assert_eq!(b.status, BookingStatus::Refunded))
        .then_effects(|effects| {
            assert!(effects.iter().any(|e| matches!(
                e,
                MarketEffect::ReduceEarnings { provider_share, .. } if *provider_share == Money::from_cents(9_000)
            )));
            assert!(!effects.iter().any(|e| matches!(e, MarketEffect::TransferEarnings { .. })));
        })
        .run();
}

#[test]
fn non_admin_cannot_resolve_dispute() {
    let booking = booking_in(BookingStatus::Disputed);
    let customer = Actor::customer(booking.customer_id);

    ReducerTest::new(BookingReducer)
        .with_env(test_env())
        .given_state(booking)
        .when_action(BookingAction::ResolveDispute {
            actor: customer,
            refund: Money::from_cents(10_000),
            note: String::new(),
        })
        .then_error(|e| assert!(matches!(e, DomainError::Forbidden(_))))
        .run();
}

#[test]
fn quoting_twice_on_a_job_is_rejected() {
    let mut job = open_job();
    let provider = Actor::provider(UserId::new());
    let env = test_env();
    let submit = |quote_id| JobAction::SubmitQuote {
        actor: provider,
        quote_id,
        amount: Money::from_cents(20_000),
        deposit: None,
        message: None,
    };
    marketplace_core::reducer::Reducer::reduce(&JobReducer, &mut job, submit(QuoteId::new()), &env).unwrap();

    ReducerTest::new(JobReducer)
        .with_env(env)
        .given_state(job)
        .when_action(submit(QuoteId::new()))
        .then_error(|e| assert!(matches!(e, DomainError::Conflict(_))))
        .then_state(|j| assert_eq!(j.quotes.len(), 1))
        .run();
}

#[test]
fn deposit_capture_moves_job_and_creates_earnings() {
    let mut job = open_job();
    let provider = UserId::new();
    let env = test_env();
    let quote_id = QuoteId::new();
    for action in [
        JobAction::SubmitQuote {
            actor: Actor::provider(provider),
            quote_id,
            amount: Money::from_cents(20_000),
            deposit: Some(Money::from_cents(10_000)),
            message: None,
        },
        JobAction::AcceptQuote {
            actor: Actor::customer(job.customer_id),
            quote_id,
        },
    ] {
        marketplace_core::reducer::Reducer::reduce(&JobReducer, &mut job, action, &env).unwrap();
    }

    ReducerTest::new(JobReducer)
        .with_env(env)
        .given_state(job)
        .when_action(JobAction::PaymentCaptured {
            payment_id: PaymentId::new(),
            phase: PaymentPhase::Deposit,
            charge_ref: "pi_deposit".to_string(),
            split: starter_split(),
        })
        .then_state(move |j| {
            assert_eq!(j.status, JobStatus::DepositPaid);
            assert_eq!(j.quotes[0].status, QuoteStatus::Accepted);
            assert_eq!(j.assigned_provider(), Some(provider));
        })
        .then_effects(|effects| {
            assert!(matches!(&effects[0], MarketEffect::CreateEarnings(draft) if draft.net == Money::from_cents(9_000)));
        })
        .run();
}
