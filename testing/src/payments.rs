//! Mock payment processor.

use marketplace_core::ports::{
    ChargeOutcome, ChargeRequest, ChargeStatus, PaymentError, PaymentProcessor, PortFuture,
    RefundOutcome, RefundRequest, TransferOutcome, TransferRequest, VoidRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// What the processor answered the first time a key was used
#[derive(Debug, Clone)]
struct Replay {
    fingerprint: String,
    result: Result<String, PaymentError>,
}

#[derive(Debug, Default)]
struct Ledger {
    charges: Vec<ChargeRequest>,
    transfers: Vec<TransferRequest>,
    refunds: Vec<RefundRequest>,
    voids: Vec<VoidRequest>,
    seen: HashMap<String, Replay>,
    /// Charge reference -> current state
    charge_states: HashMap<String, ChargeState>,
    fail_charges: Option<PaymentError>,
    fail_transfers: Option<PaymentError>,
    fail_refunds: Option<PaymentError>,
    pending_charges: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargeState {
    Pending,
    Succeeded,
    Voided,
}

impl Ledger {
    /// Answer a repeated key, or `None` for a new one
    fn replay(&self, key: &str, fingerprint: &str) -> Option<Result<String, PaymentError>> {
        let replay = self.seen.get(key)?;
        if replay.fingerprint == fingerprint {
            Some(replay.result.clone())
        } else {
            Some(Err(PaymentError::Upstream {
                status: Some(400),
                message: format!("idempotency_error: key {key} was used with different parameters"),
            }))
        }
    }

    fn remember(&mut self, key: &str, fingerprint: String, result: Result<String, PaymentError>) {
        self.seen.insert(key.to_string(), Replay { fingerprint, result });
    }
}

fn charge_fingerprint(request: &ChargeRequest) -> String {
    format!(
        "{:?}",
        (
            request.subject,
            request.phase,
            request.amount,
            request.platform_fee,
            request.currency,
            &request.payment_method,
        )
    )
}

/// Recording [`PaymentProcessor`] for tests
///
/// Honours idempotency keys like the real processor: repeating a key with
/// the same parameters returns the first answer (a refused charge stays
/// refused) and records no second call, while reusing a key with different
/// parameters is rejected with a 400.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentProcessor {
    ledger: Arc<Mutex<Ledger>>,
}

impl MockPaymentProcessor {
    /// Create a processor that succeeds on every call
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, PaymentError> {
        self.ledger
            .lock()
            .map_err(|_| PaymentError::InvalidResponse("Mutex lock failed".into()))
    }

    fn with_ledger<T: Default>(&self, f: impl FnOnce(&mut Ledger) -> T) -> T {
        self.ledger.lock().map(|mut ledger| f(&mut ledger)).unwrap_or_default()
    }

    /// Fail future charges with `error` (`None` to succeed again)
    pub fn fail_charges(&self, error: Option<PaymentError>) {
        self.with_ledger(|l| l.fail_charges = error);
    }

    /// Fail future transfers with `error` (`None` to succeed again)
    pub fn fail_transfers(&self, error: Option<PaymentError>) {
        self.with_ledger(|l| l.fail_transfers = error);
    }

    /// Fail future refunds with `error` (`None` to succeed again)
    pub fn fail_refunds(&self, error: Option<PaymentError>) {
        self.with_ledger(|l| l.fail_refunds = error);
    }

    /// Return `Pending` from new charges, as if the customer must still act
    pub fn pending_charges(&self, pending: bool) {
        self.with_ledger(|l| l.pending_charges = pending);
    }

    /// The customer finished a pending charge; it can no longer be voided
    pub fn complete_pending(&self, charge_ref: &str) {
        self.with_ledger(|l| {
            if let Some(state) = l.charge_states.get_mut(charge_ref) {
                *state = ChargeState::Succeeded;
            }
        });
    }

    /// Charges issued
    #[must_use]
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.with_ledger(|l| l.charges.clone())
    }

    /// Transfers issued
    #[must_use]
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.with_ledger(|l| l.transfers.clone())
    }

    /// Refunds issued
    #[must_use]
    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.with_ledger(|l| l.refunds.clone())
    }

    /// Pending charges voided
    #[must_use]
    pub fn voids(&self) -> Vec<VoidRequest> {
        self.with_ledger(|l| l.voids.clone())
    }
}

impl PaymentProcessor for MockPaymentProcessor {
    fn charge(&self, request: ChargeRequest) -> PortFuture<'_, ChargeOutcome, PaymentError> {
        Box::pin(async move {
            let mut ledger = self.lock()?;
            let fingerprint = charge_fingerprint(&request);
            let charge_ref = match ledger.replay(&request.idempotency_key, &fingerprint) {
                Some(replayed) => replayed?,
                None => {
                    if let Some(error) = ledger.fail_charges.clone() {
                        if error.is_refusal() {
                            ledger.remember(&request.idempotency_key, fingerprint, Err(error.clone()));
                        }
                        return Err(error);
                    }
                    let charge_ref = format!("pi_mock_{}", ledger.charges.len() + 1);
                    let state = if ledger.pending_charges {
                        ChargeState::Pending
                    } else {
                        ChargeState::Succeeded
                    };
                    ledger.remember(&request.idempotency_key, fingerprint, Ok(charge_ref.clone()));
                    ledger.charge_states.insert(charge_ref.clone(), state);
                    ledger.charges.push(request);
                    charge_ref
                }
            };
            let status = match ledger.charge_states.get(&charge_ref) {
                Some(ChargeState::Pending) => ChargeStatus::Pending,
                Some(ChargeState::Succeeded) => ChargeStatus::Succeeded,
                Some(ChargeState::Voided) | None => {
                    return Err(PaymentError::Declined(format!("{charge_ref} was canceled")));
                }
            };
            let client_secret = (status == ChargeStatus::Pending).then(|| format!("{charge_ref}_secret"));
            Ok(ChargeOutcome {
                charge_ref,
                status,
                client_secret,
            })
        })
    }

    fn void_charge(&self, request: VoidRequest) -> PortFuture<'_, (), PaymentError> {
        Box::pin(async move {
            let mut ledger = self.lock()?;
            if let Some(replayed) = ledger.replay(&request.idempotency_key, &request.charge_ref) {
                return replayed.map(|_| ());
            }
            match ledger.charge_states.get(&request.charge_ref) {
                Some(ChargeState::Pending) => {}
                Some(ChargeState::Succeeded | ChargeState::Voided) => {
                    return Err(PaymentError::Upstream {
                        status: Some(400),
                        message: format!("payment_intent_unexpected_state: {} cannot be canceled", request.charge_ref),
                    });
                }
                None => {
                    return Err(PaymentError::Upstream {
                        status: Some(404),
                        message: format!("resource_missing: {}", request.charge_ref),
                    });
                }
            }
            ledger.charge_states.insert(request.charge_ref.clone(), ChargeState::Voided);
            let charge_ref = request.charge_ref.clone();
            ledger.remember(&request.idempotency_key, charge_ref.clone(), Ok(charge_ref));
            ledger.voids.push(request);
            Ok(())
        })
    }

    fn transfer(&self, request: TransferRequest) -> PortFuture<'_, TransferOutcome, PaymentError> {
        Box::pin(async move {
            let mut ledger = self.lock()?;
            if let Some(error) = ledger.fail_transfers.clone() {
                return Err(error);
            }
            let fingerprint = format!("{:?}", (&request.destination_account, request.amount, request.currency));
            if let Some(replayed) = ledger.replay(&request.idempotency_key, &fingerprint) {
                return replayed.map(|transfer_ref| TransferOutcome { transfer_ref });
            }
            let transfer_ref = format!("tr_mock_{}", ledger.transfers.len() + 1);
            ledger.remember(&request.idempotency_key, fingerprint, Ok(transfer_ref.clone()));
            ledger.transfers.push(request);
            Ok(TransferOutcome { transfer_ref })
        })
    }

    fn refund(&self, request: RefundRequest) -> PortFuture<'_, RefundOutcome, PaymentError> {
        Box::pin(async move {
            let mut ledger = self.lock()?;
            if let Some(error) = ledger.fail_refunds.clone() {
                return Err(error);
            }
            let fingerprint = format!("{:?}", (&request.charge_ref, request.amount));
            if let Some(replayed) = ledger.replay(&request.idempotency_key, &fingerprint) {
                return replayed.map(|refund_ref| RefundOutcome { refund_ref });
            }
            let refund_ref = format!("re_mock_{}", ledger.refunds.len() + 1);
            ledger.remember(&request.idempotency_key, fingerprint, Ok(refund_ref.clone()));
            ledger.refunds.push(request);
            Ok(RefundOutcome { refund_ref })
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marketplace_core::earnings::Subject;
    use marketplace_core::ids::{BookingId, EarningsId, UserId};
    use marketplace_core::money::{Currency, Money};
    use marketplace_core::split::PaymentPhase;

    fn transfer(key: &str) -> TransferRequest {
        TransferRequest {
            earnings_id: EarningsId::new(),
            subject: Subject::Booking(BookingId::new()),
            destination_account: "acct_1".into(),
            amount: Money::from_cents(9_000),
            currency: Currency::Nzd,
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn repeated_idempotency_key_is_not_paid_twice() {
        let processor = MockPaymentProcessor::new();
        let first = processor.transfer(transfer("k1")).await.unwrap();
        let second = processor.transfer(transfer("k1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(processor.transfers().len(), 1);
    }

    #[tokio::test]
    async fn configured_failures_are_returned() {
        let processor = MockPaymentProcessor::new();
        processor.fail_transfers(Some(PaymentError::InsufficientBalance));
        assert_eq!(
            processor.transfer(transfer("k2")).await,
            Err(PaymentError::InsufficientBalance)
        );
        assert!(processor.transfers().is_empty());
    }

    fn charge(key: &str, amount: u64, payment_method: &str) -> ChargeRequest {
        ChargeRequest {
            subject: Subject::Booking(BookingId::new()),
            phase: PaymentPhase::Full,
            customer_id: UserId::new(),
            amount: Money::from_cents(amount),
            platform_fee: Money::from_cents(amount / 10),
            currency: Currency::Nzd,
            payment_method: Some(payment_method.into()),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn reusing_a_key_with_other_parameters_is_rejected() {
        let processor = MockPaymentProcessor::new();
        let first = charge("c1", 10_000, "pm_visa");
        processor.charge(first.clone()).await.unwrap();

        let mut other_card = first.clone();
        other_card.payment_method = Some("pm_amex".into());
        let err = processor.charge(other_card).await.unwrap_err();
        assert!(matches!(err, PaymentError::Upstream { status: Some(400), .. }), "{err:?}");

        let mut other_amount = first;
        other_amount.amount = Money::from_cents(12_000);
        assert!(processor.charge(other_amount).await.is_err());
        assert_eq!(processor.charges().len(), 1);
    }

    #[tokio::test]
    async fn refused_charge_stays_refused_under_its_key() {
        let processor = MockPaymentProcessor::new();
        processor.fail_charges(Some(PaymentError::Declined("card_declined".into())));
        assert!(processor.charge(charge("c2", 10_000, "pm_visa")).await.is_err());

        processor.fail_charges(None);
        assert_eq!(
            processor.charge(charge("c2", 10_000, "pm_visa")).await,
            Err(PaymentError::Declined("card_declined".into()))
        );
        assert!(processor.charge(charge("c3", 10_000, "pm_visa")).await.is_ok());
    }

    #[tokio::test]
    async fn only_pending_charges_can_be_voided() {
        let processor = MockPaymentProcessor::new();
        processor.pending_charges(true);
        let pending = processor.charge(charge("c4", 10_000, "pm_visa")).await.unwrap();
        assert_eq!(pending.status, ChargeStatus::Pending);

        let void = VoidRequest {
            charge_ref: pending.charge_ref.clone(),
            idempotency_key: "v1".into(),
        };
        processor.void_charge(void.clone()).await.unwrap();
        processor.void_charge(void).await.unwrap();
        assert_eq!(processor.voids().len(), 1);

        let settled = processor.charge(charge("c5", 10_000, "pm_visa")).await.unwrap();
        processor.complete_pending(&settled.charge_ref);
        let err = processor
            .void_charge(VoidRequest {
                charge_ref: settled.charge_ref,
                idempotency_key: "v2".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Upstream { status: Some(400), .. }));
    }
}
