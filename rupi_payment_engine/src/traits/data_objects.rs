use crate::db_types::Order;

/// The result of an attempt to claim an order for payout execution.
///
/// Claiming is the conditional update `{status=Paid, tx_hash IS NULL} -> Processing`; exactly one worker can win it.
/// Every other shape the order can be in at that moment is reported so the executor can route accordingly.
#[derive(Debug, Clone)]
pub enum PayoutClaim {
    /// This worker won the claim and owns the send.
    Claimed(Order),
    /// The order is already `Success`; nothing to do.
    AlreadySuccess(Order),
    /// A transaction hash exists but the order never reached `Success`: a previous worker died between broadcast
    /// and finalisation. The caller must finalise with the recorded hash instead of sending again.
    Recoverable(Order),
    /// Another worker holds the `Processing` claim. The embedded order carries the `updated_at` the caller needs to
    /// decide whether the claim has gone stale.
    InProgress(Order),
    /// The order is in a status from which no payout may start.
    Ineligible(Order),
}

/// The result of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// This call performed the `Pending -> Cancelled` transition and released the reservations.
    Cancelled(Order),
    /// The order was already in a terminal, non-chargeable state. Cancelling is idempotent here.
    AlreadyInactive(Order),
}

/// Outcome of one expiry sweep run.
#[derive(Debug, Clone, Default)]
pub struct ExpirySweepResult {
    /// Orders transitioned to `Expired` by this sweep.
    pub expired: Vec<Order>,
    /// Orders the gateway reported as settled; they were diverted to the payment-success path and need a payout
    /// enqueue.
    pub diverted: Vec<Order>,
    /// `Paid` orders with no payout underway (queue loss); they need a payout re-enqueue.
    pub rescued: Vec<Order>,
}

impl ExpirySweepResult {
    pub fn total_count(&self) -> usize {
        self.expired.len() + self.diverted.len() + self.rescued.len()
    }
}
