use log::error;
use tokio::sync::mpsc;

use crate::db_types::OrderId;

/// Handle for enqueueing payout jobs.
///
/// The queue feeds the payout consumer, which runs each order through the executor exactly once; blockchain sends
/// are never retried automatically, so there is no redelivery machinery here. Lost enqueues (full buffer, consumer
/// down) are tolerated: the stalled-paid rescue sweep picks such orders up again.
#[derive(Clone)]
pub struct PayoutQueue {
    sender: mpsc::Sender<OrderId>,
}

impl PayoutQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OrderId>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    pub async fn enqueue(&self, order_id: OrderId) {
        if let Err(e) = self.sender.send(order_id).await {
            // The rescue sweep will re-enqueue; this is loud because it means the consumer died.
            error!("🏦️ Could not enqueue payout job: {e}");
        }
    }
}
