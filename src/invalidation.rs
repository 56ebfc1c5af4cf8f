use tokio::sync::broadcast;
use uuid::Uuid;

/// Views that must be re-fetched after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleView {
    Storefront,
    AdminProducts,
    AdminOrders,
    OrderDetail(Uuid),
    Cart,
}

/// Process-wide stale-view signal. Sending never blocks; with no
/// subscribers the event is simply dropped.
#[derive(Clone)]
pub struct Invalidations {
    tx: broadcast::Sender<StaleView>,
}

impl Invalidations {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StaleView> {
        self.tx.subscribe()
    }

    pub fn mark(&self, view: StaleView) {
        tracing::debug!(?view, "marking view stale");
        let _ = self.tx.send(view);
    }

    /// Everything that renders this order: the admin list, the storefront
    /// summary, and the detail page.
    pub fn mark_order_views(&self, order_id: Uuid) {
        self.mark(StaleView::AdminOrders);
        self.mark(StaleView::Storefront);
        self.mark(StaleView::OrderDetail(order_id));
    }

    pub fn mark_catalog_views(&self) {
        self.mark(StaleView::AdminProducts);
        self.mark(StaleView::Storefront);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn marked_views_reach_subscribers() {
        let invalidations = Invalidations::new(8);
        let mut rx = invalidations.subscribe();

        let id = Uuid::new_v4();
        invalidations.mark_order_views(id);

        assert_eq!(rx.recv().await.unwrap(), StaleView::AdminOrders);
        assert_eq!(rx.recv().await.unwrap(), StaleView::Storefront);
        assert_eq!(rx.recv().await.unwrap(), StaleView::OrderDetail(id));
    }

    #[tokio::test]
    async fn marking_without_subscribers_does_not_fail() {
        let invalidations = Invalidations::new(8);
        invalidations.mark(StaleView::Cart);
    }
}
