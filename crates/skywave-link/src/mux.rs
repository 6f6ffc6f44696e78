//! Transmit/receive multiplexer over an ordered set of links.
//!
//! Upper layers observe exactly one input stream and one output sink. A
//! transmission fans out to every currently-connected link in parallel;
//! per-link failures are logged and the send counts as successful if at
//! least one link accepted the frame. Inbound frames from every link land
//! in one queue, tagged with the source link name.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::link::LinkHandle;

/// One frame received from some link.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Raw frame bytes (without the length prefix).
    pub bytes: Vec<u8>,
    /// Name of the link it arrived on.
    pub link: String,
}

/// The multiplexer.
///
/// Links can be added at runtime (the TCP listener admits peers after
/// startup). Cloning shares the link set.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    links: Arc<Mutex<Vec<LinkHandle>>>,
    inbound_tx: mpsc::Sender<InboundFrame>,
}

impl Multiplexer {
    /// Create a multiplexer and the inbound queue it feeds.
    #[must_use]
    pub fn new(inbound_capacity: usize) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_capacity);
        (Self { links: Arc::new(Mutex::new(Vec::new())), inbound_tx }, inbound_rx)
    }

    /// The sender side of the inbound queue, for link reader tasks.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundFrame> {
        self.inbound_tx.clone()
    }

    /// Register a link.
    pub fn add_link(&self, link: LinkHandle) {
        self.lock().push(link);
    }

    /// Remove a link by name (listener peers that went away).
    pub fn remove_link(&self, name: &str) {
        self.lock().retain(|link| link.name != name);
    }

    /// Current link handles, for metrics reporting.
    #[must_use]
    pub fn links(&self) -> Vec<LinkHandle> {
        self.lock().clone()
    }

    /// Find a link's metrics handle by name.
    #[must_use]
    pub fn link_metrics(&self, name: &str) -> Option<Arc<crate::LinkMetrics>> {
        self.lock()
            .iter()
            .find(|link| link.name == name)
            .map(|link| Arc::clone(&link.metrics))
    }

    /// Broadcast a frame to every connected link.
    ///
    /// Returns `true` if at least one link accepted the frame. Links whose
    /// outbound queue is full or closed are skipped with a log line; a
    /// slow link never stalls the others.
    pub fn send(&self, bytes: &[u8]) -> bool {
        let links = self.lock().clone();
        let mut accepted = false;

        for link in &links {
            if !link.is_connected() {
                continue;
            }
            match link.outbound.try_send(bytes.to_vec()) {
                Ok(()) => accepted = true,
                Err(error) => {
                    tracing::warn!(link = %link.name, %error, "link refused outbound frame");
                },
            }
        }

        if !accepted {
            tracing::debug!("no link accepted the frame");
        }
        accepted
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LinkHandle>> {
        // The lock is held only for vector reads/pushes; poisoning would
        // mean a panic inside those, which cannot happen.
        self.links.lock().expect("multiplexer link set poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::link::{LinkHealth, LinkMetrics};

    fn test_link(
        name: &str,
        health: LinkHealth,
        capacity: usize,
    ) -> (LinkHandle, mpsc::Receiver<Vec<u8>>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (_health_tx, health_rx) = watch::channel(health);
        (
            LinkHandle {
                name: name.into(),
                outbound,
                health: health_rx,
                metrics: Arc::new(LinkMetrics::default()),
            },
            outbound_rx,
        )
    }

    #[tokio::test]
    async fn send_fans_out_to_connected_links() {
        let (mux, _inbound) = Multiplexer::new(16);
        let (link_a, mut rx_a) = test_link("a", LinkHealth::Connected, 4);
        let (link_b, mut rx_b) = test_link("b", LinkHealth::Connected, 4);
        mux.add_link(link_a);
        mux.add_link(link_b);

        assert!(mux.send(b"frame"));
        assert_eq!(rx_a.recv().await.unwrap(), b"frame");
        assert_eq!(rx_b.recv().await.unwrap(), b"frame");
    }

    #[tokio::test]
    async fn disconnected_links_are_skipped() {
        let (mux, _inbound) = Multiplexer::new(16);
        let (link_up, mut rx_up) = test_link("up", LinkHealth::Connected, 4);
        let (link_down, mut rx_down) = test_link("down", LinkHealth::Reconnecting, 4);
        mux.add_link(link_up);
        mux.add_link(link_down);

        assert!(mux.send(b"frame"));
        assert_eq!(rx_up.recv().await.unwrap(), b"frame");
        assert!(rx_down.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_when_no_link_accepts() {
        let (mux, _inbound) = Multiplexer::new(16);
        let (link, _rx) = test_link("down", LinkHealth::Closed, 4);
        mux.add_link(link);

        assert!(!mux.send(b"frame"));
    }

    #[tokio::test]
    async fn one_full_link_does_not_fail_the_send() {
        let (mux, _inbound) = Multiplexer::new(16);
        let (full, _rx_full) = test_link("full", LinkHealth::Connected, 1);
        let (ok, mut rx_ok) = test_link("ok", LinkHealth::Connected, 4);

        // Saturate the first link's queue.
        full.outbound.try_send(vec![0]).unwrap();
        mux.add_link(full);
        mux.add_link(ok);

        assert!(mux.send(b"frame"));
        assert_eq!(rx_ok.recv().await.unwrap(), b"frame");
    }

    #[tokio::test]
    async fn inbound_queue_tags_source_link() {
        let (mux, mut inbound) = Multiplexer::new(16);
        let sender = mux.inbound_sender();
        sender
            .send(InboundFrame { bytes: vec![1, 2, 3], link: "ardop".into() })
            .await
            .unwrap();

        let frame = inbound.recv().await.unwrap();
        assert_eq!(frame.link, "ardop");
        assert_eq!(frame.bytes, vec![1, 2, 3]);
    }
}
