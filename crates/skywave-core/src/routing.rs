//! OGM-driven neighbor set and best-next-hop routing table.
//!
//! A BATMAN-style table: each accepted OGM is one observation "origin O is
//! reachable via neighbor N at cumulative cost M". The table keeps the best
//! candidate per origin and expires neighbors that stop beaconing.
//!
//! Metric algebra: cumulative path cost, lower is better. The originator
//! beacons 0 and every accepting hop adds its receiving link's cost
//! (saturating, clamped to at least 1), so the metric is strictly monotone
//! along a path and the selection converges.

use std::{collections::HashMap, time::Duration};

use skywave_proto::{NeighborQuality, NodeId};

/// A directly observed neighbor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor<I> {
    /// Link the neighbor was last heard on.
    pub link: String,
    /// Last time an OGM from this neighbor was accepted.
    pub last_seen: I,
    /// Local cost of the link to this neighbor.
    pub metric: u8,
}

/// Best known path to an origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<I> {
    /// Neighbor to hand frames to.
    pub next_hop: NodeId,
    /// Cumulative cost via that neighbor.
    pub metric: u8,
    /// When this route last improved or was confirmed.
    pub updated: I,
}

/// Neighbor set and per-origin best next hop.
#[derive(Debug)]
pub struct RoutingTable<I> {
    neighbor_timeout: Duration,
    neighbors: HashMap<NodeId, Neighbor<I>>,
    routes: HashMap<NodeId, Route<I>>,
}

impl<I> RoutingTable<I>
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    /// Create an empty table.
    #[must_use]
    pub fn new(neighbor_timeout: Duration) -> Self {
        Self { neighbor_timeout, neighbors: HashMap::new(), routes: HashMap::new() }
    }

    /// Record an accepted OGM.
    ///
    /// `sender` is the neighbor that transmitted this copy, `origin` the
    /// beacon's originator, `cumulative_metric` the cost already including
    /// this hop's link cost.
    ///
    /// Tie-breaking on equal metric keeps the incumbent route — stability
    /// over churn.
    pub fn observe_ogm(
        &mut self,
        sender: NodeId,
        origin: NodeId,
        cumulative_metric: u8,
        link: &str,
        link_cost: u8,
        now: I,
    ) {
        self.neighbors.insert(
            sender,
            Neighbor { link: link.to_string(), last_seen: now, metric: link_cost },
        );

        let replace = match self.routes.get(&origin) {
            Some(route) => route.metric > cumulative_metric || route.next_hop == sender,
            None => true,
        };
        if replace {
            self.routes.insert(
                origin,
                Route { next_hop: sender, metric: cumulative_metric, updated: now },
            );
        }
    }

    /// Best route to `origin`, if any.
    #[must_use]
    pub fn route(&self, origin: &NodeId) -> Option<&Route<I>> {
        self.routes.get(origin)
    }

    /// Whether `id` is a live neighbor.
    #[must_use]
    pub fn is_neighbor(&self, id: &NodeId) -> bool {
        self.neighbors.contains_key(id)
    }

    /// Current neighbor count.
    #[must_use]
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Known origin count.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Snapshot of neighbor quality, in the shape OGM bodies carry.
    #[must_use]
    pub fn neighbor_observations(&self) -> Vec<NeighborQuality> {
        let mut observations: Vec<NeighborQuality> = self
            .neighbors
            .iter()
            .map(|(&id, neighbor)| NeighborQuality { id, metric: neighbor.metric })
            .collect();
        observations.sort_by_key(|o| *o.id.as_bytes());
        observations
    }

    /// Drop neighbors unseen within the timeout and invalidate routes whose
    /// next hop is gone. Returns the dropped neighbors.
    pub fn expire(&mut self, now: I) -> Vec<NodeId> {
        let timeout = self.neighbor_timeout;
        let mut dropped = Vec::new();
        self.neighbors.retain(|&id, neighbor| {
            let live = now - neighbor.last_seen < timeout;
            if !live {
                dropped.push(id);
            }
            live
        });

        if !dropped.is_empty() {
            let neighbors = &self.neighbors;
            self.routes.retain(|_, route| neighbors.contains_key(&route.next_hop));
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn id(callsign: &str) -> NodeId {
        NodeId::from_callsign(callsign)
    }

    #[test]
    fn direct_neighbor_becomes_route() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let now = Instant::now();

        table.observe_ogm(id("B"), id("B"), 1, "ardop", 1, now);

        assert!(table.is_neighbor(&id("B")));
        let route = table.route(&id("B")).unwrap();
        assert_eq!(route.next_hop, id("B"));
        assert_eq!(route.metric, 1);
    }

    #[test]
    fn better_metric_replaces_route() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let now = Instant::now();

        table.observe_ogm(id("B"), id("D"), 3, "ardop", 1, now);
        table.observe_ogm(id("C"), id("D"), 2, "ardop", 1, now);

        assert_eq!(table.route(&id("D")).unwrap().next_hop, id("C"));

        // Worse candidate does not displace.
        table.observe_ogm(id("B"), id("D"), 3, "ardop", 1, now);
        assert_eq!(table.route(&id("D")).unwrap().next_hop, id("C"));
    }

    #[test]
    fn equal_metric_keeps_incumbent() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let now = Instant::now();

        table.observe_ogm(id("B"), id("D"), 2, "ardop", 1, now);
        table.observe_ogm(id("C"), id("D"), 2, "ardop", 1, now);

        assert_eq!(table.route(&id("D")).unwrap().next_hop, id("B"));
    }

    #[test]
    fn incumbent_refresh_tracks_metric_changes() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let now = Instant::now();

        table.observe_ogm(id("B"), id("D"), 2, "ardop", 1, now);
        // Same next hop reports a worse path; the route follows reality.
        table.observe_ogm(id("B"), id("D"), 5, "ardop", 1, now);
        assert_eq!(table.route(&id("D")).unwrap().metric, 5);

        // Now a third party with a better path takes over.
        table.observe_ogm(id("C"), id("D"), 3, "ardop", 1, now);
        assert_eq!(table.route(&id("D")).unwrap().next_hop, id("C"));
    }

    #[test]
    fn expiry_drops_neighbor_and_dependent_routes() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let start = Instant::now();

        table.observe_ogm(id("B"), id("B"), 1, "ardop", 1, start);
        table.observe_ogm(id("B"), id("D"), 3, "ardop", 1, start);
        table.observe_ogm(id("C"), id("C"), 1, "tcp0", 1, start + Duration::from_secs(200));

        let dropped = table.expire(start + Duration::from_secs(301));
        assert_eq!(dropped, vec![id("B")]);
        assert!(table.route(&id("D")).is_none());
        assert!(table.route(&id("C")).is_some());
    }

    #[test]
    fn observations_are_sorted_and_complete() {
        let mut table = RoutingTable::new(Duration::from_secs(300));
        let now = Instant::now();

        table.observe_ogm(id("ZED"), id("ZED"), 2, "ardop", 2, now);
        table.observe_ogm(id("ABE"), id("ABE"), 1, "ardop", 1, now);

        let obs = table.neighbor_observations();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].id, id("ABE"));
        assert_eq!(obs[1].id, id("ZED"));
    }
}
