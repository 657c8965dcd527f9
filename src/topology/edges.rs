/*!
Topology Edge Builder.

Two routers are adjacent when they report an attached subnet in common. A subnet of one router
matches a subnet of another when either contains the other, so a /24 on one side links to a /25
carved out of it on the other. Edges are only created between rows classified as routers and the
pair is normalised, so linking the same router twice is a no-op. A router later reclassified as a
host loses its edges when the store merges the new classification.
*/

use std::collections::BTreeSet;

use tracing::debug;
use uuid::Uuid;

use crate::{
    network::{
        addr::network_contains,
        edge::{EdgeReason, UndirectedEdgeKey},
        router::{Router, RouterId},
    },
    topology::store::{NetworkMembership, StoreResult, TopologyStore},
};

/// Router pairs sharing a subnet with `router_id`, computed from one membership snapshot.
fn shared_subnet_pairs(router_id: RouterId, memberships: &[NetworkMembership]) -> BTreeSet<UndirectedEdgeKey> {
    let own: Vec<_> = memberships.iter().filter(|m| m.router_id == router_id).collect();
    let mut pairs = BTreeSet::new();
    for other in memberships.iter().filter(|m| m.is_router && m.router_id != router_id) {
        let shared = own.iter().any(|mine| {
            network_contains(&mine.network, &other.network) || network_contains(&other.network, &mine.network)
        });
        if shared {
            if let Some(key) = UndirectedEdgeKey::new(router_id, other.router_id) {
                pairs.insert(key);
            }
        }
    }
    pairs
}

/// Link a freshly persisted router to the routers already stored in its run. Returns the number
/// of edges added.
pub fn link_router(store: &TopologyStore, run_id: Uuid, router: &Router) -> StoreResult<usize> {
    if !router.is_router {
        return Ok(0);
    }
    let memberships = store.network_memberships(run_id)?;
    let mut added = 0;
    for key in shared_subnet_pairs(router.id, &memberships) {
        if store.insert_edge(run_id, key, EdgeReason::SharedSubnet)? {
            debug!("edge {} <-> {} (shared subnet)", key.a, key.b);
            added += 1;
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::router::NewRouter,
        topology::run::{RunRequest, RunStatus, SnmpSettings},
    };

    fn setup() -> (TopologyStore, Uuid) {
        let store = TopologyStore::open_in_memory().unwrap();
        let run = store
            .create_run(
                &RunRequest {
                    root_ip: "10.0.0.1".parse().unwrap(),
                    snmp: SnmpSettings::default(),
                    cli_credentials: Vec::new(),
                },
                RunStatus::Running,
            )
            .unwrap();
        (store, run.id)
    }

    fn node(store: &TopologyStore, run_id: Uuid, ip: &str, is_router: bool, networks: &[&str]) -> Router {
        let networks: Vec<_> = networks.iter().map(|n| n.parse().unwrap()).collect();
        let row = NewRouter {
            is_router,
            score: if is_router { 5 } else { 0 },
            reason: "test".into(),
            ..Default::default()
        };
        store.record_node(run_id, ip.parse().unwrap(), &row, &networks, &[]).unwrap()
    }

    #[test]
    fn shared_subnet_yields_one_edge() {
        let (store, run) = setup();
        let r1 = node(&store, run, "10.0.0.1", true, &["10.0.0.0/24", "192.168.1.0/24"]);
        let r2 = node(&store, run, "10.0.0.2", true, &["10.0.0.0/24"]);
        assert_eq!(link_router(&store, run, &r1).unwrap(), 1);
        assert_eq!(link_router(&store, run, &r2).unwrap(), 0);

        let edges = store.edges(run).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].from_router_id, edges[0].to_router_id), (r1.id, r2.id));
        assert_eq!(edges[0].reason, EdgeReason::SharedSubnet);
    }

    #[test]
    fn contained_subnet_matches_either_way() {
        let (store, run) = setup();
        let wide = node(&store, run, "10.0.0.1", true, &["10.0.0.0/24"]);
        let narrow = node(&store, run, "10.0.0.130", true, &["10.0.0.128/25"]);
        let unrelated = node(&store, run, "10.1.0.1", true, &["10.1.0.0/24"]);
        assert_eq!(link_router(&store, run, &narrow).unwrap(), 1);
        assert_eq!(link_router(&store, run, &wide).unwrap(), 0);
        assert_eq!(link_router(&store, run, &unrelated).unwrap(), 0);
        assert_eq!(store.edges(run).unwrap().len(), 1);
    }

    #[test]
    fn hosts_never_get_edges() {
        let (store, run) = setup();
        let router = node(&store, run, "10.0.0.1", true, &["10.0.0.0/24"]);
        let host = node(&store, run, "10.0.0.50", false, &["10.0.0.0/24"]);
        assert_eq!(link_router(&store, run, &host).unwrap(), 0);
        assert_eq!(link_router(&store, run, &router).unwrap(), 0);
        assert!(store.edges(run).unwrap().is_empty());
    }

    #[test]
    fn linking_every_router_covers_every_pair() {
        let (store, run) = setup();
        let routers = [
            node(&store, run, "10.0.0.1", true, &["10.0.0.0/24"]),
            node(&store, run, "10.0.0.2", true, &["10.0.0.0/24", "10.0.1.0/24"]),
            node(&store, run, "10.0.1.3", true, &["10.0.1.0/24"]),
            node(&store, run, "10.0.0.3", true, &["10.0.0.0/24"]),
        ];
        let link_all = || -> usize { routers.iter().map(|r| link_router(&store, run, r).unwrap()).sum() };
        // triangle on 10.0.0.0/24 plus one link on 10.0.1.0/24
        assert_eq!(link_all(), 4);
        assert_eq!(link_all(), 0);
        let edges = store.edges(run).unwrap();
        assert!(edges.iter().all(|e| e.from_router_id < e.to_router_id));
    }
}
