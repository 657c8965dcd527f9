use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::router::RouterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeReason {
    /// Both routers report an interface on the same subnet
    SharedSubnet,
}

impl EdgeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeReason::SharedSubnet => "shared_subnet",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "shared_subnet" => Some(EdgeReason::SharedSubnet),
            _ => None,
        }
    }
}

impl Display for EdgeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unordered router pair, stored as (min, max) so that (a, b) and (b, a) are the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UndirectedEdgeKey {
    pub a: RouterId,
    pub b: RouterId,
}

impl UndirectedEdgeKey {
    /// Returns `None` for a self-loop.
    pub fn new(a: RouterId, b: RouterId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(UndirectedEdgeKey { a, b }),
            std::cmp::Ordering::Greater => Some(UndirectedEdgeKey { a: b, b: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn endpoints(&self) -> (RouterId, RouterId) {
        (self.a, self.b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub id: i64,
    pub run_id: Uuid,
    pub from_router_id: RouterId,
    pub to_router_id: RouterId,
    pub reason: EdgeReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_normalised() {
        let k1 = UndirectedEdgeKey::new(7, 3).unwrap();
        let k2 = UndirectedEdgeKey::new(3, 7).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.endpoints(), (3, 7));
        assert!(UndirectedEdgeKey::new(4, 4).is_none());
    }
}
