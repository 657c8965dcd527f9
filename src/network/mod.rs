/*
 * This module defines the protocol-agnostic model of a discovered network:
 * canonical addresses, routers with their subnets and routes, and the edges inferred between them.
 */

pub mod addr;
pub mod edge;
pub mod network_graph;
pub mod route;
pub mod router;
