/*
 * This module provides data aquisition abilites for the application.
 * SNMP and SSH transports live here, together with the MIB and OID index decoding that only
 * the SNMP side needs. Callers see domain types (system info, interfaces, routes, command output).
 */

pub mod core;
pub mod mib;
pub mod oid_index;
pub mod snmp;
pub mod ssh;
