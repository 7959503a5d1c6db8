//! Cirrus node daemon.
//!
//! Serves the node's REST API on two listeners: a unix control socket for
//! local callers and a TCP address for peers. Both carry the same routes:
//! service joins ([`api`]) and the authenticated backend proxy ([`proxy`]).

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod control;
pub mod proxy;
pub mod services;
