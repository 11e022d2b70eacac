//! Node-side services of the e-voting stack: the ordering boundary with a
//! single-node sequencer, the DKG actor service, the shuffle orchestrator,
//! and the HTTP proxy exposing the contract commands.

pub mod dkg;
pub mod http;
pub mod ordering;
pub mod services;
pub mod shuffle;
