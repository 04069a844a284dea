//! API Handlers (C9): thin adapters binding HTTP routes to the analysis
//! pipeline (C1–C5) and issuing notifications through the hub (C6).

pub mod baselines;
pub mod regressions;
pub mod runs;
pub mod status;
pub mod trends;
pub mod ws;
