//! Core of the flow-management subsystem: translates operator-facing flow
//! descriptions into OpenFlow FlowMods, dispatches them to switches over an
//! outbound event bus, persists the authoritative intent, and reconciles it
//! against what each switch actually has installed.

pub mod api;
pub mod config;
pub mod controller;
pub mod dpid;
pub mod error;
pub mod events;
pub mod matching;
pub mod model;
pub mod ofp;
pub mod store;
pub mod switch;

pub use config::Settings;
pub use controller::FlowController;
pub use dpid::Dpid;
pub use error::FlowManagerError;
