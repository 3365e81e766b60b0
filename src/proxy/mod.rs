//! UDP proxy engine
//!
//! The engine keeps one backend session per `(client, backend)` flow. A single
//! inbound pump reads the client-facing socket and forwards datagrams to the
//! flow's backend socket; a per-session outbound pump relays backend replies
//! to the client; an idle reaper evicts flows that went quiet.
//!
//! ```text
//! client -> inbound pump -> classifier -> session table -> backend socket -> backend
//! backend -> backend socket -> outbound pump -> inbound socket -> client
//! ```

mod classifier;
mod flow;
mod inbound;
mod reaper;
mod server;
mod session;
mod table;

pub use classifier::{classifier_from_config, Classifier, PrefixClassifier, StaticClassifier};
pub use flow::FlowKey;
pub use inbound::InboundPump;
pub use reaper::IdleReaper;
pub use server::{run_proxy, Proxy, ProxyHandle};
pub use session::BackendSession;
pub use table::SessionTable;
