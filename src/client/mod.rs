//! Client-side half of the gateway (§4.6/§4.7): a reconnecting supervisor,
//! a `uid`-keyed request/response coordinator, and a facade gluing the two
//! into `subscribe`/`unsubscribe`/`items`/`authenticate`.
//!
//! Nothing here depends on the server-side modules — a consumer could link
//! only this module against a gateway running elsewhere.

pub mod coordinator;
pub mod facade;
pub mod supervisor;

pub use coordinator::{Coordinator, CoordinatorError};
pub use facade::{GatewayClient, Subscription};
pub use supervisor::{ConnectionHandle, OutboundSink, Supervisor, RECONNECT_DELAY};
