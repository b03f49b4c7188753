//! Flow lifecycle orchestration for a software-defined network controller.
//!
//! This crate hosts the component that receives flow commands, keeps the
//! authoritative in-memory view of every provisioned flow, correlates the
//! asynchronous acknowledgements coming back from the path engine and the
//! switch speaker, and drives each flow through its status state machine.
//!
//! Collaborators are reached only through one-way envelopes on named logical
//! channels. The [`transport`] module provides the in-process bus used for
//! tests and simulation, the [`orchestration`] module the services
//! themselves.

#[cfg(test)]
mod tests;

pub mod orchestration;
pub mod transport;

#[cfg(feature = "flowmgr_tracing")]
pub mod flowmgr_tracing {
    use std::sync::Once;

    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize tracing once per process.
    ///
    /// Filter directives are read from `RUST_LOG`, logging is off otherwise.
    pub fn init() {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("off"))
                .unwrap_or_default();

            fmt().with_target(false).with_test_writer().with_env_filter(filter).init();
        });
    }
}
