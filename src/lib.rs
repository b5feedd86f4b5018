//! Client for the Ariston NET remote-thermo cloud API.
//!
//! [`client::AristonClient`] owns the session, [`device`] maps each product
//! family onto typed accessors over a [`store::PropertyStore`] snapshot, and
//! [`coordinator::UpdateCoordinator`] drives periodic refreshes.

pub mod models {
    pub mod ariston;
}

pub mod client;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod services {
    pub mod realtime;
}
pub mod store;
pub mod transport;
