//! Interface to the bus transport collaborator

use crate::error::BusError;

/// Object registration on the message bus
///
/// Calls are made while the object manager holds its mutation lock, so
/// implementations must not block on network round-trips.
pub trait BusTransport: Send + Sync {
    /// Expose an object at `path`
    fn register_object(&self, path: &str) -> Result<(), BusError>;

    /// Withdraw the object at `path`; unknown paths are ignored
    fn unregister_object(&self, path: &str);
}
