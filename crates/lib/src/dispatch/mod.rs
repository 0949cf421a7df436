//! Command registry and the dispatcher that drains the request channel.

mod dispatcher;
mod registry;

pub use dispatcher::{DispatchError, Dispatcher};
pub use registry::{CommandRegistry, RegistryError};
