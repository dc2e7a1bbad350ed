pub mod backend;
pub mod cancellation;
pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod event_bus;
pub mod navigation;
pub mod notifications;
pub mod reconciliation;
pub mod store;

#[cfg(test)]
mod testing;

pub use backend::*;
pub use cancellation::*;
pub use channels::*;
pub use config::*;
pub use dispatcher::*;
pub use event_bus::*;
pub use navigation::*;
pub use notifications::*;
pub use reconciliation::*;
pub use store::*;
