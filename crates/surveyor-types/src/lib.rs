pub mod channel;
pub mod device;
pub mod events;
pub mod geometry;
pub mod notification;
pub mod route;

pub use channel::*;
pub use device::*;
pub use events::*;
pub use geometry::*;
pub use notification::*;
pub use route::*;
