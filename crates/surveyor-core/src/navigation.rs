use parking_lot::RwLock;
use surveyor_types::{ConsoleEvent, Route};

use crate::event_bus::EventBus;

/// Boundary to whatever actually renders views.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> Route;
    fn navigate(&self, route: Route);
}

/// Tracks the current view and turns navigation requests into bus events.
pub struct BusNavigator {
    bus: EventBus,
    current: RwLock<Route>,
}

impl BusNavigator {
    pub fn new(bus: EventBus, initial: Route) -> Self {
        Self {
            bus,
            current: RwLock::new(initial),
        }
    }
}

impl Navigator for BusNavigator {
    fn current_route(&self) -> Route {
        self.current.read().clone()
    }

    fn navigate(&self, route: Route) {
        tracing::info!(route = %route, "navigate");
        *self.current.write() = route.clone();
        self.bus.publish(ConsoleEvent::Navigate { route });
    }
}
