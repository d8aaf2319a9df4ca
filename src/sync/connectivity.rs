//! Connectivity and visibility tracking.
//!
//! Platform glue calls [`ConnectivityMonitor::set_online`] and
//! [`ConnectivityMonitor::set_visible`] whenever the host reports a change.
//! The monitor trusts those notifications; it never probes the network.

use std::cell::Cell;
use std::rc::Rc;

use super::events::{EventBus, SyncEvent};

struct Signals {
    online: Cell<bool>,
    visible: Cell<bool>,
}

/// Cached connectivity signal with edge-triggered events.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    signals: Rc<Signals>,
    bus: EventBus,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current connectivity.
    /// The host surface is assumed visible.
    #[must_use]
    pub fn new(bus: EventBus, online: bool) -> Self {
        Self {
            signals: Rc::new(Signals {
                online: Cell::new(online),
                visible: Cell::new(true),
            }),
            bus,
        }
    }

    /// Current connectivity signal.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.signals.online.get()
    }

    /// Current visibility of the host surface.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.signals.visible.get()
    }

    /// Record a platform connectivity notification.
    pub fn set_online(&self, online: bool) {
        if self.signals.online.replace(online) == online {
            return;
        }

        if online {
            log::info!("connectivity restored");
            self.bus.publish(&SyncEvent::Online);
        } else {
            log::info!("connectivity lost");
            self.bus.publish(&SyncEvent::Offline);
        }
    }

    /// Record a platform visibility notification.
    pub fn set_visible(&self, visible: bool) {
        let was_visible = self.signals.visible.replace(visible);
        if visible && !was_visible {
            log::debug!("host surface back in foreground");
            self.bus.publish(&SyncEvent::ForegroundRegained);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::events::EventKind;
    use std::cell::RefCell;

    fn recorder(bus: &EventBus) -> Rc<RefCell<Vec<EventKind>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for kind in [
            EventKind::Online,
            EventKind::Offline,
            EventKind::ForegroundRegained,
        ] {
            let sink = Rc::clone(&log);
            let _ = bus.subscribe(kind, move |e| sink.borrow_mut().push(e.kind()));
        }
        log
    }

    #[test]
    fn test_flip_publishes_once() {
        let bus = EventBus::new();
        let events = recorder(&bus);
        let monitor = ConnectivityMonitor::new(bus, true);

        monitor.set_online(false);
        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(true);

        assert!(monitor.is_online());
        assert_eq!(*events.borrow(), vec![EventKind::Offline, EventKind::Online]);
    }

    #[test]
    fn test_foreground_only_on_hidden_to_visible() {
        let bus = EventBus::new();
        let events = recorder(&bus);
        let monitor = ConnectivityMonitor::new(bus, true);

        monitor.set_visible(true);
        monitor.set_visible(false);
        monitor.set_visible(false);
        monitor.set_visible(true);

        assert!(monitor.is_visible());
        assert_eq!(*events.borrow(), vec![EventKind::ForegroundRegained]);
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::new(EventBus::new(), false);
        let handle = monitor.clone();

        handle.set_online(true);
        assert!(monitor.is_online());
    }
}
