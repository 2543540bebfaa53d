//! One-shot timers of displays
//!
//! Displays arm and cancel their timers from whatever thread presents them. The requests
//! travel over a channel into the caller's event loop, where every armed key owns one
//! [`Timer`] source. An expired timer publishes a [`DeviceEvent::Alarm`]. Re-arming a key
//! replaces its timer.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use calloop::{
    channel::{self, Sender},
    timer::{TimeoutAction, Timer},
    LoopHandle, RegistrationToken,
};
use tracing::{trace, warn};

use super::{notifier::DeviceEvent, DisplayHandle};
use crate::error::Error;

/// Kind of a display timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    /// Static screen timeout
    Idle,
    /// Periodic invalidate of self-refreshing content
    SelfRefresh,
}

/// Identifies a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmKey {
    /// Display owning the timer
    pub display: DisplayHandle,
    /// Kind of timer
    pub kind: AlarmKind,
}

#[derive(Debug)]
enum Request {
    Arm {
        key: AlarmKey,
        after: Duration,
        generation: u64,
        serial: u64,
    },
    Cancel(AlarmKey),
}

/// Handle to the display timers, cheap to clone
///
/// A default constructed instance is detached from any event loop, its timers never expire.
#[derive(Clone, Default)]
pub struct Alarms {
    requests: Option<Sender<Request>>,
    // armed keys and the serial of their latest arm request
    armed: Arc<Mutex<HashMap<AlarmKey, u64>>>,
    serial: Arc<AtomicU64>,
}

impl fmt::Debug for Alarms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alarms")
            .field("attached", &self.requests.is_some())
            .field("armed", &self.armed.lock().unwrap().len())
            .finish()
    }
}

impl Alarms {
    /// Attach the timers to an event loop, expired timers are published to `events`
    pub(crate) fn new<D: 'static>(
        handle: &LoopHandle<'static, D>,
        events: Sender<DeviceEvent>,
    ) -> Result<(Alarms, RegistrationToken), Error> {
        let (requests, channel) = channel::channel::<Request>();
        let armed: Arc<Mutex<HashMap<AlarmKey, u64>>> = Arc::default();
        let timers: Rc<RefCell<HashMap<AlarmKey, RegistrationToken>>> = Rc::default();

        let loop_handle = handle.clone();
        let expired = armed.clone();
        let token = handle
            .insert_source(channel, move |event, _, _| {
                let channel::Event::Msg(request) = event else {
                    return;
                };
                match request {
                    Request::Arm {
                        key,
                        after,
                        generation,
                        serial,
                    } => {
                        if let Some(token) = timers.borrow_mut().remove(&key) {
                            loop_handle.remove(token);
                        }
                        let events = events.clone();
                        let registered = timers.clone();
                        let expired = expired.clone();
                        let token = loop_handle.insert_source(
                            Timer::from_duration(after),
                            move |_, _, _| {
                                registered.borrow_mut().remove(&key);
                                {
                                    let mut armed = expired.lock().unwrap();
                                    if armed.get(&key) == Some(&serial) {
                                        armed.remove(&key);
                                    }
                                }
                                trace!(?key, generation, "Alarm expired");
                                let event = DeviceEvent::Alarm {
                                    display: key.display,
                                    kind: key.kind,
                                    generation,
                                };
                                if events.send(event).is_err() {
                                    trace!(?key, "Device is gone, dropping alarm");
                                }
                                TimeoutAction::Drop
                            },
                        );
                        match token {
                            Ok(token) => {
                                timers.borrow_mut().insert(key, token);
                            }
                            Err(err) => warn!(?key, err = %err.error, "Failed to arm timer"),
                        }
                    }
                    Request::Cancel(key) => {
                        if let Some(token) = timers.borrow_mut().remove(&key) {
                            loop_handle.remove(token);
                        }
                    }
                }
            })
            .map_err(|err| Error::EventLoop(err.error))?;

        Ok((
            Alarms {
                requests: Some(requests),
                armed,
                serial: Arc::default(),
            },
            token,
        ))
    }

    fn send(&self, request: Request) {
        if let Some(requests) = &self.requests {
            if requests.send(request).is_err() {
                trace!("Event loop is gone, dropping timer request");
            }
        }
    }

    /// Arm a timer to expire after `after`, replacing an armed timer with the same key
    pub fn arm(&self, key: AlarmKey, after: Duration, generation: u64) {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        self.armed.lock().unwrap().insert(key, serial);
        self.send(Request::Arm {
            key,
            after,
            generation,
            serial,
        });
    }

    /// Cancel a timer
    pub fn cancel(&self, key: AlarmKey) {
        if self.armed.lock().unwrap().remove(&key).is_some() {
            self.send(Request::Cancel(key));
        }
    }

    /// Cancel all timers of a display
    pub fn cancel_display(&self, display: DisplayHandle) {
        for kind in [AlarmKind::Idle, AlarmKind::SelfRefresh] {
            self.cancel(AlarmKey { display, kind });
        }
    }

    /// Returns true if the timer is armed and has not expired yet
    pub fn is_armed(&self, key: AlarmKey) -> bool {
        self.armed.lock().unwrap().contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use calloop::{
        channel::{channel, Event},
        EventLoop,
    };

    use super::*;

    fn attached() -> (EventLoop<'static, Vec<DeviceEvent>>, Alarms) {
        let event_loop: EventLoop<'static, Vec<DeviceEvent>> = EventLoop::try_new().unwrap();
        let (sender, events) = channel();
        event_loop
            .handle()
            .insert_source(events, |event, _, received: &mut Vec<DeviceEvent>| {
                if let Event::Msg(event) = event {
                    received.push(event);
                }
            })
            .unwrap();
        let (alarms, _) = Alarms::new(&event_loop.handle(), sender).unwrap();
        (event_loop, alarms)
    }

    #[test]
    fn rearming_replaces_the_timer() {
        let (mut event_loop, alarms) = attached();
        let key = AlarmKey {
            display: DisplayHandle::from_raw(0),
            kind: AlarmKind::Idle,
        };
        alarms.arm(key, Duration::from_millis(5), 1);
        alarms.arm(key, Duration::from_millis(5), 2);

        let mut received = Vec::new();
        for _ in 0..20 {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), &mut received)
                .unwrap();
            if !received.is_empty() {
                break;
            }
        }
        event_loop
            .dispatch(Some(Duration::from_millis(20)), &mut received)
            .unwrap();
        assert_eq!(
            received,
            vec![DeviceEvent::Alarm {
                display: key.display,
                kind: key.kind,
                generation: 2,
            }]
        );
        assert!(!alarms.is_armed(key));
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let (mut event_loop, alarms) = attached();
        let key = AlarmKey {
            display: DisplayHandle::from_raw(3),
            kind: AlarmKind::SelfRefresh,
        };
        alarms.arm(key, Duration::from_millis(5), 7);
        assert!(alarms.is_armed(key));
        alarms.cancel_display(key.display);
        assert!(!alarms.is_armed(key));

        let mut received = Vec::new();
        for _ in 0..3 {
            event_loop
                .dispatch(Some(Duration::from_millis(20)), &mut received)
                .unwrap();
        }
        assert!(received.is_empty());
    }

    #[test]
    fn detached_timers_are_tracked() {
        let alarms = Alarms::default();
        let key = AlarmKey {
            display: DisplayHandle::from_raw(1),
            kind: AlarmKind::Idle,
        };
        alarms.arm(key, Duration::from_secs(60), 0);
        assert!(alarms.is_armed(key));
        alarms.cancel(key);
        assert!(!alarms.is_armed(key));
    }
}
