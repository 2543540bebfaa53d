//! Event source delivering background events to the caller's event loop

use std::fmt;

use calloop::{
    channel::{self, Channel, ChannelError, Sender},
    EventSource, Poll, PostAction, Readiness, Token, TokenFactory,
};

use crate::backend::driver::VblankEvent;

use super::{alarm::AlarmKind, DisplayHandle};

/// Events detected by the background threads of a [`Device`](super::Device)
///
/// Pass every event to [`Device::process_event`](super::Device::process_event).
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The connector configuration may have changed
    Hotplug,
    /// A vertical blank happened
    Vblank(VblankEvent),
    /// A timer of a display expired
    Alarm {
        /// Display the timer belongs to
        display: DisplayHandle,
        /// Which timer
        kind: AlarmKind,
        /// Frame generation the timer was armed for
        generation: u64,
    },
}

/// [`EventSource`] for the events of a [`Device`](super::Device)
///
/// Background threads only publish events; all state changes happen when the
/// caller passes them on to the device from its own thread.
pub struct DeviceNotifier {
    channel: Channel<DeviceEvent>,
}

impl DeviceNotifier {
    pub(crate) fn new() -> (Sender<DeviceEvent>, DeviceNotifier) {
        let (sender, channel) = channel::channel();
        (sender, DeviceNotifier { channel })
    }
}

impl fmt::Debug for DeviceNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceNotifier").finish_non_exhaustive()
    }
}

impl EventSource for DeviceNotifier {
    type Event = DeviceEvent;
    type Metadata = ();
    type Ret = ();
    type Error = ChannelError;

    fn process_events<F>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: F,
    ) -> Result<PostAction, Self::Error>
    where
        F: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        self.channel.process_events(readiness, token, |event, meta| match event {
            channel::Event::Msg(event) => callback(event, meta),
            channel::Event::Closed => {}
        })
    }

    fn register(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.register(poll, token_factory)
    }

    fn reregister(&mut self, poll: &mut Poll, token_factory: &mut TokenFactory) -> calloop::Result<()> {
        self.channel.reregister(poll, token_factory)
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        self.channel.unregister(poll)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use calloop::EventLoop;

    use super::*;

    #[test]
    fn events_reach_the_event_loop() {
        let mut event_loop: EventLoop<'_, Vec<DeviceEvent>> = EventLoop::try_new().unwrap();
        let (sender, notifier) = DeviceNotifier::new();
        event_loop
            .handle()
            .insert_source(notifier, |event, _, events: &mut Vec<DeviceEvent>| events.push(event))
            .unwrap();

        sender.send(DeviceEvent::Hotplug).unwrap();
        let mut events = Vec::new();
        event_loop
            .dispatch(Some(Duration::from_millis(100)), &mut events)
            .unwrap();
        assert_eq!(events, vec![DeviceEvent::Hotplug]);
    }
}
