//! Connector scanning
//!
//! [`ConnectorScanner`] diffs the connector list of the driver against the previous
//! scan and reports transitions, [`CrtcMapper`] keeps one timing engine per connected
//! connector.

use std::{
    collections::HashMap,
    iter::{Chain, Map},
};

use crate::backend::driver::{ConnectorId, ConnectorInfo, ConnectorState, CrtcId};

/// Responsible for tracking connected/disconnected events
///
/// ```
/// use scanout::device::scanner::{ConnectorScanEvent, ConnectorScanner};
///
/// let mut scanner = ConnectorScanner::new();
/// for event in scanner.scan(Vec::new()) {
///     match event {
///         ConnectorScanEvent::Connected(_conn) => {}
///         ConnectorScanEvent::Disconnected(_conn) => {}
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct ConnectorScanner {
    connectors: HashMap<ConnectorId, ConnectorInfo>,
}

impl ConnectorScanner {
    /// Create new [`ConnectorScanner`]
    pub fn new() -> Self {
        Default::default()
    }

    /// Should be called with the full connector list on every hotplug event
    ///
    /// Connectors missing from `connectors` are reported as disconnected if they were
    /// connected before.
    pub fn scan(&mut self, connectors: Vec<ConnectorInfo>) -> ConnectorScanResult {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        let vanished: Vec<ConnectorId> = self
            .connectors
            .keys()
            .filter(|id| !connectors.iter().any(|c| c.id == **id))
            .copied()
            .collect();
        for id in vanished {
            if let Some(mut old) = self.connectors.remove(&id) {
                if old.state == ConnectorState::Connected {
                    old.state = ConnectorState::Disconnected;
                    removed.push(old);
                }
            }
        }

        for conn in connectors {
            let curr_state = conn.state;

            use ConnectorState as State;
            if let Some(old) = self.connectors.insert(conn.id, conn.clone()) {
                match (old.state, curr_state) {
                    (State::Connected, State::Disconnected) => removed.push(conn),
                    (State::Disconnected | State::Unknown, State::Connected) => added.push(conn),
                    //
                    (State::Connected, State::Connected) => {}
                    (State::Disconnected, State::Disconnected) => {}
                    //
                    (State::Unknown, _) => {}
                    (_, State::Unknown) => {}
                }
            } else if curr_state == State::Connected {
                added.push(conn)
            }
        }

        ConnectorScanResult {
            connected: added,
            disconnected: removed,
        }
    }

    /// Get map of all connectors, connected and disconnected ones
    pub fn connectors(&self) -> &HashMap<ConnectorId, ConnectorInfo> {
        &self.connectors
    }
}

/// Result of [`ConnectorScanner::scan`]
///
/// Iterating yields disconnects before connects, so a connector that went away and came
/// back between two scans is never reported as connected twice.
#[derive(Debug, Default, Clone)]
pub struct ConnectorScanResult {
    /// Connectors that got plugged in since last scan
    pub connected: Vec<ConnectorInfo>,
    /// Connectors that got unplugged since last scan
    pub disconnected: Vec<ConnectorInfo>,
}

/// Created from [`ConnectorScanResult`], informs about connector events
#[derive(Debug, Clone)]
pub enum ConnectorScanEvent {
    /// A new connector got plugged in since last scan
    Connected(ConnectorInfo),
    /// A connector got unplugged in since last scan
    Disconnected(ConnectorInfo),
}

impl ConnectorScanResult {
    /// Creates event iterator for this result
    pub fn iter(&self) -> impl Iterator<Item = ConnectorScanEvent> {
        self.clone().into_iter()
    }

    /// Returns true if nothing changed
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

type ConnectorScanItemToEvent = fn(ConnectorInfo) -> ConnectorScanEvent;

impl IntoIterator for ConnectorScanResult {
    type Item = ConnectorScanEvent;
    type IntoIter = Chain<
        Map<std::vec::IntoIter<ConnectorInfo>, ConnectorScanItemToEvent>,
        Map<std::vec::IntoIter<ConnectorInfo>, ConnectorScanItemToEvent>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.disconnected
            .into_iter()
            .map(ConnectorScanEvent::Disconnected as ConnectorScanItemToEvent)
            .chain(
                self.connected
                    .into_iter()
                    .map(ConnectorScanEvent::Connected as ConnectorScanItemToEvent),
            )
    }
}

/// Maps timing engines to connectors
///
/// Picks the first free crtc a connector can use. A connector keeps its crtc while it is
/// known to the mapper, virtual displays reserve crtcs for hardware writeback.
#[derive(Debug, Default)]
pub struct CrtcMapper {
    crtcs: HashMap<ConnectorId, CrtcId>,
    reserved: Vec<CrtcId>,
}

impl CrtcMapper {
    /// Create new [`CrtcMapper`]
    pub fn new() -> Self {
        Self::default()
    }

    fn is_available(&self, crtc: &CrtcId) -> bool {
        !self.crtcs.values().any(|v| v == crtc) && !self.reserved.contains(crtc)
    }

    /// Return the crtc of a connector, picking a free one if it has none yet
    pub fn map(&mut self, connector: &ConnectorInfo) -> Option<CrtcId> {
        if let Some(crtc) = self.crtcs.get(&connector.id) {
            return Some(*crtc);
        }
        let crtc = connector
            .possible_crtcs
            .iter()
            .copied()
            .find(|crtc| self.is_available(crtc))?;
        self.crtcs.insert(connector.id, crtc);
        Some(crtc)
    }

    /// Release the crtc of a connector
    pub fn unmap(&mut self, connector: ConnectorId) -> Option<CrtcId> {
        self.crtcs.remove(&connector)
    }

    /// Query the crtc mapped to a connector
    pub fn crtc_for_connector(&self, connector: &ConnectorId) -> Option<CrtcId> {
        self.crtcs.get(connector).copied()
    }

    /// Reserve any free crtc out of `crtcs`, not tied to a connector
    pub fn reserve(&mut self, crtcs: &[CrtcId]) -> Option<CrtcId> {
        let crtc = crtcs.iter().copied().find(|crtc| self.is_available(crtc))?;
        self.reserved.push(crtc);
        Some(crtc)
    }

    /// Give back a crtc obtained by [`CrtcMapper::reserve`]
    pub fn release(&mut self, crtc: CrtcId) {
        self.reserved.retain(|c| *c != crtc);
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::compositor::hdr::HdrCapabilities;

    fn connector(id: u32, state: ConnectorState) -> ConnectorInfo {
        ConnectorInfo {
            id: ConnectorId(id),
            name: format!("HDMI-A-{id}"),
            state,
            modes: Vec::new(),
            physical_size: None,
            hdr: HdrCapabilities::default(),
            possible_crtcs: smallvec![CrtcId(0), CrtcId(1)],
        }
    }

    #[test]
    fn transitions_are_reported_once() {
        let mut scanner = ConnectorScanner::new();
        let result = scanner.scan(vec![
            connector(0, ConnectorState::Connected),
            connector(1, ConnectorState::Disconnected),
        ]);
        assert_eq!(result.connected.len(), 1);
        assert!(result.disconnected.is_empty());

        assert!(scanner
            .scan(vec![
                connector(0, ConnectorState::Connected),
                connector(1, ConnectorState::Disconnected),
            ])
            .is_empty());

        let result = scanner.scan(vec![
            connector(0, ConnectorState::Disconnected),
            connector(1, ConnectorState::Connected),
        ]);
        assert_eq!(result.connected[0].id, ConnectorId(1));
        assert_eq!(result.disconnected[0].id, ConnectorId(0));

        let events: Vec<_> = result.into_iter().collect();
        assert!(matches!(events[0], ConnectorScanEvent::Disconnected(_)));
    }

    #[test]
    fn vanished_connectors_are_disconnected() {
        let mut scanner = ConnectorScanner::new();
        scanner.scan(vec![connector(0, ConnectorState::Connected)]);
        let result = scanner.scan(Vec::new());
        assert_eq!(result.disconnected.len(), 1);
        assert_eq!(result.disconnected[0].state, ConnectorState::Disconnected);
        assert!(scanner.connectors().is_empty());
    }

    #[test]
    fn unknown_state_is_ignored() {
        let mut scanner = ConnectorScanner::new();
        scanner.scan(vec![connector(0, ConnectorState::Connected)]);
        assert!(scanner.scan(vec![connector(0, ConnectorState::Unknown)]).is_empty());
    }

    #[test]
    fn crtcs_are_not_shared() {
        let mut mapper = CrtcMapper::new();
        let a = connector(0, ConnectorState::Connected);
        let b = connector(1, ConnectorState::Connected);
        let c = connector(2, ConnectorState::Connected);

        assert_eq!(mapper.map(&a), Some(CrtcId(0)));
        assert_eq!(mapper.map(&a), Some(CrtcId(0)));
        assert_eq!(mapper.map(&b), Some(CrtcId(1)));
        assert_eq!(mapper.map(&c), None);

        assert_eq!(mapper.unmap(a.id), Some(CrtcId(0)));
        assert_eq!(mapper.reserve(&[CrtcId(0), CrtcId(1)]), Some(CrtcId(0)));
        assert_eq!(mapper.map(&c), None);
        mapper.release(CrtcId(0));
        assert_eq!(mapper.map(&c), Some(CrtcId(0)));
    }
}
