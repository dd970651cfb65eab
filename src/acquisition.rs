//! Single entry point for obtaining readings, from hardware or simulation.
//!
//! # Example
//!
//! ```no_run
//! use amplyze_lib::acquisition::AcquisitionFacade;
//!
//! fn main() -> Result<(), amplyze_lib::Error> {
//!     let mut facade = AcquisitionFacade::default();
//!     for port in facade.list_ports()? {
//!         println!("{port}");
//!     }
//!     facade.connect("/dev/ttyUSB0")?;
//!     let snapshot = facade.read(false)?;
//!     println!("Safety: {}", snapshot.safety_status_text());
//!     Ok(())
//! }
//! ```

use crate::protocol::{self, Snapshot};
use crate::serialport::{list_candidate_ports, PortDescriptor, SerialSettings, Transport};
use crate::simulator::SimulatedSource;
use crate::{Error, Result};

/// Delegates each read to the simulator or to the serial transport.
///
/// Every call is independent: one request, no retries, no history kept.
#[derive(Debug)]
pub struct AcquisitionFacade {
    transport: Transport,
    simulator: SimulatedSource,
}

impl Default for AcquisitionFacade {
    fn default() -> Self {
        Self::new(SerialSettings::default())
    }
}

impl AcquisitionFacade {
    pub fn new(settings: SerialSettings) -> Self {
        Self::with_simulator(settings, SimulatedSource::new())
    }

    pub fn with_simulator(settings: SerialSettings, simulator: SimulatedSource) -> Self {
        Self {
            transport: Transport::new(settings),
            simulator,
        }
    }

    pub fn list_ports(&self) -> Result<Vec<PortDescriptor>> {
        list_candidate_ports()
    }

    pub fn connect(&mut self, label: &str) -> Result<String> {
        self.transport.connect(label)
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Produces a fresh snapshot.
    ///
    /// With `simulate` the transport is not touched and no connection is needed.
    pub fn read(&mut self, simulate: bool) -> Result<Snapshot> {
        if simulate {
            log::debug!("Reading simulated snapshot");
            let payload = self.simulator.generate();
            if payload.is_empty() {
                log::warn!("Simulator returned no data");
            }
            return Ok(Snapshot::decode(&payload));
        }

        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }
        let line = self.transport.request_raw()?;
        Ok(Snapshot::decode(&protocol::parse(&line)?))
    }
}

/// Orchestrates read then report, owning the most recent snapshot.
///
/// A successful read replaces the held snapshot; a failed one leaves it untouched.
#[derive(Debug, Default)]
pub struct Session {
    facade: AcquisitionFacade,
    last: Option<Snapshot>,
}

impl Session {
    pub fn new(facade: AcquisitionFacade) -> Self {
        Self { facade, last: None }
    }

    pub fn facade(&self) -> &AcquisitionFacade {
        &self.facade
    }

    pub fn facade_mut(&mut self) -> &mut AcquisitionFacade {
        &mut self.facade
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    pub fn read(&mut self, simulate: bool) -> Result<&Snapshot> {
        let snapshot = self.facade.read(simulate)?;
        Ok(self.last.insert(snapshot))
    }

    /// Writes a report of the held snapshot. `false` if nothing was read yet.
    #[cfg(feature = "report")]
    pub fn save_report(
        &self,
        destination: &std::path::Path,
        logo: Option<&std::path::Path>,
    ) -> bool {
        match &self.last {
            Some(snapshot) => crate::report::compose(snapshot, destination, logo),
            None => {
                log::warn!("No data to report, read the BMS first");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade() -> AcquisitionFacade {
        AcquisitionFacade::with_simulator(SerialSettings::default(), SimulatedSource::with_seed(3))
    }

    #[test]
    fn simulated_read_needs_no_connection() {
        let mut facade = facade();
        assert!(!facade.is_connected());
        let snapshot = facade.read(true).unwrap();
        assert_eq!(snapshot.cells().len(), 4);
        assert_eq!(snapshot.full_capacity_mah(), Some(2500));
    }

    #[test]
    fn hardware_read_requires_connection() {
        let mut facade = facade();
        assert!(matches!(facade.read(false), Err(Error::NotConnected)));
    }

    #[test]
    fn reads_are_independent() {
        let mut facade = facade();
        let first = facade.read(true).unwrap();
        let second = facade.read(true).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn session_keeps_last_snapshot_on_failure() {
        let mut session = Session::new(facade());
        assert!(session.last_snapshot().is_none());

        let first = session.read(true).unwrap().clone();
        assert!(matches!(session.read(false), Err(Error::NotConnected)));
        assert_eq!(session.last_snapshot(), Some(&first));

        let second = session.read(true).unwrap().clone();
        assert_eq!(session.last_snapshot(), Some(&second));
    }

    #[cfg(feature = "report")]
    #[test]
    fn session_without_reading_cannot_report() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("report.pdf");
        assert!(!Session::default().save_report(&destination, None));
        assert!(!destination.exists());
    }
}
