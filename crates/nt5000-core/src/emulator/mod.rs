//! Device Emulator
//!
//! Answers the inverter protocol like a real NT5000, for testing hosts
//! without hardware. Readings are synthetic; the energy counters integrate
//! the synthetic power over wall-clock time.

mod state;

pub use state::{EmulatedDeviceState, ManualTime, SystemTime, TimeSource};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::protocol::codec::{
    encode_clock, encode_data_point, encode_error_log, encode_identity_string,
};
use crate::protocol::{
    verify_checksum, ClockField, ClockSetScheme, CommandFrame, DataPoint, DeviceClock,
    FrameReader, Measurement, Opcode, ProtocolError, ResponseFrame, Transport, COMMAND_FRAME_LEN,
};

/// Serial number the emulator reports
pub const EMULATED_SERIAL_NUMBER: &str = "1533A5012345";

/// Protocol/firmware string the emulator reports
pub const EMULATED_PROTOCOL_VERSION: &str = "111-23";

/// Peak DC power of the simulated array in kW
const PEAK_POWER_KW: f64 = 4.5;
const DC_VOLTAGE: f64 = 500.0;
const AC_VOLTAGE: f64 = 230.0;

/// Where the emulator is in its command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, not yet listening
    Idle,
    /// Waiting for the next command frame
    AwaitingCommand,
    /// Interpreting a command frame
    Dispatching,
    /// A response frame is ready to send
    Responding,
    /// A clock-set command was accepted; nothing is sent back
    UpdatingClock,
}

/// Outcome of one command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Send this frame back to the host
    Respond(ResponseFrame),
    /// A clock field write; the device does not answer these
    ClockUpdate {
        /// Field being set
        field: ClockField,
        /// Value after undoing the scheme's offset
        value: u8,
    },
    /// Malformed frame or unknown opcode; no answer
    Ignored,
}

/// Simulated inverter
pub struct Emulator {
    state: EmulatedDeviceState,
    scheme: ClockSetScheme,
    phase: Phase,
    last_reading: Option<DataPoint>,
    rng: StdRng,
    time: Box<dyn TimeSource>,
}

impl Emulator {
    /// Emulator on the system clock with a random initial energy total
    pub fn new(scheme: ClockSetScheme) -> Self {
        Self::with_parts(scheme, StdRng::from_entropy(), Box::new(SystemTime))
    }

    /// Emulator with explicit randomness and time, e.g. for tests
    pub fn with_parts(scheme: ClockSetScheme, mut rng: StdRng, time: Box<dyn TimeSource>) -> Self {
        let initial_total = 1000.0 * rng.gen::<f64>();
        Self {
            state: EmulatedDeviceState::new(initial_total),
            scheme,
            phase: Phase::Idle,
            last_reading: None,
            rng,
            time,
        }
    }

    /// Energy counters
    pub fn state(&self) -> &EmulatedDeviceState {
        &self.state
    }

    /// Current step of the command cycle
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The last synthetic reading, before byte quantisation
    pub fn last_reading(&self) -> Option<&DataPoint> {
        self.last_reading.as_ref()
    }

    /// Generate a new reading and fold its energy into the counters
    fn produce_data_point(&mut self) -> DataPoint {
        let now = self.time.now();

        let dc_power = PEAK_POWER_KW * self.rng.gen::<f64>();
        let dc = Measurement::new(DC_VOLTAGE, dc_power * 1000.0 / DC_VOLTAGE);
        let ac = Measurement::new(AC_VOLTAGE, dc.power * 1000.0 / AC_VOLTAGE);
        let temperature = 60.0 * self.rng.gen::<f64>() - 20.0;
        let heat_flux = 100.0 * self.rng.gen::<f64>();

        let energy = self.state.accumulate(dc.power, now);
        if energy > 0.0 {
            info!(
                "{:.6} kWh since last reading, energy today {:.3} kWh",
                energy,
                self.state.energy_today()
            );
        }

        let point = DataPoint {
            timestamp: now,
            dc,
            ac,
            temperature,
            heat_flux,
            energy_today: self.state.energy_today(),
            energy_total: self.state.energy_total(),
        };
        self.last_reading = Some(point.clone());
        point
    }

    /// Interpret one command frame
    pub fn handle_frame(&mut self, frame: &[u8]) -> Dispatch {
        self.phase = Phase::Dispatching;

        let command = match CommandFrame::from_bytes(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("dropping command: {}", e);
                self.phase = Phase::AwaitingCommand;
                return Dispatch::Ignored;
            }
        };
        if let Err(e) = verify_checksum(frame) {
            warn!("command {:02x?} is suspect: {}", frame, e);
        }

        let response = match Opcode::from_byte(command.opcode) {
            Some(Opcode::ReadData) => {
                info!("read data");
                encode_data_point(&self.produce_data_point())
            }
            Some(Opcode::ReadClock) => {
                info!("read time");
                encode_clock(&DeviceClock::from_datetime(&self.time.now()))
            }
            Some(Opcode::ReadSerialNumber) => {
                info!("read serial number");
                encode_identity_string(EMULATED_SERIAL_NUMBER)
            }
            Some(Opcode::ReadProtocolVersion) => {
                info!("read protocol + firmware");
                encode_identity_string(EMULATED_PROTOCOL_VERSION)
            }
            Some(Opcode::ReadErrorLog) => {
                info!("read error log slot {}", command.param);
                encode_error_log(&[])
            }
            None => return self.handle_clock_set(command),
        };

        self.phase = Phase::Responding;
        Dispatch::Respond(response)
    }

    fn handle_clock_set(&mut self, command: CommandFrame) -> Dispatch {
        match self.scheme.decode(command.opcode, command.param) {
            Some((field, value)) => {
                let shown = match field {
                    ClockField::Year => 2000 + u32::from(value),
                    _ => u32::from(value),
                };
                info!("set {} --> {}", field.name(), shown);
                self.phase = Phase::UpdatingClock;
                Dispatch::ClockUpdate { field, value }
            }
            None => {
                warn!("unknown command: {:02x?}", command.to_bytes());
                self.phase = Phase::AwaitingCommand;
                Dispatch::Ignored
            }
        }
    }

    /// Serve commands until the reader is closed
    ///
    /// Incomplete frames and idle periods are skipped; write failures end the
    /// loop with an error.
    pub fn run<T: Transport>(&mut self, reader: &mut FrameReader<T>) -> Result<(), ProtocolError> {
        info!("emulating NT5000 ({:?} clock scheme)", self.scheme);
        loop {
            self.phase = Phase::AwaitingCommand;
            let frame = match reader.receive(COMMAND_FRAME_LEN) {
                Ok(frame) => frame,
                Err(ProtocolError::Timeout { received, .. }) => {
                    if received > 0 {
                        debug!("ignoring incomplete command ({} bytes)", received);
                    }
                    continue;
                }
                Err(ProtocolError::Closed) => {
                    info!("emulator stopped");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if let Dispatch::Respond(response) = self.handle_frame(&frame) {
                reader.send(&response)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_clock, decode_data_point, decode_identity_string};
    use chrono::Local;

    fn fixture(scheme: ClockSetScheme) -> (Emulator, ManualTime) {
        let time = ManualTime::new(Local::now());
        let emulator = Emulator::with_parts(scheme, StdRng::seed_from_u64(7), Box::new(time.clone()));
        (emulator, time)
    }

    fn respond(emulator: &mut Emulator, opcode: u8) -> ResponseFrame {
        match emulator.handle_frame(&CommandFrame::new(opcode, 0x01).to_bytes()) {
            Dispatch::Respond(frame) => frame,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[test]
    fn test_starts_idle_with_seeded_total() {
        let (emulator, _) = fixture(ClockSetScheme::Legacy);
        assert_eq!(emulator.phase(), Phase::Idle);
        assert_eq!(emulator.state().energy_today(), 0.0);
        assert!((0.0..1000.0).contains(&emulator.state().energy_total()));
        assert!(emulator.last_reading().is_none());
    }

    #[test]
    fn test_read_data_response_is_valid() {
        let (mut emulator, _) = fixture(ClockSetScheme::Legacy);
        let frame = respond(&mut emulator, 0x02);
        assert!(verify_checksum(&frame).is_ok());
        assert_eq!(emulator.phase(), Phase::Responding);

        let point = decode_data_point(&frame).unwrap();
        let sent = emulator.last_reading().unwrap();
        assert!((point.dc.voltage - sent.dc.voltage).abs() <= 2.8);
        assert!((point.ac.voltage - 230.0).abs() < 1e-9);
        assert!((-20.0..=40.0).contains(&sent.temperature));
        assert!((0.0..=PEAK_POWER_KW).contains(&sent.dc.power));
    }

    #[test]
    fn test_read_clock_reports_current_time() {
        let (mut emulator, time) = fixture(ClockSetScheme::Legacy);
        let frame = respond(&mut emulator, 0x06);
        assert!(verify_checksum(&frame).is_ok());
        assert_eq!(
            decode_clock(&frame).unwrap(),
            DeviceClock::from_datetime(&time.now())
        );
    }

    #[test]
    fn test_identity_responses() {
        let (mut emulator, _) = fixture(ClockSetScheme::Legacy);
        let serial = respond(&mut emulator, 0x08);
        assert_eq!(&serial, b"1533A5012345\x71");
        let version = respond(&mut emulator, 0x09);
        assert_eq!(decode_identity_string(&version, 12), EMULATED_PROTOCOL_VERSION);
    }

    #[test]
    fn test_clock_set_is_not_answered() {
        let (mut emulator, _) = fixture(ClockSetScheme::Legacy);
        let frame = CommandFrame::new(0x35, 15).with_source(0xff).to_bytes();
        assert_eq!(
            emulator.handle_frame(&frame),
            Dispatch::ClockUpdate {
                field: ClockField::Hour,
                value: 14
            }
        );
        assert_eq!(emulator.phase(), Phase::UpdatingClock);
    }

    #[test]
    fn test_other_scheme_opcodes_are_unknown() {
        let frame = CommandFrame::new(0x53, 15).to_bytes();
        let (mut legacy, _) = fixture(ClockSetScheme::Legacy);
        assert_eq!(legacy.handle_frame(&frame), Dispatch::Ignored);

        let (mut revised, _) = fixture(ClockSetScheme::Revised);
        assert_eq!(
            revised.handle_frame(&frame),
            Dispatch::ClockUpdate {
                field: ClockField::Hour,
                value: 15
            }
        );
    }

    #[test]
    fn test_short_frame_is_ignored() {
        let (mut emulator, _) = fixture(ClockSetScheme::Legacy);
        let before = emulator.state().clone();
        assert_eq!(emulator.handle_frame(&[0x00, 0x01, 0x02]), Dispatch::Ignored);
        assert_eq!(emulator.state(), &before);
    }

    #[test]
    fn test_bad_checksum_is_still_answered() {
        let (mut emulator, _) = fixture(ClockSetScheme::Legacy);
        let dispatch = emulator.handle_frame(&[0x00, 0x01, 0x08, 0x01, 0x00]);
        assert!(matches!(dispatch, Dispatch::Respond(_)));
    }
}
