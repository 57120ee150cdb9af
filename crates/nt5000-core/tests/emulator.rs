//! Emulator behavior, directly and through a dispatcher over an in-memory link

use chrono::{Duration as ChronoDuration, Local, TimeZone};
use nt5000_core::emulator::{Dispatch, Emulator, ManualTime, Phase, TimeSource};
use nt5000_core::protocol::{
    ClockField, ClockSetScheme, CommandFrame, DeviceClock, Dispatcher, FrameReader,
    MemoryTransport, Opcode, ProtocolError, COMMAND_FRAME_LEN,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn emulator_at(scheme: ClockSetScheme, seed: u64) -> (Emulator, ManualTime) {
    let time = ManualTime::new(Local.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap());
    let emulator = Emulator::with_parts(scheme, StdRng::seed_from_u64(seed), Box::new(time.clone()));
    (emulator, time)
}

fn read_data(emulator: &mut Emulator) {
    let dispatch = emulator.handle_frame(&CommandFrame::new(0x02, 0x01).to_bytes());
    assert!(matches!(dispatch, Dispatch::Respond(_)));
}

#[test]
fn test_first_reading_only_sets_baseline() {
    let (mut emulator, _) = emulator_at(ClockSetScheme::Legacy, 1);
    let total = emulator.state().energy_total();

    read_data(&mut emulator);

    assert_eq!(emulator.state().energy_today(), 0.0);
    assert_eq!(emulator.state().energy_total(), total);
}

#[test]
fn test_energy_integrates_power_over_elapsed_time() {
    for seed in [1u64, 2, 3, 42] {
        let (mut emulator, time) = emulator_at(ClockSetScheme::Legacy, seed);
        read_data(&mut emulator);
        let today = emulator.state().energy_today();
        let total = emulator.state().energy_total();

        time.advance(ChronoDuration::milliseconds(2500));
        read_data(&mut emulator);

        let power = emulator.last_reading().unwrap().dc.power;
        let expected = power * 2500.0 / 3_600_000.0;
        assert_eq!(emulator.state().energy_today(), today + expected);
        assert_eq!(emulator.state().energy_total(), total + expected);
    }
}

#[test]
fn test_energy_keeps_growing_across_readings() {
    let (mut emulator, time) = emulator_at(ClockSetScheme::Legacy, 9);
    read_data(&mut emulator);

    let mut previous = emulator.state().energy_today();
    for _ in 0..10 {
        time.advance(ChronoDuration::seconds(60));
        read_data(&mut emulator);
        let today = emulator.state().energy_today();
        assert!(today >= previous);
        previous = today;
    }
    assert_eq!(emulator.state().last_sample(), Some(time.now()));
}

#[test]
fn test_unknown_opcode_changes_nothing() {
    let (mut emulator, _) = emulator_at(ClockSetScheme::Legacy, 5);
    read_data(&mut emulator);
    let before = emulator.state().clone();
    let reading = emulator.last_reading().cloned();

    let dispatch = emulator.handle_frame(&CommandFrame::new(0xff, 0x01).to_bytes());

    assert_eq!(dispatch, Dispatch::Ignored);
    assert_eq!(emulator.state(), &before);
    assert_eq!(emulator.last_reading().cloned(), reading);
    assert_eq!(emulator.phase(), Phase::AwaitingCommand);
}

#[test]
fn test_clock_set_with_legacy_offsets() {
    let (mut emulator, _) = emulator_at(ClockSetScheme::Legacy, 5);
    let frame = CommandFrame::new(0x36, 46).with_source(0xff).to_bytes();
    assert_eq!(
        emulator.handle_frame(&frame),
        Dispatch::ClockUpdate {
            field: ClockField::Minute,
            value: 45
        }
    );
}

/// Emulator serving one end of a memory link on its own thread
struct Device {
    close: nt5000_core::protocol::CloseHandle,
    thread: JoinHandle<Result<(), ProtocolError>>,
}

impl Device {
    fn start(scheme: ClockSetScheme) -> (Self, MemoryTransport) {
        let (host, device) = MemoryTransport::pair();
        let mut reader = FrameReader::new(device, Duration::from_millis(20));
        let close = reader.close_handle();
        let thread = thread::spawn(move || Emulator::new(scheme).run(&mut reader));
        (Self { close, thread }, host)
    }

    fn stop(self) {
        self.close.close();
        let result = self.thread.join().unwrap();
        assert!(result.is_ok(), "emulator failed: {result:?}");
    }
}

#[test]
fn test_dispatcher_against_emulator() {
    let (device, host) = Device::start(ClockSetScheme::Legacy);
    let mut inverter = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Legacy);

    let serial = inverter.read_serial_number().unwrap();
    assert!(!serial.suspect);
    assert_eq!(serial.value, "1533A5012345");

    let version = inverter.read_protocol_version().unwrap().value;
    assert_eq!(version.protocol, "111");
    assert_eq!(version.firmware, "23");

    let point = inverter.read_data_point().unwrap();
    assert!(!point.suspect);
    assert!((point.value.ac.voltage - 230.0).abs() < 1e-9);
    assert!(point.value.dc.power <= 4.6);

    let clock = inverter.read_clock().unwrap().value;
    let now = DeviceClock::from_datetime(&Local::now());
    assert_eq!(clock.year_offset, now.year_offset);

    assert!(inverter.read_error_log(1).unwrap().value.is_empty());

    device.stop();
}

#[test]
fn test_one_way_commands_leave_the_link_in_step() {
    let (device, host) = Device::start(ClockSetScheme::Revised);
    let mut inverter = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Revised);

    inverter.set_clock(&Local::now()).unwrap();
    inverter.send_command(CommandFrame::new(0xff, 0x01)).unwrap();

    assert_eq!(inverter.read_serial_number().unwrap().value, "1533A5012345");
    let counters = inverter.counters();
    assert_eq!(counters.tx_frames, 7);
    assert_eq!(counters.rx_frames, 1);

    device.stop();
}

#[test]
fn test_emulator_skips_noise_before_a_command() {
    let (device, mut host) = Device::start(ClockSetScheme::Legacy);
    std::io::Write::write_all(&mut host, &[0x13, 0x37]).unwrap();

    let mut inverter = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Legacy);
    assert_eq!(inverter.read_serial_number().unwrap().value, "1533A5012345");

    device.stop();
}

#[test]
fn test_zero_parameter_query_is_answered() {
    let (device, host) = Device::start(ClockSetScheme::Legacy);
    let mut inverter = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Legacy);

    let response = inverter.query(Opcode::ReadSerialNumber, 0x00).unwrap();
    assert!(response.checksum_ok);
    assert_eq!(&response.frame[..12], b"1533A5012345");

    device.stop();
}

#[test]
fn test_midnight_clock_set_reaches_the_emulator() {
    let (host, device) = MemoryTransport::pair();
    let mut inverter = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Revised);
    let mut reader = FrameReader::new(device, Duration::from_millis(200));
    let (mut emulator, _) = emulator_at(ClockSetScheme::Revised, 3);

    inverter.set_clock_field(ClockField::Hour, 0).unwrap();
    inverter.set_clock_field(ClockField::Minute, 0).unwrap();

    for field in [ClockField::Hour, ClockField::Minute] {
        let frame = reader.receive(COMMAND_FRAME_LEN).unwrap();
        assert_eq!(
            emulator.handle_frame(&frame),
            Dispatch::ClockUpdate { field, value: 0 }
        );
    }
}
