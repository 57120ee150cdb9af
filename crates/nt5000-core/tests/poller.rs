//! Background poller publishing into the latest-value slot

use nt5000_core::emulator::Emulator;
use nt5000_core::poller::spawn_poller;
use nt5000_core::protocol::{ClockSetScheme, Dispatcher, FrameReader, MemoryTransport};
use std::thread;
use std::time::Duration;

#[tokio::test]
async fn test_poller_publishes_emulated_readings() {
    let (host, device) = MemoryTransport::pair();
    let mut reader = FrameReader::new(device, Duration::from_millis(20));
    let device_close = reader.close_handle();
    let device_thread =
        thread::spawn(move || Emulator::new(ClockSetScheme::Legacy).run(&mut reader));

    let dispatcher = Dispatcher::new(host, Duration::from_secs(1), ClockSetScheme::Legacy);
    let poller = spawn_poller(dispatcher, Duration::from_millis(20));
    let mut latest = poller.latest();
    assert!(latest.get().is_none());

    assert!(tokio::time::timeout(Duration::from_secs(5), latest.changed())
        .await
        .unwrap());
    let first = latest.get().unwrap();
    assert!(!first.suspect);
    assert!((first.reading.ac.voltage - 230.0).abs() < 1e-9);

    assert!(tokio::time::timeout(Duration::from_secs(5), latest.changed())
        .await
        .unwrap());
    let second = latest.get().unwrap();
    assert!(second.polled_at >= first.polled_at);

    poller.shutdown();
    device_close.close();
    assert!(device_thread.join().unwrap().is_ok());
}

#[tokio::test]
async fn test_timeouts_keep_the_slot_empty() {
    let (host, _device) = MemoryTransport::pair();
    let dispatcher = Dispatcher::new(host, Duration::from_millis(20), ClockSetScheme::Legacy);
    let poller = spawn_poller(dispatcher, Duration::from_millis(10));
    let latest = poller.latest();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(latest.get().is_none());
    assert!(!poller.is_finished());

    poller.shutdown();
}

#[tokio::test]
async fn test_poller_stops_when_link_breaks() {
    let (host, device) = MemoryTransport::pair();
    drop(device);
    let dispatcher = Dispatcher::new(host, Duration::from_millis(20), ClockSetScheme::Legacy);
    let poller = spawn_poller(dispatcher, Duration::from_millis(10));
    let mut latest = poller.latest();

    let changed = tokio::time::timeout(Duration::from_secs(5), latest.changed())
        .await
        .unwrap();
    assert!(!changed);
    assert!(latest.get().is_none());
}
