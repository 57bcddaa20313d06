//! Integration tests for the DS18B20-backed temperature probe against
//! 1-wire fixture files in a temp directory.

use std::time::Duration;

use heated_chamber::sensors::TemperatureProbe;
use heated_chamber::sensors::ds18b20::{Ds18b20Source, list_devices};
use tempfile::TempDir;

const DEVICE_ID: &str = "28-0301a279e1d3";

fn write_reading(dir: &TempDir, payload: &str) {
    let dev = dir.path().join(DEVICE_ID);
    std::fs::create_dir_all(&dev).unwrap();
    std::fs::write(dev.join("w1_slave"), payload).unwrap();
}

fn good(millidegrees: i32) -> String {
    format!(
        "6e 01 4b 46 7f ff 02 10 71 : crc=71 YES\n\
         6e 01 4b 46 7f ff 02 10 71 t={millidegrees}\n"
    )
}

/// Advance the paused clock, then let the spawned sampling task be polled so
/// its tick actually runs before the assertions observe it.
async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn probe_for(dir: &TempDir) -> TemperatureProbe {
    TemperatureProbe::new(
        "chamber",
        Duration::from_secs(1),
        Box::new(Ds18b20Source::with_base_dir(dir.path(), DEVICE_ID)),
    )
}

#[tokio::test(start_paused = true)]
async fn tracks_the_device_file() {
    let dir = tempfile::tempdir().unwrap();
    write_reading(&dir, &good(22_875));

    let mut probe = probe_for(&dir);
    probe.start();
    advance(Duration::from_millis(10)).await;
    assert_eq!(probe.temperature(), Some(22.875));

    write_reading(&dir, &good(48_125));
    advance(Duration::from_secs(1)).await;
    assert_eq!(probe.temperature(), Some(48.125));
    probe.stop();
}

#[tokio::test(start_paused = true)]
async fn incomplete_reads_keep_the_last_value() {
    let dir = tempfile::tempdir().unwrap();
    write_reading(&dir, &good(30_000));

    let mut probe = probe_for(&dir);
    probe.start();
    advance(Duration::from_millis(10)).await;
    assert_eq!(probe.temperature(), Some(30.0));

    // CRC failures exhaust the in-tick retries without publishing.
    write_reading(&dir, "xx : crc=xx NO\nxx t=99999\n");
    advance(Duration::from_secs(2)).await;
    assert_eq!(probe.temperature(), Some(30.0));

    // A good reading resumes publication.
    write_reading(&dir, &good(31_500));
    advance(Duration::from_secs(2)).await;
    assert_eq!(probe.temperature(), Some(31.5));
    probe.stop();
}

#[tokio::test(start_paused = true)]
async fn unplugged_device_clears_the_value() {
    let dir = tempfile::tempdir().unwrap();
    write_reading(&dir, &good(25_000));

    let mut probe = probe_for(&dir);
    probe.start();
    advance(Duration::from_millis(10)).await;
    assert_eq!(probe.temperature(), Some(25.0));

    std::fs::remove_file(dir.path().join(DEVICE_ID).join("w1_slave")).unwrap();
    advance(Duration::from_secs(1)).await;
    assert_eq!(probe.temperature(), None, "an unreadable device reads as no value");
    probe.stop();
}

#[tokio::test(start_paused = true)]
async fn waiter_is_released_by_the_first_sample() {
    let dir = tempfile::tempdir().unwrap();
    write_reading(&dir, &good(19_250));

    let mut probe = probe_for(&dir);
    let mut reader = probe.reader();
    probe.start();

    let value = reader.read_with_timeout(Duration::from_secs(5)).await;
    assert_eq!(value, Some(19.25));
    probe.stop();
}

#[test]
fn discovery_reports_attached_probes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join(DEVICE_ID)).unwrap();
    std::fs::create_dir(dir.path().join("28-0000044a3b1f")).unwrap();
    std::fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();

    assert_eq!(list_devices(dir.path()), vec!["28-0000044a3b1f", DEVICE_ID]);
}
