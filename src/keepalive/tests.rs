use std::time::Duration;

use test_case::test_case;

use super::*;

#[test_case(0 => None; "disabled")]
#[test_case(1 => Some(Duration::from_millis(1500)); "one second")]
#[test_case(10 => Some(Duration::from_secs(15)); "ten seconds")]
#[test_case(u16::MAX => Some(Duration::from_millis(65535 * 1500)); "maximum")]
fn test_expiry_for(keep_alive: u16) -> Option<Duration> {
    expiry_for(keep_alive)
}

#[test]
fn test_expires_at_one_and_a_half_intervals() {
    let clock = ManualClock::new();
    let mut monitor = KeepAliveMonitor::new(10, clock.now());

    clock.advance(Duration::from_secs(14));
    assert!(!monitor.poll_expired(clock.now()));

    clock.advance(Duration::from_secs(1));
    assert!(monitor.poll_expired(clock.now()));

    // Reported once only
    clock.advance(Duration::from_secs(1));
    assert!(!monitor.poll_expired(clock.now()));
    assert_eq!(monitor.deadline(), None);
}

#[test]
fn test_activity_pushes_deadline() {
    let clock = ManualClock::new();
    let start = clock.now();
    let mut monitor = KeepAliveMonitor::new(10, start);
    assert_eq!(monitor.deadline(), Some(start + Duration::from_secs(15)));

    clock.advance(Duration::from_secs(12));
    monitor.touch(clock.now());
    assert_eq!(monitor.last_activity(), clock.now());

    clock.advance(Duration::from_secs(12));
    assert!(!monitor.poll_expired(clock.now()));

    clock.advance(Duration::from_secs(3));
    assert!(monitor.poll_expired(clock.now()));
}

#[test]
fn test_zero_interval_never_expires() {
    let clock = ManualClock::new();
    let mut monitor = KeepAliveMonitor::new(0, clock.now());
    assert!(!monitor.is_enabled());
    assert_eq!(monitor.deadline(), None);

    clock.advance(Duration::from_secs(365 * 24 * 3600));
    assert!(!monitor.poll_expired(clock.now()));
}

#[test]
fn test_manual_clock_clones_share_time() {
    let clock = ManualClock::new();
    let other = clock.clone();
    let before = other.now();
    clock.advance(Duration::from_secs(5));
    assert_eq!(other.now(), before + Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_system_clock_follows_paused_runtime() {
    let clock = SystemClock;
    let before = clock.now();
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(clock.now() >= before + Duration::from_secs(30));
}
