use super::*;
use crate::metainfo::InfoHash;
use crate::peer::PeerId;
use std::net::SocketAddr;
use std::time::Duration;

fn request(event: TrackerEvent) -> AnnounceRequest {
    AnnounceRequest {
        info_hash: InfoHash::from_bytes([1; 20]),
        peer_id: PeerId([2; 20]),
        port: 6881,
        uploaded: 0,
        downloaded: 0,
        left: 100,
        event,
    }
}

#[test]
fn test_tracker_event_str() {
    assert_eq!(TrackerEvent::Started.as_str(), "started");
    assert_eq!(TrackerEvent::Stopped.as_str(), "stopped");
    assert_eq!(TrackerEvent::Completed.as_str(), "completed");
    assert_eq!(TrackerEvent::None.as_str(), "");
}

#[test]
fn test_compact_peers() {
    let v4 = [192, 168, 1, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0x1A, 0xE2, 99];
    let mut v6 = [0u8; 18];
    v6[15] = 1;
    v6[16..].copy_from_slice(&6881u16.to_be_bytes());

    let response = AnnounceResponse::from_compact(Duration::from_secs(900), &v4, &v6);
    let expected: Vec<SocketAddr> = vec![
        "192.168.1.1:6881".parse().unwrap(),
        "10.0.0.1:6882".parse().unwrap(),
        "[::1]:6881".parse().unwrap(),
    ];
    assert_eq!(response.peers, expected);
}

#[test]
fn test_next_announce_clamped() {
    let floor = Duration::from_secs(60);
    let mut response = AnnounceResponse::new(Duration::from_secs(10), vec![]);
    assert_eq!(response.next_announce(floor), floor);

    response.min_interval = Some(Duration::from_secs(120));
    assert_eq!(response.next_announce(floor), Duration::from_secs(120));

    response.interval = Duration::from_secs(1800);
    assert_eq!(response.next_announce(floor), Duration::from_secs(1800));
}

#[tokio::test]
async fn test_static_tracker() {
    let peer: SocketAddr = "127.0.0.1:7000".parse().unwrap();
    let tracker = StaticTracker::new(vec![peer]).with_interval(Duration::from_secs(300));

    let response = tracker.announce(request(TrackerEvent::Started)).await.unwrap();
    assert_eq!(response.peers, vec![peer]);
    assert_eq!(response.interval, Duration::from_secs(300));

    tracker.set_failure(Some(TrackerError::Unreachable("offline".into())));
    assert!(matches!(
        tracker.announce(request(TrackerEvent::None)).await,
        Err(TrackerError::Unreachable(_))
    ));

    let events: Vec<_> = tracker.announces().iter().map(|r| r.event).collect();
    assert_eq!(events, vec![TrackerEvent::Started, TrackerEvent::None]);
}
