mod common;

use common::{FailingResolver, RecordingSink, SimulatedPath, TARGET_V4, TARGET_V6};
use netprobe::messages::{EndReason, ProbeEvent};
use netprobe::{PingConfig, PingEngine, ProbeError, SequenceAllocator, StaticResolver, StopHandle};
use std::collections::HashSet;
use std::time::Duration;

fn quick(count: usize) -> PingConfig {
    PingConfig { count, interval: Duration::ZERO, ..PingConfig::default() }
}

fn engine(path: SimulatedPath, config: PingConfig) -> PingEngine<SimulatedPath> {
    PingEngine::new(path, config)
        .with_identifier(0x0BAD)
        .with_sequences(SequenceAllocator::starting_at(65533))
}

#[test]
fn five_probes_with_distinct_sequences() {
    let mut engine = engine(SimulatedPath::reaching_at(1), PingConfig { interval: Duration::ZERO, ..PingConfig::default() });
    let mut sink = RecordingSink::default();

    let summary = engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink).unwrap();

    assert_eq!(summary.transmitted(), 5);
    assert_eq!(summary.received(), 5);
    let sequences: HashSet<u16> = summary.outcomes.iter().map(|o| o.sequence).collect();
    assert_eq!(sequences.len(), 5);
    assert!(summary.outcomes.iter().all(|o| o.round_trip.is_some()));

    assert_eq!(sink.events.len(), 5);
    assert_eq!(sink.ends.len(), 1);
    assert!(matches!(sink.ends[0].reason, EndReason::Completed));
    assert_eq!(sink.ends[0].received, 5);
}

#[test]
fn ping_sends_without_ttl() {
    let mut engine = engine(SimulatedPath::reaching_at(1), quick(2));
    let mut sink = RecordingSink::default();
    engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink).unwrap();
    assert!(engine.into_transport().sent.iter().all(|p| p.ttl.is_none()));
}

#[test]
fn timeouts_are_outcomes_not_errors() {
    let mut engine = engine(SimulatedPath::silent(), quick(5));
    let mut sink = RecordingSink::default();

    let summary = engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink).unwrap();

    assert_eq!(summary.transmitted(), 5);
    assert_eq!(summary.received(), 0);
    assert!(sink.events.iter().all(|e| e.to_string().starts_with("Request timeout for icmp_seq")));
    assert_eq!(sink.ends.len(), 1);
    assert!(matches!(sink.ends[0].reason, EndReason::Completed));
}

#[test]
fn probes_are_lazy_and_restartable() {
    let mut engine = engine(SimulatedPath::reaching_at(1), quick(5));

    let first: Vec<u16> = engine.probes(TARGET_V4).take(2).map(|r| r.unwrap().sequence).collect();
    let second: Vec<u16> = engine.probes(TARGET_V4).map(|r| r.unwrap().sequence).collect();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 5);
    let all: HashSet<u16> = first.iter().chain(second.iter()).copied().collect();
    assert_eq!(all.len(), 7);
    assert_eq!(engine.into_transport().sent.len(), 7);
}

#[test]
fn stop_is_honoured_before_the_next_probe() {
    let stop = StopHandle::new();
    let mut path = SimulatedPath::reaching_at(1);
    path.stop_after = Some((2, stop.clone()));
    let mut engine = engine(path, quick(5)).with_stop_handle(stop);
    let mut sink = RecordingSink::default();

    let summary = engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink).unwrap();

    assert!(summary.stopped);
    assert_eq!(summary.transmitted(), 2);
    assert_eq!(summary.received(), 2);
    assert_eq!(sink.ends.len(), 1);
    assert!(matches!(sink.ends[0].reason, EndReason::Stopped));
}

#[test]
fn replies_with_kernel_identifier_still_match() {
    let mut path = SimulatedPath::reaching_at(1);
    path.rewritten_identifier = Some(0x4242);
    let mut engine = engine(path, quick(3));
    let mut sink = RecordingSink::default();

    let summary = engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink).unwrap();

    assert_eq!(summary.received(), 3);
}

#[test]
fn noisy_replies_are_skipped() {
    let mut path = SimulatedPath::reaching_at(1);
    path.noisy = true;
    let mut engine = engine(path, quick(3));
    let mut sink = RecordingSink::default();

    let summary = engine.run("example.net", &StaticResolver(TARGET_V6), &mut sink).unwrap();

    assert_eq!(summary.received(), 3);
    match &sink.events[0] {
        ProbeEvent::Ping(outcome) => assert_eq!(outcome.destination, TARGET_V6),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn resolution_failure_is_reported_once() {
    let mut engine = engine(SimulatedPath::reaching_at(1), quick(5));
    let mut sink = RecordingSink::default();

    let result = engine.run("nowhere.invalid", &FailingResolver, &mut sink);

    assert!(matches!(result, Err(ProbeError::Resolution { .. })));
    assert!(sink.events.is_empty());
    assert_eq!(sink.ends.len(), 1);
    assert!(engine.into_transport().sent.is_empty());
}

#[test]
fn socket_failure_stops_the_run() {
    let mut path = SimulatedPath::reaching_at(1);
    path.fail_sends = true;
    let mut engine = engine(path, quick(5));
    let mut sink = RecordingSink::default();

    let result = engine.run("example.net", &StaticResolver(TARGET_V4), &mut sink);

    assert!(matches!(result, Err(ProbeError::Socket { .. })));
    assert!(sink.events.is_empty());
    assert_eq!(sink.ends.len(), 1);
    assert!(matches!(sink.ends[0].reason, EndReason::Failed(_)));
}
