// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Example/test code

//! End-to-end tests through the host dispatcher and the port actors.
//!
//! Each test builds its own [`Host`] with a scripted console so nothing
//! touches the real stdin.

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use ren_host::request::{FilePayload, NetPayload};
use ren_host::{
    Command, DeviceError, DeviceId, DnsAnswer, DnsPort, EventType, Eventee, Host, HostConfig,
    LineEvent, Modes, NetPort, Outcome, Payload, PortError, ScriptedLines, WaitOutcome,
};

const WAIT: Duration = Duration::from_secs(5);

fn host_with(lines: &ScriptedLines) -> Host {
    Host::with_line_source(HostConfig::default(), Box::new(lines.clone()))
        .expect("host construction")
}

fn host() -> Host {
    host_with(&ScriptedLines::new())
}

#[test]
fn tcp_echo_round_trip() {
    let mut host = host();
    let mut server = NetPort::open(&mut host, "tcp://:7777").expect("listen");
    assert!(server.is_listening());

    let mut client = NetPort::open(&mut host, "tcp://127.0.0.1:7777").expect("connect");
    client.write(&mut host, b"hello").expect("write");
    let flushed = host
        .wait_for(&mut client, WAIT, |c| c.is_connected() && !c.is_writing())
        .expect("client wait");
    assert!(flushed, "client never connected");

    let accepted = host
        .wait_for(&mut server, WAIT, |s| s.accepted_count() > 0)
        .expect("server wait");
    assert!(accepted, "no connection accepted");

    let mut conn = server.pick(&mut host, 1).expect("pick").expect("accepted port");
    assert!(conn.is_connected());
    assert_eq!(server.accepted_count(), 0);

    conn.read(&mut host).expect("read");
    let got = host
        .wait_for(&mut conn, WAIT, |c| c.data().len() >= 5)
        .expect("conn wait");
    assert!(got);
    assert_eq!(conn.data(), b"hello");

    // Echo it back.
    let echo = conn.take_data();
    conn.write(&mut host, &echo).expect("echo");
    client.read(&mut host).expect("client read");
    let got = host
        .wait_for(&mut client, WAIT, |c| c.data().len() >= 5)
        .expect("client wait");
    assert!(got);
    assert_eq!(client.data(), b"hello");

    // Closing the client shows up as a peer close on the accepted side.
    client.close(&mut host).expect("close client");
    conn.read(&mut host).expect("read after close");
    let closed = host
        .wait_for(&mut conn, WAIT, |c| c.peer_closed())
        .expect("close wait");
    assert!(closed);
    assert!(!conn.is_connected());
    assert!(matches!(
        conn.write(&mut host, b"late"),
        Err(PortError::Device {
            code: DeviceError::NotConnected,
            ..
        })
    ));

    conn.close(&mut host).expect("close conn");
    server.close(&mut host).expect("close server");
    let net = host.device(DeviceId::Net).expect("net device");
    assert!(net.queue().is_empty());
}

#[test]
fn udp_datagram_records_sender() {
    let mut host = host();
    let mut rx = NetPort::open(&mut host, "udp://:9999").expect("bind");
    let mut tx = NetPort::open(&mut host, "udp://127.0.0.1:9999").expect("peer");
    assert!(rx.is_connected());
    assert!(tx.is_connected());

    rx.read(&mut host).expect("read");
    tx.write(&mut host, &[1, 2, 3]).expect("send");
    let got = host
        .wait_for(&mut rx, WAIT, |p| p.data().len() >= 3)
        .expect("rx wait");
    assert!(got);
    assert_eq!(rx.data(), &[1, 2, 3]);

    let sender = tx.query(&mut host).expect("tx query");
    let seen = rx.query(&mut host).expect("rx query");
    assert_eq!(seen.local.port(), 9999);
    assert_eq!(seen.remote.port(), sender.local.port());

    rx.set_ttl(&mut host, 16).expect("ttl");
    tx.close(&mut host).expect("close tx");
    rx.close(&mut host).expect("close rx");
}

#[test]
fn udp_read_survives_full_event_queue() {
    let config = HostConfig::default().with_event_queue_capacity(1);
    let mut host = Host::with_line_source(config, Box::new(ScriptedLines::new()))
        .expect("host construction");
    let mut rx = NetPort::open(&mut host, "udp://:9998").expect("bind");
    let mut tx = NetPort::open(&mut host, "udp://127.0.0.1:9998").expect("peer");

    rx.read(&mut host).expect("read");
    let filler = host.next_port_id();
    assert!(host.post_port_event(filler, EventType::Port));
    tx.write(&mut host, &[1, 2, 3]).expect("send");

    let got = host
        .wait_for(&mut rx, WAIT, |p| p.data().len() >= 3)
        .expect("rx wait");
    assert!(got, "read never completed after its event was dropped");
    assert_eq!(rx.data(), &[1, 2, 3]);
    assert!(host.events().dropped() >= 1);

    // The port keeps working once the queue drains.
    assert_eq!(host.take_event().map(|e| e.eventee), Some(Eventee::Port(filler)));
    rx.take_data();
    rx.read(&mut host).expect("second read");
    tx.write(&mut host, &[4]).expect("second send");
    let got = host
        .wait_for(&mut rx, WAIT, |p| !p.data().is_empty())
        .expect("rx wait");
    assert!(got);
    assert_eq!(rx.data(), &[4]);

    tx.close(&mut host).expect("close tx");
    rx.close(&mut host).expect("close rx");
}

#[test]
fn tcp_connect_by_name() {
    let mut host = host();
    let mut server = NetPort::open(&mut host, "tcp://:7778").expect("listen");
    let mut client = NetPort::open(&mut host, "tcp://localhost:7778").expect("open");
    assert!(client.is_resolving());
    assert!(!client.is_connected());
    client.write(&mut host, b"named").expect("write");

    let flushed = host
        .wait_for(&mut client, WAIT, |c| c.is_connected() && !c.is_writing())
        .expect("client wait");
    assert!(flushed, "client never connected");
    assert!(!client.is_resolving());
    let info = client.query(&mut host).expect("query");
    assert_eq!(*info.remote.ip(), Ipv4Addr::LOCALHOST);

    let accepted = host
        .wait_for(&mut server, WAIT, |s| s.accepted_count() > 0)
        .expect("server wait");
    assert!(accepted);
    let mut conn = server.pick(&mut host, 1).expect("pick").expect("accepted port");
    conn.read(&mut host).expect("read");
    let got = host
        .wait_for(&mut conn, WAIT, |c| c.data().len() >= 5)
        .expect("conn wait");
    assert!(got);
    assert_eq!(conn.data(), b"named");

    client.close(&mut host).expect("close client");
    conn.close(&mut host).expect("close conn");
    server.close(&mut host).expect("close server");
}

#[test]
fn close_mid_transfer_leaves_queues_empty() {
    let mut host = host();

    let mut rx = NetPort::open(&mut host, "udp://:9997").expect("bind");
    rx.read(&mut host).expect("read");
    let id = rx.request_id().expect("request");
    assert!(host.request(id).is_some_and(|r| r.is_pending()));
    rx.close(&mut host).expect("close");
    assert!(host.device(DeviceId::Net).expect("net").queue().is_empty());

    let mut client = NetPort::open(&mut host, "tcp://localhost:7779").expect("open");
    assert!(client.is_resolving());
    client.close(&mut host).expect("close lookup");
    assert!(host.device(DeviceId::Net).expect("net").queue().is_empty());

    let mut lookup = DnsPort::open(&mut host, "dns://localhost").expect("open");
    lookup.read(&mut host).expect("read");
    lookup.close(&mut host);
    assert!(host.device(DeviceId::Dns).expect("dns").queue().is_empty());

    // Late resolver answers for the closed ports raise nothing.
    thread::sleep(Duration::from_millis(200));
    host.poll_all();
    assert!(host.events().is_empty());
}

#[test]
fn dns_forward_and_reverse() {
    let mut host = host();
    let answer = DnsPort::resolve(&mut host, "dns://localhost", WAIT).expect("forward");
    assert_eq!(answer, DnsAnswer::Address(std::net::Ipv4Addr::LOCALHOST));

    let answer = DnsPort::resolve(&mut host, "dns://127.0.0.1", WAIT).expect("reverse");
    match answer {
        DnsAnswer::Name(name) => assert!(!name.is_empty()),
        DnsAnswer::NotFound => {}
        DnsAnswer::Address(ip) => panic!("reverse lookup returned an address {}", ip),
    }
}

#[test]
fn reverse_name_resolves_back_to_address() {
    let config = HostConfig::default().with_dns_workers(0);
    let mut host = Host::with_line_source(config, Box::new(ScriptedLines::new()))
        .expect("host construction");
    let name = match DnsPort::resolve(&mut host, "dns://127.0.0.1", WAIT).expect("reverse") {
        DnsAnswer::Name(name) => name,
        other => panic!("127.0.0.1 has no name: {}", other),
    };
    assert!(!name.is_empty());

    let forward = NetPayload {
        host_name: Some(name.clone()),
        ..Default::default()
    };
    let id = host.alloc_request(DeviceId::Dns, Payload::Net(forward), Modes::empty());
    assert_eq!(host.do_command(id, Command::Open), Outcome::Done);
    assert_eq!(host.do_command(id, Command::Read), Outcome::Done);
    let addrs = host
        .request(id)
        .and_then(|r| r.payload.net())
        .and_then(|n| n.host_info.as_ref())
        .map(|info| info.addrs.clone())
        .unwrap_or_default();
    assert!(
        addrs.contains(&Ipv4Addr::LOCALHOST),
        "{} resolved to {:?}",
        name,
        addrs
    );
    host.do_command(id, Command::Close);
    host.free_request(id);
}

#[test]
fn dns_pick_before_answer_is_none() {
    let mut host = host();
    let mut port = DnsPort::open(&mut host, "dns://localhost").expect("open");
    assert_eq!(port.pick(&mut host), None);
    port.read(&mut host).expect("read");
    let done = host
        .wait_for(&mut port, WAIT, |p| p.is_complete())
        .expect("wait");
    assert!(done);
    assert!(port.pick(&mut host).is_some());
    assert!(!port.is_open());
}

#[test]
fn file_write_then_seek_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("blob.bin");
    let content: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let mut host = host();

    let out = host.alloc_request(
        DeviceId::File,
        Payload::File(FilePayload::new(&path)),
        Modes::WRITE | Modes::NEW,
    );
    assert_eq!(host.do_command(out, Command::Open), Outcome::Done);
    {
        let req = host.request_mut(out).expect("request");
        req.data = content.clone();
        req.length = content.len();
    }
    assert_eq!(host.do_command(out, Command::Write), Outcome::Done);
    assert_eq!(host.request(out).map(|r| r.actual), Some(1024));
    assert_eq!(host.do_command(out, Command::Close), Outcome::Done);
    host.free_request(out);

    let input = host.alloc_request(
        DeviceId::File,
        Payload::File(FilePayload::new(&path)),
        Modes::READ,
    );
    assert_eq!(host.do_command(input, Command::Open), Outcome::Done);
    {
        let req = host.request_mut(input).expect("request");
        req.payload.file_mut().expect("file payload").index = 512;
        req.modes.insert(Modes::SEEK);
        req.length = 16;
    }
    assert_eq!(host.do_command(input, Command::Read), Outcome::Done);
    let req = host.request(input).expect("request");
    assert_eq!(req.data, content[512..528].to_vec());
    assert!(!req.is_pending());
    host.do_command(input, Command::Close);
    host.free_request(input);
}

#[test]
fn file_open_failure_posts_error_event() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut host = host();
    let id = host.alloc_request(
        DeviceId::File,
        Payload::File(FilePayload::new(dir.path().join("missing.txt"))),
        Modes::READ,
    );
    assert_eq!(host.do_command(id, Command::Open), Outcome::Error);
    assert_eq!(
        host.request(id).and_then(|r| r.error),
        Some(DeviceError::OpenFail)
    );
    let event = host.take_event().expect("error event");
    assert_eq!(event.kind, EventType::Error);
    assert_eq!(event.eventee, Eventee::Request(id));
    host.free_request(id);
}

#[test]
fn stdio_cancel_and_pending_line() {
    let lines = ScriptedLines::new();
    lines.push(LineEvent::Cancel);
    let mut host = host_with(&lines);

    let id = host.alloc_request(DeviceId::Stdio, Payload::None, Modes::empty());
    assert_eq!(host.do_command(id, Command::Open), Outcome::Done);
    host.request_mut(id).expect("request").length = 64;

    assert_eq!(host.do_command(id, Command::Read), Outcome::Done);
    assert_eq!(host.request(id).map(|r| r.data.clone()), Some(vec![0x1B]));
    assert_eq!(host.take_event().map(|e| e.kind), Some(EventType::Read));

    // Nothing typed yet: the read pends and the poller completes it later.
    host.request_mut(id).expect("request").data.clear();
    assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);
    assert!(host.request(id).is_some_and(|r| r.is_pending()));
    assert_eq!(host.poll_all(), 0);

    lines.push_line("print 42");
    assert_eq!(host.wait(100, Duration::from_millis(1)), WaitOutcome::EventReady);
    let req = host.request(id).expect("request");
    assert_eq!(req.data, b"print 42\n");
    assert!(!req.is_pending());
    assert_eq!(host.take_event().map(|e| e.kind), Some(EventType::Read));
    host.free_request(id);
}

#[test]
fn pushed_line_ends_wait_early() {
    let lines = ScriptedLines::new();
    let mut host = host_with(&lines);
    let id = host.alloc_request(DeviceId::Stdio, Payload::None, Modes::empty());
    assert_eq!(host.do_command(id, Command::Open), Outcome::Done);
    host.request_mut(id).expect("request").length = 64;
    assert_eq!(host.do_command(id, Command::Read), Outcome::Pend);

    let typist = lines.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        typist.push_line("late");
    });
    let started = Instant::now();
    host.wait(2000, Duration::from_millis(1));
    let elapsed = started.elapsed();
    handle.join().expect("typist thread");
    assert!(elapsed < Duration::from_secs(1), "wait slept {:?}", elapsed);

    assert_eq!(host.wait(100, Duration::from_millis(1)), WaitOutcome::EventReady);
    assert_eq!(host.request(id).map(|r| r.data.clone()), Some(b"late\n".to_vec()));
    host.free_request(id);
}

#[test]
fn dispatcher_rejections_post_no_event() {
    let mut host = host();

    // Clipboard has no LOOKUP.
    let id = host.alloc_request(DeviceId::Clipboard, Payload::None, Modes::empty());
    assert_eq!(host.do_command(id, Command::Lookup), Outcome::Error);
    assert_eq!(
        host.request(id).and_then(|r| r.error),
        Some(DeviceError::NoCommand)
    );
    assert!(host.events().is_empty());

    assert!(host.unregister(DeviceId::Serial));
    let serial = host.alloc_request(DeviceId::Serial, Payload::None, Modes::empty());
    assert_eq!(host.do_command(serial, Command::Open), Outcome::Error);
    assert_eq!(
        host.request(serial).and_then(|r| r.error),
        Some(DeviceError::NoDevice)
    );
    assert!(host.events().is_empty());
    assert_eq!(host.call(DeviceId::Serial, Command::Init), Err(DeviceError::NoDevice));
}

#[test]
fn clipboard_round_trip_through_host() {
    let mut host = host();
    let id = host.alloc_request(DeviceId::Clipboard, Payload::None, Modes::empty());
    assert_eq!(host.do_command(id, Command::Open), Outcome::Done);
    {
        let req = host.request_mut(id).expect("request");
        req.data = b"copied".to_vec();
        req.length = 6;
    }
    assert_eq!(host.do_command(id, Command::Write), Outcome::Done);
    host.request_mut(id).expect("request").data.clear();
    assert_eq!(host.do_command(id, Command::Read), Outcome::Done);
    assert_eq!(host.request(id).map(|r| r.data.clone()), Some(b"copied".to_vec()));
    let kinds: Vec<_> = host.drain_events().into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventType::Wrote, EventType::Read]);
    host.free_request(id);
}

#[test]
fn wait_budget_and_port_events() {
    let mut host = host();
    assert_eq!(host.wait(0, Duration::from_millis(1)), WaitOutcome::TimedOut);
    assert_eq!(
        host.wait(20, Duration::from_millis(1)),
        WaitOutcome::TimerFired
    );

    let port = host.next_port_id();
    assert!(host.post_port_event(port, EventType::Time));
    let event = host.take_event().expect("port event");
    assert_eq!(event.eventee, Eventee::Port(port));
    assert_eq!(event.kind, EventType::Time);
}
