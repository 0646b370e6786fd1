use std::{
    io,
    sync::{mpsc, Arc},
    time::Duration,
};

use super::*;
use crate::{
    server::SERVER_ID_BASE,
    test_utils::{init_logging, ScriptedServer, ScriptedTransport},
};

#[derive(Debug, Default)]
struct Recorder {
    events: Vec<(&'static str, Message)>,
}

fn record(state: &mut Recorder, proxy: &Proxy, event: Message, _: &Connection, _: &QueueHandle<Recorder>) {
    state.events.push((proxy.interface(), event));
}

fn connect() -> (Connection, ScriptedServer) {
    init_logging();
    let (transport, server) = ScriptedTransport::new();
    let conn = Connection::new(
        transport,
        ConnectionConfig {
            thread_name: "test-reader".into(),
        },
    )
    .unwrap();
    (conn, server)
}

fn opcodes(recorder: &Recorder) -> Vec<(&'static str, u16)> {
    recorder
        .events
        .iter()
        .map(|(interface, event)| (*interface, event.opcode))
        .collect()
}

#[test]
fn events_go_to_the_queue_of_their_object() {
    let (conn, server) = connect();
    let mut main_queue = conn.new_event_queue::<Recorder>();
    let mut other_queue = conn.new_event_queue::<Recorder>();
    let surface = conn.create_object("wl_surface", 6, &main_queue.handle(), record);
    let pointer = conn.create_object("wl_pointer", 9, &other_queue.handle(), record);

    server.event(surface.protocol_id(), 0, [Argument::Object(3)]);
    server.event(pointer.protocol_id(), 5, []);
    server.event(surface.protocol_id(), 1, [Argument::Object(3)]);

    let mut main = Recorder::default();
    assert_eq!(main_queue.roundtrip(&mut main).unwrap(), 2);
    assert_eq!(opcodes(&main), vec![("wl_surface", 0), ("wl_surface", 1)]);

    // the pointer event was routed before the answer to the roundtrip
    let mut other = Recorder::default();
    assert_eq!(other_queue.dispatch_pending(&mut other).unwrap(), 1);
    assert_eq!(opcodes(&other), vec![("wl_pointer", 5)]);
    assert_eq!(server.reader_threads(), vec![Some("test-reader".to_string())]);
}

#[test]
fn roundtrip_waits_for_the_server() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let output = conn.create_object("wl_output", 4, &queue.handle(), record);
    let mut recorder = Recorder::default();

    for opcode in 0..3 {
        server.event(output.protocol_id(), opcode, []);
    }
    assert_eq!(queue.roundtrip(&mut recorder).unwrap(), 3);
    assert_eq!(
        opcodes(&recorder),
        vec![("wl_output", 0), ("wl_output", 1), ("wl_output", 2)]
    );
    let syncs = server
        .sent()
        .into_iter()
        .filter(|message| message.sender_id == DISPLAY_ID && message.opcode == 0)
        .count();
    assert_eq!(syncs, 1);

    assert_eq!(queue.roundtrip(&mut recorder).unwrap(), 0);
}

#[test]
fn roundtrip_leaves_later_events_queued() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let output = conn.create_object("wl_output", 4, &queue.handle(), record);
    let mut recorder = Recorder::default();

    server.event(output.protocol_id(), 0, []);
    server.event_after_sync(output.protocol_id(), 2, []);
    assert_eq!(queue.roundtrip(&mut recorder).unwrap(), 1);
    assert_eq!(opcodes(&recorder), vec![("wl_output", 0)]);

    assert_eq!(queue.blocking_dispatch(&mut recorder).unwrap(), 1);
    assert_eq!(opcodes(&recorder), vec![("wl_output", 0), ("wl_output", 2)]);
}

#[test]
fn destroyed_objects_lose_their_queued_events() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let mut sync_queue = conn.new_event_queue::<Recorder>();
    let surface = conn.create_object("wl_surface", 6, &queue.handle(), record);

    server.event(surface.protocol_id(), 2, []);
    sync_queue.roundtrip(&mut Recorder::default()).unwrap();

    surface.destroy();
    surface.destroy();
    let mut recorder = Recorder::default();
    assert_eq!(queue.dispatch_pending(&mut recorder).unwrap(), 0);
    assert!(recorder.events.is_empty());

    conn.send_request(&surface, 0, []);
    assert!(server.requests().is_empty());
}

#[test]
fn ids_are_recycled_after_delete_id() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let first = conn.create_object("wl_region", 1, &queue.handle(), record);
    let first_id = first.protocol_id();
    first.destroy();

    // not released by the server yet
    let second = conn.create_object("wl_region", 1, &queue.handle(), record);
    assert_ne!(second.protocol_id(), first_id);
    assert_eq!(conn.object(first_id), Some(first.clone()));

    // events are routed in order, the release is processed once the next event is dispatched
    server.event(DISPLAY_ID, 1, [Argument::Uint(first_id)]);
    server.event(second.protocol_id(), 0, []);
    let mut recorder = Recorder::default();
    while recorder.events.is_empty() {
        queue.blocking_dispatch(&mut recorder).unwrap();
    }
    assert_eq!(conn.object(first_id), None);

    let third = conn.create_object("wl_region", 1, &queue.handle(), record);
    assert_eq!(third.protocol_id(), first_id);
    assert_ne!(third.id(), first.id());
    assert!(third.is_alive());
    assert!(!first.is_alive());
}

#[test]
fn events_for_unknown_objects_are_dropped() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();

    server.event(42, 0, []);
    let mut recorder = Recorder::default();
    assert_eq!(queue.roundtrip(&mut recorder).unwrap(), 0);
    assert!(conn.is_alive());
}

struct DataDevice;

impl Dispatch<Recorder> for DataDevice {
    fn event(&self, state: &mut Recorder, proxy: &Proxy, event: Message, _: &Connection, _: &QueueHandle<Recorder>) {
        state.events.push((proxy.interface(), event));
    }

    fn event_created_child(&self, opcode: u16) -> Option<(&'static str, Arc<dyn Dispatch<Recorder>>)> {
        let offer: Arc<dyn Dispatch<Recorder>> = Arc::new(record);
        match opcode {
            0 => Some(("wl_data_offer", offer)),
            _ => None,
        }
    }
}

#[test]
fn server_created_objects_use_the_child_handler() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let device = conn.create_object("wl_data_device", 3, &queue.handle(), DataDevice);
    let offer_id = SERVER_ID_BASE;

    server.event(device.protocol_id(), 0, [Argument::NewId(offer_id)]);
    server.event(offer_id, 0, [Argument::Str(Some("text/plain".into()))]);
    // no child handler for this opcode, the object is inert
    server.event(device.protocol_id(), 1, [Argument::NewId(offer_id + 1)]);
    server.event(offer_id + 1, 0, []);

    let mut recorder = Recorder::default();
    queue.roundtrip(&mut recorder).unwrap();
    assert_eq!(
        opcodes(&recorder),
        vec![("wl_data_device", 0), ("wl_data_offer", 0), ("wl_data_device", 1)]
    );
    let offer = conn.object(offer_id).unwrap();
    assert_eq!((offer.interface(), offer.version()), ("wl_data_offer", 3));
    assert_eq!(conn.object(offer_id + 1).map(|proxy| proxy.interface()), Some("unknown"));
}

struct BrokenDevice;

impl Dispatch<Recorder> for BrokenDevice {
    fn event(&self, state: &mut Recorder, proxy: &Proxy, event: Message, _: &Connection, _: &QueueHandle<Recorder>) {
        state.events.push((proxy.interface(), event));
    }

    fn event_created_child(&self, _: u16) -> Option<(&'static str, Arc<dyn Dispatch<Recorder>>)> {
        panic!("child handler failure");
    }
}

#[test]
fn panicking_handler_still_kills_the_connection() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let device = conn.create_object("wl_data_device", 3, &queue.handle(), BrokenDevice);
    let (deaths, death_reports) = mpsc::channel();
    conn.on_death(move |error| {
        let _ = deaths.send(error.clone());
    });

    // the handler panics on the reader thread while the connection state is locked
    server.event(device.protocol_id(), 0, [Argument::NewId(SERVER_ID_BASE)]);
    let mut recorder = Recorder::default();
    assert!(matches!(
        queue.blocking_dispatch(&mut recorder),
        Err(ConnectionError::Died)
    ));
    assert!(matches!(
        death_reports.recv_timeout(Duration::from_secs(5)),
        Ok(ConnectionError::Died)
    ));
    assert!(!conn.is_alive());
    assert!(conn.object(device.protocol_id()).is_some());
}

#[test]
fn hang_up_is_reported_once() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let seat = conn.create_object("wl_seat", 7, &queue.handle(), record);
    let (deaths, death_reports) = mpsc::channel();
    conn.on_death(move |error| {
        let _ = deaths.send(error.clone());
    });

    server.event(seat.protocol_id(), 0, [Argument::Uint(3)]);
    server.hang_up();

    // queued events are still delivered
    let mut recorder = Recorder::default();
    let mut dispatched = 0;
    let error = loop {
        match queue.blocking_dispatch(&mut recorder) {
            Ok(count) => dispatched += count,
            Err(error) => break error,
        }
    };
    assert_eq!(dispatched, 1);
    assert!(matches!(error, ConnectionError::Died));
    assert!(matches!(queue.dispatch_pending(&mut recorder), Err(ConnectionError::Died)));

    let reported = death_reports.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(reported, ConnectionError::Died));
    assert!(death_reports.recv_timeout(Duration::from_millis(50)).is_err());

    // late subscribers learn about the death right away
    let (late, late_reports) = mpsc::channel();
    conn.on_death(move |error| {
        let _ = late.send(error.clone());
    });
    assert!(late_reports.try_recv().is_ok());

    // requests fail soft
    assert!(!conn.is_alive());
    conn.send_request(&seat, 0, [Argument::NewId(10)]);
    assert!(server.requests().is_empty());
    assert!(matches!(queue.roundtrip(&mut recorder), Err(ConnectionError::Died)));
}

#[test]
fn read_failure_is_an_io_error() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();

    server.fail_read(io::ErrorKind::ConnectionReset);

    match queue.blocking_dispatch(&mut Recorder::default()) {
        Err(ConnectionError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(matches!(conn.flush(), Err(ConnectionError::Io(_))));
}

#[test]
fn send_failure_kills_the_connection() {
    let (conn, server) = connect();
    let queue = conn.new_event_queue::<Recorder>();
    let surface = conn.create_object("wl_surface", 6, &queue.handle(), record);

    server.fail_sends();
    conn.send_request(&surface, 1, []);

    assert!(matches!(conn.error(), Some(ConnectionError::Io(_))));
}

#[test]
fn protocol_error_names_the_object() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let surface = conn.create_object("wl_surface", 6, &queue.handle(), record);

    server.event(
        DISPLAY_ID,
        0,
        [
            Argument::Object(surface.protocol_id()),
            Argument::Uint(2),
            Argument::Str(Some("invalid scale".into())),
        ],
    );

    match queue.blocking_dispatch(&mut Recorder::default()) {
        Err(ConnectionError::Protocol(error)) => {
            assert_eq!(error.code, 2);
            assert_eq!(error.object_id, surface.protocol_id());
            assert_eq!(error.object_interface, "wl_surface");
            assert_eq!(error.message, "invalid scale");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn registry_mirrors_the_globals() {
    let (conn, server) = connect();
    let mut queue = conn.new_event_queue::<Recorder>();
    let registry = Registry::new(&conn, &queue.handle());
    let registry_id = registry.proxy().protocol_id();
    let global = |name: u32, interface: &str, version: u32| {
        server.event(
            registry_id,
            0,
            [
                Argument::Uint(name),
                Argument::Str(Some(interface.into())),
                Argument::Uint(version),
            ],
        );
    };
    global(1, "wl_compositor", 6);
    global(2, "wl_seat", 7);
    queue.roundtrip(&mut Recorder::default()).unwrap();
    assert_eq!(registry.globals().len(), 2);

    let seat = registry
        .bind(&queue.handle(), "wl_seat", 1..=5, record)
        .unwrap();
    assert_eq!(seat.version(), 5);
    let compositor = registry
        .bind(&queue.handle(), "wl_compositor", 4..=9, record)
        .unwrap();
    assert_eq!(compositor.version(), 6);
    assert_eq!(
        registry.bind(&queue.handle(), "xdg_wm_base", 1..=5, record),
        Err(BindError::NotPresent("xdg_wm_base"))
    );
    assert_eq!(
        registry.bind(&queue.handle(), "wl_seat", 8..=9, record),
        Err(BindError::UnsupportedVersion {
            interface: "wl_seat",
            available: 7,
            required: 8
        })
    );

    let binds = server
        .requests()
        .into_iter()
        .filter(|message| message.sender_id == registry_id)
        .map(|message| message.args.to_vec())
        .collect::<Vec<_>>();
    assert_eq!(
        binds,
        vec![
            vec![
                Argument::Uint(2),
                Argument::Str(Some("wl_seat".into())),
                Argument::Uint(5),
                Argument::NewId(seat.protocol_id()),
            ],
            vec![
                Argument::Uint(1),
                Argument::Str(Some("wl_compositor".into())),
                Argument::Uint(6),
                Argument::NewId(compositor.protocol_id()),
            ],
        ]
    );

    server.event(registry_id, 1, [Argument::Uint(1)]);
    queue.roundtrip(&mut Recorder::default()).unwrap();
    assert_eq!(
        registry.globals(),
        vec![GlobalEntry {
            name: 2,
            interface: "wl_seat".into(),
            version: 7,
        }]
    );
    assert!(registry.find("wl_compositor").is_none());
}
