use super::*;
use crate::{
    input::{
        keyboard::ModifiersState,
        pointer::{ButtonEvent, MotionEvent},
        touch::{DownEvent, UpEvent},
    },
    protocol::{
        wl_keyboard::{self, KeyState, WlKeyboard},
        wl_pointer::{self, ButtonState, WlPointer},
        wl_seat::{self, WlSeat},
        wl_touch::{self, WlTouch},
    },
    server::New,
    test_utils::{Recorded, TestClient, TestServer},
};

const BTN_LEFT: u32 = 0x110;

fn seat_object<I: crate::server::Interface>(
    server: &mut TestServer,
    client: &mut TestClient,
    request: impl FnOnce(u32) -> wl_seat::Request,
) -> Resource<I> {
    let seat = server.bind_seat(client);
    let id = client.new_id();
    server.request(client, &seat, request(id));
    client.transport.drain();
    server.resource(client, id)
}

fn get_pointer(server: &mut TestServer, client: &mut TestClient) -> Resource<WlPointer> {
    seat_object(server, client, |id| wl_seat::Request::GetPointer { id: New::wrap(id) })
}

fn get_keyboard(server: &mut TestServer, client: &mut TestClient) -> Resource<WlKeyboard> {
    seat_object(server, client, |id| wl_seat::Request::GetKeyboard { id: New::wrap(id) })
}

fn get_touch(server: &mut TestServer, client: &mut TestClient) -> Resource<WlTouch> {
    seat_object(server, client, |id| wl_seat::Request::GetTouch { id: New::wrap(id) })
}

fn pointer_events(client: &TestClient) -> Vec<wl_pointer::Event> {
    client
        .transport
        .take_events::<WlPointer>()
        .into_iter()
        .map(|(_, event)| event)
        .filter(|event| !matches!(event, wl_pointer::Event::Frame))
        .collect()
}

fn keyboard_events(client: &TestClient) -> Vec<wl_keyboard::Event> {
    client
        .transport
        .take_events::<WlKeyboard>()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}

fn motion(server: &mut TestServer, surface: Option<&Resource<WlSurface>>, location: (f64, f64)) {
    let pointer = server.state.seat.get_pointer().unwrap();
    pointer.motion(
        &mut server.state,
        surface.map(|surface| (surface.clone(), (10, 10).into())),
        &MotionEvent {
            location: location.into(),
            time: 0,
        },
    );
}

fn button(server: &mut TestServer, state: ButtonState) -> Serial {
    let pointer = server.state.seat.get_pointer().unwrap();
    pointer.button(
        &mut server.state,
        &ButtonEvent {
            button: BTN_LEFT,
            state,
            time: 1,
        },
    )
}

#[test]
fn seat_advertises_its_capabilities() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    server.bind_seat(&mut client);

    let events = client.transport.take_events::<WlSeat>();
    assert!(matches!(
        &events[..],
        [
            (_, wl_seat::Event::Name { name }),
            (_, wl_seat::Event::Capabilities { capabilities }),
        ] if name == "seat-0" && *capabilities == wl_seat::Capability::all()
    ));

    let mut seat = server.state.seat.clone();
    seat.remove_touch();
    assert!(matches!(
        &client.transport.take_events::<WlSeat>()[..],
        [(_, wl_seat::Event::Capabilities { capabilities })]
            if *capabilities == wl_seat::Capability::Pointer | wl_seat::Capability::Keyboard
    ));
    assert!(seat.get_touch().is_none());
}

#[test]
fn pointer_enter_and_leave_use_client_serials() {
    let mut server = TestServer::new();
    let mut a = server.add_client();
    let mut b = server.add_client();
    let surface_a = server.create_surface(&mut a);
    let surface_b = server.create_surface(&mut b);
    get_pointer(&mut server, &mut a);
    get_pointer(&mut server, &mut b);

    motion(&mut server, Some(&surface_a), (15.0, 20.0));
    let enter_serial = match &pointer_events(&a)[..] {
        [wl_pointer::Event::Enter {
            serial,
            surface,
            surface_x,
            surface_y,
        }] => {
            assert_eq!(*surface, surface_a);
            assert_eq!((*surface_x, *surface_y), (5.0, 10.0));
            *serial
        }
        other => panic!("unexpected events {:?}", other),
    };
    assert_eq!(a.client.last_serial(), Some(Serial::from(enter_serial)));
    let pointer = server.state.seat.get_pointer().unwrap();
    assert_eq!(pointer.last_enter(), Some(Serial::from(enter_serial)));

    motion(&mut server, Some(&surface_a), (16.0, 20.0));
    assert!(matches!(
        pointer_events(&a)[..],
        [wl_pointer::Event::Motion { surface_x, .. }] if surface_x == 6.0
    ));

    server.state.take_events();
    motion(&mut server, Some(&surface_b), (16.0, 20.0));
    assert!(matches!(&pointer_events(&a)[..], [wl_pointer::Event::Leave { surface, .. }] if *surface == surface_a));
    assert!(matches!(&pointer_events(&b)[..], [wl_pointer::Event::Enter { surface, .. }] if *surface == surface_b));
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::CursorImage(CursorImageStatus::Default)]
    );
    assert_eq!(pointer.current_focus(), Some(surface_b));
}

#[test]
fn click_grab_keeps_the_pressed_surface_focused() {
    let mut server = TestServer::new();
    let mut a = server.add_client();
    let mut b = server.add_client();
    let surface_a = server.create_surface(&mut a);
    let surface_b = server.create_surface(&mut b);
    get_pointer(&mut server, &mut a);
    get_pointer(&mut server, &mut b);
    let pointer = server.state.seat.get_pointer().unwrap();

    motion(&mut server, Some(&surface_a), (15.0, 15.0));
    pointer_events(&a);
    let serial = button(&mut server, ButtonState::Pressed);
    assert!(matches!(
        pointer_events(&a)[..],
        [wl_pointer::Event::Button { serial: s, state: ButtonState::Pressed, .. }] if s == u32::from(serial)
    ));
    assert!(pointer.has_grab(serial));
    let start = pointer.grab_start_data().unwrap();
    assert_eq!(start.focus.map(|(surface, _)| surface), Some(surface_a.clone()));

    // the grab keeps sending motion to the pressed surface
    motion(&mut server, Some(&surface_b), (40.0, 40.0));
    assert!(matches!(pointer_events(&a)[..], [wl_pointer::Event::Motion { .. }]));
    assert!(pointer_events(&b).is_empty());

    // releasing ends the grab and restores the focus under the pointer
    button(&mut server, ButtonState::Released);
    assert!(!pointer.is_grabbed());
    assert!(matches!(
        pointer_events(&a)[..],
        [wl_pointer::Event::Button { state: ButtonState::Released, .. }, wl_pointer::Event::Leave { .. }]
    ));
    assert!(matches!(pointer_events(&b)[..], [wl_pointer::Event::Enter { .. }]));
}

#[test]
fn set_cursor_requires_the_last_enter_serial() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let surface = server.create_surface(&mut client);
    let cursor = server.create_surface(&mut client);
    let pointer = get_pointer(&mut server, &mut client);

    motion(&mut server, Some(&surface), (15.0, 15.0));
    let serial = server.state.seat.get_pointer().unwrap().last_enter().unwrap();
    server.state.take_events();

    server.request(
        &client,
        &pointer,
        wl_pointer::Request::SetCursor {
            serial: u32::from(serial).wrapping_add(100),
            surface: None,
            hotspot_x: 0,
            hotspot_y: 0,
        },
    );
    assert!(server.state.take_events().is_empty());

    server.request(
        &client,
        &pointer,
        wl_pointer::Request::SetCursor {
            serial: serial.into(),
            surface: Some(cursor.clone()),
            hotspot_x: 2,
            hotspot_y: 3,
        },
    );
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::CursorImage(CursorImageStatus::Surface(cursor.clone()))]
    );
    assert_eq!(
        crate::wayland::compositor::get_role(&cursor),
        Some(crate::input::pointer::CURSOR_IMAGE_ROLE)
    );

    // a surface with another role cannot become a cursor
    crate::wayland::compositor::give_role(&surface, "toplevel").unwrap();
    server.request(
        &client,
        &pointer,
        wl_pointer::Request::SetCursor {
            serial: serial.into(),
            surface: Some(surface.clone()),
            hotspot_x: 0,
            hotspot_y: 0,
        },
    );
    assert_eq!(
        client.take_error().map(|e| e.code),
        Some(wl_pointer::Error::Role as u32)
    );
}

#[test]
fn keyboard_focus_sends_enter_keys_and_modifiers() {
    let mut server = TestServer::new();
    let mut a = server.add_client();
    let mut b = server.add_client();
    let surface_a = server.create_surface(&mut a);
    let surface_b = server.create_surface(&mut b);
    get_keyboard(&mut server, &mut a);
    get_keyboard(&mut server, &mut b);
    let keyboard = server.state.seat.get_keyboard().unwrap();

    keyboard.input(&mut server.state, 30, KeyState::Pressed, 0);
    keyboard.set_modifiers(ModifiersState {
        depressed: 1,
        ..Default::default()
    });
    keyboard.set_focus(&mut server.state, Some(surface_a.clone()));

    let events = keyboard_events(&a);
    assert!(matches!(
        &events[..],
        [
            wl_keyboard::Event::Enter { surface, keys, .. },
            wl_keyboard::Event::Modifiers { mods_depressed: 1, .. },
        ] if *surface == surface_a && *keys == vec![30]
    ));
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::FocusChanged(Some(surface_a.id()))]
    );

    // same focus, nothing happens
    keyboard.set_focus(&mut server.state, Some(surface_a.clone()));
    assert!(keyboard_events(&a).is_empty());
    assert!(server.state.take_events().is_empty());

    let serial = keyboard.input(&mut server.state, 30, KeyState::Released, 5);
    assert!(matches!(
        keyboard_events(&a)[..],
        [wl_keyboard::Event::Key { serial: s, key: 30, state: KeyState::Released, time: 5 }] if s == u32::from(serial)
    ));
    assert!(keyboard.pressed_keys().is_empty());

    keyboard.set_focus(&mut server.state, Some(surface_b.clone()));
    assert!(matches!(keyboard_events(&a)[..], [wl_keyboard::Event::Leave { .. }]));
    assert!(matches!(
        keyboard_events(&b)[..],
        [wl_keyboard::Event::Enter { .. }, wl_keyboard::Event::Modifiers { .. }]
    ));
    assert!(keyboard.has_focus(&surface_b));
    assert!(!keyboard.has_focus(&surface_a));
}

#[test]
fn late_keyboard_object_learns_the_focus() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let surface = server.create_surface(&mut client);
    let keyboard = server.state.seat.get_keyboard().unwrap();
    keyboard.set_focus(&mut server.state, Some(surface.clone()));

    let seat = server.bind_seat(&mut client);
    let id = client.new_id();
    server.request(&client, &seat, wl_seat::Request::GetKeyboard { id: New::wrap(id) });

    assert!(matches!(
        keyboard_events(&client)[..],
        [
            wl_keyboard::Event::RepeatInfo { rate: 25, delay: 200 },
            wl_keyboard::Event::Enter { .. },
            wl_keyboard::Event::Modifiers { .. },
        ]
    ));
}

#[test]
fn missing_capability_gives_an_inert_object() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let surface = server.create_surface(&mut client);
    server.state.seat.clone().remove_keyboard();

    get_keyboard(&mut server, &mut client);
    assert!(client.client.is_alive());
    assert!(server.state.seat.get_keyboard().is_none());

    // a new keyboard does not reach the inert object
    let keyboard = server.state.seat.clone().add_keyboard(Default::default());
    keyboard.set_focus(&mut server.state, Some(surface));
    assert!(keyboard_events(&client).is_empty());
}

#[test]
fn touch_down_starts_a_grab_until_the_last_point_is_lifted() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let surface = server.create_surface(&mut client);
    get_touch(&mut server, &mut client);
    let touch = server.state.seat.get_touch().unwrap();

    let serial = touch.down(
        &mut server.state,
        Some((surface.clone(), (10, 10).into())),
        &DownEvent {
            slot: 0.into(),
            location: (12.0, 14.0).into(),
            time: 0,
        },
    );
    assert!(touch.has_grab(serial));
    assert_eq!(touch.grab_start_data().map(|data| data.slot), Some(0.into()));
    touch.down(
        &mut server.state,
        None,
        &DownEvent {
            slot: 1.into(),
            location: (50.0, 50.0).into(),
            time: 1,
        },
    );
    touch.frame(&mut server.state);

    let events = client.transport.take_events::<WlTouch>();
    assert!(matches!(
        &events[..],
        [
            (_, wl_touch::Event::Down { serial: s, id: 0, x, y, .. }),
            (_, wl_touch::Event::Down { id: 1, .. }),
            (_, wl_touch::Event::Frame),
        ] if *s == u32::from(serial) && *x == 2.0 && *y == 4.0
    ));

    touch.up(&mut server.state, &UpEvent { slot: 0.into(), time: 2 });
    assert!(touch.is_grabbed());
    touch.up(&mut server.state, &UpEvent { slot: 1.into(), time: 3 });
    assert!(!touch.is_grabbed());
}

#[test]
fn touch_cancel_drops_every_point() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let surface = server.create_surface(&mut client);
    get_touch(&mut server, &mut client);
    let touch = server.state.seat.get_touch().unwrap();

    touch.down(
        &mut server.state,
        Some((surface, (0, 0).into())),
        &DownEvent {
            slot: 3.into(),
            location: (1.0, 1.0).into(),
            time: 0,
        },
    );
    client.transport.drain();

    touch.cancel(&mut server.state);

    assert!(matches!(
        &client.transport.take_events::<WlTouch>()[..],
        [(_, wl_touch::Event::Cancel)]
    ));
    assert!(!touch.is_grabbed());
}

#[test]
fn seat_serials_are_used_without_a_focused_client() {
    let mut server = TestServer::new();
    let keyboard = server.state.seat.get_keyboard().unwrap();
    let first = keyboard.input(&mut server.state, 1, KeyState::Pressed, 0);
    let second = keyboard.input(&mut server.state, 1, KeyState::Released, 0);
    assert!(second.is_no_older_than(&first));
    assert_ne!(first, second);
}
