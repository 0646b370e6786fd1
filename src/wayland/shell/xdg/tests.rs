use super::*;
use crate::{
    protocol::{
        wl_surface,
        xdg_positioner::{self, XdgPositioner},
        xdg_surface::XdgSurface,
    },
    server::{EventMessage, New},
    test_utils::{Recorded, TestClient, TestServer},
    wayland::shell::{is_toplevel_equivalent, PingError},
};

fn assert_killed_with(client: &TestClient, interface: &str, code: impl Into<u32>) {
    let error = client.take_error().expect("the client was not killed");
    assert_eq!(
        (error.object_interface.as_str(), error.code),
        (interface, code.into()),
        "unexpected error: {}",
        error.message
    );
}

fn toplevel_handle(server: &TestServer, surface: &Resource<WlSurface>) -> ToplevelSurface {
    server
        .state
        .xdg_shell_state
        .get_toplevel(surface)
        .expect("no toplevel for this surface")
}

fn popup_handle(server: &TestServer, surface: &Resource<WlSurface>) -> PopupSurface {
    server
        .state
        .xdg_shell_state
        .get_popup(surface)
        .expect("no popup for this surface")
}

fn configure_serials(client: &TestClient) -> Vec<u32> {
    client
        .transport
        .take_events::<XdgSurface>()
        .into_iter()
        .map(|(_, event)| match event {
            xdg_surface::Event::Configure { serial } => serial,
        })
        .collect()
}

fn ack(server: &mut TestServer, client: &TestClient, xdg_surface: &Resource<XdgSurface>, serial: u32) {
    server.request(client, xdg_surface, xdg_surface::Request::AckConfigure { serial });
}

fn pending_configures(surface: &Resource<WlSurface>) -> usize {
    compositor::with_states(surface, |states| toplevel_attributes(states).pending_configures().len())
}

fn positioner(
    server: &mut TestServer,
    client: &mut TestClient,
    wm_base: &Resource<XdgWmBase>,
    requests: Vec<xdg_positioner::Request>,
) -> Resource<XdgPositioner> {
    let id = client.new_id();
    server.request(
        client,
        wm_base,
        xdg_wm_base::Request::CreatePositioner { id: New::wrap(id) },
    );
    let positioner = server.resource::<XdgPositioner>(client, id);
    for request in requests {
        server.request(client, &positioner, request);
    }
    positioner
}

fn menu_positioner(
    server: &mut TestServer,
    client: &mut TestClient,
    wm_base: &Resource<XdgWmBase>,
) -> Resource<XdgPositioner> {
    positioner(
        server,
        client,
        wm_base,
        vec![
            xdg_positioner::Request::SetSize { width: 100, height: 50 },
            xdg_positioner::Request::SetAnchorRect {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
            // bottom_right in both cases
            xdg_positioner::Request::SetAnchor { anchor: 8 },
            xdg_positioner::Request::SetGravity { gravity: 8 },
        ],
    )
}

struct Popup {
    surface: Resource<WlSurface>,
    xdg_surface: Resource<XdgSurface>,
    popup: Resource<XdgPopup>,
}

fn create_popup(
    server: &mut TestServer,
    client: &mut TestClient,
    wm_base: &Resource<XdgWmBase>,
    parent: &Resource<XdgSurface>,
    positioner: &Resource<XdgPositioner>,
) -> Popup {
    let surface = server.create_surface(client);
    let xdg_surface = server.create_xdg_surface(client, wm_base, &surface);
    let id = client.new_id();
    server.request(
        client,
        &xdg_surface,
        xdg_surface::Request::GetPopup {
            id: New::wrap(id),
            parent: Some(parent.clone()),
            positioner: positioner.clone(),
        },
    );
    let popup = server.resource(client, id);
    Popup {
        surface,
        xdg_surface,
        popup,
    }
}

#[test]
fn configure_queue_acks_up_to_serial() {
    let mut queue = ConfigureQueue::default();
    for serial in 1..=3u32 {
        queue.push(ToplevelConfigure {
            state: ToplevelState::default(),
            serial: serial.into(),
        });
    }

    assert!(queue.ack(Serial::from(7)).is_none());
    assert_eq!(queue.len(), 3);

    let acked = queue.ack(Serial::from(2)).unwrap();
    assert_eq!(
        acked.iter().map(|c| u32::from(c.serial)).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(queue.len(), 1);
    assert!(queue.ack(Serial::from(1)).is_none());
    assert_eq!(queue.last().map(|c| c.serial), Some(Serial::from(3)));
}

#[test]
fn new_toplevel_is_reported() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, _) = server.create_toplevel(&mut client, &wm_base);

    let events = server.state.take_events();
    assert!(events.contains(&Recorded::NewShellClient(wm_base.id())));
    assert!(events.contains(&Recorded::NewToplevel(surface.id())));
    assert_eq!(server.state.xdg_shell_state.toplevel_surfaces().len(), 1);
    assert!(is_toplevel_equivalent(&surface));
}

#[test]
fn initial_configure_sends_events_in_order() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, toplevel) = server.create_toplevel(&mut client, &wm_base);
    client.transport.drain();

    let handle = toplevel_handle(&server, &surface);
    handle.with_pending_state(|state| {
        state.size = Some((800, 600).into());
        state.bounds = Some((1920, 1080).into());
        state.states.set(xdg_toplevel::State::Activated);
    });
    let serial = handle.send_configure().unwrap();

    let events = client.transport.drain();
    let interfaces = events.iter().map(|message| message.interface).collect::<Vec<_>>();
    assert_eq!(
        interfaces,
        vec!["xdg_toplevel", "xdg_toplevel", "xdg_toplevel", "xdg_surface"]
    );
    let toplevel_events = events
        .iter()
        .filter_map(EventMessage::downcast_ref::<xdg_toplevel::Event>)
        .collect::<Vec<_>>();
    assert!(matches!(toplevel_events[0], xdg_toplevel::Event::WmCapabilities { capabilities } if capabilities == &vec![1, 2, 3, 4]));
    assert!(matches!(
        toplevel_events[1],
        xdg_toplevel::Event::ConfigureBounds {
            width: 1920,
            height: 1080
        }
    ));
    assert!(matches!(
        toplevel_events[2],
        xdg_toplevel::Event::Configure { width: 800, height: 600, states } if states == &vec![xdg_toplevel::State::Activated as u32]
    ));
    assert!(matches!(
        events[3].downcast_ref::<xdg_surface::Event>(),
        Some(xdg_surface::Event::Configure { serial: s }) if *s == u32::from(serial)
    ));
    assert!(events[..3].iter().all(|message| message.sender == toplevel.id()));

    // capabilities are only sent once
    handle.send_configure().unwrap();
    let events = client.transport.take_events::<XdgToplevel>();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0].1, xdg_toplevel::Event::ConfigureBounds { .. }));
}

#[test]
fn ack_consumes_older_configures_in_order() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);
    let handle = toplevel_handle(&server, &surface);

    for width in [100, 200, 300] {
        handle.with_pending_state(|state| state.size = Some((width, 100).into()));
        handle.send_configure().unwrap();
    }
    let serials = configure_serials(&client);
    assert_eq!(serials.len(), 3);
    server.state.take_events();

    ack(&mut server, &client, &xdg_surface, serials[1]);

    assert_eq!(
        server.state.take_events(),
        vec![
            Recorded::AckConfigure(surface.id(), serials[0].into()),
            Recorded::AckConfigure(surface.id(), serials[1].into()),
        ]
    );
    let sizes = server
        .state
        .acked
        .iter()
        .map(|configure| match configure {
            Configure::Toplevel(configure) => configure.state.size,
            Configure::Popup(_) => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(sizes, vec![Some((100, 100).into()), Some((200, 100).into())]);
    assert_eq!(pending_configures(&surface), 1);
    assert!(handle.is_configured());

    // the acked state becomes current on commit
    assert_eq!(handle.current_state().size, None);
    server.commit(&client, &surface);
    assert_eq!(handle.current_state().size, Some((200, 100).into()));
}

#[test]
fn unknown_serial_is_a_protocol_error() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);
    let handle = toplevel_handle(&server, &surface);
    handle.send_configure().unwrap();
    let serial = configure_serials(&client)[0];
    server.state.take_events();

    ack(&mut server, &client, &xdg_surface, serial.wrapping_add(1000));

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::InvalidSerial);
    assert_eq!(pending_configures(&surface), 1);
    assert!(server.state.acked.is_empty());
    assert!(!handle.is_configured());
}

#[test]
fn pending_configure_only_sent_on_changes() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, _) = server.create_toplevel(&mut client, &wm_base);
    let handle = toplevel_handle(&server, &surface);

    handle.with_pending_state(|state| state.size = Some((10, 10).into()));
    assert!(handle.send_pending_configure().is_some());
    handle.with_pending_state(|state| state.size = Some((10, 10).into()));
    assert!(!handle.has_pending_changes());
    assert!(handle.send_pending_configure().is_none());
    handle.with_pending_state(|state| {
        state.states.set(xdg_toplevel::State::Maximized);
    });
    assert!(handle.send_pending_configure().is_some());
    assert_eq!(configure_serials(&client).len(), 2);
}

#[test]
fn buffer_before_configure_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, _) = server.create_toplevel(&mut client, &wm_base);
    let buffer = server.create_buffer(&client, (10, 10));

    server.attach(&client, &surface, Some(buffer));
    server.commit(&client, &surface);

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::UnconfiguredBuffer);
    assert!(!compositor::is_mapped(&surface));
}

#[test]
fn configured_toplevel_maps_and_resets_on_unmap() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);
    let handle = toplevel_handle(&server, &surface);

    // initial commit without buffer, then configure
    server.commit(&client, &surface);
    handle.send_configure().unwrap();
    let serial = configure_serials(&client)[0];
    ack(&mut server, &client, &xdg_surface, serial);

    let buffer = server.create_buffer(&client, (10, 10));
    server.attach(&client, &surface, Some(buffer));
    server.request(
        &client,
        &surface,
        wl_surface::Request::Damage {
            x: 0,
            y: 0,
            width: 10,
            height: 10,
        },
    );
    server.commit(&client, &surface);
    assert!(client.take_error().is_none());
    assert!(compositor::is_mapped(&surface));
    assert!(handle.is_configured());

    server.attach(&client, &surface, None);
    server.commit(&client, &surface);
    assert!(!compositor::is_mapped(&surface));
    assert!(!handle.is_configured());
    assert!(!handle.is_initial_configure_sent());
    assert_eq!(pending_configures(&surface), 0);
}

#[test]
fn commit_without_role_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let surface = server.create_surface(&mut client);
    server.create_xdg_surface(&mut client, &wm_base, &surface);

    server.commit(&client, &surface);

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::NotConstructed);
}

#[test]
fn ack_without_role_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let surface = server.create_surface(&mut client);
    let xdg_surface = server.create_xdg_surface(&mut client, &wm_base, &surface);

    ack(&mut server, &client, &xdg_surface, 1);

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::NotConstructed);
}

#[test]
fn second_role_object_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);

    let id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetToplevel { id: New::wrap(id) },
    );

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::AlreadyConstructed);
}

#[test]
fn other_role_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, xdg_surface, toplevel) = server.create_toplevel(&mut client, &wm_base);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let (_, parent, _) = server.create_toplevel(&mut client, &wm_base);

    // the role object is gone, but the surface keeps its toplevel role
    server.request(&client, &toplevel, xdg_toplevel::Request::Destroy);
    let id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetPopup {
            id: New::wrap(id),
            parent: Some(parent),
            positioner,
        },
    );

    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::Role);
}

#[test]
fn toplevel_can_be_recreated_after_destroy() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, xdg_surface, toplevel) = server.create_toplevel(&mut client, &wm_base);
    toplevel_handle(&server, &surface).send_configure().unwrap();
    server.state.take_events();

    server.request(&client, &toplevel, xdg_toplevel::Request::Destroy);
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::ToplevelDestroyed(surface.id())]
    );
    assert!(server.state.xdg_shell_state.toplevel_surfaces().is_empty());

    let id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetToplevel { id: New::wrap(id) },
    );
    assert!(client.take_error().is_none());
    let handle = toplevel_handle(&server, &surface);
    assert!(!handle.is_initial_configure_sent());
    assert_eq!(pending_configures(&surface), 0);
}

#[test]
fn xdg_surface_outliving_its_role_object() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);

    server.request(&client, &xdg_surface, xdg_surface::Request::Destroy);

    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::DefunctRoleObject);
}

#[test]
fn shell_destroyed_before_its_surfaces() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    server.create_toplevel(&mut client, &wm_base);

    server.request(&client, &wm_base, xdg_wm_base::Request::Destroy);

    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::DefunctSurfaces);
}

#[test]
fn ping_pong() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, _) = server.create_toplevel(&mut client, &wm_base);
    let shell_client = toplevel_handle(&server, &surface).client().unwrap();
    assert_eq!(shell_client.variant(), ShellVariant::Stable);
    server.state.take_events();

    let serial = shell_client.send_ping().unwrap();
    assert_eq!(shell_client.send_ping(), Err(PingError::PingAlreadyPending(serial)));
    let pings = client.transport.take_events::<XdgWmBase>();
    assert_eq!(pings.len(), 1);
    assert!(matches!(pings[0].1, xdg_wm_base::Event::Ping { serial: s } if s == u32::from(serial)));

    // a pong for another serial is ignored
    server.request(
        &client,
        &wm_base,
        xdg_wm_base::Request::Pong {
            serial: u32::from(serial).wrapping_add(1),
        },
    );
    assert!(server.state.take_events().is_empty());
    assert_eq!(
        shell_client.with_data(|data| data.pending_ping),
        Ok(Some(serial))
    );

    server.request(
        &client,
        &wm_base,
        xdg_wm_base::Request::Pong { serial: serial.into() },
    );
    assert_eq!(server.state.take_events(), vec![Recorded::ClientPong(wm_base.id())]);
    assert!(shell_client.send_ping().is_ok());
}

#[test]
fn unresponsive_client_is_killed() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, _) = server.create_toplevel(&mut client, &wm_base);
    let shell_client = toplevel_handle(&server, &surface).client().unwrap();

    shell_client.send_ping().unwrap();
    shell_client.unresponsive();
    // the client is torn down by the next cleanup of the display
    server.display.cleanup(&mut server.state);

    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::Unresponsive);
    assert_eq!(shell_client.send_ping(), Err(PingError::DeadSurface));
}

#[test]
fn toplevel_requests_reach_the_handler() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let seat = server.bind_seat(&mut client);
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, toplevel) = server.create_toplevel(&mut client, &wm_base);
    server.state.take_events();
    let id = surface.id();

    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::SetTitle {
            title: "editor".into(),
        },
    );
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::SetAppId {
            app_id: "org.example.editor".into(),
        },
    );
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::Move {
            seat: seat.clone(),
            serial: 12,
        },
    );
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::Resize {
            seat: seat.clone(),
            serial: 13,
            edges: 10,
        },
    );
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::ShowWindowMenu {
            seat,
            serial: 14,
            x: 5,
            y: 6,
        },
    );
    server.request(&client, &toplevel, xdg_toplevel::Request::SetMaximized);
    server.request(&client, &toplevel, xdg_toplevel::Request::SetFullscreen);
    server.request(&client, &toplevel, xdg_toplevel::Request::SetMinimized);

    assert_eq!(
        server.state.take_events(),
        vec![
            Recorded::TitleChanged(id, Some("editor".into())),
            Recorded::AppIdChanged(id, Some("org.example.editor".into())),
            Recorded::Move(id, Serial::from(12)),
            Recorded::Resize(id, xdg_toplevel::ResizeEdge::BottomRight),
            Recorded::WindowMenu(id, (5, 6).into()),
            Recorded::Maximize(id),
            Recorded::Fullscreen(id),
            Recorded::Minimize(id),
        ]
    );
}

#[test]
fn invalid_resize_edge_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let seat = server.bind_seat(&mut client);
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, _, toplevel) = server.create_toplevel(&mut client, &wm_base);

    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::Resize {
            seat,
            serial: 1,
            edges: 3,
        },
    );

    assert_killed_with(&client, "xdg_toplevel", xdg_toplevel::Error::InvalidResizeEdge);
}

#[test]
fn min_size_larger_than_max_size_is_refused_on_commit() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, toplevel) = server.create_toplevel(&mut client, &wm_base);

    // an unbounded axis accepts any minimum
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::SetMaxSize { width: 100, height: 0 },
    );
    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::SetMinSize {
            width: 50,
            height: 500,
        },
    );
    server.commit(&client, &surface);
    assert!(client.take_error().is_none());
    assert_eq!(
        toplevel_handle(&server, &surface).cached_state().min_size,
        (50, 500).into()
    );

    server.request(
        &client,
        &toplevel,
        xdg_toplevel::Request::SetMinSize {
            width: 150,
            height: 10,
        },
    );
    server.commit(&client, &surface);

    assert_killed_with(&client, "xdg_toplevel", xdg_toplevel::Error::InvalidSize);
}

#[test]
fn window_geometry_is_double_buffered() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, xdg_surface, _) = server.create_toplevel(&mut client, &wm_base);
    let handle = toplevel_handle(&server, &surface);

    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::SetWindowGeometry {
            x: 5,
            y: 5,
            width: 90,
            height: 90,
        },
    );
    assert_eq!(handle.cached_state().geometry, None);
    server.commit(&client, &surface);
    assert_eq!(
        handle.cached_state().geometry,
        Some(Rectangle::new((5, 5).into(), (90, 90).into()))
    );

    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::SetWindowGeometry {
            x: 0,
            y: 0,
            width: 0,
            height: 10,
        },
    );
    assert_killed_with(&client, "xdg_surface", xdg_surface::Error::InvalidSize);
}

#[test]
fn toplevel_parents() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (parent_surface, _, parent) = server.create_toplevel(&mut client, &wm_base);
    let (child_surface, _, child) = server.create_toplevel(&mut client, &wm_base);
    server.state.take_events();

    server.request(
        &client,
        &child,
        xdg_toplevel::Request::SetParent {
            parent: Some(parent.clone()),
        },
    );
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::ParentChanged(child_surface.id(), Some(parent_surface.id()))]
    );
    assert_eq!(toplevel_handle(&server, &child_surface).parent(), Some(parent_surface.clone()));

    // the parent cannot become a child of its own child
    server.request(&client, &parent, xdg_toplevel::Request::SetParent { parent: Some(child) });
    assert_killed_with(&client, "xdg_toplevel", xdg_toplevel::Error::InvalidParent);
}

#[test]
fn close_is_sent_to_the_toplevel() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (surface, _, toplevel) = server.create_toplevel(&mut client, &wm_base);
    client.transport.drain();

    toplevel_handle(&server, &surface).send_close();

    let events = client.transport.take_events::<XdgToplevel>();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, toplevel.id());
    assert!(matches!(events[0].1, xdg_toplevel::Event::Close));
}

#[test]
fn v6_toplevels_only_get_v1_events() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let shell = server.global::<ZxdgShellV6>(&mut client);
    let surface = server.create_surface(&mut client);
    let xdg_surface_id = client.new_id();
    server.send::<ZxdgShellV6>(
        &client,
        shell,
        xdg_wm_base::Request::GetXdgSurface {
            id: New::wrap(xdg_surface_id),
            surface: surface.clone(),
        },
    );
    let xdg_surface = server.resource::<XdgSurface>(&client, xdg_surface_id);
    let toplevel_id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetToplevel {
            id: New::wrap(toplevel_id),
        },
    );
    client.transport.drain();

    let handle = toplevel_handle(&server, &surface);
    assert_eq!(handle.version(), 1);
    assert_eq!(handle.client().map(|client| client.variant()), Some(ShellVariant::V6));
    handle.with_pending_state(|state| {
        state.bounds = Some((100, 100).into());
        state.states.set(xdg_toplevel::State::TiledLeft);
        state.states.set(xdg_toplevel::State::Activated);
    });
    handle.send_configure().unwrap();

    let events = client.transport.take_events::<XdgToplevel>();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].1,
        xdg_toplevel::Event::Configure { states, .. } if states == &vec![xdg_toplevel::State::Activated as u32]
    ));
    assert_eq!(configure_serials(&client).len(), 1);
}

#[test]
fn invalid_positioner_input_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);

    positioner(
        &mut server,
        &mut client,
        &wm_base,
        vec![xdg_positioner::Request::SetSize { width: 0, height: 10 }],
    );

    assert_killed_with(&client, "xdg_positioner", xdg_positioner::Error::InvalidInput);
}

#[test]
fn stable_anchor_rect_may_be_empty() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);

    let positioner = positioner(
        &mut server,
        &mut client,
        &wm_base,
        vec![
            xdg_positioner::Request::SetAnchorRect {
                x: 1,
                y: 2,
                width: 0,
                height: 0,
            },
            xdg_positioner::Request::SetConstraintAdjustment {
                constraint_adjustment: 1 | 8 | 64,
            },
        ],
    );

    assert!(client.take_error().is_none());
    let state = positioner.data::<XdgPositionerUserData>().unwrap().state();
    assert_eq!(state.anchor_rect, Rectangle::new((1, 2).into(), (0, 0).into()));
    assert_eq!(
        state.constraint_adjustment,
        ConstraintAdjustment::SLIDE_X | ConstraintAdjustment::FLIP_Y
    );
}

#[test]
fn v6_conflicting_anchor_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let shell = server.global::<ZxdgShellV6>(&mut client);
    let id = client.new_id();
    server.send::<ZxdgShellV6>(
        &client,
        shell,
        xdg_wm_base::Request::CreatePositioner { id: New::wrap(id) },
    );
    let positioner = server.resource::<XdgPositioner>(&client, id);

    // top | left is a valid v6 anchor
    server.request(&client, &positioner, xdg_positioner::Request::SetAnchor { anchor: 1 | 4 });
    assert!(client.take_error().is_none());
    assert_eq!(
        positioner.data::<XdgPositionerUserData>().unwrap().state().anchor_edges,
        Edges::TOP | Edges::LEFT
    );

    server.request(
        &client,
        &positioner,
        xdg_positioner::Request::SetGravity { gravity: 4 | 8 },
    );
    assert_killed_with(&client, "xdg_positioner", xdg_positioner::Error::InvalidInput);
}

#[test]
fn popup_creation_and_configure() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (parent_surface, parent, _) = server.create_toplevel(&mut client, &wm_base);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let popup = create_popup(&mut server, &mut client, &wm_base, &parent, &positioner);
    client.transport.drain();

    let expected = positioner.data::<XdgPositionerUserData>().unwrap().state();
    assert!(server
        .state
        .take_events()
        .contains(&Recorded::NewPopup(popup.surface.id(), expected)));

    let handle = popup_handle(&server, &popup.surface);
    assert_eq!(handle.get_parent_surface(), Some(parent_surface));
    let serial = handle.send_configure().unwrap();

    let events = client.transport.drain();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0].downcast_ref::<xdg_popup::Event>(),
        Some(xdg_popup::Event::Configure {
            x: 10,
            y: 10,
            width: 100,
            height: 50
        })
    ));
    assert!(matches!(
        events[1].downcast_ref::<xdg_surface::Event>(),
        Some(xdg_surface::Event::Configure { serial: s }) if *s == u32::from(serial)
    ));

    // not reactive, it cannot be configured again
    assert_eq!(handle.send_configure(), Err(ConfigureError::NotReactive));

    ack(&mut server, &client, &popup.xdg_surface, serial.into());
    server.commit(&client, &popup.surface);
    assert!(client.take_error().is_none());
    assert!(handle.is_configured());
    assert_eq!(
        handle.current_state().geometry,
        Rectangle::new((10, 10).into(), (100, 50).into())
    );
}

#[test]
fn popup_reposition_sends_token_first() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, parent, _) = server.create_toplevel(&mut client, &wm_base);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let popup = create_popup(&mut server, &mut client, &wm_base, &parent, &positioner);
    let handle = popup_handle(&server, &popup.surface);
    handle.send_configure().unwrap();
    server.state.take_events();
    client.transport.drain();

    server.request(
        &client,
        &popup.popup,
        xdg_popup::Request::Reposition {
            positioner: positioner.clone(),
            token: 42,
        },
    );
    let expected = positioner.data::<XdgPositionerUserData>().unwrap().state();
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::Reposition(popup.surface.id(), expected, 42)]
    );

    handle.with_pending_state(|state| {
        state.geometry = Rectangle::new((0, 0).into(), (20, 20).into());
    });
    handle.send_repositioned(42).unwrap();
    let events = client.transport.take_events::<XdgPopup>();
    assert!(matches!(events[0].1, xdg_popup::Event::Repositioned { token: 42 }));
    assert!(matches!(
        events[1].1,
        xdg_popup::Event::Configure {
            x: 0,
            y: 0,
            width: 20,
            height: 20
        }
    ));
}

#[test]
fn incomplete_positioner_is_refused() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, parent, _) = server.create_toplevel(&mut client, &wm_base);
    let positioner = positioner(&mut server, &mut client, &wm_base, Vec::new());
    let surface = server.create_surface(&mut client);
    let xdg_surface = server.create_xdg_surface(&mut client, &wm_base, &surface);
    server.state.take_events();

    let id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetPopup {
            id: New::wrap(id),
            parent: Some(parent),
            positioner,
        },
    );

    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::InvalidPositioner);
    assert!(server.display.handle().lookup(client.client.id(), id).is_none());
    assert!(!server
        .state
        .take_events()
        .iter()
        .any(|event| matches!(event, Recorded::NewPopup(..))));
    assert!(server.state.xdg_shell_state.get_popup(&surface).is_none());
}

#[test]
fn popup_grab_must_precede_commit() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let seat = server.bind_seat(&mut client);
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, parent, _) = server.create_toplevel(&mut client, &wm_base);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let popup = create_popup(&mut server, &mut client, &wm_base, &parent, &positioner);
    server.state.take_events();

    server.request(
        &client,
        &popup.popup,
        xdg_popup::Request::Grab {
            seat: seat.clone(),
            serial: 3,
        },
    );
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::PopupGrab(popup.surface.id(), Serial::from(3))]
    );

    server.commit(&client, &popup.surface);
    server.request(&client, &popup.popup, xdg_popup::Request::Grab { seat, serial: 4 });
    assert_killed_with(&client, "xdg_popup", xdg_popup::Error::InvalidGrab);
}

#[test]
fn popups_are_destroyed_topmost_first() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let (_, parent, _) = server.create_toplevel(&mut client, &wm_base);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let menu = create_popup(&mut server, &mut client, &wm_base, &parent, &positioner);
    let submenu = create_popup(&mut server, &mut client, &wm_base, &menu.xdg_surface, &positioner);
    server.state.take_events();

    server.request(&client, &submenu.popup, xdg_popup::Request::Destroy);
    assert_eq!(
        server.state.take_events(),
        vec![Recorded::PopupDestroyed(submenu.surface.id())]
    );
    assert_eq!(server.state.xdg_shell_state.popup_surfaces().len(), 1);

    let again = create_popup(&mut server, &mut client, &wm_base, &menu.xdg_surface, &positioner);
    assert!(again.popup.is_alive());
    server.request(&client, &menu.popup, xdg_popup::Request::Destroy);
    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::NotTheTopmostPopup);
}

#[test]
fn popup_without_parent_cannot_commit() {
    let mut server = TestServer::new();
    let mut client = server.add_client();
    let wm_base = server.bind_xdg_wm_base(&mut client);
    let positioner = menu_positioner(&mut server, &mut client, &wm_base);
    let surface = server.create_surface(&mut client);
    let xdg_surface = server.create_xdg_surface(&mut client, &wm_base, &surface);
    let id = client.new_id();
    server.request(
        &client,
        &xdg_surface,
        xdg_surface::Request::GetPopup {
            id: New::wrap(id),
            parent: None,
            positioner,
        },
    );
    assert!(client.take_error().is_none());

    server.request(&client, &surface, wl_surface::Request::Commit);

    assert_killed_with(&client, "xdg_wm_base", xdg_wm_base::Error::InvalidPopupParent);
}

#[test]
fn constrained_popup_slides_into_target() {
    let state = PopupState::constrained(
        PositionerState {
            rect_size: (50, 50).into(),
            anchor_rect: Rectangle::new((90, 0).into(), (10, 10).into()),
            anchor_edges: Edges::RIGHT,
            gravity: Edges::RIGHT | Edges::BOTTOM,
            constraint_adjustment: ConstraintAdjustment::SLIDE_X,
            ..Default::default()
        },
        Rectangle::new((0, 0).into(), (120, 120).into()),
    );
    assert_eq!(state.geometry, Rectangle::new((70, 5).into(), (50, 50).into()));
}
