use std::sync::Arc;

use super::*;
use crate::{
    protocol::{
        wl_compositor::{self, WlCompositor},
        wl_display::{self, WlDisplay},
        wl_region::{self, WlRegion},
        wl_registry::{self, WlRegistry},
        wl_surface::{self, WlSurface},
    },
    test_utils::{init_logging, RecordingClientData, RecordingTransport},
};

#[derive(Debug, Default)]
struct State {
    compositors: Vec<Resource<WlCompositor>>,
    regions: Vec<Resource<WlRegion>>,
    destroyed: Vec<(&'static str, u32)>,
    parent_seen_on_destroy: Vec<Option<ObjectId>>,
}

impl GlobalDispatch<WlCompositor, ()> for State {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let compositor = data_init.init(resource, ());
        state.compositors.push(compositor);
    }
}

impl Dispatch<WlCompositor, ()> for State {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &Resource<WlCompositor>,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateRegion { id } => {
                let region = data_init.init(id, ());
                state.regions.push(region);
            }
            wl_compositor::Request::CreateSurface { id } => {
                data_init.init(id, ());
            }
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &Resource<WlCompositor>, _data: &()) {
        state.destroyed.push((WlCompositor::NAME, resource.id().protocol_id()));
    }
}

impl Dispatch<WlRegion, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &Resource<WlRegion>,
        _request: wl_region::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &Resource<WlRegion>, _data: &()) {
        state.destroyed.push((WlRegion::NAME, resource.id().protocol_id()));
        state.parent_seen_on_destroy.push(resource.parent());
    }
}

impl Dispatch<WlSurface, ()> for State {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &Resource<WlSurface>,
        _request: wl_surface::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }

    fn destroyed(state: &mut Self, _client: ClientId, resource: &Resource<WlSurface>, _data: &()) {
        state.destroyed.push((WlSurface::NAME, resource.id().protocol_id()));
    }
}

struct Fixture {
    display: Display<State>,
    state: State,
}

impl Fixture {
    fn new() -> Self {
        init_logging();
        Fixture {
            display: Display::new(),
            state: State::default(),
        }
    }

    fn client(&mut self) -> (Client, RecordingTransport) {
        let transport = RecordingTransport::new();
        let client = self
            .display
            .insert_client(Box::new(transport.clone()), Arc::new(RecordingClientData::default()));
        (client, transport)
    }

    fn send<I: Interface>(&mut self, client: &Client, object: u32, request: I::Request) -> Result<(), DispatchError> {
        self.display
            .dispatch_request::<I>(&mut self.state, client.id(), object, request)
    }

    fn get_registry(&mut self, client: &Client, id: u32) {
        self.send::<WlDisplay>(
            client,
            DISPLAY_ID,
            wl_display::Request::GetRegistry { registry: New::wrap(id) },
        )
        .unwrap();
    }

    fn bind(&mut self, client: &Client, registry: u32, name: u32, interface: &str, version: u32, id: u32) {
        self.send::<WlRegistry>(
            client,
            registry,
            wl_registry::Request::Bind {
                name,
                interface: interface.into(),
                version,
                id,
            },
        )
        .unwrap();
    }
}

fn display_errors(transport: &RecordingTransport) -> Vec<u32> {
    transport
        .take_events::<WlDisplay>()
        .into_iter()
        .filter_map(|(_, event)| match event {
            wl_display::Event::Error { code, .. } => Some(code),
            _ => None,
        })
        .collect()
}

#[test]
fn registry_advertises_globals_with_their_version() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(4, ());
    let (client, transport) = f.client();

    f.get_registry(&client, 2);

    let events = transport.take_events::<WlRegistry>();
    assert_eq!(events.len(), 1);
    match &events[0].1 {
        wl_registry::Event::Global {
            name,
            interface,
            version,
        } => {
            assert_eq!(*name, global.name());
            assert_eq!(interface, "wl_compositor");
            assert_eq!(*version, 4);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn bind_clamps_version() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(4, ());
    let (client, _transport) = f.client();
    f.get_registry(&client, 2);

    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);
    f.bind(&client, 2, global.name(), "wl_compositor", 2, 4);

    assert_eq!(f.state.compositors.len(), 2);
    assert_eq!(f.state.compositors[0].version(), 4);
    assert_eq!(f.state.compositors[1].version(), 2);
    let info = f.display.handle().global_info(global).unwrap();
    assert_eq!(info.bound.len(), 2);
    assert!(client.is_alive());
}

#[test]
fn invalid_binds_are_protocol_errors() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(4, ());

    let (unknown, unknown_transport) = f.client();
    f.get_registry(&unknown, 2);
    f.bind(&unknown, 2, 42, "wl_compositor", 1, 3);
    assert_eq!(display_errors(&unknown_transport), vec![wl_display::Error::InvalidObject as u32]);
    assert!(!unknown.is_alive());

    let (wrong, wrong_transport) = f.client();
    f.get_registry(&wrong, 2);
    f.bind(&wrong, 2, global.name(), "wl_seat", 1, 3);
    assert_eq!(display_errors(&wrong_transport), vec![wl_display::Error::InvalidObject as u32]);

    let (zero, zero_transport) = f.client();
    f.get_registry(&zero, 2);
    f.bind(&zero, 2, global.name(), "wl_compositor", 0, 3);
    assert_eq!(display_errors(&zero_transport), vec![wl_display::Error::InvalidObject as u32]);

    assert!(f.state.compositors.is_empty());
}

#[test]
fn disabling_a_global_notifies_each_registry_once() {
    let mut f = Fixture::new();
    let dh = f.display.handle();
    let global = dh.create_global::<State, WlCompositor, ()>(4, ());
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    f.get_registry(&client, 3);
    transport.drain();

    dh.disable_global(global);
    dh.disable_global(global);

    let removals = transport.take_events::<WlRegistry>();
    assert_eq!(removals.len(), 2);
    assert!(removals
        .iter()
        .all(|(_, event)| matches!(event, wl_registry::Event::GlobalRemove { name } if *name == global.name())));

    // not advertised to new registries anymore
    f.get_registry(&client, 4);
    assert!(transport.take_events::<WlRegistry>().is_empty());
    assert!(dh.global_info(global).unwrap().disabled);
}

#[test]
fn globals_created_later_are_advertised_to_existing_registries() {
    let mut f = Fixture::new();
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    assert!(transport.take_events::<WlRegistry>().is_empty());

    let global = f.display.handle().create_global::<State, WlCompositor, ()>(1, ());
    let events = transport.take_events::<WlRegistry>();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0].1, wl_registry::Event::Global { name, .. } if *name == global.name()));
}

#[test]
fn binding_a_removed_global_is_ignored() {
    let mut f = Fixture::new();
    let dh = f.display.handle();
    let global = dh.create_global::<State, WlCompositor, ()>(4, ());
    let (client, transport) = f.client();
    f.get_registry(&client, 2);

    dh.remove_global(global);
    assert!(dh.global_info(global).is_err());
    f.bind(&client, 2, global.name(), "wl_compositor", 4, 3);

    assert!(display_errors(&transport).is_empty());
    assert!(client.is_alive());
    assert!(f.state.compositors.is_empty());
}

#[test]
fn teardown_destroys_children_before_parents() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(4) })
        .unwrap();
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateSurface { id: New::wrap(5) })
        .unwrap();

    f.display.disconnect_client(&mut f.state, client.id());

    assert_eq!(
        f.state.destroyed,
        vec![("wl_surface", 5), ("wl_region", 4), ("wl_compositor", 3)]
    );
    // the region went away while its parent was still alive
    assert_eq!(f.state.parent_seen_on_destroy, vec![Some(f.state.compositors[0].id())]);
    assert!(transport.is_shut_down());
    assert_eq!(
        *client
            .get_data::<RecordingClientData>()
            .unwrap()
            .disconnected
            .lock()
            .unwrap(),
        Some(DisconnectReason::ConnectionClosed)
    );
    assert!(f.display.handle().get_client(client.id()).is_err());
    assert!(f.display.handle().global_info(global).unwrap().bound.is_empty());
}

#[test]
fn children_observe_destroyed_parent() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (client, _transport) = f.client();
    f.get_registry(&client, 2);
    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(4) })
        .unwrap();

    let region = f.state.regions[0].clone();
    assert_eq!(region.parent(), Some(f.state.compositors[0].id()));

    f.display.handle().destroy_object(f.state.compositors[0].id());
    f.display.cleanup(&mut f.state);

    assert!(region.is_alive());
    assert_eq!(region.parent(), None);
}

#[test]
fn destroy_is_idempotent() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(4) })
        .unwrap();
    transport.drain();

    f.send::<WlRegion>(&client, 4, wl_region::Request::Destroy).unwrap();
    let region = f.state.regions[0].clone();
    f.display.handle().destroy_object(region.id());
    f.display.cleanup(&mut f.state);

    assert_eq!(f.state.destroyed, vec![("wl_region", 4)]);
    let delete_ids = transport
        .take_events::<WlDisplay>()
        .into_iter()
        .filter(|(_, event)| matches!(event, wl_display::Event::DeleteId { id: 4 }))
        .count();
    assert_eq!(delete_ids, 1);
    assert!(!region.is_alive());
}

#[test]
fn requests_to_dead_objects_are_ignored() {
    let mut f = Fixture::new();
    let (client, transport) = f.client();

    let result = f.send::<WlRegion>(
        &client,
        12,
        wl_region::Request::Add {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        },
    );

    assert!(result.is_ok());
    assert!(client.is_alive());
    assert!(display_errors(&transport).is_empty());
}

#[test]
fn interface_mismatch_only_kills_the_offender() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (offender, offender_transport) = f.client();
    let (bystander, bystander_transport) = f.client();
    for client in [&offender, &bystander] {
        f.get_registry(client, 2);
        f.bind(client, 2, global.name(), "wl_compositor", 6, 3);
    }

    let result = f.send::<WlSurface>(&offender, 3, wl_surface::Request::Commit);

    assert_eq!(
        result,
        Err(DispatchError::InterfaceMismatch {
            expected: "wl_surface",
            found: "wl_compositor",
        })
    );
    assert_eq!(display_errors(&offender_transport), vec![wl_display::Error::InvalidMethod as u32]);
    assert!(f.display.handle().get_client(offender.id()).is_err());
    assert!(offender_transport.is_shut_down());
    assert!(bystander.is_alive());
    assert!(display_errors(&bystander_transport).is_empty());
    assert!(f.state.compositors[1].is_alive());
}

#[test]
fn sync_is_answered_immediately() {
    let mut f = Fixture::new();
    let (client, transport) = f.client();

    f.send::<WlDisplay>(&client, DISPLAY_ID, wl_display::Request::Sync { callback: New::wrap(2) })
        .unwrap();

    let done = transport.take_events::<crate::protocol::wl_callback::WlCallback>();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].0.protocol_id(), 2);
    let deleted = transport.take_events::<WlDisplay>();
    assert!(matches!(deleted.as_slice(), [(_, wl_display::Event::DeleteId { id: 2 })]));
    assert!(f.display.handle().lookup(client.id(), 2).is_none());
}

#[test]
fn id_collision_kills_the_client() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);

    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(2) })
        .unwrap();

    assert_eq!(display_errors(&transport), vec![wl_display::Error::InvalidObject as u32]);
    assert!(f.display.handle().get_client(client.id()).is_err());
}

#[test]
fn stale_handles_never_match_reused_ids() {
    let mut f = Fixture::new();
    let global = f.display.handle().create_global::<State, WlCompositor, ()>(6, ());
    let (client, _transport) = f.client();
    f.get_registry(&client, 2);
    f.bind(&client, 2, global.name(), "wl_compositor", 6, 3);
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(4) })
        .unwrap();
    f.send::<WlRegion>(&client, 4, wl_region::Request::Destroy).unwrap();
    f.send::<WlCompositor>(&client, 3, wl_compositor::Request::CreateRegion { id: New::wrap(4) })
        .unwrap();

    let (old, new) = (&f.state.regions[0], &f.state.regions[1]);
    assert_eq!(old.id().protocol_id(), new.id().protocol_id());
    assert_ne!(old.id(), new.id());
    assert!(!old.is_alive());
    assert!(new.is_alive());
    assert!(old.downgrade().upgrade().is_err());
    assert_eq!(new.downgrade().upgrade().unwrap(), *new);
}

#[test]
fn server_allocated_ids_use_the_upper_range() {
    let mut f = Fixture::new();
    let (client, _transport) = f.client();
    let dh = f.display.handle();

    let first = client.create_resource::<WlRegion, (), State>(&dh, 1, ()).unwrap();
    let second = client.create_resource::<WlRegion, (), State>(&dh, 1, ()).unwrap();

    assert_eq!(first.id().protocol_id(), SERVER_ID_BASE);
    assert_eq!(second.id().protocol_id(), SERVER_ID_BASE + 1);
    assert!(first.id().is_server_allocated());
    assert_eq!(Resource::<WlRegion>::from_id(&dh, first.id()).unwrap(), first);
    assert!(Resource::<WlSurface>::from_id(&dh, first.id()).is_err());
}

#[test]
fn failing_flush_disconnects_the_client() {
    let mut f = Fixture::new();
    let (client, transport) = f.client();
    f.get_registry(&client, 2);
    f.display.flush_clients();
    assert_eq!(transport.flushes(), 0);

    f.send::<WlDisplay>(&client, DISPLAY_ID, wl_display::Request::Sync { callback: New::wrap(3) })
        .unwrap();
    f.display.flush_clients();
    assert_eq!(transport.flushes(), 1);

    f.send::<WlDisplay>(&client, DISPLAY_ID, wl_display::Request::Sync { callback: New::wrap(4) })
        .unwrap();
    transport.break_pipe();
    f.display.flush_clients();
    f.display.cleanup(&mut f.state);

    assert!(f.display.handle().get_client(client.id()).is_err());
    assert!(transport.is_shut_down());
}

#[test]
fn serials_are_per_client() {
    let mut f = Fixture::new();
    let (first, _) = f.client();
    let (second, _) = f.client();

    assert_eq!(first.last_serial(), None);
    let a = first.next_serial();
    let b = first.next_serial();
    let c = second.next_serial();

    assert!(a < b);
    assert_eq!(a, c);
    assert_eq!(first.last_serial(), Some(b));
}
