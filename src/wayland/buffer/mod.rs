//! Buffer management utilities.
//!
//! Buffers are created by buffer factories (shm pools, dmabuf, ...) which live outside of this
//! crate: they are expected to create [`WlBuffer`] objects with [`create_buffer`], attaching a
//! [`BufferData`] describing the size of the contents.
//!
//! The compositor module keeps track of how many surfaces currently display each buffer. The
//! client is sent `wl_buffer.release` when the last of them lets it go, and a buffer destroyed
//! while still referenced by a surface is cleared from every surface state before its data is
//! dropped.

use std::sync::Mutex;

use tracing::trace;

use crate::{
    protocol::wl_buffer::{self, WlBuffer},
    server::{Client, ClientId, DataInit, Dispatch, DisplayHandle, InvalidId, Resource, Weak},
    utils::{self, Size},
};

use super::compositor;

/// Handler trait for buffer destruction
pub trait BufferHandler {
    /// Called when the client has destroyed the buffer.
    ///
    /// At this point the buffer has already been removed from every surface state.
    fn buffer_destroyed(&mut self, buffer: &Resource<WlBuffer>);
}

/// Data associated with every [`WlBuffer`]
#[derive(Debug)]
pub struct BufferData {
    size: Size<i32, utils::Buffer>,
    users: Mutex<BufferUsers>,
}

#[derive(Debug, Default)]
struct BufferUsers {
    count: usize,
    surfaces: Vec<Weak<crate::protocol::wl_surface::WlSurface>>,
}

impl BufferData {
    /// Data of a buffer of the given size, in buffer pixels
    pub fn new(size: impl Into<Size<i32, utils::Buffer>>) -> Self {
        BufferData {
            size: size.into(),
            users: Mutex::new(BufferUsers::default()),
        }
    }

    /// Size of the buffer contents
    pub fn size(&self) -> Size<i32, utils::Buffer> {
        self.size
    }

    /// Number of surfaces currently displaying this buffer
    pub fn use_count(&self) -> usize {
        self.users.lock().unwrap().count
    }

    pub(crate) fn track_surface(&self, surface: &Resource<crate::protocol::wl_surface::WlSurface>) {
        let mut users = self.users.lock().unwrap();
        users.surfaces.retain(|s| s.is_alive());
        if !users.surfaces.iter().any(|s| s == &surface.downgrade()) {
            users.surfaces.push(surface.downgrade());
        }
    }

    fn tracked_surfaces(&self) -> Vec<Resource<crate::protocol::wl_surface::WlSurface>> {
        let users = self.users.lock().unwrap();
        users.surfaces.iter().filter_map(|s| s.upgrade().ok()).collect()
    }
}

/// Size of a buffer, if it was created through this module
pub fn buffer_size(buffer: &Resource<WlBuffer>) -> Option<Size<i32, utils::Buffer>> {
    buffer.data::<BufferData>().map(BufferData::size)
}

/// Record that a surface started displaying this buffer
pub(crate) fn acquire(buffer: &Resource<WlBuffer>) {
    if let Some(data) = buffer.data::<BufferData>() {
        data.users.lock().unwrap().count += 1;
    }
}

/// Record that a surface stopped displaying this buffer
///
/// The client is notified with `wl_buffer.release` once no surface uses it anymore.
pub(crate) fn release(buffer: &Resource<WlBuffer>) {
    let Some(data) = buffer.data::<BufferData>() else {
        return;
    };
    let released = {
        let mut users = data.users.lock().unwrap();
        users.count = users.count.saturating_sub(1);
        users.count == 0
    };
    if released {
        trace!(buffer = ?buffer, "releasing buffer");
        buffer.send_event(wl_buffer::Event::Release);
    }
}

/// Create a new server-side buffer object for a client
///
/// This is meant for buffer factories, which answer the client request creating the buffer
/// with `data_init` when the client picked the id, or create it server-side otherwise.
pub fn create_buffer<D>(
    dh: &DisplayHandle,
    client: &Client,
    size: impl Into<Size<i32, utils::Buffer>>,
) -> Result<Resource<WlBuffer>, InvalidId>
where
    D: Dispatch<WlBuffer, BufferData> + BufferHandler + 'static,
{
    client.create_resource::<WlBuffer, BufferData, D>(dh, 1, BufferData::new(size))
}

/// Initialize a buffer object whose id was chosen by the client
pub fn init_buffer<D>(
    data_init: &mut DataInit<'_, D>,
    buffer: crate::server::New<WlBuffer>,
    size: impl Into<Size<i32, utils::Buffer>>,
) -> Resource<WlBuffer>
where
    D: Dispatch<WlBuffer, BufferData> + BufferHandler + 'static,
{
    data_init.init(buffer, BufferData::new(size))
}

/// Delegate type handling `wl_buffer` requests
#[derive(Debug)]
pub struct BufferState;

impl<D> Dispatch<WlBuffer, BufferData, D> for BufferState
where
    D: Dispatch<WlBuffer, BufferData> + BufferHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _resource: &Resource<WlBuffer>,
        request: wl_buffer::Request,
        _data: &BufferData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            wl_buffer::Request::Destroy => {
                // handled by the destructor
            }
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, buffer: &Resource<WlBuffer>, data: &BufferData) {
        for surface in data.tracked_surfaces() {
            compositor::buffer_destroyed(&surface, buffer);
        }
        state.buffer_destroyed(buffer);
    }
}

/// Macro to delegate implementation of `wl_buffer` to [`BufferState`].
///
/// You must also implement [`BufferHandler`] to use this.
#[macro_export]
macro_rules! delegate_buffer {
    ($ty: ty) => {
        $crate::delegate_dispatch!($ty: [$crate::protocol::wl_buffer::WlBuffer: $crate::wayland::buffer::BufferData] => $crate::wayland::buffer::BufferState);
    };
}
