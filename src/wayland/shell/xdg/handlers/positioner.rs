use std::sync::Mutex;

use crate::{
    protocol::xdg_positioner::{self, XdgPositioner},
    server::{Client, DataInit, Dispatch, DisplayHandle, Resource},
    utils::{Rectangle, Serial},
};

use super::super::{ConstraintAdjustment, Edges, PositionerError, PositionerState, ShellVariant, XdgShellState};

/// User data for Xdg Positioner
#[derive(Debug)]
pub struct XdgPositionerUserData {
    pub(crate) variant: ShellVariant,
    pub(crate) inner: Mutex<PositionerState>,
}

impl XdgPositionerUserData {
    pub(crate) fn new(variant: ShellVariant) -> Self {
        XdgPositionerUserData {
            variant,
            inner: Mutex::new(PositionerState::default()),
        }
    }

    /// Snapshot of the positioner state
    pub fn state(&self) -> PositionerState {
        *self.inner.lock().unwrap()
    }
}

impl<D> Dispatch<XdgPositioner, XdgPositionerUserData, D> for XdgShellState
where
    D: Dispatch<XdgPositioner, XdgPositionerUserData>,
    D: 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        positioner: &Resource<XdgPositioner>,
        request: xdg_positioner::Request,
        data: &XdgPositionerUserData,
        _dh: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        if let Err(err) = apply_request(data, request) {
            positioner.post_error(xdg_positioner::Error::InvalidInput, err.to_string());
        }
    }
}

// Requests are validated before anything is stored
fn apply_request(data: &XdgPositionerUserData, request: xdg_positioner::Request) -> Result<(), PositionerError> {
    let mut state = data.inner.lock().unwrap();
    match request {
        xdg_positioner::Request::SetSize { width, height } => {
            if width < 1 || height < 1 {
                return Err(PositionerError::InvalidSize { width, height });
            }
            state.rect_size = (width, height).into();
        }
        xdg_positioner::Request::SetAnchorRect { x, y, width, height } => {
            // the stable shell allows empty anchor rectangles
            let min = match data.variant {
                ShellVariant::Stable => 0,
                ShellVariant::V6 => 1,
            };
            if width < min || height < min {
                return Err(PositionerError::InvalidSize { width, height });
            }
            state.anchor_rect = Rectangle::new((x, y).into(), (width, height).into());
        }
        xdg_positioner::Request::SetAnchor { anchor } => {
            state.anchor_edges = Edges::decode(data.variant, anchor)?;
        }
        xdg_positioner::Request::SetGravity { gravity } => {
            state.gravity = Edges::decode(data.variant, gravity)?;
        }
        xdg_positioner::Request::SetConstraintAdjustment { constraint_adjustment } => {
            state.constraint_adjustment = ConstraintAdjustment::from_bits_truncate(constraint_adjustment);
        }
        xdg_positioner::Request::SetOffset { x, y } => {
            state.offset = (x, y).into();
        }
        xdg_positioner::Request::SetReactive => {
            state.reactive = true;
        }
        xdg_positioner::Request::SetParentSize {
            parent_width,
            parent_height,
        } => {
            if parent_width < 0 || parent_height < 0 {
                return Err(PositionerError::InvalidSize {
                    width: parent_width,
                    height: parent_height,
                });
            }
            state.parent_size = Some((parent_width, parent_height).into());
        }
        xdg_positioner::Request::SetParentConfigure { serial } => {
            state.parent_configure = Some(Serial::from(serial));
        }
        xdg_positioner::Request::Destroy => {
            // handled by destructor
        }
    }
    Ok(())
}
