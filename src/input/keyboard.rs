//! Keyboard-related types of the input abstraction

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use tracing::{debug, info_span, instrument, trace};

use crate::{
    input::{SeatHandler, SurfaceFocus, WeakSeat},
    protocol::{
        wl_keyboard::{self, KeyState, WlKeyboard},
        wl_surface::WlSurface,
    },
    server::Resource,
    utils::Serial,
};

/// Configuration of a keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardConfig {
    /// Number of repeated characters per second
    pub repeat_rate: i32,
    /// Delay in milliseconds before a held key starts repeating
    pub repeat_delay: i32,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        KeyboardConfig {
            repeat_rate: 25,
            repeat_delay: 200,
        }
    }
}

/// Serialized state of the keyboard modifiers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModifiersState {
    /// Modifiers currently held down
    pub depressed: u32,
    /// Modifiers latched until the next key press
    pub latched: u32,
    /// Locked modifiers
    pub locked: u32,
    /// Active keyboard layout
    pub group: u32,
}

struct KbdInternal {
    known_kbds: Vec<Resource<WlKeyboard>>,
    focus: Option<SurfaceFocus>,
    pressed_keys: Vec<u32>,
    mods_state: ModifiersState,
    repeat_rate: i32,
    repeat_delay: i32,
}

impl fmt::Debug for KbdInternal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KbdInternal")
            .field("known_kbds", &self.known_kbds)
            .field("focus", &self.focus)
            .field("pressed_keys", &self.pressed_keys)
            .field("mods_state", &self.mods_state)
            .field("repeat_rate", &self.repeat_rate)
            .field("repeat_delay", &self.repeat_delay)
            .finish()
    }
}

impl KbdInternal {
    fn focused_surface(&self) -> Option<Resource<WlSurface>> {
        self.focus.as_ref().and_then(SurfaceFocus::surface)
    }

    fn with_focused_kbds(&mut self, surface: &Resource<WlSurface>, mut f: impl FnMut(&Resource<WlKeyboard>)) {
        self.known_kbds.retain(|kbd| kbd.is_alive());
        for kbd in self
            .known_kbds
            .iter()
            .filter(|kbd| kbd.client_id() == surface.client_id())
        {
            f(kbd);
        }
    }

    fn send_modifiers(&mut self, surface: &Resource<WlSurface>, serial: Serial) {
        let mods = self.mods_state;
        self.with_focused_kbds(surface, |kbd| {
            kbd.send_event(wl_keyboard::Event::Modifiers {
                serial: serial.into(),
                mods_depressed: mods.depressed,
                mods_latched: mods.latched,
                mods_locked: mods.locked,
                group: mods.group,
            })
        });
    }
}

/// An handle to a keyboard handler
///
/// It can be cloned and all clones manipulate the same internal state.
///
/// This handle gives you 2 main ways to interact with the keyboard handling:
///
/// - set the current focus for this keyboard: designing the surface that will receive the key inputs
///   using the [`KeyboardHandle::set_focus`] method.
/// - process key inputs from the input backend, using [`KeyboardHandle::input`].
pub struct KeyboardHandle<D: SeatHandler> {
    arc: Arc<KbdRc>,
    seat: WeakSeat<D>,
}

struct KbdRc {
    internal: Mutex<KbdInternal>,
    span: tracing::Span,
}

impl<D: SeatHandler> fmt::Debug for KeyboardHandle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyboardHandle")
            .field("internal", &self.arc.internal)
            .finish()
    }
}

impl<D: SeatHandler> Clone for KeyboardHandle<D> {
    #[inline]
    fn clone(&self) -> Self {
        KeyboardHandle {
            arc: self.arc.clone(),
            seat: self.seat.clone(),
        }
    }
}

impl<D: SeatHandler> PartialEq for KeyboardHandle<D> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.arc, &other.arc)
    }
}

impl<D: SeatHandler + 'static> KeyboardHandle<D> {
    pub(crate) fn new(seat: WeakSeat<D>, config: KeyboardConfig) -> Self {
        KeyboardHandle {
            arc: Arc::new(KbdRc {
                internal: Mutex::new(KbdInternal {
                    known_kbds: Vec::new(),
                    focus: None,
                    pressed_keys: Vec::new(),
                    mods_state: ModifiersState::default(),
                    repeat_rate: config.repeat_rate,
                    repeat_delay: config.repeat_delay,
                }),
                span: info_span!("input_keyboard"),
            }),
            seat,
        }
    }

    /// Set the current focus of this keyboard
    ///
    /// If the new focus is different from the previous one, any previous focus
    /// will be sent a [`wl_keyboard::Event::Leave`] event, and if the new focus is not `None`,
    /// a [`wl_keyboard::Event::Enter`] event will be sent, followed by the current modifiers.
    /// [`SeatHandler::focus_changed`] is notified of every change.
    #[instrument(level = "debug", parent = &self.arc.span, skip(self, data, focus), fields(focus = focus.is_some()))]
    pub fn set_focus(&self, data: &mut D, focus: Option<Resource<WlSurface>>) {
        let Some(seat) = self.seat.upgrade() else {
            return;
        };
        {
            let mut guard = self.arc.internal.lock().unwrap();
            let old = guard.focused_surface();
            if old == focus {
                trace!("Focus unchanged");
                return;
            }

            if let Some(old) = old {
                let serial = seat.serial_for(Some(&old));
                guard.with_focused_kbds(&old, |kbd| {
                    kbd.send_event(wl_keyboard::Event::Leave {
                        serial: serial.into(),
                        surface: old.clone(),
                    })
                });
            }
            guard.focus = None;

            if let Some(surface) = focus.as_ref() {
                let serial = seat.serial_for(Some(surface));
                let keys = guard.pressed_keys.clone();
                guard.with_focused_kbds(surface, |kbd| {
                    kbd.send_event(wl_keyboard::Event::Enter {
                        serial: serial.into(),
                        surface: surface.clone(),
                        keys: keys.clone(),
                    })
                });
                guard.send_modifiers(surface, serial);
                guard.focus = Some(SurfaceFocus::new(surface, serial, (0, 0).into()));
                trace!(?surface, ?serial, "Focus set to new surface");
            } else {
                trace!("Focus unset");
            }
        }
        data.focus_changed(&seat, focus.as_ref());
    }

    /// Handle a keystroke
    ///
    /// The key is forwarded to the focused client, if any. The pressed state of the keys is
    /// tracked so that a newly focused client learns which keys are held. Returns the serial
    /// of the key event.
    #[instrument(level = "trace", parent = &self.arc.span, skip(self, _data))]
    pub fn input(&self, _data: &mut D, keycode: u32, state: KeyState, time: u32) -> Serial {
        let mut guard = self.arc.internal.lock().unwrap();
        match state {
            KeyState::Pressed => {
                if !guard.pressed_keys.contains(&keycode) {
                    guard.pressed_keys.push(keycode);
                }
            }
            KeyState::Released => guard.pressed_keys.retain(|k| *k != keycode),
        }

        let focus = guard.focused_surface();
        let serial = match self.seat.upgrade() {
            Some(seat) => seat.serial_for(focus.as_ref()),
            None => return Serial::from(0),
        };
        if let Some(surface) = focus {
            guard.with_focused_kbds(&surface, |kbd| {
                kbd.send_event(wl_keyboard::Event::Key {
                    serial: serial.into(),
                    time,
                    key: keycode,
                    state,
                })
            });
        } else {
            debug!(keycode, "No client currently focused");
        }
        serial
    }

    /// Update the state of the modifiers and forward it to the focused client
    pub fn set_modifiers(&self, mods_state: ModifiersState) {
        let mut guard = self.arc.internal.lock().unwrap();
        if guard.mods_state == mods_state {
            return;
        }
        guard.mods_state = mods_state;
        if let (Some(surface), Some(seat)) = (guard.focused_surface(), self.seat.upgrade()) {
            let serial = seat.serial_for(Some(&surface));
            guard.send_modifiers(&surface, serial);
        }
    }

    /// Return the key codes of the currently pressed keys.
    pub fn pressed_keys(&self) -> Vec<u32> {
        self.arc.internal.lock().unwrap().pressed_keys.clone()
    }

    /// Retrieve the current keyboard focus
    pub fn current_focus(&self) -> Option<Resource<WlSurface>> {
        self.arc.internal.lock().unwrap().focused_surface()
    }

    /// Check if the client owning this surface has the keyboard focus
    pub fn has_focus(&self, surface: &Resource<WlSurface>) -> bool {
        self.current_focus()
            .map(|focus| focus.client_id() == surface.client_id())
            .unwrap_or(false)
    }

    /// Access the [`Serial`] of the last `keyboard_enter` event, if that focus is still active.
    pub fn last_enter(&self) -> Option<Serial> {
        let guard = self.arc.internal.lock().unwrap();
        guard
            .focus
            .as_ref()
            .filter(|focus| focus.surface().is_some())
            .map(|focus| focus.serial)
    }

    /// Register a new `wl_keyboard` object for this keyboard
    ///
    /// The object is sent the repeat info and, if its client has the focus, an `enter` event
    /// followed by the modifiers.
    pub(crate) fn new_kbd(&self, kbd: Resource<WlKeyboard>) {
        let mut guard = self.arc.internal.lock().unwrap();
        if kbd.version() >= 4 {
            kbd.send_event(wl_keyboard::Event::RepeatInfo {
                rate: guard.repeat_rate,
                delay: guard.repeat_delay,
            });
        }
        if let Some(focus) = guard.focus.as_ref() {
            if let Some(surface) = focus.surface().filter(|s| s.client_id() == kbd.client_id()) {
                let serial = focus.serial;
                let mods = guard.mods_state;
                kbd.send_event(wl_keyboard::Event::Enter {
                    serial: serial.into(),
                    surface,
                    keys: guard.pressed_keys.clone(),
                });
                kbd.send_event(wl_keyboard::Event::Modifiers {
                    serial: serial.into(),
                    mods_depressed: mods.depressed,
                    mods_latched: mods.latched,
                    mods_locked: mods.locked,
                    group: mods.group,
                });
            }
        }
        guard.known_kbds.push(kbd);
    }

    pub(crate) fn remove_kbd(&self, kbd: &Resource<WlKeyboard>) {
        self.arc.internal.lock().unwrap().known_kbds.retain(|k| k != kbd);
    }
}
