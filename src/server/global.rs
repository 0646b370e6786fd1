use std::{any::Any, sync::Mutex};

use super::ObjectId;

pub(crate) struct GlobalEntry {
    pub(crate) interface: &'static str,
    pub(crate) version: u32,
    pub(crate) disabled: bool,
    pub(crate) bound: Vec<ObjectId>,
    // an `Arc<dyn GlobalHandler<D>>`
    pub(crate) handler: Box<dyn Any + Send + Sync>,
}

/// Information about a global
#[derive(Debug, Clone)]
pub struct GlobalInfo {
    /// Interface of the global
    pub interface: &'static str,
    /// Maximum version advertised for this global
    pub version: u32,
    /// Whether the global was disabled
    pub disabled: bool,
    /// Live objects created by binding this global
    pub bound: Vec<ObjectId>,
}

/// Per-registry bookkeeping of advertised globals
#[derive(Debug, Default)]
pub(crate) struct RegistryData {
    advertised: Mutex<Vec<u32>>,
}

impl RegistryData {
    pub(crate) fn advertise(&self, name: u32) {
        let mut advertised = self.advertised.lock().unwrap();
        if !advertised.contains(&name) {
            advertised.push(name);
        }
    }

    /// Forget about a global, returns whether it had been advertised by this registry
    pub(crate) fn retract(&self, name: u32) -> bool {
        let mut advertised = self.advertised.lock().unwrap();
        let before = advertised.len();
        advertised.retain(|n| *n != name);
        advertised.len() != before
    }
}
