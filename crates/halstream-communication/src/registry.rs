//! Registry of running controllers keyed by connection ident.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::service::ControllerHandle;

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: RwLock<HashMap<String, ControllerHandle>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller, returning the one it replaced
    pub fn register(&self, handle: ControllerHandle) -> Option<ControllerHandle> {
        tracing::debug!("Registering controller {}", handle.ident());
        self.controllers
            .write()
            .insert(handle.ident().to_string(), handle)
    }

    pub fn get(&self, ident: &str) -> Option<ControllerHandle> {
        self.controllers.read().get(ident).cloned()
    }

    pub fn remove(&self, ident: &str) -> Option<ControllerHandle> {
        self.controllers.write().remove(ident)
    }

    /// Remove `ident` only if it still belongs to the task `id`
    pub fn deregister(&self, ident: &str, id: Uuid) -> bool {
        let mut controllers = self.controllers.write();
        if controllers.get(ident).is_some_and(|handle| handle.id() == id) {
            controllers.remove(ident);
            tracing::debug!("Deregistered controller {}", ident);
            return true;
        }
        false
    }

    /// Registered idents, sorted
    pub fn idents(&self) -> Vec<String> {
        let mut idents: Vec<String> = self.controllers.read().keys().cloned().collect();
        idents.sort();
        idents
    }

    pub fn len(&self) -> usize {
        self.controllers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.read().is_empty()
    }
}
