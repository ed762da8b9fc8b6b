//! Name → decoder table.
//!
//! One topic carries many event kinds. The registry turns the wire name and
//! payload back into a typed event without any runtime reflection: each
//! registered type contributes a monomorphised decode function.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use super::{
    BucketPurge, Event, FolderPurge, FolderRestore, FolderTrash, HandlerContext, ObjectDeletion,
    Outcome, TrashExpiration,
};
use crate::errors::{CascadeError, RegistryError};
use crate::messaging::Message;

/// Type-erased event ready to run.
#[async_trait]
pub trait DynEvent: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError>;
}

#[async_trait]
impl<E: Event> DynEvent for E {
    fn name(&self) -> &'static str {
        E::NAME
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<Outcome, CascadeError> {
        Event::handle(self, ctx).await
    }
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn DynEvent>, serde_json::Error>;

fn decode_as<E: Event>(payload: &[u8]) -> Result<Box<dyn DynEvent>, serde_json::Error> {
    Ok(Box::new(serde_json::from_slice::<E>(payload)?))
}

#[derive(Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every cascade this service handles.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry
            .register::<BucketPurge>()
            .register::<FolderTrash>()
            .register::<FolderRestore>()
            .register::<FolderPurge>()
            .register::<ObjectDeletion>()
            .register::<TrashExpiration>();
        registry
    }

    pub fn register<E: Event>(&mut self) -> &mut Self {
        self.decoders.insert(E::NAME, decode_as::<E> as DecodeFn);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    /// Rebuild the typed event a message carries.
    pub fn decode(&self, message: &Message) -> Result<Box<dyn DynEvent>, RegistryError> {
        let decode = self
            .decoders
            .get(message.kind.as_str())
            .ok_or_else(|| RegistryError::UnknownType(message.kind.clone()))?;
        decode(&message.payload).map_err(|source| RegistryError::Decode {
            kind: message.kind.clone(),
            source,
        })
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("EventRegistry").field("events", &names).finish()
    }
}
