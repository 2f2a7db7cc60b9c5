//! Event registry: which handler runs for which `type` tag.
//!
//! Handlers are registered against an [`Event`] type, which fixes both the
//! tag and the payload schema. Internally each handler is stored
//! type-erased, wrapped in the decode-and-validate step for its event.

use std::collections::HashMap;

use crate::{Envelope, Event, HandlerError, RegistryError, RouteError};

/// A type-erased handler: coerce the payload, then run the user handler.
pub(crate) type ErasedHandler<C> =
    Box<dyn Fn(&mut C, &Envelope) -> Result<(), RouteError> + Send + Sync>;

/// Maps event type tags to handlers operating on a context `C`.
///
/// `C` is whatever per-connection state the handlers need: the client
/// session on one end, the server-side connection context on the other.
///
/// ## Example
///
/// ```rust
/// use chatwire_protocol::{ChangeRoomEvent, Registry, RegistryError, RoomName};
///
/// #[derive(Default)]
/// struct Ctx { room: Option<RoomName> }
///
/// let mut registry = Registry::<Ctx>::new();
/// registry.register(|ctx: &mut Ctx, ev: ChangeRoomEvent| {
///     ctx.room = Some(ev.name);
///     Ok(())
/// })?;
///
/// // A second handler for the same tag is refused.
/// let again = registry.register(|_: &mut Ctx, _: ChangeRoomEvent| Ok(()));
/// assert!(matches!(again, Err(RegistryError::Duplicate(_))));
/// # Ok::<(), RegistryError>(())
/// ```
pub struct Registry<C> {
    handlers: HashMap<String, ErasedHandler<C>>,
}

impl<C> Registry<C> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for events of type `E` under [`Event::TYPE`].
    ///
    /// # Errors
    /// [`RegistryError::Duplicate`] if the tag already has a handler.
    pub fn register<E, F>(&mut self, handler: F) -> Result<&mut Self, RegistryError>
    where
        E: Event,
        F: Fn(&mut C, E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register_as(E::TYPE, handler)
    }

    /// Registers `handler` for payloads of type `E` under an explicit tag.
    ///
    /// # Errors
    /// [`RegistryError::EmptyTag`] for `""`, [`RegistryError::Duplicate`]
    /// if the tag already has a handler.
    pub fn register_as<E, F>(&mut self, tag: &str, handler: F) -> Result<&mut Self, RegistryError>
    where
        E: Event,
        F: Fn(&mut C, E) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        if tag.is_empty() {
            return Err(RegistryError::EmptyTag);
        }
        if self.handlers.contains_key(tag) {
            return Err(RegistryError::Duplicate(tag.to_string()));
        }

        let owned_tag = tag.to_string();
        let erased: ErasedHandler<C> = Box::new(move |ctx: &mut C, envelope: &Envelope| {
            let event: E = envelope
                .payload_as()
                .map_err(|e| RouteError::PayloadShape {
                    tag: owned_tag.clone(),
                    reason: e.to_string(),
                })?;
            event.validate().map_err(|reason| RouteError::PayloadShape {
                tag: owned_tag.clone(),
                reason,
            })?;
            handler(ctx, event).map_err(|e| RouteError::Handler {
                tag: owned_tag.clone(),
                reason: e.to_string(),
            })
        });

        self.handlers.insert(tag.to_string(), erased);
        tracing::debug!(tag, "event handler registered");
        Ok(self)
    }

    /// Returns `true` if a handler is registered for `tag` (exact match).
    pub fn contains(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn get(&self, tag: &str) -> Option<&ErasedHandler<C>> {
        self.handlers.get(tag)
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
