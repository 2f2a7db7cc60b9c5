//! The router: hands a decoded envelope to the handler registered for it.

use crate::{Envelope, Registry, RouteError};

/// Dispatches envelopes to the handlers of a finished [`Registry`].
///
/// The router takes ownership of the registry, so the set of handlers is
/// frozen once routing starts. New event types are added by registering
/// them, never by touching the router.
///
/// Every [`RouteError`] is recoverable: the caller reports it and keeps the
/// connection open. Older peers must survive newer peers sending event
/// types they have never heard of.
pub struct Router<C> {
    registry: Registry<C>,
}

impl<C> Router<C> {
    /// Freezes `registry` into a router.
    pub fn new(registry: Registry<C>) -> Self {
        Self { registry }
    }

    /// Routes one envelope into `ctx`.
    ///
    /// On success the matching handler has run exactly once, before this
    /// call returns. `ctx` is borrowed mutably for the whole call, so a
    /// context can't be dispatched into twice at the same time.
    ///
    /// # Errors
    /// - [`RouteError::Malformed`] — empty `type`
    /// - [`RouteError::Unsupported`] — no handler for `type`
    /// - [`RouteError::PayloadShape`] — payload doesn't fit the schema
    /// - [`RouteError::Handler`] — the handler itself failed
    ///
    /// In the first three cases no handler runs and `ctx` is untouched.
    pub fn route(&self, envelope: &Envelope, ctx: &mut C) -> Result<(), RouteError> {
        let tag = envelope.event_type.as_str();
        if tag.is_empty() {
            return Err(RouteError::Malformed);
        }

        let handler = self
            .registry
            .get(tag)
            .ok_or_else(|| RouteError::Unsupported(tag.to_string()))?;

        tracing::trace!(tag, "routing envelope");
        handler(ctx, envelope)
    }

    /// Returns `true` if `tag` has a handler.
    pub fn handles(&self, tag: &str) -> bool {
        self.registry.contains(tag)
    }

    /// The registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        self.registry.tags()
    }
}

#[cfg(test)]
mod tests {
    //! Router behaviour against a small recording context.

    use serde_json::json;

    use super::*;
    use crate::{ChangeRoomEvent, HandlerError, Identity, NewMessageEvent, RoomName};

    #[derive(Debug, Default, PartialEq)]
    struct Ctx {
        room: Option<RoomName>,
        shown: Vec<NewMessageEvent>,
    }

    fn router() -> Router<Ctx> {
        let mut registry = Registry::new();
        registry
            .register(|ctx: &mut Ctx, ev: NewMessageEvent| {
                ctx.shown.push(ev);
                Ok(())
            })
            .unwrap()
            .register(|ctx: &mut Ctx, ev: ChangeRoomEvent| {
                if ev.name.as_str() == "forbidden" {
                    return Err(HandlerError::new("room is closed"));
                }
                ctx.room = Some(ev.name);
                Ok(())
            })
            .unwrap();
        Router::new(registry)
    }

    fn new_message(text: &str) -> Envelope {
        Envelope::new(
            "new_message",
            Some(json!({"message": text, "from": "bob", "sent": 1_700_000_000_000u64})),
        )
    }

    #[test]
    fn test_route_registered_type_runs_handler_once() {
        let router = router();
        let mut ctx = Ctx::default();

        router.route(&new_message("hi"), &mut ctx).unwrap();

        assert_eq!(
            ctx.shown,
            vec![NewMessageEvent {
                message: "hi".into(),
                from: Identity::from("bob"),
                sent: 1_700_000_000_000,
            }]
        );
    }

    #[test]
    fn test_route_empty_type_is_malformed() {
        let router = router();
        let mut ctx = Ctx::default();

        let err = router.route(&Envelope::new("", None), &mut ctx).unwrap_err();

        assert_eq!(err, RouteError::Malformed);
        assert_eq!(ctx, Ctx::default());
    }

    #[test]
    fn test_route_unknown_type_leaves_ctx_unchanged() {
        let router = router();
        let mut ctx = Ctx {
            room: Some(RoomName::from("general")),
            shown: vec![],
        };

        let err = router
            .route(&Envelope::new("unknown_x", None), &mut ctx)
            .unwrap_err();

        assert_eq!(err, RouteError::Unsupported("unknown_x".into()));
        assert_eq!(ctx.room, Some(RoomName::from("general")));
        assert!(ctx.shown.is_empty());
    }

    #[test]
    fn test_route_continues_after_unknown_type() {
        let router = router();
        let mut ctx = Ctx::default();

        assert!(router.route(&Envelope::new("unknown_x", None), &mut ctx).is_err());
        router.route(&new_message("still here"), &mut ctx).unwrap();

        assert_eq!(ctx.shown.len(), 1);
        assert_eq!(ctx.shown[0].message, "still here");
    }

    #[test]
    fn test_route_missing_field_is_payload_shape_error() {
        let router = router();
        let mut ctx = Ctx::default();
        let envelope = Envelope::new("new_message", Some(json!({"message": "hi", "from": "bob"})));

        let err = router.route(&envelope, &mut ctx).unwrap_err();

        assert!(matches!(err, RouteError::PayloadShape { ref tag, .. } if tag == "new_message"));
        assert!(ctx.shown.is_empty());
    }

    #[test]
    fn test_route_wrong_kind_is_payload_shape_error() {
        let router = router();
        let mut ctx = Ctx::default();
        let envelope = Envelope::new("change_room", Some(json!({"name": 42})));

        let err = router.route(&envelope, &mut ctx).unwrap_err();

        assert!(matches!(err, RouteError::PayloadShape { .. }));
    }

    #[test]
    fn test_route_validation_failure_is_payload_shape_error() {
        let router = router();
        let mut ctx = Ctx::default();
        let envelope = Envelope::new("change_room", Some(json!({"name": ""})));

        let err = router.route(&envelope, &mut ctx).unwrap_err();

        assert!(matches!(err, RouteError::PayloadShape { .. }));
        assert_eq!(ctx.room, None);
    }

    #[test]
    fn test_route_handler_error_is_reported() {
        let router = router();
        let mut ctx = Ctx::default();
        let envelope = Envelope::new("change_room", Some(json!({"name": "forbidden"})));

        let err = router.route(&envelope, &mut ctx).unwrap_err();

        assert_eq!(
            err,
            RouteError::Handler {
                tag: "change_room".into(),
                reason: "room is closed".into(),
            }
        );
    }

    #[test]
    fn test_router_reports_tags() {
        let router = router();
        assert!(router.handles("change_room"));
        assert!(!router.handles("send_message"));
        assert_eq!(router.tags(), vec!["change_room", "new_message"]);
    }
}
