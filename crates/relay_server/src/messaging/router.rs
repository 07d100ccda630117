//! Validation and routing of inbound client frames.
//!
//! A frame is parsed as a JSON object, checked for the fields its kind
//! requires, normalized (defaults filled in), and handed to the registry for
//! fan-out. Bad frames produce an error for the caller to log; they never
//! close the connection.

use super::types::{MessageKind, PositionUpdate, DEFAULT_COLOR, DEFAULT_NAME, POSITION_KIND};
use crate::config::IdentityPolicy;
use crate::connection::{BroadcastReport, ConnectionId, ConnectionRegistry};
use crate::error::RelayError;
use serde_json::{Map, Number, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Fields a position update must carry.
const REQUIRED_POSITION_FIELDS: [&str; 4] = ["id", "x", "y", "z"];

/// Result of parsing a frame that is structurally valid.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// A complete, normalized position update
    Position(PositionUpdate),
    /// A JSON object with a `type` the relay does not act on
    Unhandled(String),
}

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The update was fanned out
    Relayed(BroadcastReport),
    /// The frame had an unknown `type` and was dropped
    Ignored(String),
}

/// Per-connection state consulted by the router.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The connection the frames arrive on
    pub connection_id: ConnectionId,
    identity_policy: IdentityPolicy,
    bound_identity: Option<String>,
}

impl SessionContext {
    /// Creates the context for a freshly registered connection.
    ///
    /// # Arguments
    ///
    /// * `connection_id` - Registry identifier of the connection
    /// * `identity_policy` - How the `id` field of its updates is checked
    pub fn new(connection_id: ConnectionId, identity_policy: IdentityPolicy) -> Self {
        Self {
            connection_id,
            identity_policy,
            bound_identity: None,
        }
    }

    /// The `id` this connection is bound to, if the policy binds and a valid
    /// update has been seen.
    pub fn bound_identity(&self) -> Option<&str> {
        self.bound_identity.as_deref()
    }

    fn check_identity(&mut self, claimed: &str) -> Result<(), RelayError> {
        if self.identity_policy == IdentityPolicy::Trust {
            return Ok(());
        }
        match &self.bound_identity {
            None => {
                debug!(
                    connection_id = self.connection_id,
                    identity = claimed,
                    "Binding identity to connection"
                );
                self.bound_identity = Some(claimed.to_string());
                Ok(())
            }
            Some(bound) if bound == claimed => Ok(()),
            Some(bound) => Err(RelayError::IdentityMismatch {
                bound: bound.clone(),
                claimed: claimed.to_string(),
            }),
        }
    }
}

/// Parses and validates a raw text frame.
///
/// # Errors
///
/// * `RelayError::Parse` - not JSON, or not a JSON object
/// * `RelayError::Schema` - `type` missing, or a position update missing (or
///   mistyping) `id`, `x`, `y` or `z`
///
/// A non-string `name` or `color` is replaced by its default rather than
/// rejected.
///
/// # Examples
///
/// ```
/// use relay_server::messaging::{parse_client_message, ParsedMessage};
///
/// let parsed = parse_client_message(r#"{"type":"pos","id":"a1","x":1,"y":2,"z":3}"#).unwrap();
/// let ParsedMessage::Position(update) = parsed else { panic!("expected a position") };
/// assert_eq!(update.name, "Player");
/// assert_eq!(update.color, "#3498db");
///
/// assert!(parse_client_message(r#"{"type":"pos","id":"a1"}"#).is_err());
/// ```
pub fn parse_client_message(text: &str) -> Result<ParsedMessage, RelayError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::Parse(format!("Invalid JSON: {e}")))?;
    let Value::Object(mut fields) = value else {
        return Err(RelayError::Parse("expected a JSON object".to_string()));
    };

    let kind = match fields.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(RelayError::Schema(format!(
                "field 'type' must be a string, got {other}"
            )))
        }
        None => return Err(RelayError::Schema("missing field 'type'".to_string())),
    };
    if kind != POSITION_KIND {
        return Ok(ParsedMessage::Unhandled(kind));
    }

    let missing: Vec<&str> = REQUIRED_POSITION_FIELDS
        .into_iter()
        .filter(|field| !fields.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(RelayError::Schema(format!(
            "position update missing required field(s): {}",
            missing.join(", ")
        )));
    }

    let id = match fields.remove("id") {
        Some(Value::String(id)) => id,
        _ => return Err(RelayError::Schema("field 'id' must be a string".to_string())),
    };

    Ok(ParsedMessage::Position(PositionUpdate {
        kind: MessageKind::Position,
        id,
        x: number_field(&mut fields, "x")?,
        y: number_field(&mut fields, "y")?,
        z: number_field(&mut fields, "z")?,
        name: string_field_or(&mut fields, "name", DEFAULT_NAME),
        color: string_field_or(&mut fields, "color", DEFAULT_COLOR),
    }))
}

fn number_field(fields: &mut Map<String, Value>, key: &str) -> Result<Number, RelayError> {
    match fields.remove(key) {
        Some(Value::Number(n)) => Ok(n),
        _ => Err(RelayError::Schema(format!("field '{key}' must be a number"))),
    }
}

fn string_field_or(fields: &mut Map<String, Value>, key: &str, default: &str) -> String {
    match fields.remove(key) {
        Some(Value::String(s)) => s,
        _ => default.to_string(),
    }
}

/// Routes a raw client frame: validate, normalize, fan out.
///
/// # Arguments
///
/// * `text` - The raw frame text
/// * `session` - State of the connection the frame arrived on
/// * `registry` - Registry used for the fan-out
///
/// # Returns
///
/// The [`RouteOutcome`], or the error that caused the frame to be discarded.
/// Errors never affect the connection itself.
///
/// # Errors
///
/// * `RelayError::Parse` / `RelayError::Schema` - see [`parse_client_message`]
/// * `RelayError::IdentityMismatch` - the session is bound to another `id`
/// * `RelayError::Serialization` - the normalized update could not be encoded
///
/// # Examples
///
/// ```
/// use relay_server::messaging::{route_client_message, RouteOutcome, SessionContext};
/// use relay_server::{ConnectionRegistry, IdentityPolicy};
///
/// let registry = ConnectionRegistry::new(0, 16);
/// let addr = "127.0.0.1:4000".parse().unwrap();
/// let sender = registry.register(addr).unwrap();
/// let _peer = registry.register(addr).unwrap();
///
/// let mut session = SessionContext::new(sender.id, IdentityPolicy::Trust);
/// let outcome = route_client_message(
///     r#"{"type":"pos","id":"a1","x":1,"y":2,"z":3}"#,
///     &mut session,
///     &registry,
/// )
/// .unwrap();
/// assert!(matches!(outcome, RouteOutcome::Relayed(report) if report.delivered == 1));
/// ```
pub fn route_client_message(
    text: &str,
    session: &mut SessionContext,
    registry: &ConnectionRegistry,
) -> Result<RouteOutcome, RelayError> {
    let update = match parse_client_message(text)? {
        ParsedMessage::Position(update) => update,
        ParsedMessage::Unhandled(kind) => return Ok(RouteOutcome::Ignored(kind)),
    };

    session.check_identity(&update.id)?;

    let payload = update.to_json()?;
    let report = registry.broadcast_except(session.connection_id, &Message::text(payload));

    debug!(
        connection_id = session.connection_id,
        entity = %update.id,
        delivered = report.delivered,
        evicted = report.evicted.len(),
        "📨 Relayed position update"
    );
    Ok(RouteOutcome::Relayed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn received(msg: Message) -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_fills_defaults() {
        let parsed = parse_client_message(r#"{"type":"pos","id":"a1","x":1,"y":2,"z":3}"#).unwrap();
        let ParsedMessage::Position(update) = parsed else {
            panic!("expected a position update");
        };
        assert_eq!(update.name, "Player");
        assert_eq!(update.color, "#3498db");
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"type":"pos","id":"a1","name":"Player","x":1,"y":2,"z":3,"color":"#3498db"})
        );
    }

    #[test]
    fn test_parse_keeps_supplied_optionals() {
        let parsed = parse_client_message(
            r##"{"type":"pos","id":"a","name":"Zed","x":0.5,"y":0,"z":-1,"color":"#00ff00"}"##,
        )
        .unwrap();
        let ParsedMessage::Position(update) = parsed else {
            panic!("expected a position update");
        };
        assert_eq!(update.name, "Zed");
        assert_eq!(update.color, "#00ff00");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_client_message(r#"{"type":"pos","id":"a1","x":1"#),
            Err(RelayError::Parse(_))
        ));
        assert!(matches!(
            parse_client_message("[1,2,3]"),
            Err(RelayError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_reports_each_missing_field() {
        for field in ["id", "x", "y", "z"] {
            let mut value = json!({"type":"pos","id":"a1","x":1,"y":2,"z":3});
            value.as_object_mut().unwrap().remove(field);
            let err = parse_client_message(&value.to_string()).unwrap_err();
            match err {
                RelayError::Schema(message) => assert!(message.contains(field)),
                other => panic!("expected schema error for missing {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_missing_type_is_schema_error() {
        assert!(matches!(
            parse_client_message(r#"{"id":"a1","x":1,"y":2,"z":3}"#),
            Err(RelayError::Schema(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_numeric_coordinate() {
        assert!(matches!(
            parse_client_message(r#"{"type":"pos","id":"a1","x":"1","y":2,"z":3}"#),
            Err(RelayError::Schema(_))
        ));
    }

    #[test]
    fn test_parse_unknown_kind_is_unhandled() {
        assert_eq!(
            parse_client_message(r#"{"type":"chat","text":"hi"}"#).unwrap(),
            ParsedMessage::Unhandled("chat".to_string())
        );
    }

    #[test]
    fn test_route_relays_to_others_only() {
        let registry = ConnectionRegistry::new(0, 8);
        let mut a = registry.register(addr()).unwrap();
        let mut b = registry.register(addr()).unwrap();
        let mut c = registry.register(addr()).unwrap();

        let mut session = SessionContext::new(a.id, IdentityPolicy::Trust);
        let outcome = route_client_message(
            r#"{"type":"pos","id":"a1","x":1,"y":2,"z":3}"#,
            &mut session,
            &registry,
        )
        .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Relayed(BroadcastReport {
                delivered: 2,
                evicted: vec![]
            })
        );

        let expected =
            json!({"type":"pos","id":"a1","name":"Player","x":1,"y":2,"z":3,"color":"#3498db"});
        assert_eq!(received(b.outbound.try_recv().unwrap()), expected);
        assert_eq!(received(c.outbound.try_recv().unwrap()), expected);
        assert!(a.outbound.try_recv().is_err());
    }

    #[test]
    fn test_malformed_message_leaves_registry_untouched() {
        let registry = ConnectionRegistry::new(0, 8);
        let a = registry.register(addr()).unwrap();
        let mut b = registry.register(addr()).unwrap();
        let before = {
            let mut ids = registry.ids();
            ids.sort();
            ids
        };

        let mut session = SessionContext::new(a.id, IdentityPolicy::Trust);
        let result = route_client_message(
            r#"{"type":"pos","id":"a1","y":2,"z":3}"#,
            &mut session,
            &registry,
        );
        assert!(matches!(result, Err(RelayError::Schema(_))));

        let mut after = registry.ids();
        after.sort();
        assert_eq!(before, after);
        assert!(b.outbound.try_recv().is_err());
    }

    #[test]
    fn test_bind_first_rejects_identity_switch() {
        let registry = ConnectionRegistry::new(0, 8);
        let a = registry.register(addr()).unwrap();
        let mut b = registry.register(addr()).unwrap();

        let mut session = SessionContext::new(a.id, IdentityPolicy::BindFirst);
        route_client_message(r#"{"type":"pos","id":"a1","x":1,"y":2,"z":3}"#, &mut session, &registry)
            .unwrap();
        assert_eq!(session.bound_identity(), Some("a1"));

        let err = route_client_message(
            r#"{"type":"pos","id":"imposter","x":1,"y":2,"z":3}"#,
            &mut session,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, RelayError::IdentityMismatch { .. }));
        assert!(err.is_message_local());

        // Only the first update reached b.
        assert!(b.outbound.try_recv().is_ok());
        assert!(b.outbound.try_recv().is_err());
    }

    #[test]
    fn test_trust_policy_accepts_any_identity() {
        let registry = ConnectionRegistry::new(0, 8);
        let a = registry.register(addr()).unwrap();
        let mut session = SessionContext::new(a.id, IdentityPolicy::Trust);
        for id in ["one", "two"] {
            let text = json!({"type":"pos","id":id,"x":0,"y":0,"z":0}).to_string();
            assert!(route_client_message(&text, &mut session, &registry).is_ok());
        }
        assert_eq!(session.bound_identity(), None);
    }
}
