//! Message parsing, validation and routing.

pub mod router;
pub mod types;

pub use router::{
    parse_client_message, route_client_message, ParsedMessage, RouteOutcome, SessionContext,
};
pub use types::{MessageKind, PositionUpdate, DEFAULT_COLOR, DEFAULT_NAME, POSITION_KIND};
