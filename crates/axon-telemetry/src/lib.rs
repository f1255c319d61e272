//! Per-turn telemetry: event assembly with exactly-once guards, a
//! request-scoped context, and a fire-and-forget batch forwarder.
//!
//! Telemetry must never impede the user path — forwarding failures are
//! logged and dropped, with no retry loop.

pub mod context;
pub mod emitter;
pub mod events;

pub use context::TurnContext;
pub use emitter::TelemetryEmitter;
pub use events::{EventType, TelemetryEvent};
