//! Shared entities, error taxonomy, signal bus, and adapter contract for
//! the messaging fabric.

pub mod adapter;
pub mod entities;
pub mod error;
pub mod health;
pub mod logging;
pub mod signals;
pub mod warning;

pub use adapter::{BridgeAdapter, Capability, Incoming, ParsedEvent, SendResult};
pub use entities::{
    BindingDirection, BridgeConfig, Channel, ContentBlock, DeadLetter, DeadLetterDiagnostics,
    DeliveryMode, FailoverPolicy, Identity, Message, MessageRole, MessageStatus, OnboardingFlow,
    OnboardingStatus, OnboardingTransition, Participant, ParticipantType, Presence, Receipt,
    ReplayState, ReplayStatus, Room, RoomBinding, RoomType, RoutingPolicy, SessionKey,
    SessionRoute, SessionRouteEntry,
};
pub use error::{FabricError, Reason, Result};
pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use signals::{Measurements, Metadata, Signal, SignalBus, SignalHandler, TracingSignalHandler};
pub use warning::{Warning, WarningCategory, WarningService, WarningServiceConfig, WarningSeverity};
