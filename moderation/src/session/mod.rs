//! Live session: transcript state, upstream connection, cycle scheduling
//! and the consumer-facing event stream.

pub mod connection;
pub mod dialogue;
pub mod events;
pub mod machine;
pub mod registry;
pub mod state;
pub mod upstream;

pub use connection::{ConnectionMachine, ConnectionState, IllegalTransition, ReconnectPolicy};
pub use dialogue::{DialogueGenerator, DialogueLine};
pub use events::{
    ControlMessage, InterventionPayload, SessionEvent, SpeakerShare, SpeakerStats, SttStatus,
    UpstreamError, UpstreamEvent,
};
pub use machine::{SessionBuilder, SessionClosed, SessionHandle, DIALOGUE_UNAVAILABLE};
pub use registry::{RegistryError, SessionRegistry, SessionStatus, SessionSummary};
pub use state::{SessionRecord, SessionState};
pub use upstream::{TranscriptionSource, UpstreamSink};
