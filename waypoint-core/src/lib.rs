//! Waypoint endpoint resolver core.
//! No I/O: payload codec, wire schemas, state merge rules and probe selection.
//! The host drives the network and storage.

pub mod codec;
pub mod protocol;
pub mod select;
pub mod state;

pub use codec::CodecError;
pub use protocol::{Advert, CloudSource, DecodedConfig, DomainReport, PayloadError, RequestEnvelope};
pub use select::{fastest, rank_reachable, ProbeOutcome};
pub use state::{AdDescriptor, AdPatch, PersistedState, StateError};
