//! Wire protocol types shared by the wharf core crates.
//!
//! Field names on the REST and socket surfaces are frozen for
//! compatibility with the SPA front end; every payload struct here is
//! the single source of truth for its JSON shape.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

pub use constants::MessageType;
pub use envelope::Envelope;
pub use types::{Job, JobKind, JobState, JobUpdate};
