//! Plain data shared by the eventual-send runtime: identities, operation
//! kinds, settlement states, registry snapshots and the error type.

pub(crate) mod error;
pub(crate) mod primitives;
pub(crate) mod snapshot;

pub use self::error::*;
pub use self::primitives::*;
pub use self::snapshot::*;
