//! Strongly-typed row identifiers.
//!
//! Every entity id wraps the underlying `i64` so that ids of different
//! entities cannot be mixed up at call sites. Converted to `i64` only at
//! the persistence boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_newtype!(OrganizationId);
id_newtype!(
    /// The authenticated member performing a transition. Supplied by the
    /// identity collaborator; recorded on every ledger append, never
    /// authenticated here.
    ActorId
);
id_newtype!(StageId);
id_newtype!(StatusEventId);
id_newtype!(OrderId);
id_newtype!(TripId);
id_newtype!(OrderGroupId);
id_newtype!(CustomerId);
id_newtype!(DriverId);
id_newtype!(SubcontractorId);
id_newtype!(RouteId);
id_newtype!(AdvanceId);
