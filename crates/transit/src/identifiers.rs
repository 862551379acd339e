//! Type-safe, efficient identifiers for transit entities.
//!
//! All identifiers use Arc<str> for cheap cloning and minimal memory overhead.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

// Ordering is by string, so ties in a result set break lexicographically.
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl AsRef<str>) -> Self {
                Self(Arc::from(s.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(Arc::from(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }
    };
}

identifier!(
    /// GTFS `stop_id`
    StopIdentifier
);
identifier!(
    /// GTFS `route_id`
    RouteIdentifier
);
identifier!(
    /// Id of a ranked result, whichever kind of entity it is
    EntityIdentifier
);

impl StopIdentifier {
    pub fn into_entity(self) -> EntityIdentifier {
        EntityIdentifier(self.0)
    }
}

impl RouteIdentifier {
    pub fn into_entity(self) -> EntityIdentifier {
        EntityIdentifier(self.0)
    }
}
