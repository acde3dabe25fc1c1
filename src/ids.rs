//! Identifier types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0.simple())
            }
        }
    };
}

uuid_id!(
    /// Identifies one orchestration session
    SessionId,
    "sess"
);
uuid_id!(
    /// Identifies one submitted task; doubles as the trace id of its run
    TaskId,
    "task"
);
uuid_id!(
    /// Identifies one started agent invocation
    InvocationId,
    "inv"
);
uuid_id!(
    /// Correlates a `ToolInvoked` event with its `ToolResult`
    CallId,
    "call"
);
