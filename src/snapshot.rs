use parse_display::{Display, FromStr};
use serde::{ser::SerializeStruct, Serialize};


/// Where the tracked operation is in its life cycle.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum Status {
    Pending,
    Resolved,
    Rejected,
}

impl Status {
    pub fn is_pending(self) -> bool {
        self == Status::Pending
    }
    pub fn is_resolved(self) -> bool {
        self == Status::Resolved
    }
    pub fn is_rejected(self) -> bool {
        self == Status::Rejected
    }
}
impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let (index, name) = match self {
            Status::Pending => (0, "pending"),
            Status::Resolved => (1, "resolved"),
            Status::Rejected => (2, "rejected"),
        };
        serializer.serialize_unit_variant("Status", index, name)
    }
}

/// The published state of an [`AwaitCell`](crate::AwaitCell).
///
/// A new snapshot is created each time the state is published; a published snapshot never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<T, E> {
    /// `true` until the first settlement has been published.
    pub first: bool,
    pub status: Status,
    /// The last resolved value, or the initial value if nothing has resolved yet.
    pub data: T,
    /// The error of the most recently tracked operation, as of the last publication.
    pub error: Option<E>,
}

impl<T, E> Snapshot<T, E> {
    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }
    pub fn is_resolved(&self) -> bool {
        self.status.is_resolved()
    }
    pub fn is_rejected(&self) -> bool {
        self.status.is_rejected()
    }
}

impl<T: Serialize, E: Serialize> Serialize for Snapshot<T, E> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Snapshot", 4)?;
        s.serialize_field("first", &self.first)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("data", &self.data)?;
        s.serialize_field("error", &self.error)?;
        s.end()
    }
}
