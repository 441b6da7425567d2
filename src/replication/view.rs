//! Cluster Views and Member Status
//!
//! A view is a membership snapshot delivered by the provider whenever the
//! group changes. Member status is the node's position in the join
//! lifecycle:
//! - Undefined: not part of a primary component, or needs operator help
//! - Joiner: waiting for a state snapshot transfer
//! - Joined: holds a consistent state, catching up
//! - Synced: in sync with the group, serving queries

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Global sequence number assigned by certification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seqno(i64);

impl Seqno {
    /// No position known.
    pub const UNDEFINED: Seqno = Seqno(-1);

    /// Not yet assigned to a transaction.
    pub const UNASSIGNED: Seqno = Seqno(0);

    /// Create a sequence number from its raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw value.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Whether this is the undefined position.
    pub fn is_undefined(&self) -> bool {
        self.0 < 0
    }

    /// Whether a transaction has been given this seqno by certification.
    pub fn is_assigned(&self) -> bool {
        self.0 > 0
    }

    /// The position immediately before this one.
    pub fn prev(&self) -> Seqno {
        Seqno(self.0 - 1)
    }

    /// The position immediately after this one.
    pub fn next(&self) -> Seqno {
        Seqno(self.0 + 1)
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known consistent (cluster UUID, seqno) position of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Cluster state UUID, nil when unset
    pub uuid: Uuid,
    /// Position within that cluster history
    pub seqno: Seqno,
}

impl Anchor {
    /// Create an anchor.
    pub fn new(uuid: Uuid, seqno: Seqno) -> Self {
        Self { uuid, seqno }
    }

    /// An anchor that has never been set.
    pub fn undefined() -> Self {
        Self {
            uuid: Uuid::nil(),
            seqno: Seqno::UNDEFINED,
        }
    }

    /// Whether the node has ever joined a primary component.
    pub fn is_set(&self) -> bool {
        !self.uuid.is_nil()
    }
}

impl Default for Anchor {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uuid, self.seqno)
    }
}

/// Status of the component a view describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewStatus {
    /// Quorum component, may process writes
    Primary,
    /// Minority component
    NonPrimary,
    /// Not connected to any group
    Disconnected,
}

impl ViewStatus {
    /// Operator-facing name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "Primary",
            Self::NonPrimary => "non-Primary",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership snapshot delivered on every group change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterView {
    /// Cluster state UUID
    pub group_uuid: Uuid,
    /// Configuration epoch, negative when undefined
    pub conf_id: i64,
    /// Component status
    pub status: ViewStatus,
    /// Number of members
    pub member_count: usize,
    /// Index of this node among the members, negative when not a member
    pub local_index: i64,
    /// First seqno of the new configuration
    pub first_seqno: Seqno,
    /// Application protocol version negotiated by the group
    pub protocol_version: i32,
    /// Whether this node's state lags the group and needs a transfer
    pub state_gap: bool,
}

impl ClusterView {
    /// A primary view without a state gap.
    pub fn primary(
        group_uuid: Uuid,
        conf_id: i64,
        member_count: usize,
        local_index: i64,
        first_seqno: Seqno,
    ) -> Self {
        Self {
            group_uuid,
            conf_id,
            status: ViewStatus::Primary,
            member_count,
            local_index,
            first_seqno,
            protocol_version: 1,
            state_gap: false,
        }
    }

    /// A non-primary view.
    pub fn non_primary(group_uuid: Uuid, conf_id: i64, member_count: usize, local_index: i64) -> Self {
        Self {
            group_uuid,
            conf_id,
            status: ViewStatus::NonPrimary,
            member_count,
            local_index,
            first_seqno: Seqno::UNDEFINED,
            protocol_version: 1,
            state_gap: false,
        }
    }

    /// The view delivered after leaving the group.
    pub fn disconnected() -> Self {
        Self {
            group_uuid: Uuid::nil(),
            conf_id: -1,
            status: ViewStatus::Disconnected,
            member_count: 0,
            local_index: -1,
            first_seqno: Seqno::UNDEFINED,
            protocol_version: 1,
            state_gap: false,
        }
    }

    /// Set the negotiated protocol version.
    pub fn with_protocol_version(mut self, version: i32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Mark the view as requiring a state transfer.
    pub fn with_state_gap(mut self) -> Self {
        self.state_gap = true;
        self
    }

    /// Whether the view is a primary component.
    pub fn is_primary(&self) -> bool {
        self.status == ViewStatus::Primary
    }
}

/// Position of the node in the join lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// Not in a primary component, or operator intervention needed
    Undefined,
    /// Waiting for a state snapshot transfer
    Joiner,
    /// Holds a consistent state
    Joined,
    /// In sync with the group
    Synced,
}

impl MemberStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: MemberStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Self::Synced) | (_, Self::Undefined) => true,
            (Self::Undefined, Self::Joiner) => true,
            (Self::Undefined, Self::Joined) => true,
            (Self::Joiner, Self::Joined) => true,
            _ => false,
        }
    }

    /// Operator-facing name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Joiner => "joiner",
            Self::Joined => "joined",
            Self::Synced => "synced",
        }
    }
}

impl Default for MemberStatus {
    fn default() -> Self {
        Self::Undefined
    }
}
