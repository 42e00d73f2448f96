//! # Lead Distribution
//!
//! Who gets a lead: the roster view, the round-robin rotation, the assignment
//! service and the SLA redistribution state machine.

pub mod assignment;
pub mod redistribution;
pub mod roster;
pub mod round_robin;

pub use assignment::{AssignRequest, AssignmentResult, AssignmentService, AssignmentTrigger};
pub use redistribution::{RedistributionAction, RedistributionStateMachine};
pub use roster::{RosterDirectory, RosterMember, RosterSnapshot, RosterView};
pub use round_robin::{
    RotationPick, RoundRobinSelector, Selection, pick_next, retry_on_stale_cursor,
};
