//! # Data Models
//!
//! SeaORM entities for the distribution schema.

pub mod assignment_record;
pub mod distribution_config;
pub mod opportunity;
pub mod pipeline_member;
pub mod rotation_cursor;

pub use assignment_record::Entity as AssignmentRecord;
pub use distribution_config::Entity as DistributionConfig;
pub use opportunity::Entity as Opportunity;
pub use pipeline_member::Entity as PipelineMember;
pub use rotation_cursor::Entity as RotationCursor;
