//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! distribution schema. Writes that must share a transaction with other writes
//! are exposed as free functions generic over `ConnectionTrait`.

pub mod assignment_record;
pub mod distribution_config;
pub mod opportunity;
pub mod pipeline_member;

pub use assignment_record::AssignmentRecordRepository;
pub use distribution_config::DistributionConfigRepository;
pub use opportunity::{ClaimOutcome, OpportunityRepository};
pub use pipeline_member::PipelineMemberRepository;
