//! Job specification value objects and payload ingestion.

pub mod payload;
pub mod spec;

pub use payload::{parse_document, parse_text, PayloadError};
pub use spec::{
    DeliveryMode, JobError, JobPlan, JobSpecification, JobSpecificationBuilder, Message, TargetId,
};
