//! Static configuration consumed by the dispatcher
//!
//! - Field rule tables: per-field validators and transforms
//! - Endpoint registry: what each downstream destination requires
//! - Customer configuration store: which endpoints a customer fans out to,
//!   with field remapping, extra static fields and default values
//!
//! Everything here is built once at startup and read-only afterwards.

mod customer;
mod endpoint;
mod error;
mod field;
mod transform;

pub use customer::{Condition, CustomerConfig, CustomerConfigStore, EndpointOverride};
pub use endpoint::{EndpointConfig, EndpointRegistry, RetryOverride, Target};
pub use error::ConfigError;
pub use field::{FieldRule, FieldRules, Pattern};
pub use transform::{DateFormat, Transform, TransformError};
