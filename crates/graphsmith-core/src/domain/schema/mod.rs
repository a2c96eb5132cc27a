//! Schema registry: class definitions and predefined entities

mod definition;
mod seed;
mod system;

pub use definition::{ClassDefinition, PropertyDefinition};
pub use seed::USER_ENTITY;
pub use system::{ClassChange, PredefinedEntity, System, SystemData};
