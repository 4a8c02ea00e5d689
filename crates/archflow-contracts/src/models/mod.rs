mod registry;
mod selectors;

pub use registry::{credit_cost, ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};
