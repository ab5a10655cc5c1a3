//! Model conversion
//!
//! Translates between the two wire generations and the persisted model.
//! Inbound conversion fails with a typed error naming the field that could
//! not be resolved. Outbound conversion never fails a whole response: a
//! record that cannot be rendered carries its error inside the returned
//! object instead.

pub mod accessors;
pub mod parameters;
pub mod to_api;
pub mod to_model;

pub use parameters::{
    SpecParameter, api_parameters_to_model, model_parameters_to_api, model_runtime_parameters,
    runtime_parameters_to_model,
};
pub use to_api::*;
pub use to_model::*;
