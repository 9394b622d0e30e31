pub use aigw_core::prelude::*;
pub use serde::{Deserialize, Serialize};

pub mod extproc;
pub mod filterapi;
pub mod json;
pub mod llm;
pub mod parse;
pub mod serdes;
