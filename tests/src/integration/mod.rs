//! Cross-crate integration flows.

pub mod choreography;
pub mod flows;
