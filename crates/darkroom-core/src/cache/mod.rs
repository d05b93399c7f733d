//! Cache identity and lookup.
//!
//! - **key**: derive a deterministic [`CacheKey`] from a source id and spec
//! - **resolver**: decide whether a servable result exists for a key

pub mod key;
pub mod resolver;

pub use key::{CacheKey, CacheKeyDeriver};
pub use resolver::{CacheResolver, Resolution};
