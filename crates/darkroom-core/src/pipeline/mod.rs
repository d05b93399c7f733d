//! Image transformation pipeline.
//!
//! - **codec**: decode, encode and metadata extraction
//! - **ops**: the individual pixel operations
//! - **watermark**: asset loading and compositing
//! - **executor**: runs a spec through the ops in a fixed order

pub mod codec;
pub mod executor;
pub mod ops;
pub mod watermark;

pub use codec::DecodedImage;
pub use executor::{PipelineExecutor, TransformOutput};
pub use watermark::Watermark;
