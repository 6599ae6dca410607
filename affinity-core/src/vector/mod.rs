//! Sparse per-user vectors and their quantized byte encoding.

mod codec;
mod sparse;

pub use codec::{RECORD_SIZE, Scale};
pub use sparse::{SparseVector, smaller_first};

/// Numeric identity of a voter.
pub type UserId = u32;
/// Numeric identity of a votable item.
pub type ItemId = u32;
