//! The distributed algorithms: container redistribution, inverse-map
//! construction, clone (ghost) expansion, and local/global/file numbering
//! translation.

pub mod expand;
pub mod inverse;
pub mod numbering;
pub mod redistribute;

pub use expand::{expand_map, expand_multi_map};
pub use inverse::{distributed_inverse_map, Relation};
pub use numbering::{file_to_local_order, local_to_file_order, DistNumbering};
pub use redistribute::{redistribute, transpose_parts};
