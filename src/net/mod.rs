//! Network transport seam: the outbound fetch capability and the opaque
//! request/response descriptors that cross it.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Request, Response};
