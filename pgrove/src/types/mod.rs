//! Extended type support: arrays, composites and null recursion.
mod array;
mod composite;
mod nullable;

pub use composite::{CompositeBuilder, CompositeReader};
pub use nullable::Nullable;
