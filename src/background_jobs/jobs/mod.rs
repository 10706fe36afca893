//! Specific background job implementations.

pub mod replicate_uplinks;

pub use replicate_uplinks::ReplicateUplinksJob;
