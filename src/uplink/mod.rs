mod client;
mod delta;

pub use client::{HttpUplinkApi, ReleaseDocument, UplinkApi, UplinkError};
pub use delta::DeltaFetcher;
