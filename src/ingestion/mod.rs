mod pipeline;

pub use pipeline::{IngestedRelease, IngestionPipeline};
