//! Sample ingestion
//!
//! Raw records in, validated per-device sequences out.

mod ingestor;
mod record;

pub use ingestor::*;
pub use record::*;
