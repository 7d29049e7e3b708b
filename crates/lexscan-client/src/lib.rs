pub mod analysis;

pub use analysis::HttpAnalysisClient;
