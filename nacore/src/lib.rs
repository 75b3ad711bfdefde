// chemistry module
pub mod chemistry {
    pub mod elements;
    pub mod sum_formula;
    pub mod label;
}

// algorithm module
pub mod algorithm {
    pub mod convolution;
    pub mod matrix;
    pub mod solver;
    pub mod correction;
    pub mod postprocess;
    pub mod enrichment;
}

// data module
pub mod data {
    pub mod fragment;
    pub mod tensor;
    pub mod batch;
}

pub mod config;
pub mod engine;
pub mod error;

pub use config::{CorrectionConfig, NnlsSettings};
pub use engine::{CorrectedRecord, CorrectionEngine, CorrectionResult};
pub use error::{CorrectionError, CorrectionWarning, WarningKind};
