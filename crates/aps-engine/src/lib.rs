pub mod capture;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod reference;
pub mod scenario;
pub mod service;
pub mod templates;

pub use error::EngineError;
pub use pipeline::{CalculationPipeline, Collaborators, PipelineOptions, PipelineOutput};
pub use scenario::Scenario;
pub use service::{CalculateRequest, CalculateResponse, InitializeRequest, PatientService};
