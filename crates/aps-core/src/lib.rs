pub mod collaborators;
pub mod errors;
pub mod history;
pub mod ids;
pub mod profile;
pub mod results;
pub mod time;

pub use errors::{CollaboratorError, ValidationError};
pub use history::{CarbEntry, GlucoseSample, History, InitialData, NewData, PumpEvent};
pub use ids::{PatientId, RunId};
pub use profile::Profile;
