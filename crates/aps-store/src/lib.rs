pub mod audit;
pub mod error;
pub mod patients;
pub mod query;
pub mod retention;
pub mod session;
pub mod settings;

pub use audit::{AuditLogger, AuditRecord};
pub use error::StoreError;
pub use patients::PatientStore;
pub use query::{HistoryKind, HistoryQuery, HistorySlice};
pub use session::{CalculationCommit, LastCalculation, PatientSession, PatientStatus};
pub use settings::{RetentionUnit, SessionSettings};
