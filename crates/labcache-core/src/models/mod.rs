pub mod catalog;
pub mod error;
pub mod history;
pub mod operation;

pub use catalog::Catalog;
pub use error::{CoreError, CoreErrorKind};
pub use history::HistoryRecord;
pub use operation::{
    JobAction, LaunchId, OperationCategory, OperationKey, OperationProgress, OperationSnapshot,
    OperationStatus, ProgressDetail, SubjectKey,
};
