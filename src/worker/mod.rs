pub mod process;
pub mod registry;

pub use process::TranslationWorker;
pub use registry::WorkerRegistry;

/// Lifecycle of a translation worker
///
/// `Starting -> Running -> Exited`. An exited worker is never revived; the
/// registry replaces it with a fresh one on the next lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Exited = 2,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            _ => Self::Exited,
        }
    }
}
