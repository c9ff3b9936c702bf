/// Result type used by the collaborators and the runner entry points. Compatible with the phase
/// functions of the controller, so `?` can be used to propagate errors.
pub type FtBenchResult<T> = anyhow::Result<T>;
