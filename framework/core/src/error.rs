/// Classification of a failed run.
///
/// Each kind maps to its own process exit code so that scripts driving the benchmark can tell
/// which phase failed without parsing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    BuildFailed,
    ClusterStartFailed,
    EnvPrepareFailed,
    LoadGenLaunchFailed,
    CollectionFailed,
    Cancelled,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::BuildFailed => 10,
            ErrorKind::ClusterStartFailed => 11,
            ErrorKind::EnvPrepareFailed => 12,
            ErrorKind::LoadGenLaunchFailed => 13,
            ErrorKind::CollectionFailed => 14,
            // Conventional code for termination by SIGINT.
            ErrorKind::Cancelled => 130,
        }
    }
}
