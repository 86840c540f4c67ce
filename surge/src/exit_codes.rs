#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Missing/invalid subcommand, bad flags or a failed run.
    InvalidInput = 1,

    /// The run completed but at least one expectation was unmet.
    UnmetExpectation = 3,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
