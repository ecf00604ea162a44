use thiserror::Error;

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The analysis engine has a narrow failure surface by design: every instruction it does not
/// understand has a safe conservative fallback ("treat the result as unknown"), so unexpected
/// input never produces an error. The only failure modes are internal invariant violations,
/// which indicate a bug in the instruction stream producer or in the engine itself — never a
/// recoverable input condition.
///
/// # Error Categories
///
/// - [`Error::Internal`] - An internal invariant was violated; the analysis pass must be
///   aborted and the surrounding optimizer should surface this as an internal-compiler-error
///   class diagnostic.
#[derive(Error, Debug)]
pub enum Error {
    /// An internal invariant of the analysis engine was violated.
    ///
    /// This error is fatal to the current analysis pass. It is raised for programming
    /// errors such as swapping a stack slot with itself, which indicate a malformed
    /// instruction stream rather than a condition the engine could recover from.
    /// The error includes the source location where the violation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file in which the violation was detected
    /// * `line` - Source line in which the violation was detected
    #[error("Internal - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}
