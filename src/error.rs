use std::io::ErrorKind;

/// Crate-wide error type. The core has no recoverable failure modes, so a
/// single boxed error is enough -- components propagate it with `?` and the
/// binary's entry points convert the terminal `Err` into a fatal exit.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Logs the formatted diagnostic at `error` level, prints the single-line
/// message the operator sees on stderr, and terminates the process.
///
/// Every fallible operation in the core bottoms out here: there is no
/// meaningful partial-success state for a half-built container, so nothing
/// is retried and nothing is recovered in place.
pub fn die(context: &str, err: impl std::fmt::Display) -> ! {
    log::error!("{context}: {err}");
    eprintln!("{context}: {err}");
    std::process::exit(1);
}

/// Unwraps a top-level `Result`, routing any error through [`die`].
pub fn or_die<T>(context: &str, result: Result<T, Error>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => die(context, err),
    }
}

/// Treats an I/O error of the given kind as success, e.g. `mkdir` racing
/// against a directory that already exists.
pub(crate) fn ignore_kind(result: std::io::Result<()>, kind: ErrorKind) -> std::io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == kind => Ok(()),
        Err(err) => Err(err),
    }
}
