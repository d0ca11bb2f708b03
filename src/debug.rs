//! Debugging helpers

/// A macro that expands to a call to `log::trace!` when the feature "scsi_verbose" is enabled,
/// otherwise does nothing.
#[macro_export]
macro_rules! scsi_debug {
  ($($arg:tt)+) => (if cfg!(feature = "scsi_verbose") { ::log::trace!($($arg)+)})
}
