
/// Emits a record at `$lvl`, formatting the arguments only when the level is enabled.
#[macro_export]
macro_rules! rapid_log {
    ($lvl:expr, $($arg:tt)*) => {
        if log::log_enabled!($lvl) {
            log::log!($lvl, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! rapid_trace {
    ($($arg:tt)*) => { $crate::rapid_log!(log::Level::Trace, $($arg)*) };
}

#[macro_export]
macro_rules! rapid_debug {
    ($($arg:tt)*) => { $crate::rapid_log!(log::Level::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! rapid_info {
    ($($arg:tt)*) => { $crate::rapid_log!(log::Level::Info, $($arg)*) };
}

#[macro_export]
macro_rules! rapid_warn {
    ($($arg:tt)*) => { $crate::rapid_log!(log::Level::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! rapid_error {
    ($($arg:tt)*) => { $crate::rapid_log!(log::Level::Error, $($arg)*) };
}
