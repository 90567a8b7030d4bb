// Library root: re-exports all modules so integration tests and the binary
// share one public API.

pub mod api;
pub mod protocol;
pub mod scheduler;
pub mod updater;
pub mod ws_server;
