pub mod backend;
pub mod event;
pub mod runtime;
pub mod stream;
pub mod stream_guard;
