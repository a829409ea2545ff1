pub mod accelerator;
pub mod host;
