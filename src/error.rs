use thiserror::Error;

use crate::device::{Device, DeviceType};
use crate::wrappers::accelerator::stream::Stream;

#[derive(Error, Debug)]
pub enum StreamError {
    /// 底层加速器运行时报告的错误,原样向上传递
    #[error("{device_type} runtime error: {msg}")]
    Runtime { device_type: DeviceType, msg: String },

    #[error("stream {stream} can not be handled by the {backend} backend")]
    DeviceMismatch { stream: Stream, backend: DeviceType },

    #[error("unknown stream {0}")]
    UnknownStream(Stream),

    #[error("invalid device {0}")]
    InvalidDevice(Device),

    #[error("no backend registered for {0}")]
    NoBackend(DeviceType),

    #[error("a backend for {0} is already registered")]
    AlreadyRegistered(DeviceType),

    /// 对未启用计时功能的event调用`elapsed_time`
    #[error("event was recorded without timing enabled")]
    TimingDisabled,

    #[error("worker of stream {0} has shut down")]
    Disconnected(Stream),
}

pub type StreamResult<T> = Result<T, StreamError>;
