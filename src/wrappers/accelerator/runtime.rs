use tracing::{debug, trace};

use crate::device::{Device, DeviceType};
use crate::error::{StreamError, StreamResult};

use super::backend::SharedBackend;
use super::event::{Event, EventFlagsBuilder};
use super::stream::Stream;
use super::stream_guard::StreamContext;

/// 按注册顺序保存各设备类型的backend,每种设备类型至多一个
#[derive(Clone, Default)]
pub struct Runtime {
    backends: Vec<SharedBackend>,
}

impl Runtime {
    pub const fn new() -> Self {
        Self { backends: Vec::new() }
    }

    pub fn register(&mut self, backend: SharedBackend) -> StreamResult<()> {
        let device_type = backend.device_type();
        if self.backend(device_type).is_some() {
            return Err(StreamError::AlreadyRegistered(device_type));
        }
        debug!(%device_type, available = backend.is_available(), "registered stream backend");
        self.backends.push(backend);
        Ok(())
    }

    pub fn with_backend(mut self, backend: SharedBackend) -> StreamResult<Self> {
        self.register(backend)?;
        Ok(self)
    }

    pub fn unregister(&mut self, device_type: DeviceType) -> Option<SharedBackend> {
        let position = self.backends.iter().position(|b| b.device_type() == device_type)?;
        Some(self.backends.remove(position))
    }

    pub fn backend(&self, device_type: DeviceType) -> Option<&SharedBackend> {
        self.backends.iter().find(|backend| backend.device_type() == device_type)
    }

    /// 已注册且运行时报告可用的backend
    pub fn available_backend(&self, device_type: DeviceType) -> Option<&SharedBackend> {
        self.backend(device_type).filter(|backend| backend.is_available())
    }

    /// 当前的加速器,即按注册顺序第一个可用的backend
    pub fn accelerator(&self) -> Option<&SharedBackend> {
        self.backends.iter().find(|backend| backend.is_available())
    }

    pub fn is_accelerator_available(&self) -> bool {
        self.accelerator().is_some()
    }

    pub(crate) fn backend_for(&self, stream: &Stream) -> StreamResult<&SharedBackend> {
        self.backend(stream.device_type()).ok_or(StreamError::NoBackend(stream.device_type()))
    }

    /// 为给定的stream获得对应加速器类型的作用域上下文。
    ///
    /// stream为`None`、设备类型无法识别或对应的加速器不可用时,返回no-op上下文
    pub fn get_stream_context(&self, stream: Option<&Stream>) -> StreamContext {
        let Some(stream) = stream else {
            return StreamContext::noop();
        };
        let backend = match stream.device_type() {
            DeviceType::Cuda | DeviceType::Xpu => self.available_backend(stream.device_type()),
            DeviceType::Other(_) => None,
        };
        match backend {
            Some(backend) => StreamContext::on(backend.clone(), *stream),
            None => {
                debug!(%stream, "no usable accelerator for stream, using noop context");
                StreamContext::noop()
            }
        }
    }

    /// 在当前加速器的current stream上记录event并返回,
    /// 没有可用加速器或设备类型不是cuda/xpu时返回`None`
    pub fn record_current_stream_event(&self) -> StreamResult<Option<Event>> {
        let Some(backend) = self.accelerator() else {
            return Ok(None);
        };
        let stream = backend.current_stream(Device::CURRENT_INDEX)?;
        let flags = match stream.device_type() {
            // cuda上记录可跨进程共享的event
            DeviceType::Cuda => EventFlagsBuilder::default().interprocess(true).build(),
            DeviceType::Xpu => EventFlagsBuilder::default().build(),
            DeviceType::Other(name) => {
                trace!(device_type = name, "skip recording event");
                return Ok(None);
            }
        };
        backend.record_event(&stream, flags).map(Some)
    }

    pub fn record_event(&self) -> StreamResult<()> {
        self.record_current_stream_event().map(drop)
    }

    /// 阻塞直到当前加速器current stream上已提交的操作全部完成,没有可用加速器时立即返回
    pub fn synchronize(&self) -> StreamResult<()> {
        let Some(backend) = self.accelerator() else {
            return Ok(());
        };
        let stream = backend.current_stream(Device::CURRENT_INDEX)?;
        trace!(%stream, "synchronizing current stream");
        backend.synchronize_stream(&stream)
    }
}
