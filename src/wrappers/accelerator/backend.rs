//! 加速器运行时需要向shim提供的原语
//!
//! 每个设备类型(cuda、xpu...)对应一个[`StreamBackend`]实现,实现方负责真正的stream、
//! event与同步操作,shim只负责根据设备类型选择backend。

use std::sync::Arc;

use crate::device::DeviceType;
use crate::error::{StreamError, StreamResult};

use super::event::{Event, EventFlags};
use super::stream::Stream;

pub trait StreamBackend: Send + Sync {
    /// 该backend负责的设备类型
    fn device_type(&self) -> DeviceType;

    /// 运行时是否报告该类加速器在当前主机上可用
    fn is_available(&self) -> bool;

    /// 返回指定设备上的default stream,`device_index`为-1时表示当前设备
    fn default_stream(&self, device_index: i8) -> StreamResult<Stream>;

    /// 返回调用线程在指定设备上的current stream,大多数情况下即该设备的default stream
    fn current_stream(&self, device_index: i8) -> StreamResult<Stream>;

    /// 将`stream`所在设备设为调用线程的当前设备,并将`stream`设为该设备上的current stream,
    /// 返回该设备上原先的current stream
    fn exchange_stream(&self, stream: &Stream) -> StreamResult<Stream>;

    /// 在`stream`上记录一个使用`flags`创建的event
    fn record_event(&self, stream: &Stream, flags: EventFlags) -> StreamResult<Event>;

    /// 令`stream`上之后提交的操作等待`event`完成
    fn wait_event(&self, stream: &Stream, event: &Event) -> StreamResult<()>;

    /// 阻塞调用线程直到`stream`上已提交的操作全部执行完毕
    fn synchronize_stream(&self, stream: &Stream) -> StreamResult<()>;
}

/// 确认stream属于该backend负责的设备类型
pub fn check_device_type(backend: &dyn StreamBackend, stream: &Stream) -> StreamResult<()> {
    if stream.device_type() == backend.device_type() {
        Ok(())
    } else {
        Err(StreamError::DeviceMismatch { stream: *stream, backend: backend.device_type() })
    }
}

pub type SharedBackend = Arc<dyn StreamBackend>;
