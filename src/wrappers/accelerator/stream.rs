use std::fmt;

use crate::device::{Device, DeviceType};
use crate::error::StreamResult;

use super::event::{Event, EventFlagsBuilder};
use super::runtime::Runtime;

/// 加速器上一个执行队列的句柄,只记录其所属设备与id,底层的队列由对应的backend持有,
/// 同一设备上id为0的stream即该设备的default stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream {
    device: Device,
    id: i64,
}

impl Stream {
    pub const DEFAULT_ID: i64 = 0;

    pub fn new(device: Device, id: i64) -> Self {
        Self { device, id }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn device_type(&self) -> DeviceType {
        self.device.device_type()
    }

    /// 获得与该stream关联的设备的下标
    pub fn get_device_index(&self) -> i8 {
        self.device.index()
    }

    pub fn get_id(&self) -> i64 {
        self.id
    }

    pub fn is_default(&self) -> bool {
        self.id == Self::DEFAULT_ID
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/stream{}", self.device, self.id)
    }
}

/// stream上常用的组合操作,所有操作都交由stream所属设备类型的backend完成
pub trait StreamExt {
    /// 记录流上当前已提交的操作
    fn record(&self, runtime: &Runtime) -> StreamResult<Event>;

    /// 令stream等待event上记录的操作执行完毕
    fn wait_event(&self, runtime: &Runtime, event: &Event) -> StreamResult<()>;

    /// 令stream等待另一条stream上当前已提交的操作
    fn wait_stream(&self, runtime: &Runtime, other: &Stream) -> StreamResult<()>;
}

impl StreamExt for Stream {
    fn record(&self, runtime: &Runtime) -> StreamResult<Event> {
        runtime.backend_for(self)?.record_event(self, EventFlagsBuilder::default().build())
    }

    fn wait_event(&self, runtime: &Runtime, event: &Event) -> StreamResult<()> {
        runtime.backend_for(self)?.wait_event(self, event)
    }

    fn wait_stream(&self, runtime: &Runtime, other: &Stream) -> StreamResult<()> {
        self.wait_event(runtime, &other.record(runtime)?)
    }
}
