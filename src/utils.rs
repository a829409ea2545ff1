//! 统一处理不同加速器类型(cuda、xpu...)stream的工具函数
//!
//! 这些函数作用于进程级的[`Runtime`],没有安装backend或加速器不可用时都不做任何事。

use std::sync::{PoisonError, RwLock};

use crate::device::DeviceType;
use crate::error::StreamResult;
use crate::wrappers::accelerator::backend::SharedBackend;
use crate::wrappers::accelerator::runtime::Runtime;
use crate::wrappers::accelerator::stream::Stream;
use crate::wrappers::accelerator::stream_guard::StreamContext;

static RUNTIME: RwLock<Runtime> = RwLock::new(Runtime::new());

/// 向进程级runtime注册一个backend,每种设备类型只能注册一个
pub fn install_backend(backend: SharedBackend) -> StreamResult<()> {
    RUNTIME.write().unwrap_or_else(PoisonError::into_inner).register(backend)
}

pub fn uninstall_backend(device_type: DeviceType) -> Option<SharedBackend> {
    RUNTIME.write().unwrap_or_else(PoisonError::into_inner).unregister(device_type)
}

/// 进程级runtime的快照
pub fn runtime() -> Runtime {
    RUNTIME.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// 获得给定stream对应加速器类型的作用域上下文,
/// stream为`None`或没有可用的对应加速器时返回no-op上下文
pub fn get_stream_context(stream: Option<&Stream>) -> StreamContext {
    runtime().get_stream_context(stream)
}

/// 在当前stream上记录event,cuda上记录的event可跨进程使用
pub fn record_event() -> StreamResult<()> {
    runtime().record_event()
}

/// 等待当前stream上的操作执行完毕
pub fn synchronize() -> StreamResult<()> {
    runtime().synchronize()
}
