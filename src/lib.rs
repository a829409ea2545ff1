//! 统一不同加速器(cuda、xpu或没有加速器)stream操作的工具库。
//!
//! 提供三个操作:为stream获得作用域上下文([`get_stream_context`])、
//! 在当前stream上记录event([`record_event`])与等待当前stream完成([`synchronize`])。
//! 具体的stream原语由实现了[`StreamBackend`]的backend提供,不支持或不可用的加速器
//! 一律退化为no-op。
//!
//! ```
//! use torchft_stream::{get_stream_context, record_event, synchronize, GuardScope};
//!
//! // 没有安装任何backend时,所有操作都不做任何事
//! let sum = get_stream_context(None).scope(|| Ok::<_, torchft_stream::StreamError>(1 + 1))?;
//! assert_eq!(sum, 2);
//! record_event()?;
//! synchronize()?;
//! # Ok::<(), torchft_stream::StreamError>(())
//! ```

pub mod device;
pub mod error;
pub mod utils;
pub mod wrappers;

pub use device::{Device, DeviceType};
pub use error::{StreamError, StreamResult};
pub use utils::{
    get_stream_context, install_backend, record_event, runtime, synchronize, uninstall_backend,
};
pub use wrappers::accelerator::backend::{SharedBackend, StreamBackend};
pub use wrappers::accelerator::event::{Event, EventFlags, EventFlagsBuilder, RawEvent};
pub use wrappers::accelerator::runtime::Runtime;
pub use wrappers::accelerator::stream::{Stream, StreamExt};
pub use wrappers::accelerator::stream_guard::{GuardScope, StreamContext, StreamGuard};
pub use wrappers::host::{HostBackend, HostBackendConfig, HostBackendConfigBuilder};
