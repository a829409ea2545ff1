use std::marker::PhantomData;

use tracing::{error, trace};

use crate::device::Device;
use crate::error::{StreamError, StreamResult};

use super::backend::SharedBackend;
use super::stream::Stream;

/// `get_stream_context`返回的作用域上下文,
/// 进入后将目标stream设为current stream,退出时恢复原先的current stream;
/// 没有目标stream时进入与退出都不做任何事
#[derive(Clone, Default)]
pub struct StreamContext {
    target: Option<(SharedBackend, Stream)>,
}

impl StreamContext {
    pub fn noop() -> Self {
        Self { target: None }
    }

    pub(crate) fn on(backend: SharedBackend, stream: Stream) -> Self {
        Self { target: Some((backend, stream)) }
    }

    pub fn is_noop(&self) -> bool {
        self.target.is_none()
    }

    /// 进入后将成为current stream的stream
    pub fn stream(&self) -> Option<Stream> {
        self.target.as_ref().map(|(_, stream)| *stream)
    }
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext").field("stream", &self.stream()).finish()
    }
}

/// 切换current stream的RAII Guard,drop时恢复创建时的current stream。
///
/// current stream是线程本地的状态,因此Guard不能跨线程移动;
/// 嵌套使用时需要先drop内层的Guard
#[must_use = "the previous stream is restored as soon as the guard is dropped"]
pub struct StreamGuard {
    restore: Option<Restore>,
    _unsend_mark: PhantomData<*mut ()>,
}

struct Restore {
    backend: SharedBackend,
    /// 进入前当前设备上的current stream
    original: Stream,
    /// 进入前目标stream所在设备上的current stream,与`original`在同一设备时两者相同
    displaced: Stream,
    current: Stream,
}

impl StreamGuard {
    fn noop() -> Self {
        Self { restore: None, _unsend_mark: PhantomData }
    }

    /// 创建Guard时当前设备上的current stream,no-op Guard返回`None`
    pub fn get_original_stream(&self) -> Option<Stream> {
        self.restore.as_ref().map(|restore| restore.original)
    }

    pub fn get_current_stream(&self) -> Option<Stream> {
        self.restore.as_ref().map(|restore| restore.current)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let Some(Restore { backend, original, displaced, current }) = self.restore.take() else {
            return;
        };
        trace!(%current, %original, "restoring stream");
        // 先恢复目标设备上的stream,再切回原先的设备;Drop中无法返回错误,只能记录下来
        let restores = if original == displaced { vec![original] } else { vec![displaced, original] };
        for stream in restores {
            if let Err(err) = backend.exchange_stream(&stream) {
                error!(%current, %stream, %err, "failed to restore the original stream");
            }
        }
    }
}

/// 简化RAII Guard使用的trait
pub trait GuardScope {
    fn enter(&self) -> StreamResult<StreamGuard>;

    /// 将传入的闭包在相应Guard包裹的上下文中执行,闭包返回错误或panic时同样会恢复原先的stream
    fn scope<T, E, F>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StreamError>,
    {
        let _guard = self.enter()?;
        action()
    }
}

impl GuardScope for StreamContext {
    fn enter(&self) -> StreamResult<StreamGuard> {
        let Some((backend, stream)) = &self.target else {
            return Ok(StreamGuard::noop());
        };
        let original = backend.current_stream(Device::CURRENT_INDEX)?;
        let displaced = backend.exchange_stream(stream)?;
        trace!(current = %stream, %original, "entered stream context");
        Ok(StreamGuard {
            restore: Some(Restore {
                backend: backend.clone(),
                original,
                displaced,
                current: *stream,
            }),
            _unsend_mark: PhantomData,
        })
    }
}
