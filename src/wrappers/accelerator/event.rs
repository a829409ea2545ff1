use std::any::Any;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use derive_builder::Builder;

use crate::error::{StreamError, StreamResult};

use super::stream::Stream;

/// event创建时的标志位,位的布局与cuda runtime一致,详见:
/// [cuda event docs](https://docs.nvidia.com/cuda/cuda-runtime-api/group__CUDART__EVENT.html)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const BLOCKING_SYNC: u32 = 1;
    pub const DISABLE_TIMING: u32 = 1 << 1;
    pub const INTERPROCESS: u32 = 1 << 2;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn blocking_sync(&self) -> bool {
        self.0 & Self::BLOCKING_SYNC != 0
    }

    pub fn timing_enabled(&self) -> bool {
        self.0 & Self::DISABLE_TIMING == 0
    }

    pub fn interprocess(&self) -> bool {
        self.0 & Self::INTERPROCESS != 0
    }
}

/// 配置event创建时的标志位,默认创建的是不启用计时功能、仅在进程内可见的event
#[derive(Builder)]
#[builder(name = "EventFlagsBuilder")]
#[builder(build_fn(skip, name = "build"))]
#[allow(dead_code)]
pub struct EventFlagsConfig {
    enable_timing: bool,
    blocking_sync: bool,
    interprocess: bool,
}

impl EventFlagsBuilder {
    /// 跨进程的event不能启用计时,此时`enable_timing`会被忽略
    pub fn build(&mut self) -> EventFlags {
        let interprocess = self.interprocess.unwrap_or(false);
        let blocking = self.blocking_sync.unwrap_or(false);
        let disable_timing = interprocess || !self.enable_timing.unwrap_or(false);

        let flags = [
            (blocking, EventFlags::BLOCKING_SYNC),
            (disable_timing, EventFlags::DISABLE_TIMING),
            (interprocess, EventFlags::INTERPROCESS),
        ]
        .into_iter()
        .filter_map(|(enable_flag, bit)| enable_flag.then_some(bit))
        .fold(0, |flags, bit| flags | bit);
        EventFlags(flags)
    }
}

/// backend对已记录event的具体实现
pub trait RawEvent: Send + Sync + fmt::Debug {
    /// 查询event之前的操作是否已执行完毕
    fn query(&self) -> StreamResult<bool>;

    /// 阻塞调用线程直到event之前的操作执行完毕
    fn synchronize(&self) -> StreamResult<()>;

    /// 返回从`self`到`end`所经过的毫秒数,两个event都需已完成
    fn elapsed_time(&self, end: &dyn RawEvent) -> StreamResult<f32>;

    fn as_any(&self) -> &dyn Any;
}

/// 记录在某条stream上的event
#[derive(Debug, Clone)]
pub struct Event {
    stream: Stream,
    flags: EventFlags,
    inner: Arc<dyn RawEvent>,
}

impl Event {
    pub fn new(stream: Stream, flags: EventFlags, inner: Arc<dyn RawEvent>) -> Self {
        Self { stream, flags, inner }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn raw(&self) -> &dyn RawEvent {
        self.inner.as_ref()
    }

    pub fn query(&self) -> StreamResult<bool> {
        self.inner.query()
    }

    pub fn synchronize(&self) -> StreamResult<()> {
        self.inner.synchronize()
    }

    /// 返回两个event之间记录的时间差(毫秒),两者都需要启用计时功能
    pub fn elapsed_time(&self, end: &Event) -> StreamResult<f32> {
        if !self.flags.timing_enabled() || !end.flags.timing_enabled() {
            return Err(StreamError::TimingDisabled);
        }
        self.inner.elapsed_time(end.inner.as_ref())
    }

    /// 在异步上下文中等待event完成,阻塞等待发生在tokio的blocking线程上
    pub fn wait(&self) -> <Event as IntoFuture>::IntoFuture {
        self.clone().into_future()
    }
}

impl IntoFuture for Event {
    type Output = StreamResult<()>;

    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || self.synchronize())
                .await
                .expect("Failed to join blocking thread handler when wait event")
        })
    }
}
