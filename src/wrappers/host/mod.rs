//! 在进程内模拟加速器的backend
//!
//! 每条stream由一个worker线程按提交顺序执行其上的任务,event在worker执行到它时完成。
//! 用于在没有加速器的主机上运行与测试依赖stream语义的代码。

mod event;
mod queue;

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_builder::Builder;
use tracing::{debug, warn};

use crate::device::{Device, DeviceType};
use crate::error::{StreamError, StreamResult};
use crate::wrappers::accelerator::backend::{check_device_type, StreamBackend};
use crate::wrappers::accelerator::event::{Event, EventFlags, EventFlagsBuilder};
use crate::wrappers::accelerator::stream::Stream;

pub use event::HostEvent;
use event::EventSignal;
use queue::{StreamQueue, Task};

thread_local! {
    /// (backend id, 设备下标) -> 调用线程的current stream id
    static CURRENT_STREAMS: RefCell<HashMap<(usize, i8), i64>> = RefCell::new(HashMap::new());
    /// backend id -> 调用线程的当前设备下标,未设置时为0号设备
    static CURRENT_DEVICES: RefCell<HashMap<usize, i8>> = RefCell::new(HashMap::new());
}

static NEXT_BACKEND_ID: AtomicUsize = AtomicUsize::new(0);

/// 配置模拟backend,默认模拟一个可用的cuda设备
#[derive(Builder, Debug, Clone)]
#[builder(name = "HostBackendConfigBuilder")]
#[builder(build_fn(skip, name = "build"))]
pub struct HostBackendConfig {
    device_type: DeviceType,
    device_count: i8,
    available: bool,
}

impl HostBackendConfigBuilder {
    pub fn build(&mut self) -> HostBackendConfig {
        HostBackendConfig {
            device_type: self.device_type.unwrap_or(DeviceType::Cuda),
            device_count: self.device_count.unwrap_or(1).max(1),
            available: self.available.unwrap_or(true),
        }
    }
}

impl HostBackendConfig {
    pub fn into_backend(self) -> HostBackend {
        HostBackend::new(self)
    }
}

pub struct HostBackend {
    id: usize,
    config: HostBackendConfig,
    next_stream_id: AtomicI64,
    streams: Mutex<HashMap<Stream, StreamQueue>>,
}

impl HostBackend {
    /// default stream在第一次使用时才创建对应的worker
    pub fn new(config: HostBackendConfig) -> Self {
        debug!(device_type = %config.device_type, device_count = config.device_count, "created host backend");
        Self {
            id: NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed),
            config,
            next_stream_id: AtomicI64::new(Stream::DEFAULT_ID + 1),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn device_count(&self) -> i8 {
        self.config.device_count
    }

    /// 在指定设备上创建一条新的stream,相当于从stream pool中获得stream
    pub fn new_stream(&self, device_index: i8) -> StreamResult<Stream> {
        let device_index = self.resolve_index(device_index)?;
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let stream = Stream::new(Device::new(self.config.device_type, device_index), id);
        let queue = StreamQueue::spawn(stream)?;
        self.lock_streams().insert(stream, queue);
        Ok(stream)
    }

    /// 调用线程的当前设备下标
    pub fn current_device(&self) -> i8 {
        CURRENT_DEVICES.with(|devices| devices.borrow().get(&self.id).copied().unwrap_or(0))
    }

    /// 切换调用线程的当前设备,返回原先的当前设备
    pub fn set_device(&self, device_index: i8) -> StreamResult<i8> {
        let device_index = self.resolve_index(device_index)?;
        let previous = self.current_device();
        CURRENT_DEVICES.with(|devices| devices.borrow_mut().insert(self.id, device_index));
        Ok(previous)
    }

    /// 将任务提交到调用线程在指定设备上的current stream
    pub fn launch<F>(&self, device_index: i8, work: F) -> StreamResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let stream = self.current_stream(device_index)?;
        self.launch_on(&stream, work)
    }

    pub fn launch_on<F>(&self, stream: &Stream, work: F) -> StreamResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(stream, Box::new(work))
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<Stream, StreamQueue>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 将-1解析为调用线程的当前设备,并检查下标范围
    fn resolve_index(&self, device_index: i8) -> StreamResult<i8> {
        match device_index {
            Device::CURRENT_INDEX => Ok(self.current_device()),
            index if (0..self.config.device_count).contains(&index) => Ok(index),
            index => Err(StreamError::InvalidDevice(Device::new(self.config.device_type, index))),
        }
    }

    /// 返回设备下标已解析的stream,stream必须属于该backend
    fn check_stream(&self, stream: &Stream) -> StreamResult<Stream> {
        check_device_type(self, stream)?;
        let device_index = self.resolve_index(stream.get_device_index())?;
        let stream = Stream::new(Device::new(self.config.device_type, device_index), stream.get_id());
        if !stream.is_default() && !self.lock_streams().contains_key(&stream) {
            return Err(StreamError::UnknownStream(stream));
        }
        Ok(stream)
    }

    fn submit(&self, stream: &Stream, task: Task) -> StreamResult<()> {
        let stream = self.check_stream(stream)?;
        let mut streams = self.lock_streams();
        let queue = match streams.entry(stream) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(StreamQueue::spawn(stream)?),
        };
        queue.submit(task)
    }
}

impl StreamBackend for HostBackend {
    fn device_type(&self) -> DeviceType {
        self.config.device_type
    }

    fn is_available(&self) -> bool {
        self.config.available
    }

    fn default_stream(&self, device_index: i8) -> StreamResult<Stream> {
        let device_index = self.resolve_index(device_index)?;
        Ok(Stream::new(Device::new(self.config.device_type, device_index), Stream::DEFAULT_ID))
    }

    fn current_stream(&self, device_index: i8) -> StreamResult<Stream> {
        let device_index = self.resolve_index(device_index)?;
        let id = CURRENT_STREAMS.with(|current| {
            current.borrow().get(&(self.id, device_index)).copied().unwrap_or(Stream::DEFAULT_ID)
        });
        Ok(Stream::new(Device::new(self.config.device_type, device_index), id))
    }

    fn exchange_stream(&self, stream: &Stream) -> StreamResult<Stream> {
        let stream = self.check_stream(stream)?;
        let device_index = stream.get_device_index();
        let previous = self.current_stream(device_index)?;
        self.set_device(device_index)?;
        CURRENT_STREAMS.with(|current| {
            current.borrow_mut().insert((self.id, device_index), stream.get_id());
        });
        Ok(previous)
    }

    fn record_event(&self, stream: &Stream, flags: EventFlags) -> StreamResult<Event> {
        let stream = self.check_stream(stream)?;
        let event = Arc::new(HostEvent::new(stream, flags.timing_enabled()));
        let signal = EventSignal::new(event.clone());
        self.submit(&stream, Box::new(move || signal.fire()))?;
        Ok(Event::new(stream, flags, event))
    }

    fn wait_event(&self, stream: &Stream, event: &Event) -> StreamResult<()> {
        let event = event.clone();
        let waiter = self.check_stream(stream)?;
        self.submit(
            &waiter,
            Box::new(move || {
                if let Err(err) = event.synchronize() {
                    warn!(stream = %waiter, %err, "waited event did not complete");
                }
            }),
        )
    }

    fn synchronize_stream(&self, stream: &Stream) -> StreamResult<()> {
        self.record_event(stream, EventFlagsBuilder::default().build())?.synchronize()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::Duration;

    use anyhow::ensure;

    use super::*;
    use crate::wrappers::accelerator::event::RawEvent;

    fn cuda_backend(device_count: i8) -> HostBackend {
        HostBackendConfigBuilder::default().device_count(device_count).build().into_backend()
    }

    #[test]
    fn default_config() {
        let config = HostBackendConfigBuilder::default().build();
        assert_eq!(config.device_type, DeviceType::Cuda);
        assert_eq!(config.device_count, 1);
        assert!(config.available);
    }

    #[test]
    fn streams_and_devices() -> anyhow::Result<()> {
        let backend = cuda_backend(2);
        let default = backend.default_stream(-1)?;
        ensure!(default == backend.current_stream(0)?);
        ensure!(default.get_device_index() == 0);

        let stream = backend.new_stream(1)?;
        ensure!(stream.get_device_index() == 1);
        ensure!(!stream.is_default());
        ensure!(backend.new_stream(1)? != stream);

        ensure!(matches!(backend.new_stream(2), Err(StreamError::InvalidDevice(_))));
        let foreign = Stream::new(Device::xpu(0), 1);
        ensure!(matches!(backend.exchange_stream(&foreign), Err(StreamError::DeviceMismatch { .. })));
        let unknown = Stream::new(Device::cuda(0), 1000);
        ensure!(matches!(backend.exchange_stream(&unknown), Err(StreamError::UnknownStream(_))));
        Ok(())
    }

    #[test]
    fn current_device_streams_resolve_to_device_index() -> anyhow::Result<()> {
        let backend = cuda_backend(2);
        let flag = Arc::new(AtomicBool::new(false));
        let current_default = Stream::new(Device::cuda(Device::CURRENT_INDEX), Stream::DEFAULT_ID);
        backend.launch_on(&current_default, {
            let flag = flag.clone();
            move || {
                std::thread::sleep(Duration::from_millis(50));
                flag.store(true, Ordering::SeqCst);
            }
        })?;
        // 与0号设备的default stream是同一条队列
        backend.synchronize_stream(&backend.default_stream(0)?)?;
        ensure!(flag.load(Ordering::SeqCst));

        let pooled = backend.new_stream(0)?;
        let by_current = Stream::new(Device::cuda(Device::CURRENT_INDEX), pooled.get_id());
        let previous = backend.exchange_stream(&by_current)?;
        ensure!(previous == backend.default_stream(0)?);
        ensure!(backend.current_stream(0)? == pooled);
        let event = backend.record_event(&by_current, EventFlagsBuilder::default().build())?;
        ensure!(event.stream() == pooled);
        Ok(())
    }

    #[test]
    fn exchange_switches_current_device() -> anyhow::Result<()> {
        let backend = cuda_backend(2);
        ensure!(backend.current_device() == 0);
        let side = backend.new_stream(1)?;

        let previous = backend.exchange_stream(&side)?;
        ensure!(previous == backend.default_stream(1)?);
        ensure!(backend.current_device() == 1);
        ensure!(backend.current_stream(Device::CURRENT_INDEX)? == side);
        ensure!(backend.current_stream(0)?.is_default());

        ensure!(backend.set_device(0)? == 1);
        ensure!(backend.current_stream(Device::CURRENT_INDEX)? == backend.default_stream(0)?);
        ensure!(matches!(backend.set_device(2), Err(StreamError::InvalidDevice(_))));
        Ok(())
    }

    #[test]
    fn current_stream_is_thread_local() -> anyhow::Result<()> {
        let backend = Arc::new(cuda_backend(1));
        let stream = backend.new_stream(0)?;
        backend.exchange_stream(&stream)?;
        ensure!(backend.current_stream(0)? == stream);

        let other = std::thread::spawn({
            let backend = backend.clone();
            move || backend.current_stream(0).map(|s| s.is_default())
        })
        .join()
        .expect("thread panicked")?;
        ensure!(other);
        Ok(())
    }

    #[test]
    fn work_runs_in_order() -> anyhow::Result<()> {
        let backend = cuda_backend(1);
        let stream = backend.new_stream(0)?;
        let (sender, receiver) = mpsc::channel();
        for i in 0..16 {
            let sender = sender.clone();
            backend.launch_on(&stream, move || sender.send(i).unwrap())?;
        }
        backend.synchronize_stream(&stream)?;
        drop(sender);
        ensure!(receiver.iter().collect::<Vec<_>>() == (0..16).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn event_query_and_timing() -> anyhow::Result<()> {
        let backend = cuda_backend(1);
        let stream = backend.new_stream(0)?;
        let timed = EventFlagsBuilder::default().enable_timing(true).build();

        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let start = backend.record_event(&stream, timed)?;
        backend.launch_on(&stream, move || {
            let _ = gate_rx.recv();
            std::thread::sleep(Duration::from_millis(20));
        })?;
        let end = backend.record_event(&stream, timed)?;
        ensure!(!end.query()?);

        gate_tx.send(())?;
        end.synchronize()?;
        ensure!(start.query()? && end.query()?);
        let elapsed = start.elapsed_time(&end)?;
        ensure!(elapsed >= 20.0, "elapsed {elapsed}");

        let untimed = backend.record_event(&stream, EventFlagsBuilder::default().build())?;
        ensure!(matches!(start.elapsed_time(&untimed), Err(StreamError::TimingDisabled)));
        Ok(())
    }

    #[test]
    fn panicked_worker_abandons_events() -> anyhow::Result<()> {
        let backend = cuda_backend(1);
        let stream = backend.new_stream(0)?;
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        backend.launch_on(&stream, move || {
            let _ = gate_rx.recv();
            panic!("kernel fault");
        })?;
        let event = backend.record_event(&stream, EventFlagsBuilder::default().build())?;
        gate_tx.send(())?;
        ensure!(matches!(event.synchronize(), Err(StreamError::Disconnected(_))));
        ensure!(matches!(event.raw().query(), Err(StreamError::Disconnected(_))));
        Ok(())
    }

    #[test]
    fn drop_drains_queued_work() -> anyhow::Result<()> {
        let flag = Arc::new(AtomicBool::new(false));
        {
            let backend = cuda_backend(1);
            backend.launch(0, {
                let flag = flag.clone();
                move || {
                    std::thread::sleep(Duration::from_millis(20));
                    flag.store(true, Ordering::SeqCst);
                }
            })?;
        }
        ensure!(flag.load(Ordering::SeqCst));
        Ok(())
    }

    #[tokio::test]
    async fn await_event() -> anyhow::Result<()> {
        let backend = cuda_backend(1);
        let stream = backend.new_stream(0)?;
        let flag = Arc::new(AtomicBool::new(false));
        backend.launch_on(&stream, {
            let flag = flag.clone();
            move || {
                std::thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::SeqCst);
            }
        })?;
        backend.record_event(&stream, EventFlagsBuilder::default().build())?.await?;
        ensure!(flag.load(Ordering::SeqCst));
        Ok(())
    }
}
