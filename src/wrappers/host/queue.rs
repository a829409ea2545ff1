use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::error::{StreamError, StreamResult};
use crate::wrappers::accelerator::stream::Stream;

pub(super) type Task = Box<dyn FnOnce() + Send + 'static>;

/// 一条stream对应的有序队列,由单独的worker线程按提交顺序执行
pub(super) struct StreamQueue {
    stream: Stream,
    sender: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamQueue {
    pub(super) fn spawn(stream: Stream) -> StreamResult<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(stream.to_string())
            .spawn(move || {
                for task in receiver {
                    task();
                }
                trace!(%stream, "stream worker exited");
            })
            .map_err(|err| StreamError::Runtime {
                device_type: stream.device_type(),
                msg: format!("failed to spawn worker for {stream}, err: {err}"),
            })?;
        Ok(Self { stream, sender: Some(sender), worker: Some(worker) })
    }

    pub(super) fn submit(&self, task: Task) -> StreamResult<()> {
        let sender = self.sender.as_ref().ok_or(StreamError::Disconnected(self.stream))?;
        sender.send(task).map_err(|_| StreamError::Disconnected(self.stream))
    }
}

impl Drop for StreamQueue {
    fn drop(&mut self) {
        // 先关闭队列,worker执行完剩余任务后退出
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
