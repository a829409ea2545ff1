use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::error::{StreamError, StreamResult};
use crate::wrappers::accelerator::event::RawEvent;
use crate::wrappers::accelerator::stream::Stream;

#[derive(Debug, Clone, Copy)]
enum EventState {
    Pending,
    /// 启用计时时记录完成的时刻
    Completed(Option<Instant>),
    /// 记录event的任务在执行前被丢弃(stream的worker已退出)
    Abandoned,
}

#[derive(Debug)]
pub struct HostEvent {
    stream: Stream,
    timing: bool,
    state: Mutex<EventState>,
    completed: Condvar,
}

impl HostEvent {
    pub(super) fn new(stream: Stream, timing: bool) -> Self {
        Self { stream, timing, state: Mutex::new(EventState::Pending), completed: Condvar::new() }
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, state: EventState) {
        let mut current = self.lock();
        if matches!(*current, EventState::Pending) {
            *current = state;
            self.completed.notify_all();
        }
    }

    fn wait(&self) -> StreamResult<Option<Instant>> {
        let state = self
            .completed
            .wait_while(self.lock(), |state| matches!(state, EventState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            EventState::Completed(at) => Ok(at),
            EventState::Abandoned => Err(StreamError::Disconnected(self.stream)),
            EventState::Pending => unreachable!("waited until the event settled"),
        }
    }
}

impl RawEvent for HostEvent {
    fn query(&self) -> StreamResult<bool> {
        match *self.lock() {
            EventState::Pending => Ok(false),
            EventState::Completed(_) => Ok(true),
            EventState::Abandoned => Err(StreamError::Disconnected(self.stream)),
        }
    }

    fn synchronize(&self) -> StreamResult<()> {
        self.wait().map(drop)
    }

    fn elapsed_time(&self, end: &dyn RawEvent) -> StreamResult<f32> {
        let end = end.as_any().downcast_ref::<HostEvent>().ok_or_else(|| StreamError::Runtime {
            device_type: self.stream.device_type(),
            msg: "elapsed time between events of different backends".to_string(),
        })?;
        let (Some(start_at), Some(end_at)) = (self.wait()?, end.wait()?) else {
            return Err(StreamError::TimingDisabled);
        };
        let millis = match end_at.checked_duration_since(start_at) {
            Some(elapsed) => elapsed.as_secs_f32() * 1000.0,
            None => -(start_at.duration_since(end_at).as_secs_f32() * 1000.0),
        };
        Ok(millis)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 放入stream队列中的event标记,被执行时完成event,未执行就被丢弃时将event标记为abandoned
pub(super) struct EventSignal(Arc<HostEvent>);

impl EventSignal {
    pub(super) fn new(event: Arc<HostEvent>) -> Self {
        Self(event)
    }

    pub(super) fn fire(self) {
        let at = self.0.timing.then(Instant::now);
        self.0.settle(EventState::Completed(at));
    }
}

impl Drop for EventSignal {
    fn drop(&mut self) {
        self.0.settle(EventState::Abandoned);
    }
}

