use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use torchft_stream::{
    get_stream_context, install_backend, record_event, runtime, synchronize, uninstall_backend,
    Device, DeviceType, GuardScope, HostBackend, HostBackendConfigBuilder, Stream, StreamBackend,
    StreamError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// 进程级runtime是全局状态,整个流程放在同一个测试中按顺序执行
#[test]
fn process_wide_runtime() -> anyhow::Result<()> {
    init_tracing();

    // 没有安装backend时所有操作都是no-op
    let stray = Stream::new(Device::cuda(0), 7);
    ensure!(get_stream_context(Some(&stray)).is_noop());
    record_event()?;
    synchronize()?;

    let cuda: Arc<HostBackend> =
        Arc::new(HostBackendConfigBuilder::default().device_type(DeviceType::Cuda).build().into_backend());
    install_backend(cuda.clone())?;
    ensure!(matches!(install_backend(cuda.clone()), Err(StreamError::AlreadyRegistered(_))));
    ensure!(runtime().is_accelerator_available());

    let default = cuda.current_stream(0)?;
    let side = cuda.new_stream(0)?;
    let flag = Arc::new(AtomicBool::new(false));
    get_stream_context(Some(&side)).scope(|| {
        ensure!(cuda.current_stream(0)? == side);
        cuda.launch(0, {
            let flag = flag.clone();
            move || {
                std::thread::sleep(Duration::from_millis(30));
                flag.store(true, Ordering::SeqCst);
            }
        })?;
        record_event()?;
        let recorded_on = runtime().record_current_stream_event()?.map(|event| event.stream());
        ensure!(recorded_on == Some(side));
        // 等待的是current stream,即side
        synchronize()?;
        ensure!(flag.load(Ordering::SeqCst));
        Ok(())
    })?;
    ensure!(cuda.current_stream(0)? == default);

    // xpu未安装,对应的stream退化为no-op
    let xpu_stream = Stream::new(Device::xpu(0), 1);
    ensure!(get_stream_context(Some(&xpu_stream)).is_noop());

    ensure!(uninstall_backend(DeviceType::Cuda).is_some());
    ensure!(!runtime().is_accelerator_available());
    ensure!(get_stream_context(Some(&side)).is_noop());
    synchronize()?;
    Ok(())
}
