use std::fmt;

/// 加速器的设备类型,派发时对其进行模式匹配而非字符串比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cuda,
    Xpu,
    /// 其他加速器类型(如mps、hpu),shim对其不做任何处理
    Other(&'static str),
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            DeviceType::Cuda => "cuda",
            DeviceType::Xpu => "xpu",
            DeviceType::Other(name) => name,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 设备类型加上设备下标,下标为-1时表示当前设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device {
    device_type: DeviceType,
    index: i8,
}

impl Device {
    pub const CURRENT_INDEX: i8 = -1;

    pub fn new(device_type: DeviceType, index: i8) -> Self {
        Self { device_type, index }
    }

    pub fn cuda(index: i8) -> Self {
        Self::new(DeviceType::Cuda, index)
    }

    pub fn xpu(index: i8) -> Self {
        Self::new(DeviceType::Xpu, index)
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn index(&self) -> i8 {
        self.index
    }

    pub fn is_current(&self) -> bool {
        self.index == Self::CURRENT_INDEX
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_current() {
            write!(f, "{}", self.device_type)
        } else {
            write!(f, "{}:{}", self.device_type, self.index)
        }
    }
}
