use std::fmt;
use std::str::FromStr;

/// Compute device a worker or kernel launch is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host only. For a worker this means no accelerator has been assigned yet.
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    /// CUDA ordinal, or `None` for the host.
    pub fn cuda_index(&self) -> Option<usize> {
        match self {
            Device::Cuda(idx) => Some(*idx),
            Device::Cpu => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device '{0}': expected 'cpu', 'cuda' or 'cuda:N'")]
pub struct ParseDeviceError(String);

/// Parses the `Display` form. Bare `cuda` means ordinal 0.
impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(':') {
            None if s.eq_ignore_ascii_case("cpu") => Ok(Device::Cpu),
            None if s.eq_ignore_ascii_case("cuda") => Ok(Device::Cuda(0)),
            Some((kind, idx)) if kind.eq_ignore_ascii_case("cuda") => idx
                .parse()
                .map(Device::Cuda)
                .map_err(|_| ParseDeviceError(s.to_string())),
            _ => Err(ParseDeviceError(s.to_string())),
        }
    }
}
