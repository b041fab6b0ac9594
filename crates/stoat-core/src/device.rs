use std::fmt;

/// Placement tag for a tensor or a whole replica graph.
///
/// Kernels themselves are external collaborators; the tag exists so the
/// net can bind each replica to a compute unit and decide when weight
/// synchronization applies. Device work is assumed synchronous from the
/// orchestrator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Gpu(usize),
    Fpga(usize),
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu(id) => write!(f, "gpu:{id}"),
            Device::Fpga(id) => write!(f, "fpga:{id}"),
        }
    }
}
