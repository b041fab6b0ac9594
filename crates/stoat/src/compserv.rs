// CompServ — the compute-service descriptor.
//
// Declares the degree and kind of parallelism for a build: how many
// replica sub-nets to create, which device each one binds to, and the
// weight-synchronization cadence (`lsb`, in batches).

use stoat_core::Device;

/// Compute-service descriptor handed to `Net::build`.
#[derive(Debug, Clone)]
pub struct CompServ {
    devices: Vec<Device>,
    /// Batches between weight synchronizations ("loss sync batches").
    pub lsb: u64,
}

impl CompServ {
    /// CPU service with one replica per thread. `None` uses all
    /// available parallelism.
    pub fn cpu(threads: Option<usize>) -> Self {
        let threads = threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        CompServ {
            devices: vec![Device::Cpu; threads.max(1)],
            lsb: 1,
        }
    }

    /// GPU service with one replica per listed device.
    pub fn gpu(device_ids: &[usize], lsb: u64) -> Self {
        CompServ {
            devices: device_ids.iter().map(|&id| Device::Gpu(id)).collect(),
            lsb: lsb.max(1),
        }
    }

    /// FPGA service with one replica per listed device.
    pub fn fpga(device_ids: &[usize], lsb: u64) -> Self {
        CompServ {
            devices: device_ids.iter().map(|&id| Device::Fpga(id)).collect(),
            lsb: lsb.max(1),
        }
    }

    /// Override the sync cadence.
    pub fn with_lsb(mut self, lsb: u64) -> Self {
        self.lsb = lsb.max(1);
        self
    }

    /// One device per replica, in replica order.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Number of replica sub-nets this service creates.
    pub fn replica_count(&self) -> usize {
        self.devices.len()
    }
}
