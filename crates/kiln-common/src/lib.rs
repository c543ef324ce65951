pub mod gpu;
pub mod setup_state;
pub mod telemetry;

pub use gpu::{min_memory_mb, DriverInfo, GpuArch, GpuDescriptor, GpuTopology};
pub use setup_state::{
    DiskMetrics, Endpoints, InferenceSettings, KeyState, KeyWorkflow, NetworkSelection,
    RuntimeVersions, SecurityFlags, SetupState, STATE_VERSION,
};
