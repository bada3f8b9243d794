pub mod accessor;
pub mod resources;
pub mod sampler;

pub use accessor::{
    AccessorError, FilesystemReading, MetricsAccessor, ProcessAccessor, ProcessInfo,
    SysinfoAccessor, SystemReading,
};
pub use resources::{AlertPhase, AlertState};
pub use sampler::{RisingEdges, Sampler, SamplerSettings};
