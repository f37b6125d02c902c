//! Resource governor: pressure zones, admission control, predictive throttling

#[allow(clippy::module_inception)]
mod governor;
mod predictor;
mod probe;
mod snapshot;
mod zone;

pub use governor::{
    Admission, GovernorConfig, GovernorEvent, GovernorView, ResourceGovernor, UsageTotals,
    ZoneEntry, ZoneHook,
};
pub use predictor::{Forecast, UsagePredictor};
pub use probe::{ManualProbe, ProbeReading, ResourceProbe, SystemProbe};
pub use snapshot::{
    ResourceSnapshot, CHAIN_WEIGHT, CPU_WEIGHT, MEMORY_WEIGHT, RATE_LIMIT_WEIGHT, TOKEN_WEIGHT,
};
pub use zone::Zone;
