// =============================================================================
// Risk — governor, loss clustering, statistical monitor, capital anomaly
// =============================================================================

pub mod anomaly;
pub mod governor;
pub mod loss_cluster;
pub mod statistical;

pub use anomaly::CapitalAnomalyGuard;
pub use governor::{RiskGovernor, RiskGovernorConfig, RiskMetrics};
pub use loss_cluster::LossClusterMonitor;
pub use statistical::StatisticalMonitor;
