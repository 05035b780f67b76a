mod aimd;
mod config;
mod datagram;
mod error;
mod rtt_estimator;
mod sent_history;
mod statistics;
mod traffic_control;
mod window;

pub use aimd::{AimdTrafficControl, TrafficControlConnectionId};
pub use config::TrafficControlConfig;
pub use datagram::{DatagramControlData, DatagramInfo};
pub use error::TrafficControlError;
pub use rtt_estimator::RttEstimator;
pub use sent_history::{SentHistory, SENT_HISTORY_LENGTH};
pub use statistics::{CongestionState, TrafficStatistics};
pub use traffic_control::TrafficControl;
pub use window::CongestionWindow;
