//! 安全能力工具箱与注册表
//!
//! 所有能力实现 Capability trait，由 CapabilityRegistry 按名注册、校验参数并
//! 归一化执行结果。

pub mod network;
pub mod notification;
pub mod pcap;
pub mod registry;
pub mod report;
pub mod schema;
pub mod threatbook;

pub use network::{NetworkPingTool, PortScanTool};
pub use notification::NotificationTool;
pub use pcap::PcapQueryTool;
pub use registry::{Capability, CapabilityOutcome, CapabilityRegistry, ToolParameter};
pub use report::ReportGeneratorTool;
pub use schema::decision_schema_json;
pub use threatbook::ThreatBookIpQueryTool;
