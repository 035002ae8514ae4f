//! 网络工具：连通性检测与端口扫描
//!
//! network_ping 优先调用系统 ping（ICMP），系统不支持时回退 TCP 连接测试；
//! port_scan 用信号量限制并发的 TCP connect 扫描，每个端口独立超时，
//! 聚合为单个结果返回。两者都标记为敏感操作。

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use regex::Regex;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::core::session::JsonMap;
use crate::tools::{Capability, ToolParameter};

/// 连通性检测工具（ICMP ping，带 TCP 回退）
pub struct NetworkPingTool;

#[async_trait]
impl Capability for NetworkPingTool {
    fn name(&self) -> &str {
        "network_ping"
    }

    fn description(&self) -> &str {
        "检测目标 IP 地址的网络连通性（使用 ICMP ping，系统不支持时回退 TCP 连接测试）"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("target_ip", "string", "目标 IP 地址或主机名"),
            ToolParameter::optional("count", "integer", "ping 次数（默认 4）"),
            ToolParameter::optional("timeout", "number", "单次超时秒数（默认 3.0）"),
        ]
    }

    fn sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let target_ip = args
            .get("target_ip")
            .and_then(Value::as_str)
            .ok_or("target_ip 必须是字符串")?;
        let count = args
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(4)
            .clamp(1, 20);
        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(3.0)
            .clamp(0.1, 60.0);

        let cmd_args: Vec<String> = if cfg!(target_os = "windows") {
            vec![
                "-n".to_string(),
                count.to_string(),
                "-w".to_string(),
                ((timeout_secs * 1000.0) as u64).to_string(),
            ]
        } else {
            vec![
                "-c".to_string(),
                count.to_string(),
                "-W".to_string(),
                (timeout_secs.ceil() as u64).to_string(),
            ]
        };
        let mut cmd = Command::new("ping");
        cmd.args(&cmd_args).arg(target_ip);

        let overall = Duration::from_secs_f64(timeout_secs * count as f64 + 5.0);
        let output = match tokio::time::timeout(overall, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                // 系统没有 ping 命令
                return tcp_ping_fallback(target_ip, timeout_secs).await;
            }
            Ok(Err(e)) => return Err(format!("ping 命令执行失败: {}", e)),
            Err(_) => return Err("ping 命令执行超时".to_string()),
        };

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let is_reachable = output.status.success();
        let (avg_response_time, packet_loss) = parse_ping_output(&text);

        Ok(json!({
            "target_ip": target_ip,
            "is_reachable": is_reachable,
            "response_time_ms": avg_response_time,
            "packet_loss_percent": packet_loss,
            "ping_count": count,
            "timeout": timeout_secs,
        }))
    }
}

/// 从 ping 输出中提取平均响应时间（ms）与丢包率（%）
fn parse_ping_output(output: &str) -> (Option<f64>, Option<f64>) {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    static LOSS_RE: OnceLock<Regex> = OnceLock::new();
    static LOSS_WIN_RE: OnceLock<Regex> = OnceLock::new();

    let time_re = TIME_RE
        .get_or_init(|| Regex::new(r"(?i)time[=<](\d+(?:\.\d+)?)\s*ms").expect("time regex"));
    let times: Vec<f64> = time_re
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect();
    let avg = if times.is_empty() {
        None
    } else {
        Some((times.iter().sum::<f64>() / times.len() as f64 * 100.0).round() / 100.0)
    };

    let loss_re = LOSS_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("loss regex"));
    let loss_win_re =
        LOSS_WIN_RE.get_or_init(|| Regex::new(r"\((\d+)%").expect("loss regex"));
    let loss = loss_re
        .captures(output)
        .or_else(|| loss_win_re.captures(output))
        .and_then(|c| c[1].parse::<f64>().ok());

    (avg, loss)
}

/// TCP 连接测试回退：依次尝试常用端口，任一可连通即视为可达
async fn tcp_ping_fallback(target_ip: &str, timeout_secs: f64) -> Result<Value, String> {
    const TEST_PORTS: [u16; 4] = [80, 443, 22, 21];
    let timeout = Duration::from_secs_f64(timeout_secs);
    let mut is_reachable = false;
    let mut response_time: Option<f64> = None;

    for port in TEST_PORTS {
        let addr = format!("{}:{}", target_ip, port);
        let started = Instant::now();
        if let Ok(Ok(_)) = tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            is_reachable = true;
            response_time =
                Some((started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0);
            break;
        }
    }

    Ok(json!({
        "target_ip": target_ip,
        "is_reachable": is_reachable,
        "response_time_ms": response_time,
        "timeout": timeout_secs,
        "method": "tcp_fallback",
    }))
}

/// 端口扫描工具：有界并发 TCP connect
pub struct PortScanTool {
    max_concurrency: usize,
}

impl PortScanTool {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }
}

/// 单次扫描的端口数上限
const MAX_SCAN_PORTS: usize = 10_000;

#[async_trait]
impl Capability for PortScanTool {
    fn name(&self) -> &str {
        "port_scan"
    }

    fn description(&self) -> &str {
        "扫描目标 IP 地址的开放端口。支持指定端口范围（如 \"1-1000\"）、列表（如 \"80,443\"）或 \"common\"（常用端口）。"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("target_ip", "string", "目标 IP 地址"),
            ToolParameter::optional(
                "ports",
                "string",
                "端口说明：\"80,443,8080\"、\"1-1000\" 或 \"common\"（默认）",
            ),
            ToolParameter::optional("timeout", "number", "单端口连接超时秒数（默认 5.0）"),
        ]
    }

    fn sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let target_ip = args
            .get("target_ip")
            .and_then(Value::as_str)
            .ok_or("target_ip 必须是字符串")?
            .to_string();
        let ports_spec = args
            .get("ports")
            .and_then(Value::as_str)
            .unwrap_or("common");
        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(5.0)
            .clamp(0.1, 60.0);

        let port_list = parse_ports(ports_spec);
        if port_list.is_empty() {
            return Err(format!("无效的端口范围: {}", ports_spec));
        }
        if port_list.len() > MAX_SCAN_PORTS {
            return Err(format!(
                "端口数量过多（{}），请缩小扫描范围（最多支持 {} 个端口）",
                port_list.len(),
                MAX_SCAN_PORTS
            ));
        }

        let timeout = Duration::from_secs_f64(timeout_secs);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let scans = port_list.iter().map(|&port| {
            let semaphore = semaphore.clone();
            let target = target_ip.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let addr = format!("{}:{}", target, port);
                match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(_)) => (port, true),
                    _ => (port, false),
                }
            }
        });
        let results = join_all(scans).await;

        let mut open_ports: Vec<u16> = results
            .iter()
            .filter(|(_, open)| *open)
            .map(|(port, _)| *port)
            .collect();
        open_ports.sort_unstable();
        let closed_count = port_list.len() - open_ports.len();

        let open_ports_info: Vec<Value> = open_ports
            .iter()
            .map(|&port| {
                json!({
                    "port": port,
                    "service": service_name(port),
                    "status": "open",
                })
            })
            .collect();

        Ok(json!({
            "target_ip": target_ip,
            "open_ports": open_ports,
            "open_ports_info": open_ports_info,
            "closed_ports_count": closed_count,
            "scanned_ports_count": port_list.len(),
            "scan_timeout": timeout_secs,
        }))
    }
}

/// 解析端口说明字符串：common / 逗号列表 / 区间 / 单端口
fn parse_ports(spec: &str) -> Vec<u16> {
    let spec = spec.trim();
    if spec == "common" {
        return vec![
            20, 21, 22, 23, 25, 53, 80, 110, 143, 443, 445, 3306, 3389, 5432, 8080, 8443,
        ];
    }
    if spec.contains(',') {
        return spec
            .split(',')
            .filter_map(|p| p.trim().parse::<u16>().ok())
            .filter(|&p| p >= 1)
            .collect();
    }
    if let Some((start, end)) = spec.split_once('-') {
        let (Ok(start), Ok(end)) = (start.trim().parse::<u32>(), end.trim().parse::<u32>()) else {
            return Vec::new();
        };
        if start == 0 || start > end || end > 65535 {
            return Vec::new();
        }
        return (start..=end).map(|p| p as u16).collect();
    }
    spec.parse::<u16>()
        .ok()
        .filter(|&p| p >= 1)
        .map(|p| vec![p])
        .unwrap_or_default()
}

/// 常见端口到服务名
fn service_name(port: u16) -> &'static str {
    match port {
        20 => "FTP Data",
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        25 => "SMTP",
        53 => "DNS",
        80 => "HTTP",
        110 => "POP3",
        143 => "IMAP",
        443 => "HTTPS",
        445 => "SMB",
        3306 => "MySQL",
        3389 => "RDP",
        5432 => "PostgreSQL",
        8080 => "HTTP-Proxy",
        8443 => "HTTPS-Alt",
        _ => "Unknown",
    }
}
