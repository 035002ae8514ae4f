//! PCAP 流量查询工具
//!
//! 解析经典 pcap 格式（.pcap / .cap，小端或大端，微秒或纳秒时间戳），
//! 解码 Ethernet + IPv4 下的 TCP/UDP/ICMP 头，支持按协议、源/目的地址与端口
//! 过滤，输出协议统计与 Top 源地址，并可导出 CSV / JSON。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::session::JsonMap;
use crate::tools::{Capability, ToolParameter};

/// 解析后的单个数据包摘要
#[derive(Debug, Clone, Serialize)]
pub struct PacketRecord {
    pub index: usize,
    pub timestamp: f64,
    pub protocol: String,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub length: usize,
}

/// 默认返回的数据包条数上限
const DEFAULT_LIMIT: usize = 100;

/// PCAP 查询工具
pub struct PcapQueryTool;

#[async_trait]
impl Capability for PcapQueryTool {
    fn name(&self) -> &str {
        "pcap_query"
    }

    fn description(&self) -> &str {
        "分析 PCAP 网络流量文件（.pcap 或 .cap 格式），解析数据包并输出协议统计、Top 源地址与过滤结果。支持按协议、源/目的 IP 与端口过滤，并可导出 CSV 或 JSON。"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("pcap_file", "string", "PCAP 文件路径（.pcap / .cap）"),
            ToolParameter::optional("protocols", "array", "协议过滤，如 [\"TCP\", \"UDP\"]"),
            ToolParameter::optional("src_ip", "string", "源 IP 过滤"),
            ToolParameter::optional("dst_ip", "string", "目的 IP 过滤"),
            ToolParameter::optional("src_port", "integer", "源端口过滤"),
            ToolParameter::optional("dst_port", "integer", "目的端口过滤"),
            ToolParameter::optional("limit", "integer", "返回数据包条数上限（默认 100）"),
            ToolParameter::optional("export_format", "string", "导出格式：csv 或 json"),
            ToolParameter::optional("export_path", "string", "导出文件路径（默认自动生成）"),
        ]
    }

    async fn execute(&self, args: &JsonMap) -> Result<Value, String> {
        let pcap_file = args
            .get("pcap_file")
            .and_then(Value::as_str)
            .ok_or("pcap_file 必须是字符串")?;
        let path = Path::new(pcap_file);
        if !path.exists() {
            return Err(format!("PCAP 文件不存在: {}", pcap_file));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !matches!(ext.as_deref(), Some("pcap") | Some("cap")) {
            return Err(format!("不支持的文件格式: {}（仅支持 .pcap / .cap）", pcap_file));
        }

        let data = std::fs::read(path).map_err(|e| format!("读取 PCAP 文件失败: {}", e))?;
        let packets = parse_pcap(&data)?;
        let total = packets.len();

        let filters = Filters::from_args(args);
        let filtered: Vec<&PacketRecord> =
            packets.iter().filter(|p| filters.matches(p)).collect();

        // 协议统计与 Top 源地址基于过滤后的全集
        let mut protocol_stats: HashMap<String, usize> = HashMap::new();
        let mut source_counts: HashMap<String, usize> = HashMap::new();
        for p in &filtered {
            *protocol_stats.entry(p.protocol.clone()).or_default() += 1;
            if let Some(src) = &p.src_ip {
                *source_counts.entry(src.clone()).or_default() += 1;
            }
        }
        let mut top_sources: Vec<(String, usize)> = source_counts.into_iter().collect();
        top_sources.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top_sources: Vec<Value> = top_sources
            .into_iter()
            .take(5)
            .map(|(ip, n)| json!({"ip": ip, "packets": n}))
            .collect();

        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);
        let shown: Vec<Value> = filtered
            .iter()
            .take(limit)
            .map(|p| serde_json::to_value(p).unwrap_or(Value::Null))
            .collect();

        let export = match args.get("export_format").and_then(Value::as_str) {
            Some(format) => Some(export_packets(&filtered, format, args)?),
            None => None,
        };

        Ok(json!({
            "pcap_file": pcap_file,
            "total_packets": total,
            "filtered_packets": filtered.len(),
            "protocol_stats": protocol_stats,
            "top_sources": top_sources,
            "packets": shown,
            "export": export,
        }))
    }
}

/// 过滤条件
struct Filters {
    protocols: Option<Vec<String>>,
    src_ip: Option<String>,
    dst_ip: Option<String>,
    src_port: Option<u16>,
    dst_port: Option<u16>,
}

impl Filters {
    fn from_args(args: &JsonMap) -> Self {
        let protocols = args.get("protocols").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_uppercase())
                .collect()
        });
        Self {
            protocols,
            src_ip: args
                .get("src_ip")
                .and_then(Value::as_str)
                .map(String::from),
            dst_ip: args
                .get("dst_ip")
                .and_then(Value::as_str)
                .map(String::from),
            src_port: args
                .get("src_port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok()),
            dst_port: args
                .get("dst_port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok()),
        }
    }

    fn matches(&self, p: &PacketRecord) -> bool {
        if let Some(protocols) = &self.protocols {
            if !protocols.iter().any(|proto| *proto == p.protocol) {
                return false;
            }
        }
        if let Some(src) = &self.src_ip {
            if p.src_ip.as_deref() != Some(src.as_str()) {
                return false;
            }
        }
        if let Some(dst) = &self.dst_ip {
            if p.dst_ip.as_deref() != Some(dst.as_str()) {
                return false;
            }
        }
        if let Some(port) = self.src_port {
            if p.src_port != Some(port) {
                return false;
            }
        }
        if let Some(port) = self.dst_port {
            if p.dst_port != Some(port) {
                return false;
            }
        }
        true
    }
}

/// 解析经典 pcap 文件
pub(crate) fn parse_pcap(data: &[u8]) -> Result<Vec<PacketRecord>, String> {
    if data.len() < 24 {
        return Err("文件过小，不是有效的 pcap 文件".to_string());
    }
    let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    // (小端?, 纳秒?)
    let (little_endian, nanos) = match magic {
        0xa1b2_c3d4 => (true, false),
        0xa1b2_3c4d => (true, true),
        0xd4c3_b2a1 => (false, false),
        0x4d3c_b2a1 => (false, true),
        _ => return Err(format!("无法识别的 pcap magic: {:#010x}", magic)),
    };

    let read_u32 = |offset: usize| -> u32 {
        let b = [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ];
        if little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        }
    };

    let linktype = read_u32(20);
    if linktype != 1 {
        return Err(format!("仅支持以太网链路类型 (linktype=1)，实际为 {}", linktype));
    }

    let mut packets = Vec::new();
    let mut offset = 24usize;
    let mut index = 0usize;
    let frac_divisor = if nanos { 1e9 } else { 1e6 };

    while offset + 16 <= data.len() {
        let ts_sec = read_u32(offset);
        let ts_frac = read_u32(offset + 4);
        let incl_len = read_u32(offset + 8) as usize;
        let orig_len = read_u32(offset + 12) as usize;
        let payload_start = offset + 16;
        let payload_end = payload_start + incl_len;
        if payload_end > data.len() {
            // 截断的尾包：丢弃
            break;
        }
        let payload = &data[payload_start..payload_end];
        index += 1;

        let (protocol, src_ip, dst_ip, src_port, dst_port) = decode_ethernet(payload);
        packets.push(PacketRecord {
            index,
            timestamp: ts_sec as f64 + ts_frac as f64 / frac_divisor,
            protocol,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            length: orig_len,
        });
        offset = payload_end;
    }

    Ok(packets)
}

type DecodedPacket = (
    String,
    Option<String>,
    Option<String>,
    Option<u16>,
    Option<u16>,
);

/// 解码以太网帧：返回（协议名, 源 IP, 目的 IP, 源端口, 目的端口）
fn decode_ethernet(payload: &[u8]) -> DecodedPacket {
    if payload.len() < 14 {
        return ("OTHER".to_string(), None, None, None, None);
    }
    let ethertype = u16::from_be_bytes([payload[12], payload[13]]);
    match ethertype {
        0x0800 => decode_ipv4(&payload[14..]),
        0x0806 => ("ARP".to_string(), None, None, None, None),
        0x86dd => ("IPV6".to_string(), None, None, None, None),
        _ => ("OTHER".to_string(), None, None, None, None),
    }
}

fn decode_ipv4(ip: &[u8]) -> DecodedPacket {
    if ip.len() < 20 {
        return ("OTHER".to_string(), None, None, None, None);
    }
    let ihl = ((ip[0] & 0x0f) as usize) * 4;
    if ihl < 20 || ip.len() < ihl {
        return ("OTHER".to_string(), None, None, None, None);
    }
    let src = format!("{}.{}.{}.{}", ip[12], ip[13], ip[14], ip[15]);
    let dst = format!("{}.{}.{}.{}", ip[16], ip[17], ip[18], ip[19]);
    let l4 = &ip[ihl..];

    match ip[9] {
        6 | 17 => {
            let protocol = if ip[9] == 6 { "TCP" } else { "UDP" };
            let (src_port, dst_port) = if l4.len() >= 4 {
                (
                    Some(u16::from_be_bytes([l4[0], l4[1]])),
                    Some(u16::from_be_bytes([l4[2], l4[3]])),
                )
            } else {
                (None, None)
            };
            (protocol.to_string(), Some(src), Some(dst), src_port, dst_port)
        }
        1 => ("ICMP".to_string(), Some(src), Some(dst), None, None),
        _ => ("IPV4".to_string(), Some(src), Some(dst), None, None),
    }
}

/// 导出过滤结果为 CSV / JSON 文件
fn export_packets(
    packets: &[&PacketRecord],
    format: &str,
    args: &JsonMap,
) -> Result<Value, String> {
    let format = format.to_lowercase();
    if format != "csv" && format != "json" {
        return Err(format!("不支持的导出格式: {}（支持 csv, json）", format));
    }

    let path = match args.get("export_path").and_then(Value::as_str) {
        Some(p) => p.to_string(),
        None => format!(
            "pcap_export_{}.{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S"),
            format
        ),
    };

    let content = if format == "csv" {
        let mut out =
            String::from("index,timestamp,protocol,src_ip,src_port,dst_ip,dst_port,length\n");
        for p in packets {
            out.push_str(&format!(
                "{},{:.6},{},{},{},{},{},{}\n",
                p.index,
                p.timestamp,
                p.protocol,
                p.src_ip.as_deref().unwrap_or(""),
                p.src_port.map(|v| v.to_string()).unwrap_or_default(),
                p.dst_ip.as_deref().unwrap_or(""),
                p.dst_port.map(|v| v.to_string()).unwrap_or_default(),
                p.length,
            ));
        }
        out
    } else {
        serde_json::to_string_pretty(packets).map_err(|e| format!("序列化失败: {}", e))?
    };

    std::fs::write(&path, content).map_err(|e| format!("写入导出文件失败: {}", e))?;
    Ok(json!({ "format": format, "path": path, "records": packets.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// 小端微秒 pcap 全局头（linktype=1）
    fn pcap_header() -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes()); // magic
        h.extend_from_slice(&2u16.to_le_bytes()); // major
        h.extend_from_slice(&4u16.to_le_bytes()); // minor
        h.extend_from_slice(&0u32.to_le_bytes()); // thiszone
        h.extend_from_slice(&0u32.to_le_bytes()); // sigfigs
        h.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
        h.extend_from_slice(&1u32.to_le_bytes()); // linktype ethernet
        h
    }

    /// 构造一个 Ethernet + IPv4 + TCP/UDP 包
    fn packet(ts_sec: u32, proto: u8, src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0u8; 6]); // dst mac
        frame.extend_from_slice(&[0u8; 6]); // src mac
        frame.extend_from_slice(&0x0800u16.to_be_bytes()); // ethertype IPv4

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45; // version 4, ihl 5
        ip[9] = proto;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        frame.extend_from_slice(&ip);

        frame.extend_from_slice(&sport.to_be_bytes());
        frame.extend_from_slice(&dport.to_be_bytes());
        frame.extend_from_slice(&[0u8; 16]); // 其余 L4 头

        let mut rec = Vec::new();
        rec.extend_from_slice(&ts_sec.to_le_bytes());
        rec.extend_from_slice(&500_000u32.to_le_bytes()); // 0.5s
        rec.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        rec.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        rec.extend_from_slice(&frame);
        rec
    }

    fn sample_pcap() -> Vec<u8> {
        let mut data = pcap_header();
        data.extend(packet(100, 6, [192, 168, 1, 1], [10, 0, 0, 1], 12345, 80));
        data.extend(packet(101, 17, [192, 168, 1, 2], [10, 0, 0, 1], 5353, 53));
        data.extend(packet(102, 6, [192, 168, 1, 1], [10, 0, 0, 2], 12346, 443));
        data
    }

    #[test]
    fn test_parse_sample_pcap() {
        let packets = parse_pcap(&sample_pcap()).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].protocol, "TCP");
        assert_eq!(packets[0].src_ip.as_deref(), Some("192.168.1.1"));
        assert_eq!(packets[0].dst_port, Some(80));
        assert_eq!(packets[1].protocol, "UDP");
        assert!((packets[0].timestamp - 100.5).abs() < 1e-6);
        assert_eq!(packets[2].index, 3);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let err = parse_pcap(&[0u8; 32]).unwrap_err();
        assert!(err.contains("magic"));
    }

    #[tokio::test]
    async fn test_execute_with_protocol_filter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.pcap");
        let mut f = std::fs::File::create(&file).unwrap();
        f.write_all(&sample_pcap()).unwrap();

        let tool = PcapQueryTool;
        let mut args = JsonMap::new();
        args.insert(
            "pcap_file".into(),
            Value::String(file.to_string_lossy().into_owned()),
        );
        args.insert("protocols".into(), json!(["TCP"]));

        let result = tool.execute(&args).await.unwrap();
        assert_eq!(result["total_packets"], 3);
        assert_eq!(result["filtered_packets"], 2);
        assert_eq!(result["protocol_stats"]["TCP"], 2);
        assert_eq!(result["top_sources"][0]["ip"], "192.168.1.1");
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_file() {
        let tool = PcapQueryTool;
        let mut args = JsonMap::new();
        args.insert("pcap_file".into(), json!("/nonexistent/capture.pcap"));
        let err = tool.execute(&args).await.unwrap_err();
        assert!(err.contains("不存在"));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sample.cap");
        std::fs::write(&file, sample_pcap()).unwrap();
        let export = dir.path().join("out.csv");

        let tool = PcapQueryTool;
        let mut args = JsonMap::new();
        args.insert("pcap_file".into(), json!(file.to_string_lossy()));
        args.insert("export_format".into(), json!("csv"));
        args.insert("export_path".into(), json!(export.to_string_lossy()));

        let result = tool.execute(&args).await.unwrap();
        assert_eq!(result["export"]["records"], 3);
        let content = std::fs::read_to_string(&export).unwrap();
        assert!(content.starts_with("index,timestamp,protocol"));
        assert_eq!(content.lines().count(), 4);
    }
}
