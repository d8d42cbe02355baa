//! # Prometheus 指标收集模块
//!
//! 为网关的连接层和协议层提供统一的 Prometheus 指标收集能力。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static GATEWAY_METRICS: Lazy<GatewayMetrics> = Lazy::new(GatewayMetrics::new);

/// 网关指标
pub struct GatewayMetrics {
    /// 当前活跃连接数
    pub active_connections: IntGauge,
    /// 通道事件总数（active / inactive / read / write / exception）
    pub channel_events_total: IntCounterVec,
    /// 收发帧总数（inbound / outbound）
    pub packets_total: IntCounterVec,
    /// 加解密失败回退为明文的次数
    pub cipher_fallback_total: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let active_connections = IntGauge::new(
            "gateway_active_connections",
            "Number of live gateway connections",
        )
        .expect("Failed to create gateway_active_connections metric");

        let channel_events_total = IntCounterVec::new(
            Opts::new(
                "gateway_channel_events_total",
                "Total number of channel lifecycle events",
            ),
            &["event"],
        )
        .expect("Failed to create gateway_channel_events_total metric");

        let packets_total = IntCounterVec::new(
            Opts::new("gateway_packets_total", "Total number of packets"),
            &["direction"],
        )
        .expect("Failed to create gateway_packets_total metric");

        let cipher_fallback_total = IntCounter::new(
            "gateway_cipher_fallback_total",
            "Total number of cipher fallbacks to plaintext",
        )
        .expect("Failed to create gateway_cipher_fallback_total metric");

        // 注册指标，忽略重复注册错误（测试中可能会重复创建）
        let _ = REGISTRY.register(Box::new(active_connections.clone()));
        let _ = REGISTRY.register(Box::new(channel_events_total.clone()));
        let _ = REGISTRY.register(Box::new(packets_total.clone()));
        let _ = REGISTRY.register(Box::new(cipher_fallback_total.clone()));

        Self {
            active_connections,
            channel_events_total,
            packets_total,
            cipher_fallback_total,
        }
    }

    /// 进程级共享实例
    pub fn global() -> &'static GatewayMetrics {
        &GATEWAY_METRICS
    }

    pub fn record_event(&self, event: &str) {
        self.channel_events_total.with_label_values(&[event]).inc();
    }

    pub fn record_packet(&self, direction: &str) {
        self.packets_total.with_label_values(&[direction]).inc();
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以文本格式导出注册表中的全部指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
