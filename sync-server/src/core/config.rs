use std::time::Duration;

/// 服务器配置 - 同步引擎的所有配置项
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | SYNC_TCP_PORT | 8090 | TCP 监听端口 |
/// | RECONCILE_INTERVAL_SECS | 120 | 全量快照对账周期（秒） |
/// | DELTA_LOG_CAPACITY | 256 | 每个订单保留的增量条数 |
/// | MUTATION_RETRY_LIMIT | 5 | 乐观重试预算 |
/// | SEND_QUEUE_CAPACITY | 64 | 每连接出站队列容量 |
/// | UPDATE_CHANNEL_CAPACITY | 4096 | 存储层广播通道容量 |
/// | LIVENESS_TIMEOUT_SECS | 60 | 静默连接判定超时 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (未设置) | 日志文件目录（可选） |
///
/// 对账周期和增量日志上限是可调参数而非固定契约，
/// 部署方按流量和内存预算调整。
///
/// # 示例
///
/// ```ignore
/// SYNC_TCP_PORT=9000 RECONCILE_INTERVAL_SECS=30 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP 监听端口
    pub tcp_port: u16,
    /// 全量快照对账周期（秒）
    pub reconcile_interval_secs: u64,
    /// 每个订单保留的增量条数（重连回放上限）
    pub delta_log_capacity: usize,
    /// 乐观重试预算（超限返回 ConcurrentModification）
    pub mutation_retry_limit: u32,
    /// 每连接出站队列容量（满则标记 Degraded 并丢弃）
    pub send_queue_capacity: usize,
    /// 存储层更新广播通道容量
    pub update_channel_capacity: usize,
    /// 静默连接判定超时（秒）
    pub liveness_timeout_secs: u64,
    /// 日志级别
    pub log_level: String,
    /// 日志文件目录（可选）
    pub log_dir: Option<String>,
    /// 是否使用 JSON 日志格式（生产环境）
    pub log_json: bool,
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            tcp_port: std::env::var("SYNC_TCP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8090),
            reconcile_interval_secs: std::env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(120),
            delta_log_capacity: std::env::var("DELTA_LOG_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(256),
            mutation_retry_limit: std::env::var("MUTATION_RETRY_LIMIT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5),
            send_queue_capacity: std::env::var("SEND_QUEUE_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(64),
            update_channel_capacity: std::env::var("UPDATE_CHANNEL_CAPACITY")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(4096),
            liveness_timeout_secs: std::env::var("LIVENESS_TIMEOUT_SECS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(60),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok(),
            log_json: std::env::var("LOG_JSON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(tcp_port: u16, reconcile_interval_secs: u64) -> Self {
        let mut config = Self::from_env();
        config.tcp_port = tcp_port;
        config.reconcile_interval_secs = reconcile_interval_secs;
        config
    }

    /// TCP 监听地址
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.tcp_port)
    }

    /// 对账周期
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// 静默连接判定超时
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
