// 全局带宽计数器
//
// 各上传 worker 的进度回调把字节增量累加到这里，
// 由外部的带宽平滑/展示组件周期性 drain 消费。

use std::sync::atomic::{AtomicU64, Ordering};

/// 线程安全的字节累加器
///
/// 写入端是任意多个上传任务（只做 add），
/// 消费端是单个聚合器（drain 取走并清零）。
#[derive(Debug, Default)]
pub struct BandwidthCounter {
    bytes: AtomicU64,
}

impl BandwidthCounter {
    /// 创建新的计数器
    pub fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
        }
    }

    /// 累加已上传字节数
    pub fn add(&self, amount: u64) {
        self.bytes.fetch_add(amount, Ordering::Relaxed);
    }

    /// 读取当前累计值（不清零）
    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// 取走当前累计值并清零（聚合器专用）
    pub fn drain(&self) -> u64 {
        self.bytes.swap(0, Ordering::Relaxed)
    }

    /// 清零
    pub fn reset(&self) {
        self.bytes.store(0, Ordering::Relaxed);
    }
}
