// 传输进度观察器
//
// 文件以 64KB 为粒度流式送入请求体，每读一块：
// 1. 算累计值的增量（钳到 ≥0）喂给全局带宽计数器
// 2. 先查 should_stop 谓词，要求停止立刻中断传输
// 3. 再投递 (已上传, 总量) 进度回调
//
// 取消只有这一处协作点：INIT/POLL/删除这类短请求不做中途取消。

use crate::common::BandwidthCounter;
use crate::error::{HostError, Result};
use futures::Stream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// 流式读取块大小
const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// 进度回调：(已上传字节, 总字节)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// 取消谓词：返回 true 表示要求中止
pub type StopFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// 一次上传调用附带的回调组
#[derive(Clone, Default)]
pub struct UploadHooks {
    pub on_progress: Option<ProgressFn>,
    pub should_stop: Option<StopFn>,
}

impl UploadHooks {
    /// 只带进度回调
    pub fn with_progress(f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        Self {
            on_progress: Some(Arc::new(f)),
            should_stop: None,
        }
    }
}

/// 单次传输的进度观察器
pub struct TransferObserver {
    bandwidth: Arc<BandwidthCounter>,
    hooks: UploadHooks,
    total: u64,
    uploaded: AtomicU64,
    last_uploaded: AtomicU64,
    cancelled: AtomicBool,
}

impl TransferObserver {
    pub fn new(bandwidth: Arc<BandwidthCounter>, hooks: UploadHooks, total: u64) -> Self {
        Self {
            bandwidth,
            hooks,
            total,
            uploaded: AtomicU64::new(0),
            last_uploaded: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// 是否因 should_stop 中断过
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 又送出一块数据
    pub fn on_chunk(&self, len: usize) -> Result<()> {
        let uploaded = self.uploaded.fetch_add(len as u64, Ordering::SeqCst) + len as u64;
        self.record_cumulative(uploaded)
    }

    /// 按累计已上传字节数记账
    ///
    /// 传输层报告的累计值理论上单调，但做防御：
    /// 增量钳到 ≥0，且只在真有增量时推进 last_uploaded。
    pub fn record_cumulative(&self, uploaded: u64) -> Result<()> {
        let last = self.last_uploaded.load(Ordering::SeqCst);
        let delta = uploaded.saturating_sub(last);
        if delta > 0 {
            self.bandwidth.add(delta);
            self.last_uploaded.store(uploaded, Ordering::SeqCst);
        }

        if let Some(should_stop) = &self.hooks.should_stop {
            if should_stop() {
                self.cancelled.store(true, Ordering::SeqCst);
                return Err(HostError::Cancelled);
            }
        }

        if let Some(on_progress) = &self.hooks.on_progress {
            if self.total > 0 {
                on_progress(uploaded, self.total);
            }
        }

        Ok(())
    }
}

/// 把文件包装成带进度记账的字节流（用作请求体）
///
/// 观察器要求停止时流产生错误，reqwest 随之中断整个请求。
pub fn progress_stream(
    file: tokio::fs::File,
    observer: Arc<TransferObserver>,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    futures::stream::try_unfold((file, observer), |(mut file, observer)| async move {
        let mut buffer = vec![0u8; TRANSFER_CHUNK_SIZE];
        let bytes_read = file.read(&mut buffer).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        buffer.truncate(bytes_read);

        observer.on_chunk(bytes_read).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Interrupted, "上传已取消")
        })?;

        Ok(Some((buffer, (file, observer))))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tempfile::NamedTempFile;

    fn observer_with(
        bandwidth: &Arc<BandwidthCounter>,
        hooks: UploadHooks,
        total: u64,
    ) -> TransferObserver {
        TransferObserver::new(Arc::clone(bandwidth), hooks, total)
    }

    #[test]
    fn test_delta_feeds_bandwidth() {
        let bandwidth = Arc::new(BandwidthCounter::new());
        let obs = observer_with(&bandwidth, UploadHooks::default(), 1000);

        obs.record_cumulative(100).unwrap();
        obs.record_cumulative(250).unwrap();
        assert_eq!(bandwidth.get(), 250);
    }

    #[test]
    fn test_delta_never_negative_on_transient_decrease() {
        let bandwidth = Arc::new(BandwidthCounter::new());
        let obs = observer_with(&bandwidth, UploadHooks::default(), 1000);

        obs.record_cumulative(100).unwrap();
        // 传输层抖动：累计值瞬间回落，增量必须钳为 0
        obs.record_cumulative(80).unwrap();
        assert_eq!(bandwidth.get(), 100);
        // last_uploaded 未被回落值污染，恢复后按旧水位补增量
        obs.record_cumulative(120).unwrap();
        assert_eq!(bandwidth.get(), 120);
    }

    #[test]
    fn test_should_stop_checked_before_progress_callback() {
        let bandwidth = Arc::new(BandwidthCounter::new());
        let progress_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&progress_calls);

        let hooks = UploadHooks {
            on_progress: Some(Arc::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })),
            should_stop: Some(Arc::new(|| true)),
        };
        let obs = observer_with(&bandwidth, hooks, 1000);

        assert!(matches!(
            obs.record_cumulative(100),
            Err(HostError::Cancelled)
        ));
        assert!(obs.was_cancelled());
        // 中止先于回调：进度回调不应被触发
        assert_eq!(progress_calls.load(Ordering::SeqCst), 0);
        // 但带宽增量已经记账（字节确实发出去了）
        assert_eq!(bandwidth.get(), 100);
    }

    #[test]
    fn test_progress_callback_receives_totals() {
        let bandwidth = Arc::new(BandwidthCounter::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let hooks = UploadHooks::with_progress(move |uploaded, total| {
            sink.lock().unwrap().push((uploaded, total));
        });
        let obs = observer_with(&bandwidth, hooks, 200);

        obs.on_chunk(64).unwrap();
        obs.on_chunk(136).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(64, 200), (200, 200)]);
    }

    #[test]
    fn test_zero_total_suppresses_progress_callback() {
        let bandwidth = Arc::new(BandwidthCounter::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&calls);

        let hooks = UploadHooks::with_progress(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        let obs = observer_with(&bandwidth, hooks, 0);
        obs.on_chunk(10).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_progress_stream_reads_whole_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        let content = vec![7u8; 150 * 1024];
        tmp.write_all(&content).unwrap();
        tmp.flush().unwrap();

        let bandwidth = Arc::new(BandwidthCounter::new());
        let obs = Arc::new(observer_with(
            &bandwidth,
            UploadHooks::default(),
            content.len() as u64,
        ));

        let file = tokio::fs::File::open(tmp.path()).await.unwrap();
        let chunks: Vec<Vec<u8>> = progress_stream(file, Arc::clone(&obs))
            .try_collect()
            .await
            .unwrap();

        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, content.len());
        assert_eq!(bandwidth.get(), content.len() as u64);
    }

    #[tokio::test]
    async fn test_progress_stream_aborts_on_stop() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![1u8; 300 * 1024]).unwrap();
        tmp.flush().unwrap();

        let bandwidth = Arc::new(BandwidthCounter::new());
        let hooks = UploadHooks {
            on_progress: None,
            should_stop: Some(Arc::new(|| true)),
        };
        let obs = Arc::new(observer_with(&bandwidth, hooks, 300 * 1024));

        let file = tokio::fs::File::open(tmp.path()).await.unwrap();
        let result: std::io::Result<Vec<Vec<u8>>> =
            progress_stream(file, Arc::clone(&obs)).try_collect().await;

        assert!(result.is_err());
        assert!(obs.was_cancelled());
    }
}
