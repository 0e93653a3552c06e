// 上传引擎模块
//
// - engine: 标准/多步上传状态机
// - hash: init 阶段要求的流式 MD5
// - progress: 进度记账、带宽增量与协作取消

pub mod engine;
pub mod hash;
pub mod progress;

pub use engine::{UploadExecutor, UploadResult};
pub use progress::{ProgressFn, StopFn, TransferObserver, UploadHooks};
