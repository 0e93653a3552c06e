// 文件哈希计算
//
// 多步上传的 init 请求可能要求带上整文件 MD5（主机靠它做秒传/去重判断）。
// 固定 8KB 块流式读取，文件 I/O 放进阻塞线程池，不占用异步调度。

use crate::error::Result;
use md5::Context as Md5Context;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 流式读取块大小
const HASH_CHUNK_SIZE: usize = 8 * 1024;

/// 计算文件 MD5（十六进制小写）
pub async fn md5_file(path: &Path) -> Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || md5_file_sync(&path))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

fn md5_file_sync(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5Context::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.consume(&buffer[..bytes_read]);
    }

    let digest = format!("{:x}", hasher.compute());
    debug!("文件哈希计算完成: path={:?}, md5={}", path, digest);
    Ok(digest)
}
