// 测试用极简 HTTP 桩服务器
//
// 引擎的协议行为（去重短路、401 刷新重试、轮询超时）要靠
// 数请求次数来断言，这里用裸 TcpListener 手写响应，
// 按 (method, path, 第几次命中) 选择返回内容。

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// 预置响应
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.into(),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn render(&self) -> String {
        let reason = match self.status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            302 => "Found",
            401 => "Unauthorized",
            404 => "Not Found",
            500 => "Internal Server Error",
            _ => "Unknown",
        };
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        out.push_str("Connection: close\r\n\r\n");
        out.push_str(&self.body);
        out
    }
}

/// 服务器收到的一次请求
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    /// 不含查询串的路径
    pub path: String,
    /// 查询串（无则为空）
    pub query: String,
    pub body: String,
}

type Handler = dyn Fn(&str, &str, usize) -> StubResponse + Send + Sync;

/// 桩服务器句柄
pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl StubServer {
    /// 启动服务器；handler 参数为 (method, path, 该 path 第几次命中[0 起])
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &str, usize) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub server");
        let addr = listener.local_addr().expect("stub server addr");
        let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        let handler: Arc<Handler> = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let log = Arc::clone(&log);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, log, handler).await;
                });
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 指定路径被请求的次数
    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    /// 全部请求记录
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    log: Arc<Mutex<Vec<ReceivedRequest>>>,
    handler: Arc<Handler>,
) -> std::io::Result<()> {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 8192];

    // 读到头部结束
    let header_end = loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 1 << 20 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.clone(), String::new()),
    };

    let mut content_length = 0usize;
    let mut chunked = false;
    for line in head.lines().skip(1) {
        let lower = line.to_ascii_lowercase();
        if let Some(v) = lower.strip_prefix("content-length:") {
            content_length = v.trim().parse().unwrap_or(0);
        }
        if lower.starts_with("transfer-encoding:") && lower.contains("chunked") {
            chunked = true;
        }
    }

    // 读请求体（Content-Length 或 chunked 终止块）
    let mut body = buf[header_end..].to_vec();
    if chunked {
        while find_subsequence(&body, b"0\r\n\r\n").is_none() {
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
    } else {
        while body.len() < content_length {
            let n = socket.read(&mut tmp).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
    }

    let nth = {
        let mut guard = log.lock().unwrap();
        let nth = guard.iter().filter(|r| r.path == path).count();
        guard.push(ReceivedRequest {
            method: method.clone(),
            path: path.clone(),
            query,
            body: String::from_utf8_lossy(&body).to_string(),
        });
        nth
    };

    let response = handler(&method, &path, nth);
    socket.write_all(response.render().as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
