// 命令行入口（组合根）
//
// 配置仓库、令牌缓存、带宽计数器都在这里构造一次，按需注入客户端；
// 子命令：list / test <host_id> / upload <host_id> <file>...
// 凭证从环境变量 FILEHOST_CREDENTIALS 读取（username:password 或 API key）。

use anyhow::{bail, Context, Result};
use filehost_uploader_rust::{
    logging, AppConfig, BandwidthCounter, ClientOptions, FileHostClient, HostConfigStore,
    TokenCache, UploadHooks,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = AppConfig::load(&PathBuf::from("config.toml"))
        .await
        .context("加载应用配置失败")?;
    let _log_guard = logging::init_logging(&app_config.log);

    let store = HostConfigStore::load(&app_config.hosts.builtin_dir, &app_config.hosts.user_dir)
        .await
        .context("加载主机配置失败")?;
    let token_cache = Arc::new(TokenCache::new());
    let bandwidth = Arc::new(BandwidthCounter::new());

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("list") => {
            for (host_id, config) in store.enabled_hosts() {
                println!(
                    "{:<20} {:<24} auth={:?} multistep={}",
                    host_id,
                    config.name,
                    config.auth_mode,
                    config.is_multistep()
                );
            }
            Ok(())
        }

        Some("test") => {
            let host_id = args.get(1).context("用法: test <host_id>")?;
            let mut client =
                connect(&store, host_id, &app_config, &token_cache, &bandwidth).await?;

            let credentials = client.test_credentials().await;
            println!(
                "凭证检查: {} - {}",
                if credentials.success { "通过" } else { "失败" },
                credentials.message
            );
            if let Some(info) = &credentials.user_info {
                println!("  存储: {:?}, 会员: {:?}", info.storage, info.premium);
            }

            let upload = client.test_upload(true).await;
            println!(
                "试传检查: {} - {}",
                if upload.success { "通过" } else { "失败" },
                upload.message
            );
            if let Some(url) = &upload.url {
                println!("  链接: {}", url);
            }
            Ok(())
        }

        Some("upload") => {
            let host_id = args.get(1).context("用法: upload <host_id> <file>...")?;
            let files = &args[2..];
            if files.is_empty() {
                bail!("用法: upload <host_id> <file>...");
            }

            let mut client =
                connect(&store, host_id, &app_config, &token_cache, &bandwidth).await?;

            // Ctrl-C 映射到协作式取消谓词
            let cancel = CancellationToken::new();
            let ctrl_c_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("收到 Ctrl-C, 中止当前传输");
                    ctrl_c_token.cancel();
                }
            });

            for file in files {
                let stop_token = cancel.clone();
                let hooks = UploadHooks {
                    on_progress: Some(Arc::new(|uploaded, total| {
                        eprint!("\r{} / {} bytes", uploaded, total);
                    })),
                    should_stop: Some(Arc::new(move || stop_token.is_cancelled())),
                };

                let result = client.upload_file(&PathBuf::from(file), hooks).await?;
                eprintln!();
                if result.deduplicated {
                    println!("{}: 去重命中 -> {}", file, result.url);
                } else {
                    println!("{}: {}", file, result.url);
                }
            }

            info!("本次运行累计上传 {} bytes", bandwidth.get());
            Ok(())
        }

        _ => {
            eprintln!("用法: filehost-uploader <list|test|upload> ...");
            eprintln!("  list                        列出已启用主机");
            eprintln!("  test <host_id>              凭证与试传自检");
            eprintln!("  upload <host_id> <file>...  上传文件");
            eprintln!("凭证通过环境变量 FILEHOST_CREDENTIALS 提供");
            Ok(())
        }
    }
}

/// 按 host_id 构造客户端
async fn connect(
    store: &HostConfigStore,
    host_id: &str,
    app_config: &AppConfig,
    token_cache: &Arc<TokenCache>,
    bandwidth: &Arc<BandwidthCounter>,
) -> Result<FileHostClient> {
    let config = store
        .get(host_id)
        .with_context(|| format!("未知主机: {}", host_id))?;

    let options = ClientOptions {
        credentials: std::env::var("FILEHOST_CREDENTIALS").ok(),
        host_id: Some(host_id.to_string()),
        proxy: app_config.hosts.proxy.clone(),
    };

    FileHostClient::connect(
        config,
        options,
        Arc::clone(token_cache),
        Arc::clone(bandwidth),
    )
    .await
    .with_context(|| format!("连接主机 {} 失败", host_id))
}
