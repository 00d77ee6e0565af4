// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # webgate 入口
//!
//! 初始化日志、加载配置、构建 Tokio 运行时并启动连接服务器。
//! 同时提供一个基于标准输入的管理控制台（stop / status / reload / check / help），
//! Ctrl-C 与 `stop` 指令触发同样的优雅停机流程。

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;

use webgate::config::Config;
use webgate::dispatcher::Dispatcher;
use webgate::exception::Exception;
use webgate::proxy::check_backends;
use webgate::server::{ConnectionServer, ServerHandle};

const DEFAULT_CONFIG: &str = "config/development.toml";
const LOG_CONFIG: &str = "config/log4rs.yaml";

fn main() -> ExitCode {
    // 1. 初始化日志系统：通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file(LOG_CONFIG, Default::default()) {
        eprintln!("无法加载日志配置 {}：{}", LOG_CONFIG, e);
        return ExitCode::FAILURE;
    }

    // 2. 配置加载：第一个命令行参数可以覆盖默认路径
    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::from_toml(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("配置文件 {} 加载失败：{}", config_path, e);
            return ExitCode::FAILURE;
        }
    };
    info!("配置文件 {} 已载入", config_path);

    // 3. 按配置的工作线程数构建运行时
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.server().worker_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config, config_path)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("服务器异常退出：{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config, config_path: String) -> Result<(), Exception> {
    let dispatcher = Arc::new(Dispatcher::new(&config)?);
    let server = ConnectionServer::bind(&config, dispatcher).await?;
    let handle = server.handle();

    tokio::spawn(console(handle.clone(), config, config_path));
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到 Ctrl-C，开始停机");
                handle.shutdown();
            }
        }
    });

    server.run().await
}

/// 后台管理控制台，读取标准输入的指令
async fn console(handle: ServerHandle, mut config: Config, config_path: String) {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                println!("停机指令已激活，服务器将在处理完进行中的请求后关闭...");
                handle.shutdown();
                break;
            }
            "status" => {
                let snapshot = handle.dispatcher().snapshot();
                println!("== webgate 状态 ===");
                println!("当前活跃连接数: {}", handle.active_connections());
                println!("代理目标: {}", snapshot.proxy_targets().len());
                for target in snapshot.proxy_targets() {
                    println!("  {} -> {}", target.path, target.base_url());
                }
                println!("路由条目: {}", snapshot.routing().len());
                println!("重定向: {}", snapshot.redirects().len());
                println!("====================");
            }
            "reload" => match Config::from_toml(&config_path) {
                Ok(fresh) => match handle.dispatcher().reload(&fresh) {
                    Ok(()) => {
                        println!("配置已重载");
                        config = fresh;
                    }
                    Err(e) => {
                        warn!("重载失败，保留原配置：{}", e);
                        println!("重载失败：{}", e);
                    }
                },
                Err(e) => {
                    warn!("重载失败，保留原配置：{}", e);
                    println!("重载失败：{}", e);
                }
            },
            "check" => {
                let timeout = Duration::from_secs(config.proxy().connect_timeout_secs);
                let unreachable = check_backends(config.reverse_proxy(), timeout).await;
                if unreachable.is_empty() {
                    println!("全部 {} 个代理目标可达", config.reverse_proxy().len());
                } else {
                    for line in unreachable {
                        println!("不可达：{}", line);
                    }
                }
            }
            "help" => {
                println!("== webgate Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("reload - 重新加载配置文件");
                println!("check  - 检查代理目标是否可达");
                println!("help   - 显示此帮助信息");
                println!("====================");
            }
            "" => {}
            other => println!("无效的命令：{}", other),
        }
    }
}
