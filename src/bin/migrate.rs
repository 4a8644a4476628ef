use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use stock_sync::config;
use stock_sync::monitor::init_logging;
use stock_sync::storage::{self, health_check};

#[derive(Parser)]
#[command(name = "migrate", about = "stock_sync 數據庫遷移工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 運行所有未應用的遷移
    Run,

    /// 檢查遷移狀態
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行參數
    let cli = Cli::parse();

    let app_config = config::init_config().context("無法載入配置")?;
    let _log_guard = init_logging(&app_config.log).context("設置日誌系統失敗")?;

    let pool = storage::init_pool(&app_config.database)
        .await
        .context("無法初始化資料庫連接池")?;
    if !health_check(&pool).await {
        anyhow::bail!("資料庫 {} 無法連線", app_config.database.database);
    }

    match cli.command {
        Commands::Run => {
            storage::run_migrations(&pool)
                .await
                .context("資料庫遷移執行失敗")?;
            info!("資料庫遷移完成！");
        }
        Commands::Status => {
            let status = storage::migration_status(&pool)
                .await
                .context("無法讀取遷移狀態")?;
            let pending = status.iter().filter(|(_, _, applied)| !applied).count();
            for (version, description, applied) in &status {
                let mark = if *applied { "已套用" } else { "未套用" };
                println!("{:>16}  {:<6}  {}", version, mark, description);
            }
            info!(total = status.len(), pending, "遷移狀態檢查完成");
        }
    }

    Ok(())
}
