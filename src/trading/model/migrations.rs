//! 迁移执行器
//!
//! 启动时按文件名字典序执行 migrations/ 下的 `NNNN_*.sql`；
//! 已执行的文件记录在 schema_migrations，跳过。任何失败都是致命错误，
//! 进程必须在 worker 启动前退出。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sqlx::{MySql, Pool};
use tracing::info;

fn is_migration_file(name: &str) -> bool {
    name.len() > 5
        && name.ends_with(".sql")
        && name.as_bytes()[..4].iter().all(|b| b.is_ascii_digit())
        && name.as_bytes().get(4) == Some(&b'_')
}

/// 去掉 `/* ... */` 块注释（不嵌套；未闭合时丢弃其后全部内容）
fn strip_block_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// 迁移文件可能混有注释，注释里又可能带分号；
/// 直接按分号切分会把注释切成可执行碎片，必须先清洗。
fn split_statements(raw_sql: &str) -> Vec<String> {
    let sql = strip_block_comments(raw_sql);
    let mut cleaned_lines = Vec::new();
    for line in sql.lines() {
        let s = line.trim();
        if s.is_empty() || s.starts_with("--") {
            continue;
        }
        let line = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };
        if !line.trim().is_empty() {
            cleaned_lines.push(line.to_string());
        }
    }
    cleaned_lines
        .join("\n")
        .split(';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 执行迁移，返回本次运行的文件名列表
pub async fn migrate(pool: &Pool<MySql>, migrations_dir: &Path) -> Result<Vec<String>> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version VARCHAR(255) NOT NULL,
           applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
           PRIMARY KEY (version)
         ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
    )
    .execute(pool)
    .await
    .context("创建 schema_migrations 失败")?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;

    let mut files: Vec<PathBuf> = std::fs::read_dir(migrations_dir)
        .with_context(|| format!("读取迁移目录失败: {}", migrations_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(is_migration_file)
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    let mut ran = Vec::new();
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if applied.iter().any(|v| v == &name) {
            continue;
        }

        let raw_sql = std::fs::read_to_string(&path)
            .with_context(|| format!("读取迁移文件失败: {}", name))?;

        let mut tx = pool.begin().await?;
        for statement in split_statements(&raw_sql) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("迁移 {} 执行失败", name))?;
        }
        sqlx::query("INSERT INTO schema_migrations(version) VALUES (?)")
            .bind(&name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(migration = name.as_str(), "迁移已执行");
        ran.push(name);
    }
    Ok(ran)
}

/// 启动入口：MIGRATIONS_DIR 可覆盖，默认 ./migrations
pub async fn run_startup_migrations(pool: &Pool<MySql>) -> Result<Vec<String>> {
    let dir = crate::app_config::env::env_or_default("MIGRATIONS_DIR", "migrations");
    migrate(pool, Path::new(&dir)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_file_filter() {
        assert!(is_migration_file("0001_init.sql"));
        assert!(is_migration_file("0002_history_tables.sql"));
        assert!(!is_migration_file("readme.md"));
        assert!(!is_migration_file("init.sql"));
        assert!(!is_migration_file("01_short.sql"));
    }

    #[test]
    fn test_split_statements_strips_line_comments() {
        let sql = "-- 注释里有分号; 不应该被执行\n\
                   CREATE TABLE a (id INT); -- 行尾注释; 同样跳过\n\
                   \n\
                   CREATE TABLE b (id INT);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
        assert!(stmts[1].starts_with("CREATE TABLE b"));
    }

    #[test]
    fn test_split_statements_strips_block_comments() {
        let sql = "/* 块注释;\n 跨行; 含分号 */\n\
                   CREATE TABLE a (id INT);\n\
                   CREATE /* 行内 */ TABLE b (id INT);";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[1].contains("TABLE b"));
    }

    #[test]
    fn test_unclosed_block_comment_drops_tail() {
        let sql = "CREATE TABLE a (id INT);\n/* 忘了闭合\nDROP TABLE a;";
        let stmts = split_statements(sql);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
    }
}
