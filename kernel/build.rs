//! ptable 构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Kernel.toml 配置文件（或 menuconfig 生成的 build/.config）
//! 2. 生成 src/config.rs

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

/// 解析 build/.config 文件（简单 key=value 格式）
///
/// 键名形如 `process_nproc=64`，第一个下划线之前是 section 名。
fn parse_dot_config(content: &str) -> toml::Value {
    let mut sections: HashMap<String, HashMap<String, toml::Value>> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        // 跳过注释和空行
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(eq_pos) = line.find('=') else {
            continue;
        };
        let key = &line[..eq_pos];
        let value = line[eq_pos + 1..].trim();

        if let Some(underscore_pos) = key.find('_') {
            let section = &key[..underscore_pos];
            let config_key = &key[underscore_pos + 1..];

            let parsed_value = if value == "true" {
                toml::Value::Boolean(true)
            } else if value == "false" {
                toml::Value::Boolean(false)
            } else if let Ok(int_val) = value.parse::<i64>() {
                toml::Value::Integer(int_val)
            } else {
                toml::Value::String(value.trim_matches('"').to_string())
            };

            sections
                .entry(section.to_string())
                .or_default()
                .insert(config_key.to_string(), parsed_value);
        }
    }

    let mut root_map = toml::map::Map::new();
    for (section_name, section_data) in sections {
        let mut toml_map = toml::map::Map::new();
        for (k, v) in section_data {
            toml_map.insert(k, v);
        }
        root_map.insert(section_name, toml::Value::Table(toml_map));
    }

    toml::Value::Table(root_map)
}

fn int(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

fn string<'a>(config: &'a toml::Value, section: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let workspace_dir = manifest_dir.join("..");
    let kernel_toml = workspace_dir.join("Kernel.toml");
    let dot_config = workspace_dir.join("build").join(".config");

    println!("cargo:rerun-if-changed={}", kernel_toml.display());
    println!("cargo:rerun-if-changed={}", dot_config.display());

    // build/.config 优先，其次 Kernel.toml，都没有则全部取默认值
    let (config_content, is_dot_config) = if let Ok(content) = fs::read_to_string(&dot_config) {
        println!("cargo:warning=Using build/.config configuration");
        (content, true)
    } else {
        (fs::read_to_string(&kernel_toml).unwrap_or_default(), false)
    };

    let config = if is_dot_config {
        parse_dot_config(&config_content)
    } else {
        toml::from_str(&config_content).expect("Kernel.toml 解析失败")
    };

    generate_config_code(&config, &manifest_dir);
}

fn generate_config_code(config: &toml::Value, manifest_dir: &PathBuf) {
    let nproc = int(config, "process", "nproc", 64);
    let max_cpus = int(config, "smp", "max_cpus", 4);
    let name_len = int(config, "process", "name_len", 16);

    assert!(nproc > 0, "process.nproc 必须大于 0");
    assert!(max_cpus > 0, "smp.max_cpus 必须大于 0");
    assert!(name_len > 0, "process.name_len 必须大于 0");

    let config_code = format!(
        r#"//! ptable 配置（自动生成）
//!
//! 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 内核名称
pub const KERNEL_NAME: &str = "{}";

/// 内核版本
pub const KERNEL_VERSION: &str = "{}";

// ============================================================
// 进程配置
// ============================================================

/// 进程表槽位数
pub const NPROC: usize = {};

/// 每个进程的打开文件数
pub const NOFILE: usize = {};

/// 进程名长度（字节）
pub const PROC_NAME_LEN: usize = {};

/// PID 上限
pub const PID_MAX: u32 = {};

/// init 进程的 uid
pub const DEFAULT_UID: u32 = {};

/// init 进程的 gid
pub const DEFAULT_GID: u32 = {};

// ============================================================
// SMP 配置
// ============================================================

/// 最大CPU数量
pub const MAX_CPUS: usize = {};

// ============================================================
// 内存配置
// ============================================================

/// 页大小
pub const PAGE_SIZE: usize = {};

// ============================================================
// 调试配置
// ============================================================

/// 日志级别
pub const LOG_LEVEL: &str = "{}";
"#,
        string(config, "general", "name", "ptable"),
        string(config, "general", "version", "0.1.0"),
        nproc,
        int(config, "process", "nofile", 16),
        name_len,
        int(config, "process", "pid_max", 4194304),
        int(config, "process", "default_uid", 0),
        int(config, "process", "default_gid", 0),
        max_cpus,
        int(config, "memory", "page_size", 4096),
        string(config, "debug", "log_level", "warn"),
    );

    let config_file = manifest_dir.join("src").join("config.rs");

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let existing_content = fs::read_to_string(&config_file).unwrap_or_default();
    if existing_content != config_code {
        fs::write(&config_file, &config_code).expect("写入配置文件失败");
    }
}
