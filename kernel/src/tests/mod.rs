//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 单元测试模块
//!
//! 每个文件一个主题，进程由 [`sim`] 在宿主机线程上模拟。
//!
//! 运行测试：
//! ```bash
//! cargo test -p ptable
//! ```

pub mod sim;
