//! 集成测试模块
//!
//! 测试各组件之间的协作

mod config_loading;
mod http_watcher;
mod rate_limit;
mod watch_registry;
