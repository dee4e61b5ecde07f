//! 端到端测试模块
//!
//! 测试注册、订阅、过滤链与调用反馈组成的完整流程

mod policy_sync;
mod route_pipeline;
