//! 端点状态

use serde::{Deserialize, Serialize};

/// 端点状态
///
/// 封闭枚举，每个状态的可访问性固定，不支持运行期扩展。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointState {
    /// 预热中
    Warmup,
    /// 健康
    Healthy,
    /// 虚弱（可访问，但优先级降低）
    Weak,
    /// 挂起
    Suspend,
    /// 恢复中
    Recover,
    /// 禁用
    Disable,
    /// 关闭中
    Closing,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self::Healthy
    }
}

impl EndpointState {
    /// 是否允许流量访问
    pub fn is_accessible(&self) -> bool {
        match self {
            EndpointState::Warmup
            | EndpointState::Healthy
            | EndpointState::Weak
            | EndpointState::Recover => true,
            EndpointState::Suspend | EndpointState::Disable | EndpointState::Closing => false,
        }
    }

    /// 转换为原子存储用的编码
    pub fn as_u8(&self) -> u8 {
        match self {
            EndpointState::Warmup => 0,
            EndpointState::Healthy => 1,
            EndpointState::Weak => 2,
            EndpointState::Suspend => 3,
            EndpointState::Recover => 4,
            EndpointState::Disable => 5,
            EndpointState::Closing => 6,
        }
    }

    /// 从编码还原，未知编码视为 `Disable`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => EndpointState::Warmup,
            1 => EndpointState::Healthy,
            2 => EndpointState::Weak,
            3 => EndpointState::Suspend,
            4 => EndpointState::Recover,
            6 => EndpointState::Closing,
            _ => EndpointState::Disable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EndpointState; 7] = [
        EndpointState::Warmup,
        EndpointState::Healthy,
        EndpointState::Weak,
        EndpointState::Suspend,
        EndpointState::Recover,
        EndpointState::Disable,
        EndpointState::Closing,
    ];

    #[test]
    fn test_accessible_states() {
        let accessible: Vec<_> = ALL.iter().filter(|s| s.is_accessible()).collect();
        assert_eq!(
            accessible,
            vec![
                &EndpointState::Warmup,
                &EndpointState::Healthy,
                &EndpointState::Weak,
                &EndpointState::Recover
            ]
        );
    }

    #[test]
    fn test_u8_mapping_is_stable() {
        for state in ALL {
            assert_eq!(EndpointState::from_u8(state.as_u8()), state);
        }
        assert_eq!(EndpointState::from_u8(200), EndpointState::Disable);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&EndpointState::Warmup).unwrap();
        assert_eq!(json, "\"WARMUP\"");
        let state: EndpointState = serde_json::from_str("\"CLOSING\"").unwrap();
        assert_eq!(state, EndpointState::Closing);
    }
}
