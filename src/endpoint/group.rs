//! 端点分组索引
//!
//! 三层索引：`EndpointGroup` 按 unit 标签划分为 `UnitGroup`，`UnitGroup` 再按
//! cell 标签划分为 `CellGroup`。索引在每次注册中心快照时整体重建，不做增量修改；
//! 消费方不应跨注册中心更新缓存旧的分组引用。

use super::{Labeled, SharedEndpoint};
use crate::constants::{DEFAULT_CELL, DEFAULT_UNIT};
use ahash::AHashMap as HashMap;

fn normalize<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// 单个 (unit, cell) 下的端点
#[derive(Debug, Clone)]
pub struct CellGroup {
    unit: String,
    cell: String,
    endpoints: Vec<SharedEndpoint>,
}

impl CellGroup {
    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }

    pub fn endpoints(&self) -> &[SharedEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// 单个 unit 下的端点，按 cell 再分组
#[derive(Debug, Clone)]
pub struct UnitGroup {
    unit: String,
    endpoints: Vec<SharedEndpoint>,
    cells: HashMap<String, CellGroup>,
}

impl UnitGroup {
    fn build(unit: String, endpoints: Vec<SharedEndpoint>) -> Self {
        let mut cells: HashMap<String, CellGroup> = HashMap::new();
        for endpoint in &endpoints {
            let cell = normalize(endpoint.cell(), DEFAULT_CELL);
            cells
                .entry(cell.to_string())
                .or_insert_with(|| CellGroup {
                    unit: unit.clone(),
                    cell: cell.to_string(),
                    endpoints: Vec::new(),
                })
                .endpoints
                .push(endpoint.clone());
        }
        Self {
            unit,
            endpoints,
            cells,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn endpoints(&self) -> &[SharedEndpoint] {
        &self.endpoints
    }

    /// 获取 cell 分组，空字符串等价于默认 cell
    pub fn get_cell(&self, cell: &str) -> Option<&CellGroup> {
        self.cells.get(normalize(cell, DEFAULT_CELL))
    }

    pub fn cells(&self) -> impl Iterator<Item = &CellGroup> {
        self.cells.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// 服务的端点分组
#[derive(Debug, Clone, Default)]
pub struct EndpointGroup {
    endpoints: Vec<SharedEndpoint>,
    units: HashMap<String, UnitGroup>,
}

impl EndpointGroup {
    /// 从端点列表构建分组
    pub fn new(endpoints: Vec<SharedEndpoint>) -> Self {
        let mut partitions: HashMap<String, Vec<SharedEndpoint>> = HashMap::new();
        for endpoint in &endpoints {
            let unit = normalize(endpoint.unit(), DEFAULT_UNIT);
            partitions
                .entry(unit.to_string())
                .or_default()
                .push(endpoint.clone());
        }

        let units = partitions
            .into_iter()
            .map(|(unit, members)| (unit.clone(), UnitGroup::build(unit, members)))
            .collect();

        Self { endpoints, units }
    }

    pub fn endpoints(&self) -> &[SharedEndpoint] {
        &self.endpoints
    }

    /// 获取 unit 分组，空字符串等价于默认 unit
    pub fn get_unit_group(&self, unit: &str) -> Option<&UnitGroup> {
        self.units.get(normalize(unit, DEFAULT_UNIT))
    }

    pub fn unit_groups(&self) -> impl Iterator<Item = &UnitGroup> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
