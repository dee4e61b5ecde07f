//! 地址模板
//!
//! 解析一次，按上下文多次渲染。占位符形如 `{space_id}`，上下文中没有的占位符原样保留。

use ahash::AHashMap as HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Variable(String),
}

/// 地址模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let segments = Self::parse(&source);
        Self { source, segments }
    }

    fn parse(source: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start + 1..].find('}') else {
                break;
            };
            let name = &rest[start + 1..start + 1 + len];
            // 占位符名只允许字母、数字和下划线，其余按普通文本处理
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                segments.push(Segment::Text(rest[..start + 1].to_string()));
                rest = &rest[start + 1..];
                continue;
            }
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            segments.push(Segment::Variable(name.to_string()));
            rest = &rest[start + len + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        segments
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 模板中出现的占位符
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn render(&self, context: &HashMap<String, String>) -> String {
        let mut output = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Variable(name) => match context.get(name) {
                    Some(value) => output.push_str(value),
                    None => {
                        output.push('{');
                        output.push_str(name);
                        output.push('}');
                    }
                },
            }
        }
        output
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}
