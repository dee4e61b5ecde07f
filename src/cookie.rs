//! Cookie 和 HTTP 方法工具

use serde::{Deserialize, Serialize};

/// HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Get
    }
}

impl HttpMethod {
    /// 是否为写操作
    pub fn is_write(&self) -> bool {
        match self {
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete => true,
            HttpMethod::Get | HttpMethod::Head | HttpMethod::Options | HttpMethod::Trace => false,
        }
    }

    /// 解析方法名（大小写不敏感）
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "OPTIONS" => Some(HttpMethod::Options),
            "TRACE" => Some(HttpMethod::Trace),
            _ => None,
        }
    }
}

/// Cookie 属性名，不作为 cookie 回调
const ATTRIBUTES: [&str; 9] = [
    "path", "domain", "expires", "max-age", "secure", "httponly", "samesite", "version",
    "comment",
];

/// Cookie 解析
pub struct Cookies;

impl Cookies {
    /// 解析 Cookie / Set-Cookie 头
    ///
    /// 在引号外按 `;` 和 `,` 切分，`Expires=` 日期中的逗号保留；
    /// 属性（`Path`、`Domain` 等）和 `$` 前缀的版本1属性被跳过。
    ///
    /// # 参数
    /// - `header`: 头部值
    /// - `consumer`: 每个 cookie 调用一次 `(name, value)`
    ///
    /// # 示例
    /// ```rust
    /// use trafficgate::cookie::Cookies;
    ///
    /// let mut cookies = Vec::new();
    /// Cookies::parse("name=value; Path=/; Domain=example.com", |k, v| {
    ///     cookies.push((k.to_string(), v.to_string()))
    /// });
    /// assert_eq!(cookies, vec![("name".to_string(), "value".to_string())]);
    /// ```
    pub fn parse<F>(header: &str, mut consumer: F)
    where
        F: FnMut(&str, &str),
    {
        let mut token = String::new();
        let mut in_quotes = false;

        for c in header.chars() {
            match c {
                '"' => {
                    in_quotes = !in_quotes;
                    token.push(c);
                }
                ';' if !in_quotes => {
                    Self::emit(&token, &mut consumer);
                    token.clear();
                }
                ',' if !in_quotes && !Self::in_expires(&token) => {
                    Self::emit(&token, &mut consumer);
                    token.clear();
                }
                _ => token.push(c),
            }
        }
        Self::emit(&token, &mut consumer);
    }

    /// 获取指定名称的 cookie
    pub fn get(header: &str, name: &str) -> Option<String> {
        let mut found = None;
        Self::parse(header, |k, v| {
            if found.is_none() && k == name {
                found = Some(v.to_string());
            }
        });
        found
    }

    /// 当前 token 是否为尚未出现逗号的 Expires 日期（如 `Expires=Wed, 09 Jun 2021`）
    fn in_expires(token: &str) -> bool {
        match token.trim_start().split_once('=') {
            Some((name, value)) => {
                name.trim().eq_ignore_ascii_case("expires") && !value.contains(',')
            }
            None => false,
        }
    }

    fn emit<F>(token: &str, consumer: &mut F)
    where
        F: FnMut(&str, &str),
    {
        let token = token.trim();
        if token.is_empty() {
            return;
        }

        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (token, ""),
        };

        if name.is_empty() || name.starts_with('$') {
            return;
        }
        let lower = name.to_ascii_lowercase();
        if ATTRIBUTES.contains(&lower.as_str()) {
            return;
        }

        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        consumer(name, value);
    }
}
