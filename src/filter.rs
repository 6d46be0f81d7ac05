use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

/// 支持的图片格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Jpg,
    Png,
    Gif,
    Bmp,
}

impl Extension {
    pub const ALL: [Extension; 4] = [Self::Jpg, Self::Png, Self::Gif, Self::Bmp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
        }
    }

    /// 根据文件内容判断图片格式，与文件名无关
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            ImageFormat::Jpeg => Some(Self::Jpg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::Bmp => Some(Self::Bmp),
            _ => None,
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Extension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            "gif" => Ok(Self::Gif),
            "bmp" => Ok(Self::Bmp),
            _ => Err(format!("不支持的图片格式: {}", s)),
        }
    }
}

/// 元数据过滤条件，各条件之间为 AND 关系
///
/// 未设置的条件表示不限制。`extensions` 为 `Some` 时只保留其中的格式，
/// 因此 `Some(空集)` 不匹配任何图片。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub extensions: Option<BTreeSet<Extension>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最小宽度（包含），0 表示不限制
    pub fn min_width(mut self, width: u32) -> Self {
        self.min_width = (width > 0).then_some(width);
        self
    }

    /// 最小高度（包含），0 表示不限制
    pub fn min_height(mut self, height: u32) -> Self {
        self.min_height = (height > 0).then_some(height);
        self
    }

    /// 允许的格式，空列表表示不限制
    pub fn extensions(mut self, extensions: impl IntoIterator<Item = Extension>) -> Self {
        let set = extensions.into_iter().collect::<BTreeSet<_>>();
        self.extensions = (!set.is_empty()).then_some(set);
        self
    }

    /// 两个条件同时满足
    pub fn and(self, other: Filter) -> Filter {
        Filter {
            min_width: self.min_width.max(other.min_width),
            min_height: self.min_height.max(other.min_height),
            extensions: match (self.extensions, other.extensions) {
                (Some(a), Some(b)) => Some(a.intersection(&b).copied().collect()),
                (a, b) => a.or(b),
            },
        }
    }

    /// 判断一条记录是否满足条件，与 [`Filter::push_where`] 生成的 SQL 等价
    #[cfg(test)]
    pub fn matches(&self, width: u32, height: u32, extension: Extension) -> bool {
        self.min_width.is_none_or(|w| width >= w)
            && self.min_height.is_none_or(|h| height >= h)
            && self.extensions.as_ref().is_none_or(|set| set.contains(&extension))
    }

    /// 将条件追加为 SQL 的 WHERE 子句
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(width) = self.min_width {
            qb.push(" AND width >= ").push_bind(width as i64);
        }
        if let Some(height) = self.min_height {
            qb.push(" AND height >= ").push_bind(height as i64);
        }
        if let Some(extensions) = &self.extensions {
            if extensions.is_empty() {
                qb.push(" AND 0");
            } else {
                qb.push(" AND extension IN (");
                let mut separated = qb.separated(", ");
                for extension in extensions {
                    separated.push_bind(extension.as_str());
                }
                separated.push_unseparated(")");
            }
        }
    }
}
