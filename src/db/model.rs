use serde::Serialize;

/// 图片记录，不包含特征向量
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ImageRecord {
    /// 图片 ID
    pub id: i64,
    /// 图片的绝对路径
    pub filename: String,
    /// 由文件内容判断出的格式
    pub extension: String,
    pub width: u32,
    pub height: u32,
    /// 文件大小，单位为字节
    pub filesize: i64,
    /// 文件修改时间，ISO-8601 UTC 格式
    pub date: String,
}

/// 待插入的图片记录
pub struct NewImage<'a> {
    pub filename: &'a str,
    /// 图片 blake3 哈希
    pub hash: &'a [u8],
    pub extension: &'a str,
    pub width: u32,
    pub height: u32,
    pub filesize: i64,
    pub date: &'a str,
    /// 按存储类型编码后的特征向量
    pub feature: &'a [u8],
}

/// 相似度扫描时读取的字段
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeatureRecord {
    pub filename: String,
    pub feature: Vec<u8>,
}
