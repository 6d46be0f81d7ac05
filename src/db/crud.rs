use sqlx::{Executor, QueryBuilder, Result, Sqlite, SqlitePool};

use super::{ImageRecord, NewImage};
use crate::filter::Filter;

/// SQLite 单条语句的绑定参数数量有限，批量查询时分块进行
const MAX_BIND: usize = 900;

/// 添加图片记录，返回图片 ID
pub async fn add_image<'c, E>(executor: E, image: &NewImage<'_>) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO image (filename, hash, extension, width, height, filesize, date, feature)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(image.filename)
    .bind(image.hash)
    .bind(image.extension)
    .bind(image.width)
    .bind(image.height)
    .bind(image.filesize)
    .bind(image.date)
    .bind(image.feature)
    .fetch_one(executor)
    .await
}

/// 检查图片路径是否存在
pub async fn check_filename(executor: &SqlitePool, filename: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image WHERE filename = ?")
        .bind(filename)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}

/// 查询图片总数
pub async fn count_image(executor: &SqlitePool) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image").fetch_one(executor).await?;
    Ok(count as u64)
}

/// 根据路径批量获取图片记录，不存在的路径会被忽略
pub async fn get_images_by_filenames(
    executor: &SqlitePool,
    filenames: &[String],
) -> Result<Vec<ImageRecord>> {
    let mut records = Vec::with_capacity(filenames.len());
    for chunk in filenames.chunks(MAX_BIND) {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, filename, extension, width, height, filesize, date FROM image WHERE filename IN (",
        );
        let mut separated = qb.separated(", ");
        for filename in chunk {
            separated.push_bind(filename.as_str());
        }
        separated.push_unseparated(")");
        records.extend(qb.build_query_as::<ImageRecord>().fetch_all(executor).await?);
    }
    Ok(records)
}

/// 构造相似度扫描使用的查询，只读取路径和特征向量
///
/// 按 ID 排序，保证多次扫描的顺序一致
pub fn scan_features(filter: &Filter) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new("SELECT filename, feature FROM image");
    filter.push_where(&mut qb);
    qb.push(" ORDER BY id");
    qb
}
