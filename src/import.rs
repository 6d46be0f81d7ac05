use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use indicatif::ProgressBar;
use log::{info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::IMDB;
use crate::db::{ImageRecord, NewImage, crud};
use crate::embed::ImageEmbedder;
use crate::error::ImportError;
use crate::filter::Extension;
use crate::metrics;
use crate::utils::format_date;

/// 图片被跳过的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// 文件内容不是支持的图片格式
    UnknownType,
    /// 无法解码或无法计算特征
    Unreadable,
    /// 复制模式下目标文件已存在
    Duplicate,
    /// 原地模式下路径已经在数据库中
    AlreadyIndexed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownType => "unknown-type",
            Self::Unreadable => "unreadable",
            Self::Duplicate => "duplicate",
            Self::AlreadyIndexed => "already-indexed",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单张图片的导入结果
#[derive(Debug)]
pub enum ImportOutcome {
    Imported(ImageRecord),
    Skipped(SkipReason),
    Failed(ImportError),
}

impl ImportOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Imported(_) => "imported",
            Self::Skipped(reason) => reason.as_str(),
            Self::Failed(_) => "failed",
        }
    }
}

/// 写入数据库失败时，批量导入的处理方式
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreErrorPolicy {
    /// 立即停止导入
    #[default]
    Abort,
    /// 记为失败并继续导入剩余文件
    Continue,
}

/// 批量导入的统计
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub failed: usize,
}

impl ImportReport {
    pub fn record(&mut self, outcome: &ImportOutcome) {
        match outcome {
            ImportOutcome::Imported(_) => self.imported += 1,
            ImportOutcome::Skipped(reason) => *self.skipped.entry(*reason).or_default() += 1,
            ImportOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "导入 {}，跳过 {}", self.imported, self.total_skipped())?;
        if !self.skipped.is_empty() {
            let detail = self
                .skipped
                .iter()
                .map(|(reason, count)| format!("{}: {}", reason, count))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " ({})", detail)?;
        }
        write!(f, "，失败 {}", self.failed)
    }
}

/// 复制模式下图片的存放路径：`{base}/{ext}/{hash[..2]}/{hash}.{ext}`
pub fn content_path(base: &Path, hash: &str, extension: Extension) -> PathBuf {
    base.join(extension.as_str()).join(&hash[..2]).join(format!("{}.{}", hash, extension))
}

/// 将图片内容写入 `dst`，并使用 `src` 的修改时间
///
/// 先写入同目录下的唯一临时文件，再以不覆盖的方式发布。
/// `dst` 已存在时返回 `Ok(false)`，已有文件保持不变。
pub fn publish_copy(data: &[u8], src: &Path, dst: &Path) -> io::Result<bool> {
    let parent = dst.parent().ok_or_else(|| io::Error::other("目标路径没有上级目录"))?;
    std::fs::create_dir_all(parent)?;
    let modified = std::fs::metadata(src)?.modified()?;

    let mut tmp = tempfile::Builder::new().prefix(".import-").tempfile_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().set_modified(modified)?;
    match tmp.persist_noclobber(dst) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

impl IMDB {
    /// 导入一张图片
    ///
    /// # Arguments
    ///
    /// * `embedder` - 特征提取模型
    /// * `path` - 图片路径
    /// * `copy` - 是否复制到 `import-image-base` 下按哈希存放并去重
    pub async fn import_image<E: ImageEmbedder>(
        &self,
        embedder: &E,
        path: &Path,
        copy: bool,
    ) -> ImportOutcome {
        let outcome = match self.try_import_image(embedder, path, copy).await {
            Ok(outcome) => outcome,
            Err(e) => ImportOutcome::Failed(e),
        };
        metrics::inc_import(outcome.label());
        outcome
    }

    async fn try_import_image<E: ImageEmbedder>(
        &self,
        embedder: &E,
        path: &Path,
        copy: bool,
    ) -> Result<ImportOutcome, ImportError> {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!("无法读取文件 {}: {}", path.display(), e);
                return Ok(ImportOutcome::Skipped(SkipReason::Unreadable));
            }
        };

        let Some(extension) = Extension::sniff(&data) else {
            return Ok(ImportOutcome::Skipped(SkipReason::UnknownType));
        };

        let hash = blake3::hash(&data);
        let target = if copy {
            let base = self.config.import_image_base.as_deref().ok_or(ImportError::NoImportBase)?;
            let target = content_path(base, &hash.to_hex(), extension);
            if tokio::fs::try_exists(&target).await? {
                return Ok(ImportOutcome::Skipped(SkipReason::Duplicate));
            }
            target
        } else {
            let target = tokio::fs::canonicalize(path).await?;
            if crud::check_filename(&self.db, &target.to_string_lossy()).await? {
                return Ok(ImportOutcome::Skipped(SkipReason::AlreadyIndexed));
            }
            target
        };

        let feature = match embedder.embed_image(&data).await {
            Ok(feature) => feature,
            Err(e) => {
                warn!("无法计算特征 {}: {}", path.display(), e);
                return Ok(ImportOutcome::Skipped(SkipReason::Unreadable));
            }
        };
        if feature.vector.len() != self.config.feature_dim {
            return Err(ImportError::DimensionMismatch {
                expected: self.config.feature_dim,
                actual: feature.vector.len(),
            });
        }
        let encoded = self.config.storage_type.encode(&feature.vector);

        // 只有本次调用创建的文件才能在写入失败时删除
        let created = if copy {
            let (src, dst) = (path.to_path_buf(), target.clone());
            let created = tokio::task::spawn_blocking(move || publish_copy(&data, &src, &dst))
                .await
                .map_err(io::Error::other)??;
            if !created {
                return Ok(ImportOutcome::Skipped(SkipReason::Duplicate));
            }
            true
        } else {
            false
        };

        let metadata = tokio::fs::metadata(&target).await?;
        let filename = target.to_string_lossy();
        let filesize = metadata.len() as i64;
        let date = format_date(metadata.modified()?);
        let image = NewImage {
            filename: &filename,
            hash: hash.as_bytes(),
            extension: extension.as_str(),
            width: feature.width,
            height: feature.height,
            filesize,
            date: &date,
            feature: &encoded,
        };

        let id = match crud::add_image(&self.db, &image).await {
            Ok(id) => id,
            // 同一路径已被并发导入，复制模式下内容由哈希保证一致
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let reason = if copy { SkipReason::Duplicate } else { SkipReason::AlreadyIndexed };
                return Ok(ImportOutcome::Skipped(reason));
            }
            Err(e) => {
                if created {
                    let _ = tokio::fs::remove_file(&target).await;
                }
                return Err(e.into());
            }
        };

        Ok(ImportOutcome::Imported(ImageRecord {
            id,
            filename: filename.into_owned(),
            extension: extension.as_str().to_string(),
            width: feature.width,
            height: feature.height,
            filesize,
            date,
        }))
    }

    /// 递归导入目录下的所有文件
    ///
    /// 单个文件的跳过或失败不会中断导入，统计结果写入 `report`。
    /// 数据库写入失败时按 `policy` 处理，`Abort` 会返回该错误。
    /// 模型维数与配置不一致时不会开始导入。
    pub async fn import_dir<E: ImageEmbedder>(
        &self,
        embedder: &E,
        dir: &Path,
        copy: bool,
        policy: StoreErrorPolicy,
        report: &mut ImportReport,
        pb: &ProgressBar,
    ) -> Result<(), ImportError> {
        if embedder.dimension() != self.config.feature_dim {
            return Err(ImportError::DimensionMismatch {
                expected: self.config.feature_dim,
                actual: embedder.dimension(),
            });
        }

        info!("开始扫描目录: {}", dir.display());
        let entries = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
                Ok(_) => None,
                Err(e) => {
                    warn!("无法访问: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        info!("扫描完成，共 {} 个文件", entries.len());

        pb.set_length(entries.len() as u64);

        for path in entries {
            let outcome = self.import_image(embedder, &path, copy).await;
            report.record(&outcome);
            pb.inc(1);
            match outcome {
                ImportOutcome::Imported(record) => pb.set_message(record.filename),
                ImportOutcome::Skipped(reason) => {
                    pb.suspend(|| info!("跳过 ({}): {}", reason, path.display()));
                }
                ImportOutcome::Failed(e) if e.is_storage() && policy == StoreErrorPolicy::Abort => {
                    pb.suspend(|| warn!("写入数据库失败，停止导入: {}", path.display()));
                    return Err(e);
                }
                ImportOutcome::Failed(e) => {
                    pb.suspend(|| warn!("导入失败 {}: {}", path.display(), e));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_path_is_sharded() {
        let hash = "ab34ef0000000000000000000000000000000000000000000000000000000000";
        let path = content_path(Path::new("/data/images"), hash, Extension::Png);
        assert_eq!(path, PathBuf::from(format!("/data/images/png/ab/{}.png", hash)));
    }

    #[test]
    fn publish_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        std::fs::write(&src, b"new").unwrap();
        let dst = dir.path().join("png/ab/ab.png");

        assert!(publish_copy(b"first", &src, &dst).unwrap());
        assert!(!publish_copy(b"second", &src, &dst).unwrap());
        assert_eq!(std::fs::read(&dst).unwrap(), b"first");
        assert_eq!(
            std::fs::metadata(&dst).unwrap().modified().unwrap(),
            std::fs::metadata(&src).unwrap().modified().unwrap()
        );
        // 临时文件不会残留
        assert_eq!(std::fs::read_dir(dst.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn report_counts() {
        let mut report = ImportReport::default();
        report.record(&ImportOutcome::Skipped(SkipReason::Duplicate));
        report.record(&ImportOutcome::Skipped(SkipReason::Duplicate));
        report.record(&ImportOutcome::Skipped(SkipReason::UnknownType));
        report.record(&ImportOutcome::Failed(ImportError::NoImportBase));
        assert_eq!(report.imported, 0);
        assert_eq!(report.total_skipped(), 3);
        assert_eq!(report.skipped[&SkipReason::Duplicate], 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.to_string(), "导入 0，跳过 3 (unknown-type: 1, duplicate: 2)，失败 1");
    }
}
