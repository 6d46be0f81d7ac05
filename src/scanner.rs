use std::cmp::Ordering;
use std::pin::pin;
use std::time::Instant;

use futures::{Stream, TryStreamExt};
use log::{debug, warn};
use ndarray::prelude::*;

use crate::db::FeatureRecord;
use crate::error::{SearchError, StoreError};
use crate::feature::{StorageType, l2_normalize, normalize_in_place};

/// 暴力扫描的余弦相似度搜索
///
/// 从数据流中按批读取特征向量，每批做一次矩阵-向量乘法，
/// 内存占用只与批大小有关，与数据库大小无关。
#[derive(Debug, Clone)]
pub struct Scanner {
    dim: usize,
    storage: StorageType,
    batch_size: usize,
}

/// 一批尚未计算相似度的向量
struct Batch {
    filenames: Vec<String>,
    /// 行优先存储的 `len * dim` 矩阵，每行都已归一化
    data: Vec<f32>,
    dim: usize,
}

impl Batch {
    fn new(dim: usize, capacity: usize) -> Self {
        Self { filenames: Vec::with_capacity(capacity), data: Vec::with_capacity(capacity * dim), dim }
    }

    fn len(&self) -> usize {
        self.filenames.len()
    }

    /// 计算整批向量与单位查询向量的相似度，并清空本批
    fn score(&mut self, query: ArrayView1<f32>, filenames: &mut Vec<String>) -> Array1<f32> {
        let matrix = ArrayView2::from_shape((self.len(), self.dim), &self.data)
            .expect("batch shape is consistent");
        let scores = matrix.dot(&query);
        filenames.append(&mut self.filenames);
        self.data.clear();
        scores
    }
}

impl Scanner {
    pub fn new(dim: usize, storage: StorageType, batch_size: usize) -> Self {
        assert!(dim > 0, "dimension must be positive");
        assert!(batch_size > 0, "batch size must be positive");
        Self { dim, storage, batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 扫描数据流，返回相似度最高的 `top_n` 个 `(路径, 相似度)`，按相似度降序排列
    ///
    /// 相似度相同时保持数据流中的先后顺序。零向量不参与排序，
    /// 长度与维数不符的特征会被跳过。
    pub async fn scan<S>(
        &self,
        query: &[f32],
        stream: S,
        top_n: usize,
    ) -> Result<Vec<(String, f32)>, SearchError>
    where
        S: Stream<Item = Result<FeatureRecord, StoreError>>,
    {
        if query.len() != self.dim {
            return Err(SearchError::InvalidQuery(format!(
                "期望 {} 维，实际 {} 维",
                self.dim,
                query.len()
            )));
        }
        let query = l2_normalize(ArrayView1::from(query))
            .ok_or_else(|| SearchError::InvalidQuery("零向量".to_string()))?;

        let instant = Instant::now();
        let mut stream = pin!(stream);
        let mut batch = Batch::new(self.dim, self.batch_size);
        let mut filenames = vec![];
        let mut partial_scores = vec![];

        while let Some(record) = stream.try_next().await? {
            let start = batch.data.len();
            if !self.storage.decode_into(&record.feature, self.dim, &mut batch.data) {
                warn!("特征长度不符，跳过: {}", record.filename);
                continue;
            }
            if !normalize_in_place(&mut batch.data[start..]) {
                debug!("跳过零向量: {}", record.filename);
                batch.data.truncate(start);
                continue;
            }
            batch.filenames.push(record.filename);

            if batch.len() >= self.batch_size {
                partial_scores.push(batch.score(query.view(), &mut filenames));
            }
        }
        if batch.len() > 0 {
            partial_scores.push(batch.score(query.view(), &mut filenames));
        }

        if partial_scores.is_empty() {
            return Ok(vec![]);
        }

        let views = partial_scores.iter().map(|s| s.view()).collect::<Vec<_>>();
        let scores = ndarray::concatenate(Axis(0), &views).expect("1-d arrays always concatenate");
        debug!("扫描 {} 个向量，耗时 {:.3}s", scores.len(), instant.elapsed().as_secs_f32());

        let top = top_n_indices(scores.as_slice().expect("contiguous"), top_n);
        let mut filenames = filenames.into_iter().map(Some).collect::<Vec<_>>();
        Ok(top
            .into_iter()
            .map(|i| (filenames[i].take().expect("indices are unique"), scores[i]))
            .collect())
    }
}

/// 返回分数最高的 `n` 个下标，分数降序，分数相同时下标小的在前
pub fn top_n_indices(scores: &[f32], n: usize) -> Vec<usize> {
    let cmp = |a: &usize, b: &usize| -> Ordering {
        scores[*b].total_cmp(&scores[*a]).then(a.cmp(b))
    };
    if n == 0 {
        return vec![];
    }
    let mut indices = (0..scores.len()).collect::<Vec<_>>();
    if n < indices.len() {
        indices.select_nth_unstable_by(n - 1, cmp);
        indices.truncate(n);
    }
    indices.sort_unstable_by(cmp);
    indices
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use futures::stream;

    use super::*;

    fn records(features: &[&[f32]], storage: StorageType) -> Vec<Result<FeatureRecord, StoreError>> {
        features
            .iter()
            .enumerate()
            .map(|(i, f)| Ok(FeatureRecord { filename: format!("{}", i), feature: storage.encode(f) }))
            .collect()
    }

    fn scan(scanner: &Scanner, query: &[f32], features: &[&[f32]], n: usize) -> Vec<(String, f32)> {
        let items = records(features, scanner.storage);
        block_on(scanner.scan(query, stream::iter(items), n)).unwrap()
    }

    #[test]
    fn three_vectors_top_two() {
        let scanner = Scanner::new(2, StorageType::Float32, 8192);
        let result = scan(&scanner, &[1., 0.], &[&[1., 0.], &[0., 1.], &[0.7, 0.7]], 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].0, "0");
        assert!((result[0].1 - 1.).abs() < 1e-6);
        assert_eq!(result[1].0, "2");
        assert!((result[1].1 - 0.70710677).abs() < 1e-5);
    }

    #[test]
    fn empty_stream_is_not_an_error() {
        let scanner = Scanner::new(2, StorageType::Float32, 4);
        assert!(scan(&scanner, &[1., 0.], &[], 10).is_empty());
    }

    #[test]
    fn batch_boundaries_do_not_change_result() {
        let features: Vec<[f32; 3]> =
            (0..37).map(|i| [(i % 7) as f32, (i % 5) as f32 - 2., 1. + (i % 3) as f32]).collect();
        let refs = features.iter().map(|f| &f[..]).collect::<Vec<_>>();
        let query = [0.3, -0.2, 0.9];

        let expected = scan(&Scanner::new(3, StorageType::Float32, 1000), &query, &refs, 10);
        for batch_size in [1, 2, 7, 36, 37] {
            let scanner = Scanner::new(3, StorageType::Float32, batch_size);
            assert_eq!(scan(&scanner, &query, &refs, 10), expected, "batch_size = {}", batch_size);
        }
    }

    #[test]
    fn results_are_sorted_and_bounded() {
        let features: Vec<[f32; 2]> = (0..50).map(|i| [i as f32 - 25., (i * 7 % 11) as f32]).collect();
        let refs = features.iter().map(|f| &f[..]).collect::<Vec<_>>();
        let scanner = Scanner::new(2, StorageType::Float16, 8);
        for n in [0, 1, 5, 49, 50, 100] {
            let result = scan(&scanner, &[1., 1.], &refs, n);
            assert_eq!(result.len(), n.min(50));
            assert!(result.windows(2).all(|w| w[0].1 >= w[1].1));
        }
    }

    #[test]
    fn ties_keep_stream_order() {
        let scanner = Scanner::new(2, StorageType::Float32, 2);
        let result =
            scan(&scanner, &[1., 0.], &[&[0., 1.], &[2., 0.], &[0., 3.], &[1., 0.], &[5., 0.]], 4);
        let names = result.iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["1", "3", "4", "0"]);
    }

    #[test]
    fn zero_and_malformed_vectors_are_skipped() {
        let scanner = Scanner::new(2, StorageType::Float32, 8192);
        let mut items = records(&[&[0., 0.], &[0., 1.], &[f32::NAN, 1.]], StorageType::Float32);
        items.push(Ok(FeatureRecord { filename: "short".to_string(), feature: vec![0; 4] }));
        let result = block_on(scanner.scan(&[1., 0.], stream::iter(items), 10)).unwrap();
        assert_eq!(result, vec![("1".to_string(), 0.)]);
    }

    #[test]
    fn extreme_magnitudes_score_finitely() {
        let scanner = Scanner::new(2, StorageType::Float32, 2);
        let result =
            scan(&scanner, &[1., 1.], &[&[1., 1.], &[1e-30, -1e-30], &[1e-30, 0.], &[1e20, 1e20]], 4);
        assert!(result.iter().all(|(_, score)| score.is_finite()));

        let mut top = result[..2].iter().map(|(f, _)| f.as_str()).collect::<Vec<_>>();
        top.sort();
        assert_eq!(top, ["0", "3"]);
        assert!(result[..2].iter().all(|(_, score)| (score - 1.).abs() < 1e-6));
        assert_eq!(result[2].0, "2");
        assert!((result[2].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(result[3].0, "1");
        assert!(result[3].1.abs() < 1e-6);

        let result = scan(&scanner, &[1e20, 0.], &[&[1., 0.]], 1);
        assert!((result[0].1 - 1.).abs() < 1e-6);
    }

    #[test]
    fn invalid_query_is_rejected() {
        let scanner = Scanner::new(2, StorageType::Float32, 8192);
        let err = block_on(scanner.scan(&[0., 0.], stream::iter(records(&[], StorageType::Float32)), 1));
        assert!(matches!(err, Err(SearchError::InvalidQuery(_))));
        let err = block_on(scanner.scan(&[1., 0., 0.], stream::iter(records(&[], StorageType::Float32)), 1));
        assert!(matches!(err, Err(SearchError::InvalidQuery(_))));
    }

    #[test]
    fn store_error_propagates() {
        let scanner = Scanner::new(2, StorageType::Float32, 8192);
        let items: Vec<Result<FeatureRecord, StoreError>> =
            vec![Err(StoreError::Sqlx(sqlx::Error::RowNotFound))];
        let err = block_on(scanner.scan(&[1., 0.], stream::iter(items), 1));
        assert!(matches!(err, Err(SearchError::Storage(_))));
    }

    #[test]
    fn top_n_selection() {
        assert_eq!(top_n_indices(&[0.1, 0.9, 0.5, 0.9], 3), [1, 3, 2]);
        assert_eq!(top_n_indices(&[0.1, 0.9], 5), [1, 0]);
        assert!(top_n_indices(&[0.1], 0).is_empty());
    }
}
