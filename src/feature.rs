use half::f16;
use ndarray::prelude::*;
use serde::Deserialize;

/// 特征向量写入数据库时使用的数值类型
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Float32,
    Float16,
}

impl StorageType {
    /// 每个分量占用的字节数
    pub fn size(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float16 => "float16",
        }
    }

    /// 将特征向量转换为小端字节序列
    pub fn encode(&self, feature: &[f32]) -> Vec<u8> {
        match self {
            Self::Float32 => feature.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Self::Float16 => {
                feature.iter().flat_map(|&v| f16::from_f32(v).to_le_bytes()).collect()
            }
        }
    }

    /// 将 `dim` 维的字节序列解码并追加到 `out`
    ///
    /// 长度与 `dim` 不符时返回 false，`out` 不变
    pub fn decode_into(&self, bytes: &[u8], dim: usize, out: &mut Vec<f32>) -> bool {
        if bytes.len() != dim * self.size() {
            return false;
        }
        match self {
            Self::Float32 => out.extend(
                bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            ),
            Self::Float16 => out.extend(
                bytes.chunks_exact(2).map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32()),
            ),
        }
        true
    }

    /// 解码任意维数的特征，长度不是 `size()` 的整数倍时返回 None
    pub fn decode(&self, bytes: &[u8]) -> Option<Vec<f32>> {
        let dim = bytes.len() / self.size();
        let mut out = Vec::with_capacity(dim);
        self.decode_into(bytes, dim, &mut out).then_some(out)
    }
}

/// 向量的 L2 范数，在 f64 中累加以免平方后上溢或下溢
///
/// 零向量或含有非有限值的向量返回 None
fn l2_norm(v: impl IntoIterator<Item = f32>) -> Option<f64> {
    let norm = v.into_iter().map(|x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    (norm > 0. && norm.is_finite()).then_some(norm)
}

/// 原地 L2 归一化，无法归一化时返回 false，`v` 不变
pub fn normalize_in_place(v: &mut [f32]) -> bool {
    let Some(norm) = l2_norm(v.iter().copied()) else {
        return false;
    };
    v.iter_mut().for_each(|x| *x = (*x as f64 / norm) as f32);
    true
}

/// L2 归一化，零向量或含有非有限值的向量返回 None
pub fn l2_normalize(v: ArrayView1<f32>) -> Option<Array1<f32>> {
    let norm = l2_norm(v.iter().copied())?;
    Some(v.mapv(|x| (x as f64 / norm) as f32))
}

/// 余弦相似度，即两个单位向量的点积
#[cfg(test)]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    assert_eq!(a.len(), b.len(), "vector length mismatch");
    let a = l2_normalize(ArrayView1::from(a))?;
    let b = l2_normalize(ArrayView1::from(b))?;
    Some(a.dot(&b))
}
