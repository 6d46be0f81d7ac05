use std::future::Future;
use std::io::Cursor;

use image::ImageReader;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::{Config, Device};
use crate::error::EmbedError;

/// 图片的特征向量及其像素尺寸
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeature {
    pub vector: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// 将图片和文字映射到同一向量空间的模型
pub trait ImageEmbedder {
    /// 输出向量的维数
    fn dimension(&self) -> usize;

    /// 计算图片特征，图片无法解码时返回 [`EmbedError::Decode`]
    fn embed_image(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<ImageFeature, EmbedError>> + Send;

    /// 计算文字特征
    fn embed_text(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send;
}

/// 读取图片尺寸，只解析文件头
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32), EmbedError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| EmbedError::Decode(e.to_string()))?
        .into_dimensions()
        .map_err(|e| EmbedError::Decode(e.to_string()))
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'static str>,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// 通过 HTTP 调用外部 CLIP 推理服务
///
/// - `POST {url}/embed/image?model=..&device=..`，请求体为图片原始字节
/// - `POST {url}/embed/text`，请求体为 `{"model", "device", "text"}`
///
/// 两者均返回 `{"embedding": [...]}`。服务以 4xx 表示图片无法解码。
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    device: Option<Device>,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &Config) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(config.embedding_timeout).build()?;
        Ok(Self {
            client,
            url: config.embedding_url.clone(),
            model: config.clip_model.clone(),
            device: config.device,
            dimension: config.feature_dim,
        })
    }

    async fn parse_response(response: reqwest::Response) -> Result<Vec<f32>, EmbedError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<EmbeddingResponse>().await?.embedding);
        }
        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::NOT_FOUND {
            Err(EmbedError::Decode(message))
        } else {
            Err(EmbedError::Service(format!("{}: {}", status, message)))
        }
    }
}

impl ImageEmbedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_image(&self, data: &[u8]) -> Result<ImageFeature, EmbedError> {
        let (width, height) = image_dimensions(data)?;
        debug!("请求图片特征: {}x{}", width, height);

        let mut query = vec![("model", self.model.as_str())];
        if let Some(device) = self.device {
            query.push(("device", device.as_str()));
        }
        let response = self
            .client
            .post(format!("{}/embed/image", self.url))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await?;
        let vector = Self::parse_response(response).await?;

        Ok(ImageFeature { vector, width, height })
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request =
            TextRequest { model: &self.model, device: self.device.map(|d| d.as_str()), text };
        let response =
            self.client.post(format!("{}/embed/text", self.url)).json(&request).send().await?;
        Self::parse_response(response).await
    }
}
