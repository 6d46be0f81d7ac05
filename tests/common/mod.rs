#![allow(dead_code)]

use std::path::Path;
use std::str::FromStr;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::post;
use clipsearch::config::ConfDir;
use clipsearch::embed::{ImageEmbedder, ImageFeature};
use clipsearch::error::EmbedError;
use clipsearch::{Config, IMDB, IMDBBuilder};
use image::{Rgb, RgbImage};
use serde_json::{Value, json};

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
/// 特征约为 [0.7, 0.7]
pub const YELLOW: [u8; 3] = [179, 179, 0];

/// 以像素平均颜色作为特征的模型，向量为 [r, g] 或 [r, g, b]
pub struct FakeEmbedder {
    dimension: usize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self { dimension: 2 }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }
}

pub fn embed_pixels(data: &[u8], dimension: usize) -> Result<ImageFeature, EmbedError> {
    let image = image::load_from_memory(data).map_err(|e| EmbedError::Decode(e.to_string()))?;
    let image = image.to_rgb8();
    let pixels = (image.width() * image.height()) as f32;
    let mut sum = [0f32; 3];
    for pixel in image.pixels() {
        for (s, &c) in sum.iter_mut().zip(pixel.0.iter()) {
            *s += c as f32;
        }
    }
    let vector = sum.iter().take(dimension).map(|s| s / pixels / 255.).collect();
    Ok(ImageFeature { vector, width: image.width(), height: image.height() })
}

/// 文字形如 "1,0"，直接解析为向量
pub fn parse_text(text: &str) -> Result<Vec<f32>, EmbedError> {
    text.split(',')
        .map(|x| x.trim().parse::<f32>().map_err(|e| EmbedError::Service(e.to_string())))
        .collect()
}

impl ImageEmbedder for FakeEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_image(&self, data: &[u8]) -> Result<ImageFeature, EmbedError> {
        embed_pixels(data, self.dimension)
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        parse_text(text)
    }
}

/// 在后台线程中启动一个假的特征服务，返回其地址
pub fn spawn_embedding_server() -> String {
    async fn image_handler(body: Bytes) -> Result<Json<Value>, (StatusCode, String)> {
        embed_pixels(&body, 2)
            .map(|feature| Json(json!({ "embedding": feature.vector })))
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
    }

    async fn text_handler(Json(request): Json<Value>) -> Result<Json<Value>, (StatusCode, String)> {
        let text = request["text"].as_str().unwrap_or_default();
        parse_text(text)
            .map(|vector| Json(json!({ "embedding": vector })))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            let app = Router::new()
                .route("/embed/image", post(image_handler))
                .route("/embed/text", post(text_handler));
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    format!("http://{}", addr)
}

/// 生成纯色图片，格式由扩展名决定
pub fn write_image(path: &Path, width: u32, height: u32, color: [u8; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(width, height, Rgb(color)).save(path).unwrap();
}

pub fn config_json(image_base: Option<&Path>, extra: Value) -> Value {
    let mut config = json!({ "clip-model": "test", "feature-dim": 2 });
    if let Some(base) = image_base {
        config["import-image-base"] = json!(base);
    }
    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        config.extend(extra.clone());
    }
    config
}

pub fn config(conf_dir: &Path, image_base: Option<&Path>, extra: Value) -> Config {
    let conf_dir = ConfDir::from_str(conf_dir.to_str().unwrap()).unwrap();
    Config::from_json(&config_json(image_base, extra).to_string(), &conf_dir).unwrap()
}

/// 打开一个批大小为 2 的数据库，方便覆盖跨批的情况
pub async fn open_db(config: Config) -> IMDB {
    IMDBBuilder::new(config).batch_size(2).open().await.unwrap()
}

/// 编码为 PNG 的纯色图片
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(vec![]);
    RgbImage::from_pixel(width, height, Rgb(color))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
