use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("clip_search_count", "count of the search requests", &["query"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("clip_search_duration", "duration of the per-query search in seconds")
        .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "clip_search_max_score",
        "max cosine similarity of the per-query search",
        (-10..=10).map(|x| x as f64 / 10.).collect()
    )
    .unwrap()
});

static METRIC_IMPORT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("clip_import_count", "count of the import outcomes", &["outcome"])
        .unwrap()
});

/// 增加搜索次数，`query` 为 text 或 image
pub fn inc_search(query: &str) {
    METRIC_SEARCH_COUNT.with_label_values(&[query]).inc();
}

/// 记录一次搜索的耗时与最高分
pub fn observe_search(duration: f32, max_score: Option<f32>) {
    METRIC_SEARCH_DURATION.observe(duration as f64);
    if let Some(score) = max_score {
        METRIC_SEARCH_MAX_SCORE.observe(score as f64);
    }
}

/// 记录一次导入结果
pub fn inc_import(outcome: &str) {
    METRIC_IMPORT_COUNT.with_label_values(&[outcome]).inc();
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
