use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 文档来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Pdf,
    Text,
}

/// PDF 内嵌图片（data URL 形式）
#[derive(Debug, Clone, Serialize)]
pub struct DocumentImage {
    pub index: usize,
    pub mime: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub data_url: String,
}

/// 已加载的文档
///
/// 加载后不可变，新上传或重置时整体替换。
#[derive(Debug, Clone)]
pub struct Document {
    pub file_name: String,
    pub source: DocumentSource,
    pub text: String,
    pub total_tokens: usize,
    pub page_count: usize,
    /// 未超限时只有一段（即全文）
    pub chunks: Vec<String>,
    pub images: Vec<DocumentImage>,
    pub loaded_at: DateTime<Local>,
}

/// 文档概要信息（用于前端展示）
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub file_name: String,
    pub source: DocumentSource,
    pub page_count: usize,
    pub char_count: usize,
    pub total_tokens: usize,
    pub chunk_count: usize,
    pub is_segmented: bool,
    pub image_count: usize,
    pub loaded_at: DateTime<Local>,
}

impl Document {
    /// 是否被分段处理
    pub fn is_segmented(&self) -> bool {
        self.chunks.len() > 1
    }

    /// 生成摘要时使用的文本：未分段时为全文，分段时为第一段
    pub fn summary_source(&self) -> &str {
        self.chunks.first().map(String::as_str).unwrap_or(&self.text)
    }

    /// 第 `turn` 轮（从 1 开始，共 `total` 轮）回答时参考的文本
    ///
    /// 分段时按轮次比例映射到对应段落，单个段落不超过 token 上限。
    pub fn reference_for_turn(&self, turn: usize, total: usize) -> &str {
        if !self.is_segmented() || total == 0 {
            return self.summary_source();
        }
        let index = (turn.saturating_sub(1) * self.chunks.len() / total).min(self.chunks.len() - 1);
        &self.chunks[index]
    }

    pub fn info(&self) -> DocumentInfo {
        DocumentInfo {
            file_name: self.file_name.clone(),
            source: self.source,
            page_count: self.page_count,
            char_count: self.text.chars().count(),
            total_tokens: self.total_tokens,
            chunk_count: self.chunks.len(),
            is_segmented: self.is_segmented(),
            image_count: self.images.len(),
            loaded_at: self.loaded_at,
        }
    }
}
