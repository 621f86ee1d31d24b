//! 文档加载服务 - 业务能力层
//!
//! 负责上传文件的校验、PDF 文本（及可选图片）提取、token 估算与分段。
//! PDF 解析是 CPU 密集操作，异步入口会放到 `spawn_blocking` 中执行。

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Local;
use lopdf::Object;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, FileError};
use crate::models::document::{Document, DocumentImage, DocumentSource};
use crate::services::token_counter::{estimate_tokens, split_by_token_limit};

/// 粘贴文本的最少字符数
pub const MIN_TEXT_CHARS: usize = 100;
/// 粘贴文本的最多字符数
pub const MAX_TEXT_CHARS: usize = 500_000;

static EXTRA_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("换行正则是常量"));

/// 文档加载器
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    max_file_size_mb: usize,
    max_tokens: usize,
    max_chunks: usize,
    extract_images: bool,
    max_images: usize,
}

impl DocumentLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            max_file_size_mb: config.max_file_size_mb,
            max_tokens: config.max_tokens,
            max_chunks: config.max_chunks,
            extract_images: config.extract_images,
            max_images: config.max_images,
        }
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// 上传前的快速校验：空文件、大小、PDF 文件头
    pub fn validate_upload(&self, bytes: &[u8]) -> AppResult<()> {
        if bytes.is_empty() {
            return Err(FileError::Empty.into());
        }
        if bytes.len() > self.max_file_size_bytes() {
            return Err(FileError::TooLarge {
                size: bytes.len(),
                limit_mb: self.max_file_size_mb,
            }
            .into());
        }
        // 部分生成器会在文件头前写入少量字节
        let head = &bytes[..bytes.len().min(1024)];
        if !head.windows(5).any(|w| w == b"%PDF-") {
            return Err(FileError::NotPdf.into());
        }
        Ok(())
    }

    /// 异步加载 PDF（解析在阻塞线程池中进行）
    pub async fn load_pdf_async(&self, file_name: String, bytes: Vec<u8>) -> AppResult<Document> {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.load_pdf(&file_name, &bytes))
            .await
            .map_err(|e| FileError::Extraction(e.to_string()))?
    }

    /// 加载 PDF 并构建文档
    pub fn load_pdf(&self, file_name: &str, bytes: &[u8]) -> AppResult<Document> {
        self.validate_upload(bytes)?;

        info!(
            "📄 开始解析 PDF: {} ({:.2} MB)",
            file_name,
            bytes.len() as f64 / 1024.0 / 1024.0
        );

        let pdf = lopdf::Document::load_mem(bytes).map_err(|source| FileError::Corrupt { source })?;
        if pdf.is_encrypted() {
            return Err(FileError::Encrypted.into());
        }

        let pages = pdf.get_pages();
        let page_count = pages.len();
        let mut page_texts = Vec::new();

        for page_no in pages.keys() {
            match pdf.extract_text(&[*page_no]) {
                Ok(text) => {
                    let text = text.trim();
                    if text.is_empty() {
                        debug!("第 {} 页没有文本，跳过", page_no);
                        continue;
                    }
                    page_texts.push(format!("--- 第 {} 页 ---\n{}", page_no, text));
                }
                Err(e) => {
                    warn!("⚠️  第 {} 页文本提取失败，跳过: {}", page_no, e);
                }
            }
        }

        if page_texts.is_empty() {
            return Err(FileError::NoText.into());
        }

        let text = normalize_text(&page_texts.join("\n\n"));

        let images = if self.extract_images {
            let images = extract_jpeg_images(&pdf, self.max_images);
            info!("🖼️  提取到 {} 张图片", images.len());
            images
        } else {
            Vec::new()
        };

        let document = self.build_document(file_name, DocumentSource::Pdf, text, page_count, images)?;
        info!(
            "✓ PDF 解析完成: {} 页，{} 字符，约 {} tokens",
            document.page_count,
            document.text.chars().count(),
            document.total_tokens
        );
        Ok(document)
    }

    /// 加载粘贴的文本
    pub fn load_text(&self, name: &str, text: &str) -> AppResult<Document> {
        let text = normalize_text(text);
        let chars = text.chars().count();

        if chars == 0 {
            return Err(AppError::invalid_text("文本不能为空"));
        }
        if chars < MIN_TEXT_CHARS {
            return Err(AppError::invalid_text(format!(
                "文本过短 ({} 字符)，至少需要 {} 字符",
                chars, MIN_TEXT_CHARS
            )));
        }
        if chars > MAX_TEXT_CHARS {
            return Err(AppError::invalid_text(format!(
                "文本过长 ({} 字符)，最多 {} 字符",
                chars, MAX_TEXT_CHARS
            )));
        }

        let name = if name.trim().is_empty() {
            "粘贴文本"
        } else {
            name.trim()
        };
        info!("📝 加载文本输入: {} ({} 字符)", name, chars);
        self.build_document(name, DocumentSource::Text, text, 1, Vec::new())
    }

    /// 估算 token 并在超限时分段
    fn build_document(
        &self,
        file_name: &str,
        source: DocumentSource,
        text: String,
        page_count: usize,
        images: Vec<DocumentImage>,
    ) -> AppResult<Document> {
        let total_tokens = estimate_tokens(&text);

        let chunks = if total_tokens <= self.max_tokens {
            vec![text.clone()]
        } else {
            self.segment(&text, total_tokens)?
        };

        Ok(Document {
            file_name: file_name.to_string(),
            source,
            text,
            total_tokens,
            page_count,
            chunks,
            images,
            loaded_at: Local::now(),
        })
    }

    fn segment(&self, text: &str, total_tokens: usize) -> AppResult<Vec<String>> {
        warn!(
            "⚠️  文档约 {} tokens，超过上限 {}，尝试分段处理",
            total_tokens, self.max_tokens
        );

        let chunks = split_by_token_limit(text, self.max_tokens);

        if let Some(largest) = chunks.iter().map(|c| estimate_tokens(c)).max() {
            if largest > self.max_tokens {
                return Err(AppError::TokenLimitExceeded {
                    tokens: total_tokens,
                    ceiling: self.max_tokens,
                    reason: format!("存在无法切分的片段（约 {} tokens）", largest),
                });
            }
        }

        if chunks.len() > self.max_chunks {
            return Err(AppError::TokenLimitExceeded {
                tokens: total_tokens,
                ceiling: self.max_tokens,
                reason: format!("需要 {} 段，超过允许的 {} 段", chunks.len(), self.max_chunks),
            });
        }

        info!("✂️  文档已分为 {} 段", chunks.len());
        Ok(chunks)
    }
}

/// 统一换行并合并多余空行
fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    EXTRA_NEWLINES
        .replace_all(unified.trim(), "\n\n")
        .into_owned()
}

/// 提取 JPEG（DCTDecode）图片，失败的对象直接跳过
fn extract_jpeg_images(pdf: &lopdf::Document, max_images: usize) -> Vec<DocumentImage> {
    let mut images = Vec::new();

    for object in pdf.objects.values() {
        if images.len() >= max_images {
            break;
        }

        let Object::Stream(stream) = object else {
            continue;
        };

        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|name| name == b"Image");
        if !is_image {
            continue;
        }

        let is_jpeg = match stream.dict.get(b"Filter") {
            Ok(Object::Name(name)) => name.as_slice() == b"DCTDecode",
            Ok(Object::Array(filters)) => filters
                .iter()
                .any(|f| matches!(f, Object::Name(name) if name.as_slice() == b"DCTDecode")),
            _ => false,
        };
        if !is_jpeg || stream.content.is_empty() {
            continue;
        }

        images.push(DocumentImage {
            index: images.len(),
            mime: "image/jpeg".to_string(),
            width: stream.dict.get(b"Width").and_then(Object::as_i64).ok(),
            height: stream.dict.get(b"Height").and_then(Object::as_i64).ok(),
            data_url: format!("data:image/jpeg;base64,{}", STANDARD.encode(&stream.content)),
        });
    }

    images
}
