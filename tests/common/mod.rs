//! 集成测试共用工具

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use tower::ServiceExt;

use pdf_qa_report::models::loaders::builtin_prompt_store;
use pdf_qa_report::models::prompt::TemplateId;
use pdf_qa_report::web::{create_router, AppState};
use pdf_qa_report::{AppResult, ChatModel, ChatRequest, Config};

/// 不访问网络的模型，按模板返回固定内容
#[derive(Default)]
pub struct StubModel {
    calls: AtomicUsize,
}

impl StubModel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for StubModel {
    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn complete(&self, request: &ChatRequest) -> AppResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = match request.template {
            TemplateId::DocumentSummary => "文档介绍了 Rust 的所有权规则。".to_string(),
            TemplateId::Question => format!("问题 {}：这里的规则是什么？", n),
            TemplateId::Answer => "每个值只有一个所有者。".to_string(),
            TemplateId::FinalReport => "# 学习报告\n\n内容概览。".to_string(),
            TemplateId::FollowUpQuestion => "还有别的吗？".to_string(),
            TemplateId::FollowUpAnswer => "没有了。".to_string(),
        };
        Ok(reply)
    }
}

pub fn app_with(config: Config) -> (Router, Arc<StubModel>) {
    let model = Arc::new(StubModel::default());
    let prompts = Arc::new(builtin_prompt_store("latest").expect("内置提示词"));
    let state = Arc::new(AppState::new(config, model.clone(), prompts));
    (create_router(state), model)
}

pub fn app() -> (Router, Arc<StubModel>) {
    app_with(Config::default())
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.expect("请求失败");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("读取响应失败");
    (status, body.to_vec())
}

pub async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, body) = send(router, request).await;
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).expect("响应不是 JSON")
    };
    (status, value)
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("构建请求")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("构建请求")
}

/// 在内存中生成一个每页一段文字的 PDF
pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("编码页面内容"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("保存 PDF");
    buffer
}
