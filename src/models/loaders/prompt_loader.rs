use serde::Deserialize;
use std::path::Path;
use tokio::fs;

use crate::config::Config;
use crate::error::{AppResult, PromptError};
use crate::models::prompt::{PromptStore, PromptTemplate, TemplateId};

/// 内置提示词
const BUILTIN_PROMPTS: &str = include_str!("../../../prompts/prompts.toml");

#[derive(Debug, Deserialize)]
struct PromptFile {
    #[serde(default)]
    template: Vec<RawTemplate>,
}

#[derive(Debug, Deserialize)]
struct RawTemplate {
    id: String,
    version: u32,
    system: String,
    user: String,
}

/// 解析 TOML 格式的提示词文件
pub fn parse_prompt_toml(content: &str, origin: &str, version: &str) -> AppResult<PromptStore> {
    let file: PromptFile = toml::from_str(content).map_err(|source| PromptError::Parse {
        path: origin.to_string(),
        source,
    })?;

    let templates = file
        .template
        .into_iter()
        .map(|raw| {
            Ok(PromptTemplate {
                id: TemplateId::parse(&raw.id)?,
                version: raw.version,
                system: raw.system.trim().to_string(),
                user: raw.user.trim().to_string(),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    PromptStore::new(templates, version)
}

/// 使用内置提示词
pub fn builtin_prompt_store(version: &str) -> AppResult<PromptStore> {
    parse_prompt_toml(BUILTIN_PROMPTS, "<builtin>", version)
}

/// 按配置加载提示词：指定了 prompt_file 时读取文件，否则使用内置模板
pub async fn load_prompt_store(config: &Config) -> AppResult<PromptStore> {
    let Some(path) = config.prompt_file.as_deref() else {
        tracing::info!("📝 使用内置提示词 (版本: {})", config.prompt_version);
        return builtin_prompt_store(&config.prompt_version);
    };

    let path = Path::new(path);
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| PromptError::Read {
            path: path.display().to_string(),
            source,
        })?;

    let store = parse_prompt_toml(&content, &path.display().to_string(), &config.prompt_version)?;
    tracing::info!(
        "📝 已加载提示词文件: {} (版本: {})",
        path.display(),
        config.prompt_version
    );
    for id in TemplateId::ALL {
        if let Ok(template) = store.get(id) {
            tracing::debug!(
                "  {}: 使用 v{}，可用 {:?}",
                id,
                template.version,
                store.versions(id)
            );
        }
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::prompt::{AgentRole, PromptVars};

    #[test]
    fn test_builtin_prompts_are_complete() {
        let store = builtin_prompt_store("latest").unwrap();
        for id in TemplateId::ALL {
            let template = store.get(id).unwrap();
            assert!(!template.system.is_empty());
            assert!(!template.user.is_empty());
        }
    }

    #[test]
    fn test_builtin_summary_renders_document() {
        let store = builtin_prompt_store("latest").unwrap();
        let mut vars = PromptVars::new();
        vars.insert("document", "Rust 所有权".to_string());
        let (_, user) = store
            .render(TemplateId::DocumentSummary, AgentRole::Summarizer, &vars)
            .unwrap();
        assert!(user.contains("Rust 所有权"));
        assert!(!user.contains("{document}"));
    }

    #[test]
    fn test_unknown_template_id() {
        let content = r#"
            [[template]]
            id = "poem"
            version = 1
            system = "s"
            user = "u"
        "#;
        let err = parse_prompt_toml(content, "inline", "latest").unwrap_err();
        assert!(matches!(err, AppError::Prompt(PromptError::UnknownTemplate(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let err = parse_prompt_toml("[[template]\nid=", "inline", "latest").unwrap_err();
        assert!(matches!(err, AppError::Prompt(PromptError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_missing_prompt_file() {
        let config = Config {
            prompt_file: Some("/nonexistent/prompts.toml".to_string()),
            ..Config::default()
        };
        let err = tokio_test::assert_err!(load_prompt_store(&config).await);
        assert!(matches!(err, AppError::Prompt(PromptError::Read { .. })));
        assert_eq!(err.code(), "PROMPT_LOAD_ERROR");
    }
}
