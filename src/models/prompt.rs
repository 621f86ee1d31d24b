use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

use crate::error::{AppResult, PromptError};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("占位符正则是常量"));

/// 智能体角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// 提问的学生
    Student,
    /// 回答的老师
    Teacher,
    /// 摘要与报告
    Summarizer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Student => "student",
            AgentRole::Teacher => "teacher",
            AgentRole::Summarizer => "summarizer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模板 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    DocumentSummary,
    Question,
    Answer,
    FinalReport,
    FollowUpQuestion,
    FollowUpAnswer,
}

impl TemplateId {
    pub const ALL: [TemplateId; 6] = [
        TemplateId::DocumentSummary,
        TemplateId::Question,
        TemplateId::Answer,
        TemplateId::FinalReport,
        TemplateId::FollowUpQuestion,
        TemplateId::FollowUpAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::DocumentSummary => "document_summary",
            TemplateId::Question => "question",
            TemplateId::Answer => "answer",
            TemplateId::FinalReport => "final_report",
            TemplateId::FollowUpQuestion => "followup_question",
            TemplateId::FollowUpAnswer => "followup_answer",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| PromptError::UnknownTemplate(s.to_string()).into())
    }

    /// 模板所属角色
    pub fn role(&self) -> AgentRole {
        match self {
            TemplateId::DocumentSummary | TemplateId::FinalReport => AgentRole::Summarizer,
            TemplateId::Question | TemplateId::FollowUpQuestion => AgentRole::Student,
            TemplateId::Answer | TemplateId::FollowUpAnswer => AgentRole::Teacher,
        }
    }

    /// 模板中必须出现的占位符
    pub fn required_placeholders(&self) -> &'static [&'static str] {
        match self {
            TemplateId::DocumentSummary => &["document"],
            TemplateId::Question => &["section", "pair_number", "pair_count"],
            TemplateId::Answer => &["question", "section"],
            TemplateId::FinalReport => &["qa_pairs"],
            TemplateId::FollowUpQuestion => &["answer"],
            TemplateId::FollowUpAnswer => &["question"],
        }
    }

    /// 模板中允许出现的全部占位符
    pub fn allowed_placeholders(&self) -> &'static [&'static str] {
        match self {
            TemplateId::DocumentSummary => &["document"],
            TemplateId::Question => &["section", "pair_number", "pair_count", "history", "summary"],
            TemplateId::Answer => &["question", "section", "document", "history"],
            TemplateId::FinalReport => &["qa_pairs", "document_excerpt", "summary", "pair_count"],
            TemplateId::FollowUpQuestion => &["answer", "question", "section"],
            TemplateId::FollowUpAnswer => &["question", "section", "previous_answer"],
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 模板变量
pub type PromptVars = BTreeMap<&'static str, String>;

/// 单个版本的提示词模板
#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    pub id: TemplateId,
    pub version: u32,
    pub system: String,
    pub user: String,
}

impl PromptTemplate {
    /// 模板中出现的占位符（去重）
    pub fn placeholders(&self) -> Vec<String> {
        let mut found: Vec<String> = PLACEHOLDER
            .captures_iter(&self.system)
            .chain(PLACEHOLDER.captures_iter(&self.user))
            .map(|c| c[1].to_string())
            .collect();
        found.sort();
        found.dedup();
        found
    }

    /// 检查占位符是否与模板 ID 匹配
    pub fn validate(&self) -> AppResult<()> {
        let found = self.placeholders();
        let allowed = self.id.allowed_placeholders();

        if let Some(unknown) = found.iter().find(|p| !allowed.contains(&p.as_str())) {
            return Err(PromptError::UnknownPlaceholder {
                id: self.id.to_string(),
                placeholder: unknown.clone(),
            }
            .into());
        }

        if let Some(missing) = self
            .id
            .required_placeholders()
            .iter()
            .find(|r| !found.iter().any(|p| p == *r))
        {
            return Err(PromptError::MissingPlaceholder {
                id: self.id.to_string(),
                placeholder: missing.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// 渲染为 (system, user) 两段文本
    ///
    /// 一次性替换，变量值中的花括号不会被二次展开。
    pub fn render(&self, vars: &PromptVars) -> AppResult<(String, String)> {
        if let Some(missing) = self
            .id
            .required_placeholders()
            .iter()
            .find(|r| !vars.contains_key(*r))
        {
            return Err(PromptError::MissingPlaceholder {
                id: self.id.to_string(),
                placeholder: missing.to_string(),
            }
            .into());
        }

        let fill = |text: &str| -> String {
            PLACEHOLDER
                .replace_all(text, |caps: &Captures| {
                    vars.get(&caps[1]).cloned().unwrap_or_default()
                })
                .into_owned()
        };

        Ok((fill(&self.system), fill(&self.user)))
    }
}

/// 提示词仓库
///
/// 启动时加载，之后只读。每个模板 ID 在加载时就确定好要使用的版本。
#[derive(Debug, Clone)]
pub struct PromptStore {
    selected: HashMap<TemplateId, PromptTemplate>,
    versions: HashMap<TemplateId, Vec<u32>>,
}

impl PromptStore {
    /// 从模板列表构建，`version` 为 "latest" 或具体版本（"v2" / "2"）
    pub fn new(templates: Vec<PromptTemplate>, version: &str) -> AppResult<Self> {
        let pinned = parse_version(version)?;

        let mut by_id: HashMap<TemplateId, Vec<PromptTemplate>> = HashMap::new();
        for template in templates {
            template.validate()?;
            by_id.entry(template.id).or_default().push(template);
        }

        let mut selected = HashMap::new();
        let mut versions = HashMap::new();

        for id in TemplateId::ALL {
            let mut candidates = by_id.remove(&id).unwrap_or_default();
            candidates.sort_by_key(|t| t.version);

            let chosen = match pinned {
                Some(v) => candidates.iter().find(|t| t.version == v).cloned(),
                None => candidates.last().cloned(),
            };

            let Some(chosen) = chosen else {
                return Err(PromptError::NotFound {
                    id: id.to_string(),
                    version: version.to_string(),
                }
                .into());
            };

            versions.insert(id, candidates.iter().map(|t| t.version).collect());
            selected.insert(id, chosen);
        }

        Ok(Self { selected, versions })
    }

    /// 取得选定版本的模板
    pub fn get(&self, id: TemplateId) -> AppResult<&PromptTemplate> {
        self.selected.get(&id).ok_or_else(|| {
            PromptError::NotFound {
                id: id.to_string(),
                version: "latest".to_string(),
            }
            .into()
        })
    }

    /// 某个模板 ID 可用的全部版本（升序）
    pub fn versions(&self, id: TemplateId) -> &[u32] {
        self.versions.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 以指定角色渲染模板，角色不符时报错
    pub fn render(
        &self,
        id: TemplateId,
        role: AgentRole,
        vars: &PromptVars,
    ) -> AppResult<(String, String)> {
        if id.role() != role {
            return Err(PromptError::RoleMismatch {
                id: id.to_string(),
                actual: id.role().to_string(),
                requested: role.to_string(),
            }
            .into());
        }
        self.get(id)?.render(vars)
    }
}

fn parse_version(version: &str) -> AppResult<Option<u32>> {
    let v = version.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("latest") {
        return Ok(None);
    }
    v.trim_start_matches(['v', 'V'])
        .parse::<u32>()
        .map(Some)
        .map_err(|_| PromptError::InvalidVersion(version.to_string()).into())
}
