//! 报告与提示词上下文的文本拼装
//!
//! 纯函数，不调用 LLM。

use crate::models::chat::{QaPair, TurnKind};
use crate::utils::logging::truncate_text;

/// 报告中的摘要标题
pub const SUMMARY_HEADING: &str = "## 文档摘要";
/// 报告中的问答标题
pub const QA_HEADING: &str = "## 问答记录";

/// 学生提问时参考的"已问过的问题"
pub fn format_question_history(pairs: &[QaPair]) -> String {
    let questions: Vec<String> = pairs
        .iter()
        .filter(|p| p.kind == TurnKind::Main)
        .map(|p| format!("Q{}: {}", p.label(), truncate_text(&p.question, 200)))
        .collect();

    if questions.is_empty() {
        "（暂无）".to_string()
    } else {
        questions.join("\n")
    }
}

/// 老师回答时参考的最近几轮问答，回答按字符数截断
pub fn format_recent_exchanges(pairs: &[QaPair], count: usize, answer_chars: usize) -> String {
    let start = pairs.len().saturating_sub(count);
    let recent = &pairs[start..];

    if recent.is_empty() {
        return "（暂无）".to_string();
    }

    recent
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "Q{}: {}\nA{}: {}",
                i + 1,
                p.question,
                i + 1,
                truncate_text(&p.answer, answer_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 汇总报告提示词中的问答记录
pub fn format_qa_for_report(pairs: &[QaPair]) -> String {
    pairs
        .iter()
        .map(|p| {
            let tag = match p.kind {
                TurnKind::Main => String::new(),
                TurnKind::FollowUp => "（追问）".to_string(),
            };
            format!("Q{}{}: {}\nA{}: {}", p.label(), tag, p.question, p.label(), p.answer)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 文档开头的一段，用于汇总报告
pub fn document_excerpt(text: &str, max_chars: usize) -> String {
    truncate_text(text, max_chars)
}

/// 问答记录的 Markdown 段落
pub fn render_qa_section(pairs: &[QaPair]) -> String {
    let mut out = String::from(QA_HEADING);
    out.push_str("\n\n");

    for pair in pairs {
        let heading = match pair.kind {
            TurnKind::Main => format!("### Q{}. {}", pair.label(), pair.question.trim()),
            TurnKind::FollowUp => format!("#### Q{}（追问）. {}", pair.label(), pair.question.trim()),
        };
        out.push_str(&heading);
        out.push_str("\n\n");
        out.push_str(pair.answer.trim());
        out.push_str("\n\n");
    }

    out.trim_end().to_string()
}

/// 保证报告包含摘要段落和每一组主问答的标签
///
/// LLM 生成的报告缺少这些内容时在相应位置补上。
pub fn ensure_report_structure(report: &str, summary: &str, pairs: &[QaPair]) -> String {
    let mut report = report.trim().to_string();

    if !report.contains(SUMMARY_HEADING) {
        report = format!("{}\n\n{}\n\n{}", SUMMARY_HEADING, summary.trim(), report);
    }

    let main_pairs: Vec<&QaPair> = pairs.iter().filter(|p| p.kind == TurnKind::Main).collect();
    let all_labelled = main_pairs.iter().all(|p| has_label(&report, p.pair));
    if !all_labelled {
        report.push_str("\n\n");
        report.push_str(&render_qa_section(pairs));
    }

    report.trim().to_string()
}

/// 生成不依赖 LLM 的完整报告
pub fn fallback_report(title: &str, summary: &str, pairs: &[QaPair]) -> String {
    format!(
        "# {} 学习报告\n\n{}\n\n{}\n\n{}",
        title,
        SUMMARY_HEADING,
        summary.trim(),
        render_qa_section(pairs)
    )
}

/// 报告中是否出现 `Q{n}`（后面不能紧跟数字，避免 Q1 匹配到 Q10）
fn has_label(report: &str, n: usize) -> bool {
    let label = format!("Q{}", n);
    report.match_indices(&label).any(|(i, _)| {
        !report[i + label.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}
