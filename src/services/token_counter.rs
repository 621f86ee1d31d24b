//! Token 估算与文本切分
//!
//! 按"4 个字符约 1 个 token"粗略估算，不依赖具体模型的分词器。

/// 按字符数估算 token：空文本为 0，否则至少为 1
pub fn tokens_for_chars(chars: usize) -> usize {
    if chars == 0 {
        0
    } else {
        (chars / 4).max(1)
    }
}

/// 估算文本的 token 数
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

/// 在不超过 `max_tokens` 的前提下最多能容纳的字符数
fn max_chars_for(max_tokens: usize) -> usize {
    max_tokens.saturating_mul(4).saturating_add(3)
}

/// 按 token 上限切分文本
///
/// 先按段落（`\n\n`）贪心合并；单个段落超限时再按句子切分。
/// 单个句子仍然超限时原样保留为一段，由调用方决定是否拒绝，不做截断。
pub fn split_by_token_limit(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_chars_for(max_tokens);
    let mut packer = ChunkPacker::new(max_chars);

    for paragraph in paragraphs(text) {
        if paragraph.chars().count() <= max_chars {
            packer.push(paragraph, "\n\n");
            continue;
        }

        // 超长段落：单独按句子切分
        packer.flush();
        for sentence in sentences(paragraph) {
            packer.push(sentence, "");
        }
        packer.flush();
    }

    packer.finish()
}

/// 把文本切成恰好 `count` 个章节，供每轮问答使用
///
/// 段落数不少于 `count` 时按顺序均匀分配；段落不够时改按行切分；
/// 仍然不够则循环复用。
pub fn split_sections(text: &str, count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }

    let mut units: Vec<&str> = paragraphs(text).collect();
    if units.len() < count {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.len() > units.len() {
            units = lines;
        }
    }

    if units.is_empty() {
        return vec![text.trim().to_string(); count];
    }

    if units.len() >= count {
        (0..count)
            .map(|i| {
                let start = i * units.len() / count;
                let end = (i + 1) * units.len() / count;
                units[start..end].join("\n\n")
            })
            .collect()
    } else {
        (0..count)
            .map(|i| units[i % units.len()].to_string())
            .collect()
    }
}

/// 按轮次把 `count` 个章节分配到各个分段，再在分段内部切分
///
/// 第 t 轮（从 1 开始）落在第 `(t - 1) * chunks.len() / count` 段，
/// 与 `Document::reference_for_turn` 的映射一致。章节只取自所在分段，
/// 所以每个章节都不会超过分段本身的 token 数。
pub fn split_sections_across(chunks: &[String], count: usize) -> Vec<String> {
    if chunks.is_empty() {
        return split_sections("", count);
    }

    let chunk_of = |turn: usize| ((turn - 1) * chunks.len() / count).min(chunks.len() - 1);
    let mut sections = Vec::with_capacity(count);
    let mut turn = 1;
    while turn <= count {
        let index = chunk_of(turn);
        let turns_here = (turn..=count).take_while(|t| chunk_of(*t) == index).count();
        sections.extend(split_sections(&chunks[index], turns_here));
        turn += turns_here;
    }
    sections
}

/// 非空段落
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// 按句末标点切分句子（标点保留在句尾）
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut iter = paragraph.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let end = i + c.len_utf8();
        let is_boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => iter.peek().is_none_or(|(_, next)| next.is_whitespace()),
            _ => false,
        };
        if is_boundary {
            result.push(&paragraph[start..end]);
            start = end;
        }
    }

    if start < paragraph.len() {
        result.push(&paragraph[start..]);
    }

    result
}

/// 贪心合并片段，保证每段字符数不超过上限
struct ChunkPacker {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_chars: usize,
}

impl ChunkPacker {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_chars: 0,
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let piece_chars = piece.chars().count();
        let sep_chars = if self.current.is_empty() {
            0
        } else {
            separator.chars().count()
        };

        if !self.current.is_empty() && self.current_chars + sep_chars + piece_chars > self.max_chars
        {
            self.flush();
        }

        if !self.current.is_empty() {
            self.current.push_str(separator);
            self.current_chars += separator.chars().count();
        }
        self.current.push_str(piece);
        self.current_chars += piece_chars;
    }

    fn flush(&mut self) {
        let chunk = std::mem::take(&mut self.current);
        self.current_chars = 0;
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            self.chunks.push(trimmed.to_string());
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 按字符而不是字节计数
        assert_eq!(estimate_tokens("一二三四五六七八"), 2);
    }

    #[test]
    fn test_small_text_is_single_chunk() {
        let chunks = split_by_token_limit("第一段\n\n第二段", 100);
        assert_eq!(chunks, vec!["第一段\n\n第二段".to_string()]);
    }

    #[test]
    fn test_split_on_paragraphs() {
        let para = "a".repeat(40);
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        // 上限 20 tokens ≈ 83 字符，两段合并为 82 字符
        let chunks = split_by_token_limit(&text, 20);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 20);
        }
    }

    #[test]
    fn test_long_paragraph_split_on_sentences() {
        let sentence = format!("{}。", "字".repeat(30));
        let text = sentence.repeat(4);
        let chunks = split_by_token_limit(&text, 10);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.ends_with('。')));
        assert!(chunks.iter().all(|c| estimate_tokens(c) <= 10));
    }

    #[test]
    fn test_oversize_sentence_is_kept_whole() {
        let text = "x".repeat(200);
        let chunks = split_by_token_limit(&text, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 200);
    }

    #[test]
    fn test_sentences_keep_english_abbreviation_like_numbers() {
        let parts = sentences("Version 1.5 is out. Next one? Soon!");
        assert_eq!(parts, vec!["Version 1.5 is out.", " Next one?", " Soon!"]);
    }

    #[test]
    fn test_split_sections_even() {
        let text = (1..=10)
            .map(|i| format!("段落{}", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = split_sections(&text, 5);
        assert_eq!(sections.len(), 5);
        assert_eq!(sections[0], "段落1\n\n段落2");
        assert_eq!(sections[4], "段落9\n\n段落10");
    }

    #[test]
    fn test_split_sections_falls_back_to_lines_then_cycles() {
        let sections = split_sections("第一行\n第二行\n第三行", 5);
        assert_eq!(sections.len(), 5);
        assert_eq!(sections[0], "第一行");
        assert_eq!(sections[2], "第三行");
        assert_eq!(sections[3], "第一行");
    }

    #[test]
    fn test_sections_across_chunks_stay_inside_their_chunk() {
        let chunks: Vec<String> = ["甲", "乙", "丙", "丁"]
            .iter()
            .map(|c| format!("{}一\n\n{}二", c, c))
            .collect();

        let sections = split_sections_across(&chunks, 6);
        assert_eq!(sections.len(), 6);
        // 轮次 1,2 → 段 0；3 → 段 1；4,5 → 段 2；6 → 段 3
        assert_eq!(sections[0], "甲一");
        assert_eq!(sections[1], "甲二");
        assert_eq!(sections[2], "乙一\n\n乙二");
        assert_eq!(sections[3], "丙一");
        assert_eq!(sections[4], "丙二");
        assert_eq!(sections[5], "丁一\n\n丁二");
    }

    #[test]
    fn test_sections_across_more_chunks_than_turns() {
        let chunks: Vec<String> = (0..8).map(|i| format!("段{}", i)).collect();
        let sections = split_sections_across(&chunks, 5);
        assert_eq!(sections, vec!["段0", "段1", "段3", "段4", "段6"]);

        // 只有一段时与整段切分相同
        let single = vec!["p1\n\np2\n\np3".to_string()];
        assert_eq!(split_sections_across(&single, 3), split_sections(&single[0], 3));
        assert!(split_sections_across(&single, 0).is_empty());
    }

    #[test]
    fn test_split_sections_uneven() {
        let text = (1..=7)
            .map(|i| format!("p{}", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = split_sections(&text, 5);
        assert_eq!(sections.len(), 5);
        let joined = sections.join("\n\n");
        assert_eq!(joined, text);
    }
}
