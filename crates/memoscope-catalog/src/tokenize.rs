use jieba_rs::Jieba;
use std::sync::OnceLock;

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

/// Word-segments `text` so FTS5's ascii tokenizer can match CJK spans as
/// whole words. Non-CJK input segments to itself (jieba falls back to
/// whitespace-ish splitting for latin scripts), so this is safe to run
/// unconditionally over every `metadata_text` write and every query string
/// (`4.A`: "applying a segmenter before matching").
pub fn segment(text: &str) -> String {
    jieba()
        .cut(text, false)
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the AND-joined FTS5 MATCH expression from a raw query string:
/// segment, whitespace-split, AND-join (`4.E` step 1).
pub fn and_join_query(query: &str) -> Option<String> {
    let segmented = segment(query);
    let tokens: Vec<&str> = segmented.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_latin_text_to_whitespace_tokens() {
        let out = segment("cat on sofa");
        assert_eq!(out, "cat on sofa");
    }

    #[test]
    fn segments_cjk_text_into_words() {
        let out = segment("我爱北京天安门");
        assert!(out.contains("北京"));
    }

    #[test]
    fn and_join_builds_quoted_conjunction() {
        let q = and_join_query("cat sofa").unwrap();
        assert_eq!(q, "\"cat\" AND \"sofa\"");
    }

    #[test]
    fn and_join_empty_query_is_none() {
        assert!(and_join_query("   ").is_none());
    }
}
