//! Deterministic recursive splitter. Boundary priority: paragraph break,
//! line break, sentence terminator, space, raw character. Consecutive
//! chunks overlap so retrieval doesn't lose context at the seams.

pub const MAX_CHUNK_CHARS: usize = 512;
pub const CHUNK_OVERLAP_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub ordinal: u32,
    pub content: String,
}

/// Split normalized text into ordered chunks of at most `MAX_CHUNK_CHARS`
/// characters. Identical input yields identical output.
pub fn chunk_text(input: &str) -> Vec<TextChunk> {
    let normalized = normalize(input);
    if normalized.is_empty() {
        return Vec::new();
    }

    let fragments = split_fragments(&normalized, 0);
    pack(fragments)
        .into_iter()
        .enumerate()
        .map(|(i, content)| TextChunk {
            ordinal: i as u32,
            content,
        })
        .collect()
}

/// Collapse whitespace runs to a single space within each line, trim the
/// line ends, and trim the whole text. Line structure survives so the
/// paragraph and line boundaries below still exist.
fn normalize(input: &str) -> String {
    input
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Recursively split until every fragment fits. Level picks the boundary:
/// 0 = paragraph, 1 = line, 2 = sentence, 3 = word, 4 = character.
fn split_fragments(text: &str, level: usize) -> Vec<String> {
    if char_len(text) <= MAX_CHUNK_CHARS {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let parts: Vec<String> = match level {
        0 => text.split("\n\n").map(String::from).collect(),
        1 => text.split('\n').map(String::from).collect(),
        2 => text
            .split_inclusive(|c| matches!(c, '.' | '!' | '?'))
            .map(String::from)
            .collect(),
        3 => text.split(' ').map(String::from).collect(),
        _ => {
            // Last resort: hard windows of MAX characters.
            let chars: Vec<char> = text.chars().collect();
            return chars
                .chunks(MAX_CHUNK_CHARS)
                .map(|w| w.iter().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    };

    // A level that produced no split makes no progress; descend directly.
    if parts.len() <= 1 {
        return split_fragments(text, level + 1);
    }

    parts
        .into_iter()
        .flat_map(|part| split_fragments(&part, level + 1))
        .collect()
}

/// Last `n` characters of a chunk, used to seed the next one.
fn tail_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

/// Greedily pack fragments into chunks of at most MAX_CHUNK_CHARS, carrying
/// a CHUNK_OVERLAP_CHARS tail from each chunk into the next. The overlap is
/// dropped when it would push the next chunk over the limit.
fn pack(fragments: Vec<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for fragment in fragments {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }

        if current.is_empty() {
            current = fragment.to_string();
            continue;
        }

        if char_len(&current) + 1 + char_len(fragment) <= MAX_CHUNK_CHARS {
            current.push(' ');
            current.push_str(fragment);
        } else {
            let overlap = tail_chars(&current, CHUNK_OVERLAP_CHARS);
            chunks.push(std::mem::take(&mut current));
            current = if char_len(&overlap) + 1 + char_len(fragment) <= MAX_CHUNK_CHARS {
                format!("{} {}", overlap, fragment)
            } else {
                fragment.to_string()
            };
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("MiniRAG is a RAG platform. It supports multi-tenancy.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(
            chunks[0].content,
            "MiniRAG is a RAG platform. It supports multi-tenancy."
        );
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(chunk_text("").is_empty());
        assert!(chunk_text("   \n\n  \t ").is_empty());
    }

    #[test]
    fn whitespace_is_normalized() {
        let chunks = chunk_text("hello    world\t\tagain");
        assert_eq!(chunks[0].content, "hello world again");
    }

    #[test]
    fn every_chunk_respects_the_limit() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(100);
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= MAX_CHUNK_CHARS);
            assert!(!chunk.content.is_empty());
        }
    }

    #[test]
    fn ordinals_are_sequential() {
        let text = "Sentence one here. ".repeat(120);
        let chunks = chunk_text(&text);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as u32);
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta. ".repeat(60);
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);

        let first = &chunks[0].content;
        let second = &chunks[1].content;
        let overlap = &first[first.len() - CHUNK_OVERLAP_CHARS..];
        assert!(second.starts_with(overlap));
    }

    #[test]
    fn paragraph_boundaries_beat_sentence_boundaries() {
        let para_a = "a".repeat(300);
        let para_b = "b".repeat(300);
        let text = format!("{}\n\n{}", para_a, para_b);
        let chunks = chunk_text(&text);
        // Each paragraph fits on its own; the paragraph split keeps them apart.
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with('a'));
        assert!(chunks[1].content.ends_with('b'));
    }

    #[test]
    fn unbroken_text_hard_splits() {
        let text = "x".repeat(2000);
        let chunks = chunk_text(&text);
        assert!(chunks.len() >= 4);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= MAX_CHUNK_CHARS);
        }
    }

    #[test]
    fn deterministic_for_identical_input() {
        let text = "Deterministic output matters. ".repeat(50);
        assert_eq!(chunk_text(&text), chunk_text(&text));
    }
}
