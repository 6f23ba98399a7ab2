//! Topic binding patterns.
//!
//! Routing keys and patterns are split on `.`. In a pattern `*` matches exactly
//! one word and `#` matches zero or more words, anywhere in the pattern.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Word(String),
    Star,
    Hash,
}

/// A parsed topic binding pattern such as `order.*.us` or `#.error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        for word in pattern.split('.') {
            let segment = match word {
                "*" => Segment::Star,
                "#" => Segment::Hash,
                other => Segment::Word(other.to_owned()),
            };
            // `#.#` matches exactly what `#` matches.
            if segment == Segment::Hash && segments.last() == Some(&Segment::Hash) {
                continue;
            }
            segments.push(segment);
        }
        Self { segments }
    }

    /// Walks the pattern once, tracking every key position the consumed
    /// prefix can end at. Linear in `segments × words`.
    pub fn matches(&self, routing_key: &str) -> bool {
        let words: Vec<&str> = routing_key.split('.').collect();
        let n = words.len();

        let mut reach = vec![false; n + 1];
        reach[0] = true;
        for segment in &self.segments {
            let mut next = vec![false; n + 1];
            match segment {
                Segment::Hash => {
                    let mut open = false;
                    for (i, slot) in next.iter_mut().enumerate() {
                        open |= reach[i];
                        *slot = open;
                    }
                }
                Segment::Star => {
                    for i in 0..n {
                        next[i + 1] = reach[i];
                    }
                }
                Segment::Word(expected) => {
                    for i in 0..n {
                        next[i + 1] = reach[i] && words[i] == expected.as_str();
                    }
                }
            }
            if !next.contains(&true) {
                return false;
            }
            reach = next;
        }
        reach[n]
    }
}
