//! Paragraph splitting shared by the NRTM parser and full imports

/// Split text into blank-line separated paragraphs
///
/// Lines are kept verbatim apart from trailing whitespace. Whitespace-only
/// lines count as blank.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(join(&current));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(join(&current));
    }
    paragraphs
}

fn join(lines: &[&str]) -> String {
    let mut paragraph = lines.join("\n");
    paragraph.push('\n');
    paragraph
}

/// True when every line of the paragraph is a `%` or `#` comment
pub fn is_comment_paragraph(paragraph: &str) -> bool {
    paragraph
        .lines()
        .all(|line| line.starts_with('%') || line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_paragraphs() {
        let text = "% comment\n\nADD 1\n\nmntner: A\nsource: X\n   \n\n\nDEL 2\n";
        let paragraphs = split_paragraphs(text);
        assert_eq!(
            paragraphs,
            vec!["% comment\n", "ADD 1\n", "mntner: A\nsource: X\n", "DEL 2\n"]
        );
    }

    #[test]
    fn test_comment_paragraph() {
        assert!(is_comment_paragraph("% a\n# b\n"));
        assert!(!is_comment_paragraph("% a\nmntner: B\n"));
    }
}
