//! Composition, candidate menu and commit snapshots
//!
//! The engine reports its input context as three parts that always belong to
//! the same turn: the preedit composition, the candidate menu and the raw
//! input. They are read together and cached together.

use serde::{Deserialize, Serialize};

/// Text committed by the engine (e.g. after selecting a candidate)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub text: String,
}

impl Commit {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Preedit composition for display
///
/// Offsets are in characters of `preedit`, not bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    /// Length of the preedit in characters
    pub length: usize,
    /// Caret position within the preedit
    pub cursor_pos: usize,
    /// Start of the highlighted (selected) segment
    pub sel_start: usize,
    /// End of the highlighted (selected) segment
    pub sel_end: usize,
    /// The preedit text to display (e.g. "ni hao")
    pub preedit: String,
    /// Text that would be committed if the composition were committed now
    pub commit_text_preview: String,
}

impl Composition {
    /// Check if the composition is empty
    pub fn is_empty(&self) -> bool {
        self.preedit.is_empty()
    }
}

/// A single candidate with an optional annotation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub text: String,
    pub comment: String,
}

impl CandidateItem {
    pub fn new(text: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            comment: comment.into(),
        }
    }
}

/// The page of candidates currently shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMenu {
    /// Number of candidates per page
    pub page_size: usize,
    /// Current page index (0-based)
    pub page_number: usize,
    /// Whether this is the last page
    pub is_last_page: bool,
    /// Index of the highlighted candidate within the page
    pub highlighted_index: usize,
    /// Candidates on the current page, in display order
    pub candidates: Vec<CandidateItem>,
    /// Selection labels, if the schema defines them
    pub select_keys: Option<String>,
}

impl CandidateMenu {
    /// Number of candidates visible on the current page
    pub fn visible(&self) -> usize {
        self.candidates.len()
    }

    /// The highlighted candidate, if any
    pub fn highlighted(&self) -> Option<&CandidateItem> {
        self.candidates.get(self.highlighted_index)
    }
}

/// Input context: composition, menu and raw input of one engine turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub composition: Composition,
    pub menu: CandidateMenu,
    /// The raw key input (e.g. "nihao")
    pub input: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_highlighted() {
        let menu = CandidateMenu {
            page_size: 5,
            highlighted_index: 1,
            candidates: vec![CandidateItem::new("你", ""), CandidateItem::new("尼", "")],
            ..Default::default()
        };
        assert_eq!(menu.visible(), 2);
        assert_eq!(menu.highlighted().map(|c| c.text.as_str()), Some("尼"));
    }

    #[test]
    fn test_menu_highlighted_out_of_range() {
        let menu = CandidateMenu {
            highlighted_index: 3,
            ..Default::default()
        };
        assert!(menu.highlighted().is_none());
    }

    #[test]
    fn test_commit_is_empty() {
        assert!(Commit::default().is_empty());
        assert!(!Commit::new("你好").is_empty());
    }
}
