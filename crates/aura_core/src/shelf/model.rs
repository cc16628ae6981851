//! Bookshelf records.

use serde::{Deserialize, Serialize};

/// An imported book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Generated on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Shelf section the book belongs to.
    pub genre_id: i64,
    /// Content hash of the source file.
    pub hash: String,
    /// Source file name.
    pub name: String,
    /// Display title.
    pub title: String,
    /// Source file size in bytes.
    pub size: u64,
    /// Import time in milliseconds since the epoch.
    pub created_time: i64,
}

impl Book {
    /// Creates a book from its source file; the title is the file name
    /// without its extension.
    pub fn new(
        genre_id: i64,
        name: impl Into<String>,
        hash: impl Into<String>,
        size: u64,
        created_time: i64,
    ) -> Self {
        let name = name.into();
        let title = match name.rfind('.') {
            Some(dot) if dot > 0 => name[..dot].to_string(),
            _ => name.clone(),
        };
        Self {
            id: None,
            genre_id,
            hash: hash.into(),
            name,
            title,
            size,
            created_time,
        }
    }
}

/// One chapter of a book, keyed by `[bookId, id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Chapter number within the book.
    pub id: i64,
    /// Owning book; assigned on import.
    #[serde(default)]
    pub book_id: i64,
    /// Position in the table of contents.
    pub index: u32,
    /// Heading.
    pub title: String,
    /// Text lines.
    pub lines: Vec<String>,
    /// First line number in the source file.
    pub start_line_number: u32,
    /// Last line number in the source file.
    pub end_line_number: u32,
}

impl Chapter {
    /// Returns the chapter text.
    pub fn content(&self) -> String {
        self.lines.join("\n")
    }
}

/// A table of contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Chapter position.
    pub index: u32,
    /// Chapter heading.
    pub title: String,
}

impl From<&Chapter> for TocEntry {
    fn from(chapter: &Chapter) -> Self {
        Self {
            index: chapter.index,
            title: chapter.title.clone(),
        }
    }
}

/// The table of contents of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOfContents {
    /// Owning book.
    pub book_id: i64,
    /// Entries in chapter order.
    pub contents: Vec<TocEntry>,
}

/// Where the reader left off in a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    /// Owning book.
    pub book_id: i64,
    /// Current chapter, starting at 1.
    pub chapter_index: u32,
    /// Current line within the chapter, starting at 1.
    pub line_index: u32,
    /// Scroll offset in pixels.
    pub scroll_top: f64,
}

impl ReadingProgress {
    /// Progress at the start of a book.
    pub fn start(book_id: i64) -> Self {
        Self {
            book_id,
            chapter_index: 1,
            line_index: 1,
            scroll_top: 0.0,
        }
    }
}

/// Key of the single reader setting record.
pub const READER_SETTING_ID: &str = "reader-setting";

/// Reader appearance preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderSetting {
    /// Always [`READER_SETTING_ID`].
    pub id: String,
    /// Value of the selected [`ReaderTheme`].
    pub theme: String,
    /// Font size in pixels.
    pub font_size: u32,
    /// Text color.
    pub font_color: String,
    /// Page width in pixels.
    pub page_width: u32,
    /// Page padding in pixels.
    pub page_padding: u32,
    /// Line height multiplier.
    pub line_height: f64,
    /// Color around the page.
    pub background_color: String,
    /// Page color.
    pub content_background_color: String,
}

impl Default for ReaderSetting {
    fn default() -> Self {
        Self {
            id: READER_SETTING_ID.to_string(),
            theme: "yellow".to_string(),
            font_size: 18,
            font_color: "#000000".to_string(),
            page_width: 800,
            page_padding: 30,
            line_height: 2.0,
            background_color: "#be966e".to_string(),
            content_background_color: "#f2e8c8".to_string(),
        }
    }
}

impl ReaderSetting {
    /// Switches to `theme`, taking over its colors.
    pub fn apply_theme(&mut self, theme: &ReaderTheme) {
        self.theme = theme.value.to_string();
        self.font_color = theme.font_color.to_string();
        self.background_color = theme.background_color.to_string();
        self.content_background_color = theme.content_background_color.to_string();
    }
}

/// A built-in color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTheme {
    /// Stored in [`ReaderSetting::theme`].
    pub value: &'static str,
    /// Display label.
    pub label: &'static str,
    /// Text color.
    pub font_color: &'static str,
    /// Page color.
    pub content_background_color: &'static str,
    /// Color around the page.
    pub background_color: &'static str,
}

const THEMES: [ReaderTheme; 6] = [
    ReaderTheme {
        value: "light",
        label: "浅色",
        font_color: "#000000",
        content_background_color: "#ffffff",
        background_color: "#ffffff",
    },
    ReaderTheme {
        value: "dim",
        label: "昏暗",
        font_color: "#e3e3e3",
        content_background_color: "#111a2e",
        background_color: "#111a2e",
    },
    ReaderTheme {
        value: "dark",
        label: "深色",
        font_color: "#e3e3e3",
        content_background_color: "#202124",
        background_color: "#202124",
    },
    ReaderTheme {
        value: "yellow",
        label: "黄色",
        font_color: "#000000",
        content_background_color: "#f2e8c8",
        background_color: "#be966e",
    },
    ReaderTheme {
        value: "blue",
        label: "蓝色",
        font_color: "#e3e3e3",
        content_background_color: "#d2e3fc",
        background_color: "#d2e3fc",
    },
    ReaderTheme {
        value: "grey",
        label: "灰色",
        font_color: "#e3e3e3",
        content_background_color: "#3c3c3c",
        background_color: "#3c3c3c",
    },
];

impl ReaderTheme {
    /// Returns every built-in theme.
    pub fn all() -> &'static [ReaderTheme] {
        &THEMES
    }

    /// Finds a theme by value.
    pub fn find(value: &str) -> Option<&'static ReaderTheme> {
        THEMES.iter().find(|theme| theme.value == value)
    }
}
