//! Bookshelf workflow tests.

use aura_core::shelf::{
    Book, Chapter, ReaderSetting, ReaderTheme, ReadingProgress, BOOK, CHAPTER, READING_PROGRESS,
    TABLE_OF_CONTENTS,
};
use aura_core::{Bookshelf, StoreError, DEFAULT_NAME};
use aura_storage::{EngineError, MemoryEngine};

fn create_shelf() -> (MemoryEngine, Bookshelf<MemoryEngine>) {
    let engine = MemoryEngine::new();
    let shelf = Bookshelf::open(engine.clone()).unwrap();
    (engine, shelf)
}

fn chapters(count: u32) -> Vec<Chapter> {
    (1..=count)
        .map(|n| Chapter {
            id: i64::from(n),
            book_id: 0,
            index: n,
            title: format!("Chapter {n}"),
            lines: vec![format!("line {n}.1"), format!("line {n}.2")],
            start_line_number: n * 2 - 1,
            end_line_number: n * 2,
        })
        .collect()
}

#[tokio::test]
async fn import_assigns_book_id_everywhere() {
    let (engine, shelf) = create_shelf();

    let book = shelf
        .import_book(Book::new(1, "aura.txt", "hash-1", 1024, 1_700_000_000_000), chapters(3))
        .await
        .unwrap();
    let book_id = book.id.unwrap();
    assert_eq!(book.title, "aura");

    let stored = shelf.book(book_id).await.unwrap().unwrap();
    assert_eq!(stored, book);

    let chapters = shelf.chapters(book_id).await.unwrap();
    assert_eq!(chapters.len(), 3);
    assert!(chapters.iter().all(|chapter| chapter.book_id == book_id));

    let toc = shelf.table_of_contents(book_id).await.unwrap().unwrap();
    let titles: Vec<_> = toc.contents.iter().map(|entry| entry.title.as_str()).collect();
    assert_eq!(titles, vec!["Chapter 1", "Chapter 2", "Chapter 3"]);

    let progress = shelf.reading_progress(book_id).await.unwrap().unwrap();
    assert_eq!(progress, ReadingProgress::start(book_id));

    assert_eq!(engine.records(DEFAULT_NAME, TABLE_OF_CONTENTS).len(), 1);
}

#[tokio::test]
async fn failed_import_lands_nothing() {
    let (engine, shelf) = create_shelf();
    engine.fail_writes(CHAPTER, EngineError::quota_exceeded("storage quota exceeded"));

    let err = shelf
        .import_book(Book::new(1, "aura.txt", "hash-1", 1024, 0), chapters(2))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Operation { .. }));
    for collection in [BOOK, CHAPTER, TABLE_OF_CONTENTS, READING_PROGRESS] {
        assert!(engine.records(DEFAULT_NAME, collection).is_empty(), "{collection}");
    }
}

#[tokio::test]
async fn delete_book_removes_only_its_rows() {
    let (engine, shelf) = create_shelf();
    let first = shelf
        .import_book(Book::new(1, "first.txt", "h1", 10, 0), chapters(5))
        .await
        .unwrap();
    let second = shelf
        .import_book(Book::new(1, "second.txt", "h2", 10, 0), chapters(4))
        .await
        .unwrap();
    let first_id = first.id.unwrap();
    let second_id = second.id.unwrap();

    let deleted = shelf.delete_book(first_id).await.unwrap();

    assert_eq!(deleted, 5);
    assert!(shelf.book(first_id).await.unwrap().is_none());
    assert!(shelf.chapters(first_id).await.unwrap().is_empty());
    assert!(shelf.table_of_contents(first_id).await.unwrap().is_none());
    assert!(shelf.reading_progress(first_id).await.unwrap().is_none());

    assert_eq!(shelf.book(second_id).await.unwrap(), Some(second));
    assert_eq!(shelf.chapters(second_id).await.unwrap().len(), 4);
    assert_eq!(engine.records(DEFAULT_NAME, CHAPTER).len(), 4);
}

#[tokio::test]
async fn books_by_genre() {
    let (_engine, shelf) = create_shelf();
    for (genre, name) in [(1, "a.txt"), (2, "b.txt"), (1, "c.txt")] {
        shelf
            .import_book(Book::new(genre, name, name, 1, 0), Vec::new())
            .await
            .unwrap();
    }

    let titles: Vec<_> = shelf
        .books_by_genre(1)
        .await
        .unwrap()
        .into_iter()
        .map(|book| book.title)
        .collect();
    assert_eq!(titles, vec!["a", "c"]);
    assert!(shelf.books_by_genre(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn chapter_by_composite_key() {
    let (_engine, shelf) = create_shelf();
    let book = shelf
        .import_book(Book::new(1, "a.txt", "h", 1, 0), chapters(3))
        .await
        .unwrap();
    let book_id = book.id.unwrap();

    let chapter = shelf.chapter(book_id, 2).await.unwrap().unwrap();
    assert_eq!(chapter.title, "Chapter 2");
    assert_eq!(chapter.content(), "line 2.1\nline 2.2");
    assert!(shelf.chapter(book_id, 9).await.unwrap().is_none());
}

#[tokio::test]
async fn progress_is_saved() {
    let (_engine, shelf) = create_shelf();
    let book = shelf
        .import_book(Book::new(1, "a.txt", "h", 1, 0), chapters(3))
        .await
        .unwrap();
    let book_id = book.id.unwrap();

    let progress = ReadingProgress {
        book_id,
        chapter_index: 3,
        line_index: 12,
        scroll_top: 480.5,
    };
    shelf.save_progress(&progress).await.unwrap();
    assert_eq!(shelf.reading_progress(book_id).await.unwrap(), Some(progress));
}

#[tokio::test]
async fn reader_setting_defaults_until_saved() {
    let (_engine, shelf) = create_shelf();
    assert_eq!(shelf.reader_setting().await.unwrap(), ReaderSetting::default());

    let mut setting = ReaderSetting::default();
    setting.apply_theme(ReaderTheme::find("dim").unwrap());
    setting.font_size = 20;
    shelf.save_reader_setting(&setting).await.unwrap();
    assert_eq!(shelf.reader_setting().await.unwrap(), setting);

    setting.id = "other".to_string();
    let err = shelf.save_reader_setting(&setting).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidOperation { .. }));
}

#[tokio::test]
async fn open_book_collects_reading_context() {
    let (_engine, shelf) = create_shelf();
    assert!(shelf.open_book(1).await.unwrap().is_none());

    let book = shelf
        .import_book(Book::new(1, "a.txt", "h", 1, 0), chapters(2))
        .await
        .unwrap();
    let book_id = book.id.unwrap();

    let context = shelf.open_book(book_id).await.unwrap().unwrap();
    assert_eq!(context.book, book);
    assert_eq!(context.table_of_contents.unwrap().contents.len(), 2);
    assert_eq!(context.progress, ReadingProgress::start(book_id));
    assert_eq!(context.setting, ReaderSetting::default());
}

#[tokio::test]
async fn clear_keeps_settings() {
    let (engine, shelf) = create_shelf();
    shelf
        .import_book(Book::new(1, "a.txt", "h", 1, 0), chapters(2))
        .await
        .unwrap();
    shelf.save_reader_setting(&ReaderSetting::default()).await.unwrap();

    shelf.clear().await.unwrap();

    for collection in [BOOK, CHAPTER, TABLE_OF_CONTENTS, READING_PROGRESS] {
        assert!(engine.records(DEFAULT_NAME, collection).is_empty(), "{collection}");
    }
    assert_eq!(engine.records(DEFAULT_NAME, "setting").len(), 1);
}
