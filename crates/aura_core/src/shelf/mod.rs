//! The bookshelf.
//!
//! [`aura_schema`] describes the reader's database and [`Bookshelf`] runs the
//! workflows the reader performs against it. Each workflow is one
//! transaction: an import either lands the book with its chapters, table of
//! contents and progress, or lands nothing.

mod model;

pub use model::{
    Book, Chapter, ReaderSetting, ReaderTheme, ReadingProgress, TableOfContents, TocEntry,
    READER_SETTING_ID,
};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::schema::{CollectionDescriptor, IndexDescriptor, Schema};
use crate::store::Store;
use aura_storage::{Engine, Key, KeyPath, TransactionMode};
use std::sync::Arc;
use tracing::info;

/// Books.
pub const BOOK: &str = "book";
/// Tables of contents, one per book.
pub const TABLE_OF_CONTENTS: &str = "table_of_contents";
/// Chapters.
pub const CHAPTER: &str = "chapter";
/// Reading progress, one per book.
pub const READING_PROGRESS: &str = "reading_progress";
/// Reader settings.
pub const SETTING: &str = "setting";

/// Index of books by genre.
pub const GENRE_ID_INDEX: &str = "genre_id";
/// Index of chapters by book.
pub const BOOK_ID_INDEX: &str = "book_id";

const BOOK_COLLECTIONS: [&str; 4] = [BOOK, TABLE_OF_CONTENTS, CHAPTER, READING_PROGRESS];

/// Returns the reader's schema.
///
/// # Errors
///
/// Returns `InvalidSchema` if the descriptors are inconsistent.
pub fn aura_schema() -> StoreResult<Schema> {
    let collections = vec![
        CollectionDescriptor::new(BOOK, "id")
            .auto_key()
            .with_index(IndexDescriptor::new(GENRE_ID_INDEX, "genreId")),
        CollectionDescriptor::new(TABLE_OF_CONTENTS, "bookId"),
        CollectionDescriptor::new(CHAPTER, KeyPath::composite(["bookId", "id"]))
            .with_index(IndexDescriptor::new(BOOK_ID_INDEX, "bookId")),
        CollectionDescriptor::new(READING_PROGRESS, "bookId"),
        CollectionDescriptor::new(SETTING, "id"),
    ];
    Schema::new(collections)
}

/// Everything the reader view needs to open a book.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingContext {
    /// The book.
    pub book: Book,
    /// Its table of contents, if one was stored.
    pub table_of_contents: Option<TableOfContents>,
    /// Saved progress, or the start of the book.
    pub progress: ReadingProgress,
    /// Saved reader setting, or the default.
    pub setting: ReaderSetting,
}

/// Bookshelf workflows over a [`Store`].
pub struct Bookshelf<E: Engine> {
    store: Arc<Store<E>>,
}

impl<E: Engine> Clone for Bookshelf<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<E: Engine> Bookshelf<E> {
    /// Creates a bookshelf over `engine` with the reader's database and schema.
    pub fn open(engine: E) -> StoreResult<Self> {
        let store = Store::new(engine, StoreConfig::aura(), aura_schema()?);
        Ok(Self::new(Arc::new(store)))
    }

    /// Creates a bookshelf over an existing store.
    ///
    /// The store's schema must contain the collections of [`aura_schema`].
    pub fn new(store: Arc<Store<E>>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<Store<E>> {
        &self.store
    }

    /// Imports a book with its chapters.
    ///
    /// The book receives a generated id, which is also assigned to every
    /// chapter, the table of contents and the initial reading progress.
    /// Returns the book with its id set.
    pub async fn import_book(&self, mut book: Book, mut chapters: Vec<Chapter>) -> StoreResult<Book> {
        book.id = None;
        let mut record = serde_json::to_value(&book)?;
        let contents = chapters.iter().map(TocEntry::from).collect::<Vec<_>>();

        let book_id = self
            .store
            .execute(BOOK_COLLECTIONS, TransactionMode::ReadWrite, |ops| async move {
                let key = ops.add(BOOK, &mut record).await?;
                let book_id = key
                    .as_integer()
                    .ok_or_else(|| StoreError::invalid_operation(format!("book key {key} is not an integer")))?;

                for chapter in &mut chapters {
                    chapter.book_id = book_id;
                }
                ops.put_all_typed(CHAPTER, &chapters).await?;
                let mut toc = TableOfContents { book_id, contents };
                ops.add_typed(TABLE_OF_CONTENTS, &mut toc).await?;
                ops.put_typed(READING_PROGRESS, &ReadingProgress::start(book_id))
                    .await?;
                Ok::<_, StoreError>(book_id)
            })
            .await?;

        book.id = Some(book_id);
        info!(book_id, title = %book.title, "book imported");
        Ok(book)
    }

    /// Deletes a book with its chapters, table of contents and progress.
    ///
    /// Returns the number of chapters removed.
    pub async fn delete_book(&self, book_id: i64) -> StoreResult<u64> {
        let chapters = self
            .store
            .execute(BOOK_COLLECTIONS, TransactionMode::ReadWrite, |ops| async move {
                let book = ops.delete_by_key(BOOK, book_id);
                let toc = ops.delete_by_key(TABLE_OF_CONTENTS, book_id);
                let progress = ops.delete_by_key(READING_PROGRESS, book_id);
                let chapters = ops.delete_all_by_index(CHAPTER, BOOK_ID_INDEX, book_id).await?;
                book.await?;
                toc.await?;
                progress.await?;
                Ok::<_, StoreError>(chapters)
            })
            .await?;
        info!(book_id, chapters, "book deleted");
        Ok(chapters)
    }

    /// Removes every book. Reader settings are kept.
    pub async fn clear(&self) -> StoreResult<()> {
        self.store
            .execute(BOOK_COLLECTIONS, TransactionMode::ReadWrite, |ops| async move {
                let pending = BOOK_COLLECTIONS.map(|name| ops.clear(name));
                for clear in pending {
                    clear.await?;
                }
                Ok(())
            })
            .await
    }

    /// Lists the books of a genre, ordered by id.
    pub async fn books_by_genre(&self, genre_id: i64) -> StoreResult<Vec<Book>> {
        let mut books: Vec<Book> = self
            .store
            .execute(BOOK, TransactionMode::ReadOnly, |ops| async move {
                ops.get_all_by_index_typed(BOOK, GENRE_ID_INDEX, genre_id).await
            })
            .await?;
        books.sort_by_key(|book| book.id);
        Ok(books)
    }

    /// Returns a book.
    pub async fn book(&self, book_id: i64) -> StoreResult<Option<Book>> {
        self.store.get_typed(BOOK, book_id).await
    }

    /// Returns one chapter of a book.
    pub async fn chapter(&self, book_id: i64, chapter_id: i64) -> StoreResult<Option<Chapter>> {
        let key = Key::Array(vec![Key::Integer(book_id), Key::Integer(chapter_id)]);
        self.store.get_typed(CHAPTER, key).await
    }

    /// Returns every chapter of a book in table of contents order.
    pub async fn chapters(&self, book_id: i64) -> StoreResult<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self
            .store
            .execute(CHAPTER, TransactionMode::ReadOnly, |ops| async move {
                ops.get_all_by_index_typed(CHAPTER, BOOK_ID_INDEX, book_id).await
            })
            .await?;
        chapters.sort_by_key(|chapter| chapter.index);
        Ok(chapters)
    }

    /// Returns the table of contents of a book.
    pub async fn table_of_contents(&self, book_id: i64) -> StoreResult<Option<TableOfContents>> {
        self.store.get_typed(TABLE_OF_CONTENTS, book_id).await
    }

    /// Returns the saved progress of a book.
    pub async fn reading_progress(&self, book_id: i64) -> StoreResult<Option<ReadingProgress>> {
        self.store.get_typed(READING_PROGRESS, book_id).await
    }

    /// Saves reading progress.
    pub async fn save_progress(&self, progress: &ReadingProgress) -> StoreResult<()> {
        self.store.put_typed(READING_PROGRESS, progress).await?;
        Ok(())
    }

    /// Returns the reader setting, or the default if none was saved.
    pub async fn reader_setting(&self) -> StoreResult<ReaderSetting> {
        Ok(self
            .store
            .get_typed(SETTING, READER_SETTING_ID)
            .await?
            .unwrap_or_default())
    }

    /// Saves the reader setting.
    pub async fn save_reader_setting(&self, setting: &ReaderSetting) -> StoreResult<()> {
        if setting.id != READER_SETTING_ID {
            return Err(StoreError::invalid_operation(format!(
                "reader setting id must be {READER_SETTING_ID}, got {}",
                setting.id
            )));
        }
        self.store.put_typed(SETTING, setting).await?;
        Ok(())
    }

    /// Loads what the reader view needs for a book in one read.
    ///
    /// Returns `None` if the book does not exist.
    pub async fn open_book(&self, book_id: i64) -> StoreResult<Option<ReadingContext>> {
        let scope = [BOOK, TABLE_OF_CONTENTS, READING_PROGRESS, SETTING];
        self.store
            .execute(scope, TransactionMode::ReadOnly, |ops| async move {
                let book = ops.get_by_key(BOOK, book_id);
                let toc = ops.get_by_key(TABLE_OF_CONTENTS, book_id);
                let progress = ops.get_by_key(READING_PROGRESS, book_id);
                let setting = ops.get_by_key(SETTING, READER_SETTING_ID);

                let Some(book) = book.await? else {
                    return Ok(None);
                };
                let table_of_contents = toc.await?.map(serde_json::from_value).transpose()?;
                let progress = match progress.await? {
                    Some(record) => serde_json::from_value(record)?,
                    None => ReadingProgress::start(book_id),
                };
                let setting = match setting.await? {
                    Some(record) => serde_json::from_value(record)?,
                    None => ReaderSetting::default(),
                };
                Ok(Some(ReadingContext {
                    book: serde_json::from_value(book)?,
                    table_of_contents,
                    progress,
                    setting,
                }))
            })
            .await
    }
}
