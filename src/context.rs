//! Application context: one place that owns every component handle.
//!
//! Commands and the pipeline service construct a context from `Settings`
//! and pass it around explicitly; there are no global singletons.

use std::sync::Arc;
use std::time::Duration;

use crate::archive::{ArchiveHttpClient, ChroniclingAmericaClient, IssueDateProvider, CHRONICLING_AMERICA_BASE};
use crate::config::Settings;
use crate::connector::{MainDbConnector, MainStore};
use crate::errors::Result;
use crate::ocr::{OcrEngine, TesseractEngine};
use crate::repository::{migrations, AsyncSqlitePool, RepositoryStore, WorkQueue};
use crate::search::{SearchEngine, SearchIndex};
use crate::storage::RepositoryLayout;

/// Default HTTP deadline for archive calls.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared handles for all components.
pub struct AppContext {
    pub settings: Settings,
    pub repo_pool: AsyncSqlitePool,
    pub store: RepositoryStore,
    pub queue: WorkQueue,
    pub archive: ChroniclingAmericaClient,
    pub search: SearchEngine,
    pub connector: MainDbConnector,
    pub ocr_engine: Arc<dyn OcrEngine>,
}

impl AppContext {
    /// Open (creating when absent) every store and wire the components.
    pub async fn initialize(settings: Settings) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.repository_path)?;
        for db in [
            &settings.database_path,
            &settings.search_index_path,
            &settings.main_database_path,
        ] {
            if let Some(parent) = db.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let repo_pool = AsyncSqlitePool::from_path(&settings.database_path);
        let search_pool = AsyncSqlitePool::from_path(&settings.search_index_path);
        let main_pool = AsyncSqlitePool::from_path(&settings.main_database_path);
        migrations::init_repository_schema(&repo_pool).await?;
        migrations::init_search_schema(&search_pool).await?;
        migrations::init_main_schema(&main_pool).await?;

        let layout = RepositoryLayout::new(&settings.repository_path);
        let store = RepositoryStore::new(repo_pool.clone(), layout);
        let queue = WorkQueue::new(repo_pool.clone());

        let http = ArchiveHttpClient::new(
            settings.downloader.rate_limit,
            settings.downloader.retry_attempts,
            HTTP_TIMEOUT,
        );
        let dates = IssueDateProvider::new(http.clone(), CHRONICLING_AMERICA_BASE)
            .with_cache_file(settings.repository_path.join("issue_dates.json"));
        let archive =
            ChroniclingAmericaClient::new(http, CHRONICLING_AMERICA_BASE).with_date_provider(dates);

        let main = MainStore::new(main_pool);
        let search = SearchEngine::new(
            SearchIndex::new(search_pool),
            store.clone(),
            main.clone(),
        );
        let connector = MainDbConnector::new(store.clone(), repo_pool.clone(), main);

        let ocr_engine: Arc<dyn OcrEngine> =
            Arc::new(TesseractEngine::new(settings.ocr.language.clone()));

        Ok(Arc::new(Self {
            settings,
            repo_pool,
            store,
            queue,
            archive,
            search,
            connector,
            ocr_engine,
        }))
    }
}
