use std::sync::Arc;

use common::{Error, Result, RetryPolicy, ShutdownSignal};

use crate::store::{Cursor, Document, DocumentStore, Query};

/// Pages through the results of a query.
///
/// Each page continues from the ordering value and id of the last document
/// of the previous page, so documents deleted or inserted behind the cursor
/// do not shift later pages. A page shorter than the batch size ends the
/// iteration.
#[derive(Debug)]
pub struct BatchIterator {
    store: Arc<dyn DocumentStore>,
    query: Query,
    batch_size: usize,
    retry: RetryPolicy,
    shutdown: ShutdownSignal,
    cursor: Option<Cursor>,
    exhausted: bool,
}

impl BatchIterator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        query: Query,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            query,
            batch_size: batch_size.max(1),
            retry,
            shutdown: ShutdownSignal::never(),
            cursor: None,
            exhausted: false,
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Next page, or `None` once the results are exhausted.
    pub async fn get_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if self.exhausted {
            return Ok(None);
        }
        if self.shutdown.is_shutdown() {
            return Err(Error::interrupted(format!(
                "shutdown requested while iterating '{}'",
                self.query.collection
            )));
        }

        let mut page_query = self.query.clone().limit(self.batch_size);
        page_query.start_after = self.cursor.clone();

        let store = &self.store;
        let page = self
            .retry
            .run("getBatch", || store.query(&page_query))
            .await?;

        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.cursor = Some(self.query.cursor_after(last));
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<Document>> {
        let mut all = Vec::new();
        while let Some(page) = self.get_batch().await? {
            all.extend(page);
        }
        Ok(all)
    }
}
