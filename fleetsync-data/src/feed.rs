//! Draining paginated change feeds.
//!
//! A feed call returns at most a fixed number of records. The synchronizer
//! keeps calling, feeding each returned token into the next request, until a
//! page comes back short of the ceiling. Callers own their tokens: a batch
//! hands back the token to commit and leaves committing to them, so a failed
//! drain never moves a token.

use fleetsync_core::{FeedError, FeedRecord, FeedSource, FeedStart, FeedToken, Keyed};
use log::debug;

use crate::store::KeyedStore;

/// Records drained from one feed and the token that follows them.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedBatch<T> {
    /// Records in delivery order across all pages.
    pub records: Vec<T>,
    /// Token to resume from once the records are safely handled.
    pub to_token: FeedToken,
    /// Number of pages requested.
    pub pages: usize,
}

/// Drives feeds on a [`FeedSource`] to exhaustion.
#[derive(Debug)]
pub struct FeedSynchronizer<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S> FeedSynchronizer<'a, S>
where
    S: FeedSource + ?Sized,
{
    /// Wrap a source.
    #[must_use]
    pub const fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Read every page of `T` available after `start`.
    ///
    /// Any failure discards the pages read so far; the caller's token stays
    /// where it was.
    ///
    /// # Errors
    ///
    /// Returns the first [`FeedError`] raised by the source.
    pub async fn sync_once<T: FeedRecord>(&self, start: FeedStart) -> Result<FeedBatch<T>, FeedError> {
        let limit = T::KIND.results_limit();
        let mut records = Vec::new();
        let mut next = start;
        let mut pages = 0_usize;
        loop {
            let page = T::fetch(self.source, next, limit).await?;
            pages += 1;
            let exhausted = page.records.len() < limit;
            records.extend(page.records);
            next = FeedStart::Token(page.to_version);
            if exhausted {
                debug!(
                    "{} feed drained: {} records over {pages} page(s), token {}",
                    T::KIND,
                    records.len(),
                    page.to_version
                );
                return Ok(FeedBatch {
                    records,
                    to_token: page.to_version,
                    pages,
                });
            }
        }
    }

    /// Read every page of `T` after `token`, converting each record and
    /// merging each page into `store` as it arrives.
    ///
    /// `token` advances with every merged page, so a failure mid-drain keeps
    /// the pages already merged and resumes after them next time. A page
    /// whose conversion fails is not merged and does not move the token.
    ///
    /// # Errors
    ///
    /// Returns feed failures converted into `E`, or the first conversion
    /// error.
    pub async fn sync_into<T, U, E, F>(
        &self,
        store: &mut KeyedStore<U>,
        token: &mut FeedToken,
        mut convert: F,
    ) -> Result<usize, E>
    where
        T: FeedRecord,
        U: Keyed,
        E: From<FeedError>,
        F: FnMut(T) -> Result<U, E>,
    {
        let limit = T::KIND.results_limit();
        let mut merged = 0_usize;
        loop {
            let page = T::fetch(self.source, FeedStart::Token(*token), limit).await?;
            let exhausted = page.records.len() < limit;
            let converted = page
                .records
                .into_iter()
                .map(&mut convert)
                .collect::<Result<Vec<_>, E>>()?;
            merged += store.merge_page(converted).total();
            *token = page.to_version;
            if exhausted {
                debug!("{} cache merged {merged} records, token {token}", T::KIND);
                return Ok(merged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsync_core::test_support::{StubFeedSource, block_on_for_tests};
    use fleetsync_core::{DEVICE_RESULTS_LIMIT, Device, FeedKind, FeedPage, LogRecord};
    use rstest::rstest;

    fn devices(prefix: &str, count: usize) -> Vec<Device> {
        (0..count)
            .map(|index| Device::new(format!("{prefix}{index}"), "", ""))
            .collect()
    }

    #[rstest]
    fn keeps_paging_until_a_short_page() {
        let stub = StubFeedSource::new();
        stub.push_devices(FeedPage::new(
            devices("a", DEVICE_RESULTS_LIMIT),
            FeedToken::new(10),
        ));
        stub.push_devices(FeedPage::new(devices("b", 3), FeedToken::new(11)));

        let sync = FeedSynchronizer::new(&stub);
        let batch = block_on_for_tests(sync.sync_once::<Device>(FeedStart::Token(FeedToken::ZERO)))
            .expect("drain should succeed");

        assert_eq!(batch.pages, 2);
        assert_eq!(batch.records.len(), DEVICE_RESULTS_LIMIT + 3);
        assert_eq!(batch.to_token, FeedToken::new(11));
        assert_eq!(
            stub.feed_starts(FeedKind::Device),
            vec![
                FeedStart::Token(FeedToken::ZERO),
                FeedStart::Token(FeedToken::new(10))
            ]
        );
    }

    #[rstest]
    fn failure_discards_partial_pages() {
        let stub = StubFeedSource::new();
        stub.push_devices(FeedPage::new(
            devices("a", DEVICE_RESULTS_LIMIT),
            FeedToken::new(10),
        ));
        stub.fail_feed_call(
            2,
            FeedError::Transport {
                method: "GetFeed",
                message: "connection reset".to_owned(),
            },
        );

        let sync = FeedSynchronizer::new(&stub);
        let result = block_on_for_tests(sync.sync_once::<Device>(FeedStart::Token(FeedToken::ZERO)));

        assert!(matches!(result, Err(FeedError::Transport { .. })));
    }

    #[rstest]
    fn sync_into_advances_token_per_merged_page() {
        let stub = StubFeedSource::new();
        stub.push_devices(FeedPage::new(
            devices("a", DEVICE_RESULTS_LIMIT),
            FeedToken::new(10),
        ));
        stub.fail_feed_call(
            2,
            FeedError::Unavailable {
                method: "GetFeed",
                message: "database busy".to_owned(),
            },
        );
        let mut store = KeyedStore::new();
        let mut token = FeedToken::ZERO;

        let sync = FeedSynchronizer::new(&stub);
        let result = block_on_for_tests(sync.sync_into::<Device, Device, FeedError, _>(
            &mut store,
            &mut token,
            Ok,
        ));

        assert!(matches!(result, Err(FeedError::Unavailable { .. })));
        assert_eq!(token, FeedToken::new(10));
        assert_eq!(store.len(), DEVICE_RESULTS_LIMIT);
    }

    #[rstest]
    fn starting_from_a_time_reports_the_returned_token() {
        let stub = StubFeedSource::new();
        let since = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        stub.push_log_records(FeedPage::new(Vec::new(), FeedToken::new(99)));

        let sync = FeedSynchronizer::new(&stub);
        let batch = block_on_for_tests(sync.sync_once::<LogRecord>(FeedStart::Since(since)))
            .expect("drain should succeed");

        assert_eq!(batch.to_token, FeedToken::new(99));
        assert_eq!(batch.pages, 1);
        assert_eq!(
            stub.feed_starts(FeedKind::LogRecord),
            vec![FeedStart::Since(since)]
        );
    }
}
