//! Read-only queries over the registry index.
//!
//! Every query walks the index under read locks, copies out the matching
//! lines, and sorts after the locks are gone.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};

use super::Registry;
use crate::error::{AppError, Result};
use crate::models::status::record_message;
use crate::utils::title_case;

/// Results per page.
pub const PAGE_SIZE: usize = 20;

type Hit = (DateTime<Utc>, String);

impl Registry {
    /// Users whose nick or URL contains `term`, case-insensitively.
    ///
    /// An empty term lists everyone. Lines are `nick\turl\tjoinDate`,
    /// oldest member first.
    pub fn query_user(&self, term: &str) -> Vec<String> {
        let term = term.to_lowercase();
        let mut hits: Vec<(DateTime<Utc>, String, String)> = {
            let users = self.users.read();
            users
                .values()
                .filter_map(|handle| {
                    let user = handle.read();
                    let matched = term.is_empty()
                        || user.nick.to_lowercase().contains(&term)
                        || user.url.to_lowercase().contains(&term);
                    matched.then(|| {
                        let joined = user.join_date.to_rfc3339_opts(SecondsFormat::Secs, true);
                        let line = format!("{}\t{}\t{}", user.nick, user.url, joined);
                        (user.join_date, user.url.clone(), line)
                    })
                })
                .collect()
        };

        hits.sort();
        hits.into_iter().map(|(_, _, line)| line).collect()
    }

    /// Status records whose message contains `needle`, case-insensitively,
    /// newest first.
    pub fn query_in_status(&self, needle: &str) -> Result<Vec<String>> {
        if needle.is_empty() {
            return Err(AppError::EmptyQuery("status"));
        }
        Ok(into_lines(self.find_in_messages(needle)))
    }

    /// Every stored status record, newest first.
    pub fn query_all_statuses(&self) -> Vec<String> {
        into_lines(self.collect_statuses(|_| true))
    }

    /// Statuses tagged `#tag` in lower, title or upper case, newest first.
    ///
    /// The three variants are searched on separate blocking tasks and the
    /// union is returned once all of them finish.
    pub async fn query_tag(self: &Arc<Self>, tag: &str) -> Result<Vec<String>> {
        let tag = tag.trim_start_matches('#');
        if tag.is_empty() {
            return Err(AppError::EmptyQuery("tag"));
        }

        let search = |needle: String| {
            let registry = Arc::clone(self);
            tokio::task::spawn_blocking(move || registry.find_in_messages(&needle))
        };

        let (lower, title, upper) = tokio::try_join!(
            search(format!("#{}", tag.to_lowercase())),
            search(format!("#{}", title_case(tag))),
            search(format!("#{}", tag.to_uppercase())),
        )?;

        let mut seen = HashSet::new();
        let mut hits: Vec<Hit> = lower
            .into_iter()
            .chain(title)
            .chain(upper)
            .filter(|(_, line)| seen.insert(line.clone()))
            .collect();
        sort_newest_first(&mut hits);
        Ok(hits.into_iter().map(|(_, line)| line).collect())
    }

    /// Every status that carries at least one hashtag.
    pub fn query_tagged(&self) -> Vec<String> {
        into_lines(self.collect_statuses(|message| message.contains('#')))
    }

    /// Statuses mentioning `url` as `@<...url`, newest first.
    pub fn query_mentions(&self, url: &str) -> Result<Vec<String>> {
        if url.is_empty() {
            return Err(AppError::EmptyQuery("mention"));
        }
        let needle = format!("@<{url}");
        Ok(into_lines(self.collect_statuses(|message| message.contains(&needle))))
    }

    fn find_in_messages(&self, needle: &str) -> Vec<Hit> {
        let needle = needle.to_lowercase();
        self.collect_statuses(|message| message.to_lowercase().contains(&needle))
    }

    fn collect_statuses<F>(&self, matches: F) -> Vec<Hit>
    where
        F: Fn(&str) -> bool,
    {
        let users = self.users.read();
        let mut hits = Vec::new();
        for handle in users.values() {
            let user = handle.read();
            for (time, record) in &user.status {
                let message = record_message(record).unwrap_or_default();
                if matches(message) {
                    hits.push((*time, record.clone()));
                }
            }
        }
        hits
    }
}

fn sort_newest_first(hits: &mut [Hit]) {
    hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
}

fn into_lines(mut hits: Vec<Hit>) -> Vec<String> {
    sort_newest_first(&mut hits);
    hits.into_iter().map(|(_, line)| line).collect()
}

/// Slice out one page of results.
///
/// Pages start at 1; anything lower is treated as 1. Asking past the end
/// yields the last full page, or everything when there are fewer than
/// `PAGE_SIZE` results.
pub fn reduce_to_page<T>(page: i64, data: &[T]) -> &[T] {
    let page = usize::try_from(page.max(1)).unwrap_or(usize::MAX);
    let end = page.saturating_mul(PAGE_SIZE).min(data.len());
    let start = end.saturating_sub(PAGE_SIZE);
    &data[start..end]
}
