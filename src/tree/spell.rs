//! Fuzzy name matching.
//!
//! [`SpellChecker`] is a BK-tree over the lower-cased distinct names of an
//! index. Distances are Damerau-Levenshtein distances (`strsim`), so an
//! adjacent transposition costs one edit. A query matches every name within
//! [`edit_distance_threshold`] edits.
//!
//! The checker is self-contained: it only sees a list of words, and callers
//! only see `find_similar_words`, so the matching strategy can be replaced
//! without touching the index.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use strsim::damerau_levenshtein;

/// Maximum edit distance for a query of `length` characters.
pub fn edit_distance_threshold(length: usize) -> usize {
    if length <= 4 {
        1
    } else {
        2
    }
}

#[derive(Debug)]
struct BkNode {
    word: String,
    children: Vec<(usize, usize)>,
}

#[derive(Debug, Default)]
pub struct SpellChecker {
    nodes: Vec<BkNode>,
}

impl SpellChecker {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = words
            .into_iter()
            .map(|word| word.as_ref().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();

        let mut checker = Self {
            nodes: Vec::with_capacity(distinct.len()),
        };
        for word in distinct {
            checker.insert(word);
        }
        checker
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, word: String) {
        if self.nodes.is_empty() {
            self.nodes.push(BkNode {
                word,
                children: Vec::new(),
            });
            return;
        }

        let mut current = 0;
        loop {
            let distance = damerau_levenshtein(&self.nodes[current].word, &word);
            if distance == 0 {
                return;
            }

            let existing = self.nodes[current]
                .children
                .iter()
                .find(|(edge, _)| *edge == distance)
                .map(|(_, child)| *child);

            match existing {
                Some(child) => current = child,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(BkNode {
                        word,
                        children: Vec::new(),
                    });
                    self.nodes[current].children.push((distance, index));
                    return;
                }
            }
        }
    }

    /// Lower-cased names within the edit-distance threshold of `query`,
    /// closest first, ties in alphabetical order.
    pub fn find_similar_words(&self, query: &str) -> Vec<String> {
        if self.nodes.is_empty() || query.is_empty() {
            return Vec::new();
        }

        let query = query.to_lowercase();
        let threshold = edit_distance_threshold(query.chars().count());
        let mut matches: Vec<(usize, &str)> = Vec::new();
        let mut pending = vec![0usize];

        while let Some(index) = pending.pop() {
            let node = &self.nodes[index];
            let distance = damerau_levenshtein(&node.word, &query);
            if distance <= threshold {
                matches.push((distance, node.word.as_str()));
            }

            let low = distance.saturating_sub(threshold);
            let high = distance + threshold;
            pending.extend(
                node.children
                    .iter()
                    .filter(|(edge, _)| *edge >= low && *edge <= high)
                    .map(|(_, child)| *child),
            );
        }

        matches.sort();
        matches.into_iter().map(|(_, word)| word.to_string()).collect()
    }
}

/// A spell checker computed in the background on first demand.
///
/// `get` never blocks: it returns `None` until the computation has finished.
#[derive(Debug, Default)]
pub struct LazySpellChecker {
    cell: Arc<OnceCell<SpellChecker>>,
    started: AtomicBool,
}

impl LazySpellChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&SpellChecker> {
        self.cell.get()
    }

    /// Starts the background computation if it has not been started and a
    /// tokio runtime is available.
    pub fn start<F>(&self, words: F)
    where
        F: FnOnce() -> Vec<String> + Send + 'static,
    {
        if self.cell.get().is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let cell = self.cell.clone();
        handle.spawn_blocking(move || {
            cell.get_or_init(|| SpellChecker::new(words()));
        });
    }

    /// Waits for the spell checker, computing it on a blocking thread if
    /// necessary.
    pub async fn wait<F>(&self, words: F) -> &SpellChecker
    where
        F: FnOnce() -> Vec<String> + Send + 'static,
    {
        if self.cell.get().is_none() {
            self.started.store(true, Ordering::Release);
            let cell = self.cell.clone();
            let built = tokio::task::spawn_blocking(move || {
                cell.get_or_init(|| SpellChecker::new(words()));
            })
            .await;
            if let Err(e) = built {
                tracing::warn!("Spell checker computation failed: {}", e);
            }
        }
        self.cell.get_or_init(SpellChecker::default)
    }
}
